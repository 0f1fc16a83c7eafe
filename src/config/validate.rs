use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use crate::config::parser::ConfigError;
use crate::config::types::ServerConfig;

/// Structural checks that abort startup (§7: malformed configuration is
/// always a fatal startup error, never a best-effort fallback).
pub fn check_structural_invariants(servers: &[ServerConfig]) -> Result<(), ConfigError> {
    if servers.is_empty() {
        return Err(ConfigError {
            message: "configuration defines no server blocks".to_string(),
            loc: None,
            context: Vec::new(),
        });
    }
    for server in servers {
        if server.listen.is_empty() {
            return Err(ConfigError {
                message: format!("server '{}' has no 'listen' directive", server.server_names.join(",")),
                loc: None,
                context: Vec::new(),
            });
        }
        for location in &server.locations {
            if let Some((code, _)) = location.redirect {
                if !(300..=399).contains(&code) {
                    return Err(ConfigError {
                        message: format!("location '{}' has redirect code {code} outside 300-399", location.path),
                        loc: None,
                        context: Vec::new(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Drops server blocks whose `(listen, server_name)` combination collides
/// with another, or whose listen pair mixes a wildcard bind with a specific
/// address on the same port (the OS would refuse one of the two binds
/// anyway). Logs a warning per dropped configuration rather than aborting
/// startup, matching nginx's own `-t` leniency for this class of conflict.
pub fn validate_configs(configs: Vec<ServerConfig>) -> Vec<ServerConfig> {
    let mut conflict_indices = HashSet::new();

    let mut usage_map: HashMap<(IpAddr, u16, String), Vec<usize>> = HashMap::new();
    for (idx, config) in configs.iter().enumerate() {
        for (addr, port) in &config.listen {
            for name in &config.server_names {
                usage_map
                    .entry((*addr, *port, name.clone()))
                    .or_default()
                    .push(idx);
            }
        }
    }

    for ((addr, port, name), indices) in &usage_map {
        if indices.len() > 1 {
            log::warn!(
                "conflict: multiple servers bind {addr}:{port} with server_name '{name}'; dropping {} configurations",
                indices.len()
            );
            conflict_indices.extend(indices.iter().copied());
        }
    }

    let mut port_hosts: HashMap<u16, HashSet<IpAddr>> = HashMap::new();
    for config in &configs {
        for (addr, port) in &config.listen {
            port_hosts.entry(*port).or_default().insert(*addr);
        }
    }
    let wildcard: IpAddr = "0.0.0.0".parse().unwrap();
    for (port, hosts) in &port_hosts {
        if hosts.contains(&wildcard) && hosts.len() > 1 {
            log::warn!("bind conflict: port {port} mixes wildcard 0.0.0.0 with specific addresses {hosts:?}");
            for (idx, config) in configs.iter().enumerate() {
                if config.listen.iter().any(|(_, p)| p == port) {
                    conflict_indices.insert(idx);
                }
            }
        }
    }

    for (idx, config) in configs.iter().enumerate() {
        for (code, path) in &config.error_pages {
            if std::fs::metadata(path).is_err() {
                log::warn!(
                    "server '{}' error_page {code} points at '{path}', which does not exist yet; it will be served as a fallback plain-text error if still missing at request time",
                    config.server_names.join(",")
                );
            }
        }
        if std::fs::metadata(&config.root).is_err() {
            log::warn!("server '{}' root '{}' does not exist", config.server_names.join(","), config.root);
        }
    }

    configs
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| !conflict_indices.contains(idx))
        .map(|(_, c)| c)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_config(host: &str, ports: Vec<u16>, name: &str) -> ServerConfig {
        let addr: IpAddr = host.parse().unwrap();
        let mut c = ServerConfig::default();
        c.listen = ports.into_iter().map(|p| (addr, p)).collect();
        c.server_names = vec![name.to_string()];
        c
    }

    #[test]
    fn no_conflicts_keeps_both() {
        let configs = vec![
            make_config("127.0.0.1", vec![8001], "s1"),
            make_config("127.0.0.1", vec![8002], "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn distinct_server_names_on_same_listen_is_ok() {
        let configs = vec![
            make_config("127.0.0.1", vec![8080], "example.com"),
            make_config("127.0.0.1", vec![8080], "api.example.com"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn exact_duplicate_drops_both() {
        let configs = vec![
            make_config("127.0.0.1", vec![8080], "same.com"),
            make_config("127.0.0.1", vec![8080], "same.com"),
            make_config("127.0.0.1", vec![8081], "other.com"),
        ];
        let valid = validate_configs(configs);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].server_names, vec!["other.com"]);
    }

    #[test]
    fn partial_port_overlap_drops_both_configs() {
        let configs = vec![
            make_config("127.0.0.1", vec![80, 81], "foo"),
            make_config("127.0.0.1", vec![80], "foo"),
        ];
        assert_eq!(validate_configs(configs).len(), 0);
    }

    #[test]
    fn wildcard_vs_specific_is_a_bind_conflict() {
        let configs = vec![
            make_config("0.0.0.0", vec![8080], "s1"),
            make_config("127.0.0.1", vec![8080], "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 0);
    }

    #[test]
    fn wildcard_vhosting_is_fine() {
        let configs = vec![
            make_config("0.0.0.0", vec![8080], "s1"),
            make_config("0.0.0.0", vec![8080], "s2"),
        ];
        assert_eq!(validate_configs(configs).len(), 2);
    }

    #[test]
    fn missing_error_page_file_is_a_warning_not_a_drop() {
        let mut config = make_config("127.0.0.1", vec![8080], "s1");
        config.error_pages.insert(404, "/non/existent/err.html".to_string());
        assert_eq!(validate_configs(vec![config]).len(), 1);
    }

    #[test]
    fn structural_check_rejects_empty_server_list() {
        assert!(check_structural_invariants(&[]).is_err());
    }

    #[test]
    fn structural_check_rejects_server_without_listen() {
        let mut c = ServerConfig::default();
        c.listen.clear();
        assert!(check_structural_invariants(std::slice::from_ref(&c)).is_err());
    }
}
