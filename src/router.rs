use crate::prelude::*;

/// Everything the rest of the connection pipeline needs once a request has
/// been matched to a `(vhost, location)` pair: the location's own settings
/// where set, the vhost's as fallback (§4.4).
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub location_path: String,
    pub root: String,
    pub index: String,
    pub allowed_methods: Vec<String>,
    pub autoindex: bool,
    pub cgi_pass: Option<String>,
    pub cgi_extension: Option<String>,
    pub redirect: Option<(u16, String)>,
}

impl ResolvedRoute {
    pub fn is_cgi_request(&self, url: &str) -> bool {
        self.cgi_extension.as_deref().map_or(false, |ext| url.ends_with(ext))
    }
}

#[derive(Debug)]
pub enum RoutingError {
    NotFound,
    MethodNotAllowed(Vec<String>),
}

/// Resolves a request path to a location inside the already-selected vhost.
/// Longest-prefix location match; an unmatched path still resolves, falling
/// back entirely to the vhost's own root/index/allowed_methods.
pub fn find_route(s_cfg: &ServerConfig, path: &str, method: &Method) -> Result<ResolvedRoute, RoutingError> {
    let location = s_cfg.find_location(path);

    let allowed_methods = location
        .and_then(|l| l.allowed_methods.clone())
        .unwrap_or_else(|| s_cfg.allowed_methods.clone());

    if !allowed_methods.contains(&method.to_string()) {
        return Err(RoutingError::MethodNotAllowed(allowed_methods));
    }

    let route = ResolvedRoute {
        location_path: location.map(|l| l.path.clone()).unwrap_or_else(|| "/".to_string()),
        root: location
            .and_then(|l| l.root.clone())
            .unwrap_or_else(|| s_cfg.root.clone()),
        index: location
            .and_then(|l| l.index.clone())
            .unwrap_or_else(|| s_cfg.index.clone()),
        allowed_methods,
        autoindex: location.map(|l| l.autoindex).unwrap_or(false),
        cgi_pass: location.and_then(|l| l.cgi_pass.clone()),
        cgi_extension: location.and_then(|l| l.cgi_extension.clone()),
        redirect: location.and_then(|l| l.redirect.clone()),
    };

    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn server() -> ServerConfig {
        let mut s = ServerConfig::default();
        s.listen = vec![("127.0.0.1".parse::<IpAddr>().unwrap(), 8080)];
        s.locations.push(LocationConfig {
            path: "/cgi-bin".to_string(),
            cgi_pass: Some("/usr/bin/python3".to_string()),
            cgi_extension: Some(".py".to_string()),
            allowed_methods: Some(vec!["GET".to_string(), "POST".to_string()]),
            ..Default::default()
        });
        s
    }

    #[test]
    fn falls_back_to_vhost_when_no_location_matches() {
        let s = server();
        let route = find_route(&s, "/missing-but-root", &Method::GET).unwrap();
        assert_eq!(route.root, s.root);
    }

    #[test]
    fn matches_longest_prefix_location() {
        let s = server();
        let route = find_route(&s, "/cgi-bin/hello.py", &Method::GET).unwrap();
        assert_eq!(route.location_path, "/cgi-bin");
        assert!(route.is_cgi_request("/cgi-bin/hello.py"));
    }

    #[test]
    fn disallowed_method_reports_allow_list() {
        let s = server();
        let err = find_route(&s, "/cgi-bin/hello.py", &Method::DELETE).unwrap_err();
        match err {
            RoutingError::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, vec!["GET".to_string(), "POST".to_string()])
            }
            _ => panic!("expected MethodNotAllowed"),
        }
    }
}
