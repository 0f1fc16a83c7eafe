use origin_server::config::{self, check_structural_invariants, parse, validate_configs};

#[test]
fn parses_a_multi_server_config_with_locations() {
    let input = r#"
        server {
            listen 127.0.0.1 8080;
            server_name example.com;
            root ./www;
            index index.html;
            client_max_body_size 4096;
            error_page 404 /404.html;

            location /cgi-bin {
                cgi_pass /usr/bin/python3;
                cgi_extension .py;
                allowed_methods GET POST;
            }

            location /old {
                return 301 /new;
            }
        }

        server {
            listen 9090;
            server_name api.example.com;
        }
    "#;

    let cfg = parse(input).unwrap();
    assert_eq!(cfg.servers.len(), 2);

    let main = &cfg.servers[0];
    assert_eq!(main.server_names, vec!["example.com".to_string()]);
    assert_eq!(main.client_max_body_size, 4096);
    assert_eq!(main.error_pages.get(&404), Some(&"/404.html".to_string()));
    assert_eq!(main.locations.len(), 2);

    let cgi_loc = main.locations.iter().find(|l| l.path == "/cgi-bin").unwrap();
    assert!(cgi_loc.is_cgi());

    let redirect_loc = main.locations.iter().find(|l| l.path == "/old").unwrap();
    assert_eq!(redirect_loc.redirect, Some((301, "/new".to_string())));

    let api = &cfg.servers[1];
    assert_eq!(api.listen, vec![("0.0.0.0".parse().unwrap(), 9090)]);
}

#[test]
fn parses_colon_joined_host_port_listen_syntax() {
    let input = r#"
        server {
            listen 127.0.0.1:8080;
            server_name colon.example;
        }
    "#;
    let cfg = parse(input).unwrap();
    assert_eq!(cfg.servers[0].listen, vec![("127.0.0.1".parse().unwrap(), 8080)]);
}

#[test]
fn host_directive_supplies_the_address_for_a_bare_port_listen() {
    let input = r#"
        server {
            host 127.0.0.1;
            listen 8080;
            server_name host-directive.example;
        }
    "#;
    let cfg = parse(input).unwrap();
    assert_eq!(cfg.servers[0].listen, vec![("127.0.0.1".parse().unwrap(), 8080)]);
}

#[test]
fn rejects_syntactically_malformed_input() {
    let err = parse("server { listen ; }").unwrap_err();
    assert!(err.loc.is_some());
}

#[test]
fn structural_invariants_reject_empty_config() {
    let cfg = parse("").unwrap();
    assert!(check_structural_invariants(&cfg.servers).is_err());
}

#[test]
fn duplicate_vhosts_on_same_listen_are_dropped_with_a_warning() {
    let input = r#"
        server { listen 127.0.0.1 8080; server_name dup.com; }
        server { listen 127.0.0.1 8080; server_name dup.com; }
        server { listen 127.0.0.1 8081; server_name unique.com; }
    "#;
    let cfg = parse(input).unwrap();
    let survivors = validate_configs(cfg.servers);
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].server_names, vec!["unique.com".to_string()]);
}

#[test]
fn load_rejects_a_missing_file() {
    let err = config::load("/nonexistent/path/to/origin-server.conf").unwrap_err();
    assert!(format!("{err}").contains("reading config file"));
}

#[test]
fn load_parses_validates_and_returns_the_app_config() {
    let dir = tempfile::tempdir().unwrap();
    let conf_path = dir.path().join("test.conf");
    std::fs::write(&conf_path, "server { listen 127.0.0.1 8080; root ./www; }").unwrap();

    let app_config = config::load(conf_path.to_str().unwrap()).unwrap();
    assert_eq!(app_config.servers.len(), 1);
    assert_eq!(app_config.servers[0].root, "./www");
}
