use origin_server::config::parse;
use origin_server::http::Method;
use origin_server::router::{find_route, RoutingError};

fn config(input: &str) -> origin_server::config::ServerConfig {
    parse(input).unwrap().servers.into_iter().next().unwrap()
}

#[test]
fn root_location_resolves_to_vhost_root() {
    let cfg = config("server { listen 8080; root ./www; }");
    let route = find_route(&cfg, "/", &Method::GET).unwrap();
    assert_eq!(route.root, "./www");
}

#[test]
fn longest_prefix_location_wins_over_shorter_one() {
    let cfg = config(
        r#"
        server {
            listen 8080;
            location /a { root ./a; }
            location /a/b { root ./a/b; }
        }
        "#,
    );
    let route = find_route(&cfg, "/a/b/c", &Method::GET).unwrap();
    assert_eq!(route.root, "./a/b");
}

#[test]
fn method_not_allowed_carries_the_allow_list() {
    let cfg = config(
        r#"
        server {
            listen 8080;
            location /api { allowed_methods GET; }
        }
        "#,
    );
    let err = find_route(&cfg, "/api/users", &Method::DELETE).unwrap_err();
    match err {
        RoutingError::MethodNotAllowed(allowed) => assert_eq!(allowed, vec!["GET".to_string()]),
        RoutingError::NotFound => panic!("expected MethodNotAllowed"),
    }
}

#[test]
fn redirect_location_surfaces_code_and_target() {
    let cfg = config(
        r#"
        server {
            listen 8080;
            location /old { return 302 /new; }
        }
        "#,
    );
    let route = find_route(&cfg, "/old", &Method::GET).unwrap();
    assert_eq!(route.redirect, Some((302, "/new".to_string())));
}

#[test]
fn cgi_extension_drives_is_cgi_request() {
    let cfg = config(
        r#"
        server {
            listen 8080;
            location /cgi-bin {
                cgi_pass /usr/bin/python3;
                cgi_extension .py;
            }
        }
        "#,
    );
    let route = find_route(&cfg, "/cgi-bin/hello.py", &Method::GET).unwrap();
    assert!(route.is_cgi_request("/cgi-bin/hello.py"));
    assert!(!route.is_cgi_request("/cgi-bin/hello.txt"));
}

#[test]
fn unmatched_path_still_falls_back_to_vhost_allowed_methods() {
    let cfg = config("server { listen 8080; allowed_methods GET; }");
    let err = find_route(&cfg, "/anything", &Method::POST).unwrap_err();
    assert!(matches!(err, RoutingError::MethodNotAllowed(_)));
}
