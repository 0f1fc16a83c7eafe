use origin_server::cgi::parse_cgi_headers;
use origin_server::config::ServerConfig;
use origin_server::http::{get_mime_type, handle_error, HttpResponse, Method};
use std::str::FromStr;
use std::sync::Arc;

#[test]
fn method_round_trips_through_display_and_from_str() {
    assert_eq!(Method::from_str("GET").unwrap(), Method::GET);
    assert_eq!(Method::from_str("DELETE").unwrap(), Method::DELETE);
    assert!(Method::from_str("PATCH").is_err());
    assert_eq!(Method::GET.to_string(), "GET");
}

#[test]
fn response_to_bytes_includes_status_line_and_body() {
    let mut res = HttpResponse::new(200, "OK");
    res.set_header("content-type", "text/plain");
    res.set_body(b"Hello Rust".to_vec(), "text/plain");

    let bytes = res.to_bytes();
    let s = String::from_utf8_lossy(&bytes);

    assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(s.contains("Content-Type: text/plain\r\n"));
    assert!(s.contains("Content-Length: 10\r\n"));
    assert!(s.ends_with("\r\n\r\nHello Rust"));
}

#[test]
fn handle_error_falls_back_to_plain_text_without_a_configured_error_page() {
    let res = handle_error(404, None);
    assert_eq!(res.status_code, 404);
    assert_eq!(String::from_utf8_lossy(&res.body), "404 Not Found");
}

#[test]
fn handle_error_serves_the_configured_error_page_when_present() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("oops.html"), b"<h1>gone</h1>").unwrap();

    let mut cfg = ServerConfig::default();
    cfg.root = dir.path().to_str().unwrap().to_string();
    cfg.error_pages.insert(404, "/oops.html".to_string());
    let cfg = Arc::new(cfg);

    let res = handle_error(404, Some(&cfg));
    assert_eq!(res.body, b"<h1>gone</h1>");
    assert_eq!(res.headers.get("content-type"), Some(&"text/html".to_string()));
}

#[test]
fn mime_type_falls_back_to_octet_stream_for_unknown_extensions() {
    assert_eq!(get_mime_type(Some("html")), "text/html");
    assert_eq!(get_mime_type(Some("weird")), "application/octet-stream");
    assert_eq!(get_mime_type(None), "application/octet-stream");
}

#[test]
fn parses_cgi_status_header_and_strips_it_from_the_header_list() {
    let (status, headers) = parse_cgi_headers(b"Status: 302 Found\r\nLocation: /new\r\n");
    assert_eq!(status, 302);
    assert_eq!(headers, vec![("location".to_string(), "/new".to_string())]);
}
