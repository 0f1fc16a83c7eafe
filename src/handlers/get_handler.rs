use crate::prelude::*;
use crate::router::ResolvedRoute;

/// Resolves a GET request against its matched route to either a streamed
/// file, a generated directory listing, or an error response. Filesystem
/// existence is decided here, not in the router (§4.4/§4.5): a route can be
/// perfectly valid and still 404 at open time.
pub fn handle_get(request: &HttpRequest, route: &ResolvedRoute, s_cfg: &Arc<ServerConfig>) -> (HttpResponse, ActiveAction) {
    let path_only = request.url.split('?').next().unwrap_or(&request.url);
    let mut path = PathBuf::from(&route.root);
    path.push(path_only.trim_start_matches('/'));

    if path.is_dir() {
        let index_path = path.join(&route.index);
        if index_path.is_file() {
            return open_file(&index_path, s_cfg);
        }
        if route.autoindex {
            return (generate_autoindex(&path, &request.url), ActiveAction::None);
        }
        return (handle_error(HTTP_FORBIDDEN, Some(s_cfg)), ActiveAction::None);
    }

    open_file(&path, s_cfg)
}

fn open_file(path: &Path, s_cfg: &Arc<ServerConfig>) -> (HttpResponse, ActiveAction) {
    match File::open(path) {
        Ok(file) => match file.metadata() {
            Ok(metadata) => {
                let file_size = metadata.size() as usize;
                let mime_type = get_mime_type(path.extension().and_then(|s| s.to_str()));

                let mut response = HttpResponse::new(HTTP_OK, &HttpResponse::status_text(HTTP_OK));
                response.set_header("content-length", &file_size.to_string());
                response.set_header("content-type", mime_type);

                (response, ActiveAction::FileDownload(file, file_size))
            }
            Err(_) => (handle_error(HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)), ActiveAction::None),
        },
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::NotFound => HTTP_NOT_FOUND,
                ErrorKind::PermissionDenied => HTTP_FORBIDDEN,
                _ => HTTP_INTERNAL_SERVER_ERROR,
            };
            (handle_error(code, Some(s_cfg)), ActiveAction::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(root: &str) -> ResolvedRoute {
        ResolvedRoute {
            location_path: "/".to_string(),
            root: root.to_string(),
            index: "index.html".to_string(),
            allowed_methods: vec!["GET".to_string()],
            autoindex: false,
            cgi_pass: None,
            cgi_extension: None,
            redirect: None,
        }
    }

    fn request(url: &str) -> HttpRequest {
        let mut req = HttpRequest::new();
        req.url = url.to_string();
        req
    }

    #[test]
    fn serves_index_for_directory_request() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"hi").unwrap();
        let s_cfg = Arc::new(ServerConfig::default());

        let (response, action) = handle_get(&request("/"), &route(dir.path().to_str().unwrap()), &s_cfg);
        assert_eq!(response.status_code, 200);
        assert!(matches!(action, ActiveAction::FileDownload(_, 2)));
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let s_cfg = Arc::new(ServerConfig::default());

        let (response, action) = handle_get(&request("/missing.txt"), &route(dir.path().to_str().unwrap()), &s_cfg);
        assert_eq!(response.status_code, 404);
        assert!(matches!(action, ActiveAction::None));
    }

    #[test]
    fn directory_without_index_or_autoindex_is_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let s_cfg = Arc::new(ServerConfig::default());

        let (response, _) = handle_get(&request("/"), &route(dir.path().to_str().unwrap()), &s_cfg);
        assert_eq!(response.status_code, 403);
    }
}
