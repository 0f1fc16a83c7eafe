use crate::prelude::*;
use crate::router::ResolvedRoute;

/// Deletes a file under the matched route's root. Canonicalizes both the
/// root and the target and requires the target stay under the root, which
/// is what actually stops `DELETE /../../etc/passwd` — checking the raw
/// path string is not enough once symlinks or `..` segments are involved.
pub fn handle_delete(request: &HttpRequest, route: &ResolvedRoute, s_cfg: &Arc<ServerConfig>) -> HttpResponse {
    let path_only = request.url.split('?').next().unwrap_or(&request.url);
    let target_path = PathBuf::from(&route.root).join(path_only.trim_start_matches('/'));

    let absolute_root = match PathBuf::from(&route.root).canonicalize() {
        Ok(path) => path,
        Err(_) => return handle_error(HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)),
    };

    let absolute_target = match target_path.canonicalize() {
        Ok(path) => path,
        Err(e) => {
            return match e.kind() {
                ErrorKind::NotFound => handle_error(HTTP_NOT_FOUND, Some(s_cfg)),
                _ => handle_error(HTTP_FORBIDDEN, Some(s_cfg)),
            };
        }
    };

    if !absolute_target.starts_with(&absolute_root) {
        return handle_error(HTTP_FORBIDDEN, Some(s_cfg));
    }

    if absolute_target.is_dir() {
        return handle_error(HTTP_FORBIDDEN, Some(s_cfg));
    }

    match fs::remove_file(&absolute_target) {
        Ok(_) => HttpResponse::new(204, "No Content"),
        Err(e) => match e.kind() {
            ErrorKind::PermissionDenied => handle_error(HTTP_FORBIDDEN, Some(s_cfg)),
            _ => handle_error(HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)),
        },
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
            allowed_methods: vec!["DELETE".to_string()],
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
    fn deletes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gone.txt"), b"x").unwrap();
        let s_cfg = Arc::new(ServerConfig::default());

        let response = handle_delete(&request("/gone.txt"), &route(dir.path().to_str().unwrap()), &s_cfg);
        assert_eq!(response.status_code, 204);
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[test]
    fn rejects_traversal_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let sibling = tempfile::tempdir().unwrap();
        std::fs::write(sibling.path().join("secret.txt"), b"x").unwrap();
        let s_cfg = Arc::new(ServerConfig::default());

        let traversal = format!(
            "/../{}/secret.txt",
            sibling.path().file_name().unwrap().to_str().unwrap()
        );
        let response = handle_delete(&request(&traversal), &route(dir.path().to_str().unwrap()), &s_cfg);
        assert_eq!(response.status_code, 403);
        assert!(sibling.path().join("secret.txt").exists());
    }

    #[test]
    fn missing_file_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let s_cfg = Arc::new(ServerConfig::default());

        let response = handle_delete(&request("/missing.txt"), &route(dir.path().to_str().unwrap()), &s_cfg);
        assert_eq!(response.status_code, 404);
    }
}
