use std::collections::HashMap;
use std::net::IpAddr;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SERVER_NAME: &str = "_";
pub const DEFAULT_MAX_BODY_SIZE: usize = 1_048_576; // 1MB
pub const DEFAULT_LOCATION_PATH: &str = "/";
pub const DEFAULT_ROOT: &str = "./www";
pub const DEFAULT_INDEX: &str = "index.html";

/// One `location` block. Unset `root`/`index`/`allowed_methods` fall back to
/// the owning `ServerConfig`'s values at lookup time (§4.4).
#[derive(Debug, Clone)]
pub struct LocationConfig {
    pub path: String,
    pub root: Option<String>,
    pub index: Option<String>,
    pub allowed_methods: Option<Vec<String>>,
    pub autoindex: bool,
    pub cgi_pass: Option<String>,
    pub cgi_extension: Option<String>,
    pub redirect: Option<(u16, String)>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_LOCATION_PATH.to_string(),
            root: None,
            index: None,
            allowed_methods: None,
            autoindex: false,
            cgi_pass: None,
            cgi_extension: None,
            redirect: None,
        }
    }
}

impl LocationConfig {
    pub fn is_cgi(&self) -> bool {
        self.cgi_pass.is_some()
    }
}

/// One `server` block: a set of `(bind address, port)` pairs plus the
/// `server_name` values used to disambiguate vhosts sharing a listen pair.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: Vec<(IpAddr, u16)>,
    pub server_names: Vec<String>,
    pub root: String,
    pub index: String,
    pub allowed_methods: Vec<String>,
    pub client_max_body_size: usize,
    pub error_pages: HashMap<u16, String>,
    pub locations: Vec<LocationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: Vec::new(),
            server_names: vec![DEFAULT_SERVER_NAME.to_string()],
            root: DEFAULT_ROOT.to_string(),
            index: DEFAULT_INDEX.to_string(),
            allowed_methods: vec!["GET".to_string(), "HEAD".to_string()],
            client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            error_pages: HashMap::new(),
            locations: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Longest-prefix match among this server's locations (§4.4).
    pub fn find_location(&self, path: &str) -> Option<&LocationConfig> {
        self.locations
            .iter()
            .filter(|loc| {
                path == loc.path
                    || path.starts_with(&format!("{}/", loc.path.trim_end_matches('/')))
            })
            .max_by_key(|loc| loc.path.len())
    }

    /// Case-insensitive exact match against the `Host:` header's hostname
    /// portion (port stripped). No wildcard fallback (§4.4): a request whose
    /// `Host` matches none of `server_names` is "no virtual host", not this
    /// server's default.
    pub fn matches_server_name(&self, host: &str) -> bool {
        let host = host.split(':').next().unwrap_or(host);
        self.server_names.iter().any(|n| n.eq_ignore_ascii_case(host))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub servers: Vec<ServerConfig>,
}

impl AppConfig {
    /// All distinct `(addr, port)` pairs the event loop needs to bind.
    pub fn listen_pairs(&self) -> Vec<(IpAddr, u16)> {
        let mut pairs = Vec::new();
        for server in &self.servers {
            for pair in &server.listen {
                if !pairs.contains(pair) {
                    pairs.push(*pair);
                }
            }
        }
        pairs
    }
}
