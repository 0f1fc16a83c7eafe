pub use crate::config::{AppConfig, LocationConfig, ServerConfig};
pub use crate::error::Result;
pub use crate::http::*;

pub use log::{debug, error, info, trace, warn};
pub use mio::{
    event::Event,
    net::{TcpListener, TcpStream},
    Events, Interest, Poll, Token,
};
pub use std::collections::HashMap;
pub use std::fs::{self, File, OpenOptions};
pub use std::io::{ErrorKind, Read, Write};
pub use std::net::SocketAddr;
pub use std::os::unix::fs::MetadataExt;
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

pub use std::{
    fmt::{self, Display},
    io,
    os::{
        fd::{FromRawFd, IntoRawFd},
        unix::net::UnixStream,
    },
    process::{Command, Stdio},
    str::FromStr,
    time::SystemTime,
};

pub use crate::{
    cgi::{build_cgi_env, check_time_out_cgi, cleanup_cgi, force_cgi_timeout, handle_cgi_event, CgiParsingState},
    handlers::{handle_delete, handle_get},
    http::HttpResponse,
    router::RoutingError,
    server::Server,
};

pub const READ_BUF_SIZE: usize = 4096;
// 2xx Success
pub const HTTP_OK: u16 = 200;

// 4xx Client Errors
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_URI_TOO_LONG: u16 = 414;

// 5xx Server Errors
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const GATEWAY_TIMEOUT: u16 = 504;

pub const HTTP_FOUND: u16 = 302;
pub const HTTP_CREATED: u16 = 201;

pub const ONE_MB: usize = 1_024 * 1024;
pub const MAX_READ_DATA: usize = u16::MAX as usize; // 64KB

/// How long an idle connection (no bytes read or written) is kept open.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);
/// How long a CGI child is allowed to run before being killed.
pub const TIMEOUT_CGI: Duration = Duration::from_secs(10);
/// How often the event loop sweeps connections/purgatory for timeouts.
pub const CLEAN_UP: Duration = Duration::from_secs(1);
