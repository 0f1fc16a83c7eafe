use crate::prelude::*;
use crate::router::{self, RoutingError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    DELETE,
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::DELETE => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq)]
pub enum ParsingState {
    RequestLine,
    Headers,
    HeadersDone,
    Body,
    ChunkedBody,
    Complete,
    Error,
}

const CRLF_LEN: usize = 2;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("incomplete request line")]
    IncompleteRequestLine,
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("invalid HTTP method")]
    InvalidMethod,
    #[error("invalid request target")]
    InvalidTarget,
    #[error("invalid UTF-8 in request")]
    InvalidUtf8,
    #[error("header line too long")]
    HeaderTooLong,
    #[error("invalid chunk size")]
    InvalidChunkSize,
    #[error("payload too large")]
    PayloadTooLarge,
}

impl From<std::string::FromUtf8Error> for ParseError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        ParseError::InvalidUtf8
    }
}

#[derive(Debug)]
pub enum ChunkState {
    ReadSize,
    ReadData(usize),
    ReadTrailingCRLF,
    ReadTrailers,
}

#[derive(Debug)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    pub trailers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub buffer: Vec<u8>,
    pub cursor: usize,
    pub state: ParsingState,
    pub chunk_state: ChunkState,
}

impl Default for HttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpRequest {
    pub fn new() -> Self {
        HttpRequest {
            method: Method::GET,
            url: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            trailers: HashMap::new(),
            body: Vec::new(),
            buffer: Vec::with_capacity(4096),
            cursor: 0,
            state: ParsingState::RequestLine,
            chunk_state: ChunkState::ReadSize,
        }
    }

    pub fn clear(&mut self) {
        self.state = ParsingState::RequestLine;
        self.headers.clear();
        self.trailers.clear();
        self.body.clear();
        self.chunk_state = ChunkState::ReadSize;
    }

    pub fn finish_request(&mut self) {
        self.buffer.drain(..self.cursor);
        self.cursor = 0;
        self.clear();
    }

    /// Drives the parser over whatever bytes are currently buffered,
    /// converting a terminal parse error into the corresponding HTTP error
    /// response rather than letting it escape the connection (§7: request
    /// parsing errors never propagate past the connection boundary).
    pub fn proces_request(
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        conn: &mut HttpConnection,
    ) -> Result<bool> {
        let mut closed = false;
        loop {
            match HttpRequest::parse_request(conn, poll, next_token, cgi_to_client, token) {
                Ok(()) => {
                    conn.request.finish_request();
                    break;
                }
                Err(ParseError::IncompleteRequestLine) => break,
                Err(e) => {
                    let code = match e {
                        ParseError::PayloadTooLarge => HTTP_PAYLOAD_TOO_LARGE,
                        ParseError::InvalidMethod => HTTP_BAD_REQUEST,
                        ParseError::HeaderTooLong => HTTP_URI_TOO_LONG,
                        _ => HTTP_BAD_REQUEST,
                    };
                    let mut response = handle_error(code, conn.s_cfg.as_ref());
                    set_connection_header(&mut response, false);
                    closed = true;
                    conn.write_buffer.extend_from_slice(&response.to_bytes());
                    conn.request.finish_request();
                    break;
                }
            }
        }

        if !conn.write_buffer.is_empty() || matches!(conn.action, ActiveAction::FileDownload(_, _)) {
            poll.registry()
                .reregister(&mut conn.stream, token, Interest::READABLE | Interest::WRITABLE)?;
        }
        Ok(closed)
    }

    pub fn parse_request(
        conn: &mut HttpConnection,
        poll: &Poll,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        client_token: Token,
    ) -> core::result::Result<(), ParseError> {
        loop {
            let res = match conn.request.state {
                ParsingState::RequestLine => conn.request.parse_request_line(),
                ParsingState::Headers => HttpRequest::parse_headers(conn),
                ParsingState::HeadersDone => {
                    if let Some(res) = HttpRequest::setup_action(conn, poll, next_token, cgi_to_client, client_token)?
                    {
                        conn.write_buffer.extend_from_slice(&res.to_bytes());
                        conn.request.state = ParsingState::Complete;
                    }
                    Ok(())
                }
                ParsingState::Body => HttpRequest::parse_unchunked_body(poll, conn),
                ParsingState::ChunkedBody => match HttpRequest::parse_chunked_body(conn) {
                    Ok(true) => {
                        conn.request.state = ParsingState::Complete;
                        Ok(())
                    }
                    Ok(false) => return Err(ParseError::IncompleteRequestLine),
                    Err(e) => Err(e),
                },
                _ => break,
            };

            match res {
                Ok(_) => {
                    if conn.request.state == ParsingState::Complete {
                        break;
                    }
                }
                Err(ParseError::IncompleteRequestLine) => return Err(ParseError::IncompleteRequestLine),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn setup_action(
        conn: &mut HttpConnection,
        poll: &Poll,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
        client_token: Token,
    ) -> core::result::Result<Option<HttpResponse>, ParseError> {
        conn.keep_alive = negotiate_keep_alive(
            &conn.request.version,
            conn.request.headers.get("connection").map(String::as_str),
        );

        let Some(s_cfg) = conn.resolve_config() else {
            let mut response = handle_error(HTTP_BAD_REQUEST, None);
            set_connection_header(&mut response, conn.keep_alive);
            return Ok(Some(response));
        };
        conn.s_cfg = Some(Arc::clone(&s_cfg));

        let content_length = conn
            .request
            .headers
            .get("content-length")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);

        let is_chunked = conn
            .request
            .headers
            .get("transfer-encoding")
            .map(|v| v.contains("chunked"))
            .unwrap_or(false);

        if !is_chunked && content_length > s_cfg.client_max_body_size {
            return Err(ParseError::PayloadTooLarge);
        }

        conn.body_remaining = content_length;

        let request = &conn.request;
        let res = match router::find_route(&s_cfg, &request.url, &request.method) {
            Ok(route) => {
                if let Some((code, target)) = &route.redirect {
                    Some(HttpResponse::redirect(*code, target))
                } else if route.is_cgi_request(&request.url) {
                    match spawn_cgi(conn, &s_cfg, &route, poll, next_token, cgi_to_client, client_token, content_length)
                    {
                        Some(response) => Some(response),
                        None => None,
                    }
                } else {
                    match request.method {
                        Method::GET => {
                            let (response, action) = handle_get(request, &route, &s_cfg);
                            conn.action = action;
                            Some(response)
                        }
                        Method::DELETE => Some(handle_delete(request, &route, &s_cfg)),
                        Method::POST => Some(handle_error(HTTP_METHOD_NOT_ALLOWED, Some(&s_cfg))),
                    }
                }
            }
            Err(RoutingError::MethodNotAllowed(allowed)) => {
                let mut response = handle_error(HTTP_METHOD_NOT_ALLOWED, Some(&s_cfg));
                response.set_header("Allow", &allowed.join(", "));
                Some(response)
            }
            Err(RoutingError::NotFound) => Some(handle_error(HTTP_NOT_FOUND, Some(&s_cfg))),
        };

        if let Some(ref mut response) = res {
            set_connection_header(response, conn.keep_alive);
        }

        if res.is_none() {
            if is_chunked {
                conn.request.state = ParsingState::ChunkedBody;
            } else if content_length > 0 {
                conn.request.state = ParsingState::Body;
            } else if matches!(conn.action, ActiveAction::Cgi { .. }) {
                conn.request.state = ParsingState::Complete;
            } else {
                conn.request.state = ParsingState::Complete;
            }
        }

        Ok(res)
    }

    fn parse_request_line(&mut self) -> core::result::Result<(), ParseError> {
        if let Some(abs_index) = find_crlf(&self.buffer, self.cursor) {
            let line_bytes = &self.buffer[self.cursor..abs_index];
            let request_line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::MalformedRequestLine)?;

            let parts: Vec<&str> = request_line.split_whitespace().collect();
            if parts.len() != 3 {
                return Err(ParseError::MalformedRequestLine);
            }

            self.method = parts[0].parse()?;
            validate_request_target(parts[1])?;
            self.url = parts[1].to_string();
            self.version = parts[2].to_string();

            self.cursor = abs_index + CRLF_LEN;
            self.state = ParsingState::Headers;
        } else {
            return Err(ParseError::IncompleteRequestLine);
        }
        Ok(())
    }

    fn extract_and_parse_header(&mut self) -> core::result::Result<Option<(String, String)>, ParseError> {
        if let Some(abs_index) = find_crlf(&self.buffer, self.cursor) {
            let line_bytes = &self.buffer[self.cursor..abs_index];
            if line_bytes.is_empty() {
                self.cursor = abs_index + CRLF_LEN;
                return Ok(None);
            }
            let line = std::str::from_utf8(line_bytes).map_err(|_| ParseError::MalformedRequestLine)?;
            self.cursor = abs_index + CRLF_LEN;
            if let Some(sep) = line.find(':') {
                let key = line[..sep].trim().to_string();
                let val = line[sep + 1..].trim().to_string();
                return Ok(Some((key.to_ascii_lowercase(), val)));
            }
            Err(ParseError::MalformedRequestLine)
        } else {
            Err(ParseError::IncompleteRequestLine)
        }
    }

    fn parse_headers(conn: &mut HttpConnection) -> core::result::Result<(), ParseError> {
        loop {
            if conn.request.cursor > 8192 {
                return Err(ParseError::HeaderTooLong);
            }
            match conn.request.extract_and_parse_header()? {
                Some((k, v)) => {
                    conn.request.headers.insert(k, v);
                }
                None => {
                    conn.request.buffer.drain(..conn.request.cursor);
                    conn.request.cursor = 0;
                    conn.request.state = ParsingState::HeadersDone;
                    return Ok(());
                }
            };
        }
    }

    pub fn parse_unchunked_body(poll: &Poll, conn: &mut HttpConnection) -> core::result::Result<(), ParseError> {
        if conn.s_cfg.is_some() {
            let available = conn.request.buffer.len() - conn.request.cursor;
            let to_process = std::cmp::min(available, conn.body_remaining);

            if to_process > 0 {
                match &mut conn.action {
                    ActiveAction::Cgi { in_stream, .. } => {
                        let data = conn.request.buffer.drain(..to_process).collect::<Vec<u8>>();
                        conn.cgi_buffer.extend_from_slice(&data);
                        conn.body_remaining -= to_process;

                        if let Some(in_token) = conn.cgi_in_token {
                            if let Some(pipe) = in_stream {
                                poll.registry().reregister(pipe, in_token, Interest::WRITABLE).ok();
                            }
                        }
                    }
                    _ => {
                        conn.request.buffer.drain(..to_process);
                        conn.body_remaining -= to_process;
                    }
                }
            }
        }

        if conn.body_remaining == 0 {
            conn.request.state = ParsingState::Complete;
        } else {
            return Err(ParseError::IncompleteRequestLine);
        }

        Ok(())
    }

    pub fn parse_chunked_body(conn: &mut HttpConnection) -> core::result::Result<bool, ParseError> {
        if let Some(s_cfg) = conn.s_cfg.clone() {
            loop {
                match conn.request.chunk_state {
                    ChunkState::ReadSize => {
                        let current_len = conn.request.buffer.len();
                        if current_len == 0 {
                            return Ok(false);
                        }

                        let search_limit = std::cmp::min(current_len, 18);
                        match find_subsequence(&conn.request.buffer[..search_limit], b"\r\n", 0) {
                            Some(line_end) => {
                                let hex_str = String::from_utf8_lossy(&conn.request.buffer[..line_end]);
                                let chunk_size = usize::from_str_radix(hex_str.trim(), 16)
                                    .map_err(|_| ParseError::InvalidChunkSize)?;
                                if conn.total_body_read + chunk_size > s_cfg.client_max_body_size {
                                    return Err(ParseError::PayloadTooLarge);
                                }

                                if chunk_size == 0 {
                                    if conn.request.buffer.len() < line_end + 2 {
                                        return Ok(false);
                                    }
                                    conn.request.buffer.drain(..line_end + 2);
                                    conn.request.chunk_state = ChunkState::ReadTrailers;
                                    continue;
                                }

                                conn.request.chunk_state = ChunkState::ReadData(chunk_size);
                                conn.request.buffer.drain(..line_end + 2);
                            }
                            None => {
                                if current_len >= 18 {
                                    return Err(ParseError::InvalidChunkSize);
                                }
                                return Ok(false);
                            }
                        }
                    }

                    ChunkState::ReadData(remaining_size) => {
                        if conn.request.buffer.is_empty() {
                            return Ok(false);
                        }

                        let available = conn.request.buffer.len();
                        let to_read = std::cmp::min(available, remaining_size);
                        let data = conn.request.buffer.drain(..to_read).collect::<Vec<u8>>();

                        if let ActiveAction::Cgi { .. } = &conn.action {
                            conn.cgi_buffer.extend_from_slice(&data);
                        }

                        conn.total_body_read += to_read;
                        let new_remaining = remaining_size - to_read;

                        if new_remaining == 0 {
                            conn.request.chunk_state = ChunkState::ReadTrailingCRLF;
                        } else {
                            conn.request.chunk_state = ChunkState::ReadData(new_remaining);
                            return Ok(false);
                        }
                    }

                    ChunkState::ReadTrailingCRLF => {
                        if conn.request.buffer.len() < 2 {
                            return Ok(false);
                        }
                        if &conn.request.buffer[..2] != b"\r\n" {
                            return Err(ParseError::InvalidChunkSize);
                        }
                        conn.request.buffer.drain(..2);
                        conn.request.chunk_state = ChunkState::ReadSize;
                    }

                    ChunkState::ReadTrailers => {
                        if conn.request.buffer.len() > 8192 {
                            return Err(ParseError::HeaderTooLong);
                        }
                        match conn.request.extract_and_parse_header() {
                            Ok(Some((k, v))) => {
                                if let Some(allowed_trailers) = conn.request.headers.get("trailer") {
                                    if allowed_trailers.to_lowercase().contains(&k) {
                                        conn.request.trailers.insert(k, v);
                                    }
                                }
                                continue;
                            }
                            Ok(None) => {
                                conn.request.buffer.drain(..conn.request.cursor);
                                conn.request.cursor = 0;
                                return Ok(true);
                            }
                            Err(ParseError::IncompleteRequestLine) => return Ok(false),
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
        }
        Ok(true)
    }
}

/// Printable-ASCII-only, no control characters, and no directory-traversal
/// sequences. The teacher trusted the raw target string; an origin server
/// serving off a filesystem root cannot.
fn validate_request_target(target: &str) -> core::result::Result<(), ParseError> {
    if target.is_empty() || !target.starts_with('/') {
        return Err(ParseError::InvalidTarget);
    }
    if !target.bytes().all(|b| (0x20..0x7f).contains(&b)) {
        return Err(ParseError::InvalidTarget);
    }
    const FORBIDDEN: &[char] = &['<', '>', '"', '|', '^', '`', '{', '}'];
    if target.contains(FORBIDDEN) {
        return Err(ParseError::InvalidTarget);
    }
    const TRAVERSAL_PATTERNS: &[&str] = &["../", "..\\", "/..", "\\..", "/../", "\\..\\"];
    if target == ".." || TRAVERSAL_PATTERNS.iter().any(|p| target.contains(p)) {
        return Err(ParseError::InvalidTarget);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn spawn_cgi(
    conn: &mut HttpConnection,
    s_cfg: &Arc<ServerConfig>,
    route: &router::ResolvedRoute,
    poll: &Poll,
    next_token: &mut usize,
    cgi_to_client: &mut HashMap<Token, Token>,
    client_token: Token,
    content_length: usize,
) -> Option<HttpResponse> {
    let interpreter = route.cgi_pass.as_deref().unwrap_or("python3");
    let path_only = conn.request.url.split('?').next().unwrap_or(&conn.request.url);
    let script_path = PathBuf::from(&route.root).join(path_only.trim_start_matches('/'));

    let Ok((server_out_std, script_out_std)) = UnixStream::pair() else {
        return Some(handle_error(HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)));
    };
    server_out_std.set_nonblocking(true).ok();
    let mut server_out_mio = mio::net::UnixStream::from_std(server_out_std);

    let Ok((server_in_std, script_in_std)) = UnixStream::pair() else {
        return Some(handle_error(HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg)));
    };
    server_in_std.set_nonblocking(true).ok();
    let mut server_in_mio = mio::net::UnixStream::from_std(server_in_std);

    let script_output_file = unsafe { File::from_raw_fd(script_out_std.into_raw_fd()) };
    let script_input_file = unsafe { File::from_raw_fd(script_in_std.into_raw_fd()) };

    let mut cmd = Command::new(interpreter);
    cmd.arg(&script_path)
        .envs(build_cgi_env(conn, s_cfg, route, content_length))
        .stdin(Stdio::from(script_input_file))
        .stdout(Stdio::from(script_output_file))
        .stderr(Stdio::inherit());

    match cmd.spawn() {
        Ok(child) => {
            let out_token = Token(*next_token);
            *next_token += 1;
            poll.registry().register(&mut server_out_mio, out_token, Interest::READABLE).ok();

            let in_token = Token(*next_token);
            *next_token += 1;
            poll.registry().register(&mut server_in_mio, in_token, Interest::WRITABLE).ok();

            conn.cgi_out_token = Some(out_token);
            conn.cgi_in_token = Some(in_token);

            conn.action = ActiveAction::Cgi {
                out_stream: server_out_mio,
                in_stream: Some(server_in_mio),
                child,
                parse_state: CgiParsingState::ReadHeaders,
                header_buf: Vec::new(),
                start_time: Instant::now(),
            };

            cgi_to_client.insert(out_token, client_token);
            cgi_to_client.insert(in_token, client_token);
            None
        }
        Err(_) => Some(handle_error(HTTP_INTERNAL_SERVER_ERROR, Some(s_cfg))),
    }
}

fn find_crlf(buffer: &[u8], start_offset: usize) -> Option<usize> {
    let search_area = buffer.get(start_offset..)?;

    let mut current_pos = 0;
    while let Some(r_pos) = search_area[current_pos..].iter().position(|&b| b == b'\r') {
        let abs_r_pos_in_search = current_pos + r_pos;
        if search_area.get(abs_r_pos_in_search + 1) == Some(&b'\n') {
            return Some(start_offset + abs_r_pos_in_search);
        }
        current_pos = abs_r_pos_in_search + 1;
    }
    None
}

pub fn find_subsequence(buffer: &[u8], needle: &[u8], start_offset: usize) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    let search_area = buffer.get(start_offset..)?;
    let first_byte = needle[0];
    let mut current_pos = 0;

    while let Some(rel_pos) = search_area[current_pos..].iter().position(|&b| b == first_byte) {
        let abs_pos_in_search = current_pos + rel_pos;
        if let Some(candidate) = search_area.get(abs_pos_in_search..abs_pos_in_search + needle.len()) {
            if candidate == needle {
                return Some(start_offset + abs_pos_in_search);
            }
        } else {
            return None;
        }
        current_pos = abs_pos_in_search + 1;
    }
    None
}

impl Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} {}", self.method, self.url, self.version)?;
        for (key, value) in &self.headers {
            writeln!(f, "  {key}: {value}")?;
        }
        if !self.body.is_empty() {
            writeln!(f, "body: {} bytes", self.body.len())
        } else {
            writeln!(f, "body: <empty>")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_request_line() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /index.html HTTP/1.1\r\n");
        req.parse_request_line().unwrap();
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.url, "/index.html");
        assert_eq!(req.state, ParsingState::Headers);
    }

    #[test]
    fn rejects_traversal_in_target() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /../etc/passwd HTTP/1.1\r\n");
        assert_eq!(req.parse_request_line(), Err(ParseError::InvalidTarget));
    }

    #[test]
    fn rejects_backslash_dotdot_not_surrounded_by_separators() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /foo\\..\\x HTTP/1.1\r\n");
        assert_eq!(req.parse_request_line(), Err(ParseError::InvalidTarget));
    }

    #[test]
    fn rejects_mid_path_dotdot_without_trailing_slash() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /foo/..bar HTTP/1.1\r\n");
        assert_eq!(req.parse_request_line(), Err(ParseError::InvalidTarget));
    }

    #[test]
    fn rejects_non_printable_target() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /\x01bad HTTP/1.1\r\n");
        assert_eq!(req.parse_request_line(), Err(ParseError::InvalidTarget));
    }

    #[test]
    fn incomplete_request_line_waits_for_more_bytes() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET /index.html HTTP/1.1");
        assert_eq!(req.parse_request_line(), Err(ParseError::IncompleteRequestLine));
    }

    #[test]
    fn fragmented_headers_are_reassembled_across_calls() {
        let mut req = HttpRequest::new();
        req.buffer.extend_from_slice(b"GET / HTTP/1.1\r\nHost: ex");
        req.parse_request_line().unwrap();
        assert_eq!(req.extract_and_parse_header(), Err(ParseError::IncompleteRequestLine));
        req.buffer.extend_from_slice(b"ample.com\r\n\r\n");
        assert_eq!(
            req.extract_and_parse_header().unwrap(),
            Some(("host".to_string(), "example.com".to_string()))
        );
    }
}
