use crate::prelude::*;

/// High-level phase of a connection, tracked alongside the lower-level
/// `ActiveAction`/parser state so the timeout sweep and logging can report
/// something more useful than "busy".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Reading,
    GeneratingResponse,
    Writing,
    CgiWritingInput,
    CgiReadingOutput,
    Closing,
}

#[derive(Debug)]
pub struct HttpConnection {
    pub stream: TcpStream,
    pub write_buffer: Vec<u8>,
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub config_list: Vec<Arc<ServerConfig>>,
    pub s_cfg: Option<Arc<ServerConfig>>,
    pub action: ActiveAction,
    pub conn_state: ConnState,
    pub total_body_read: usize,
    pub body_remaining: usize,
    pub closed: bool,
    pub linger_until: Option<Instant>,
    pub cgi_in_token: Option<Token>,
    pub cgi_out_token: Option<Token>,
    pub cgi_buffer: Vec<u8>,
    pub last_activity: Instant,
    pub local_addr: SocketAddr,
    pub keep_alive: bool,
}

#[derive(Debug)]
pub enum ActiveAction {
    FileDownload(File, usize),
    Cgi {
        out_stream: mio::net::UnixStream,
        in_stream: Option<mio::net::UnixStream>,
        child: std::process::Child,
        parse_state: CgiParsingState,
        header_buf: Vec<u8>,
        start_time: Instant,
    },
    Discard,
    None,
}

impl HttpConnection {
    pub fn new(stream: TcpStream, local_addr: SocketAddr, config_list: Vec<Arc<ServerConfig>>) -> Self {
        Self {
            stream,
            write_buffer: Vec::new(),
            request: HttpRequest::new(),
            response: HttpResponse::new(200, "OK"),
            config_list,
            s_cfg: None,
            action: ActiveAction::None,
            conn_state: ConnState::Reading,
            total_body_read: 0,
            body_remaining: 0,
            closed: false,
            linger_until: None,
            cgi_in_token: None,
            cgi_out_token: None,
            cgi_buffer: Vec::new(),
            last_activity: Instant::now(),
            local_addr,
            keep_alive: true,
        }
    }

    pub fn should_close(&self) -> bool {
        self.closed && self.write_buffer.is_empty() && self.cgi_buffer.is_empty()
    }

    /// Picks the vhost among those sharing this connection's listen pair by
    /// an exact (case-insensitive) `server_name` match against the `Host:`
    /// header. No match is "no virtual host" (§4.4) — the caller answers 400
    /// rather than silently falling back to some other vhost on the port.
    pub fn resolve_config(&self) -> Option<Arc<ServerConfig>> {
        let hostname = self.request.headers.get("host").map(String::as_str).unwrap_or("");

        self.config_list.iter().find(|cfg| cfg.matches_server_name(hostname)).map(Arc::clone)
    }

    pub fn read_data(&mut self) -> core::result::Result<bool, ParseError> {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(true), // EOF
                Ok(n) => {
                    self.request.buffer.extend_from_slice(&buf[..n]);
                    if self.request.buffer.len() >= MAX_READ_DATA / 2 {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(_) => return Ok(true),
            }
        }
        Ok(false)
    }

    pub fn write_data(&mut self) -> bool {
        match self.stream.write(&self.write_buffer) {
            Ok(n) => {
                self.write_buffer.drain(..n);
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

impl HttpConnection {
    /// Reads data from the client socket and dispatches it to the request parser.
    pub fn handle_read_phase(
        conn: &mut HttpConnection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
    ) -> Result<()> {
        conn.touch();
        conn.conn_state = ConnState::Reading;
        match conn.read_data() {
            Ok(is_eof) => conn.closed = is_eof,
            Err(_) => conn.closed = true,
        }

        let mut interest = Interest::READABLE;
        if matches!(conn.action, ActiveAction::Cgi { .. }) && conn.request.buffer.len() > MAX_READ_DATA {
            interest = Interest::WRITABLE;
        }
        poll.registry().reregister(&mut conn.stream, token, interest)?;

        if !conn.closed && !conn.request.buffer.is_empty() {
            conn.conn_state = ConnState::GeneratingResponse;
            conn.closed = HttpRequest::proces_request(poll, token, next_token, cgi_to_client, conn)?;
        }
        Ok(())
    }

    /// Manages data egress by flushing buffers and handling file streaming.
    pub fn handle_write_phase(
        conn: &mut HttpConnection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
    ) -> Result<()> {
        conn.conn_state = ConnState::Writing;
        if conn.write_buffer.is_empty() {
            if let ActiveAction::FileDownload(ref mut file, ref mut remaining) = conn.action {
                let mut chunk = vec![0u8; 8192];
                match file.read(&mut chunk) {
                    Ok(0) => conn.action = ActiveAction::None,
                    Ok(n) => {
                        conn.write_buffer.extend_from_slice(&chunk[..n]);
                        *remaining -= n;
                    }
                    Err(_) => conn.closed = true,
                }
            }
        }

        if !conn.write_buffer.is_empty() {
            conn.closed = conn.write_data() || conn.closed;
            conn.touch();
        }

        if !conn.closed && conn.write_buffer.is_empty() {
            HttpConnection::handle_post_write_update(conn, poll, token, next_token, cgi_to_client)?;
        }

        Ok(())
    }

    /// Resets the response for the next request and, if HTTP pipelining left
    /// another request already buffered, immediately re-enters the parser.
    pub fn handle_post_write_update(
        conn: &mut HttpConnection,
        poll: &Poll,
        token: Token,
        next_token: &mut usize,
        cgi_to_client: &mut HashMap<Token, Token>,
    ) -> Result<()> {
        let mut interest = Interest::READABLE;
        if matches!(conn.action, ActiveAction::FileDownload(_, _)) {
            interest |= Interest::WRITABLE;
        }

        conn.response = HttpResponse::new(200, &HttpResponse::status_text(200));

        if !conn.keep_alive {
            conn.conn_state = ConnState::Closing;
            conn.closed = true;
            return Ok(());
        }

        poll.registry().reregister(&mut conn.stream, token, interest)?;

        if !conn.request.buffer.is_empty() && conn.request.state == ParsingState::RequestLine {
            debug!("pipelined request detected on {:?}, processing immediately", token);
            conn.conn_state = ConnState::GeneratingResponse;
            conn.closed = HttpRequest::proces_request(poll, token, next_token, cgi_to_client, conn)?;
        } else {
            conn.conn_state = ConnState::Reading;
        }

        Ok(())
    }

    /// Removes a connection from the server's map, killing any attached CGI
    /// child and parking it in purgatory if it can't be reaped immediately.
    pub fn terminate_connection(server: &mut Server, token: Token) {
        if let Some(mut conn) = server.connections.remove(&token) {
            debug!("closing connection {:?}", token);
            let action = std::mem::replace(&mut conn.action, ActiveAction::None);

            if let ActiveAction::Cgi { mut child, .. } = action {
                let _ = child.kill();
                if let Ok(None) = child.try_wait() {
                    server.zombie_purgatory.push(child);
                }
                cleanup_cgi(&mut server.cgi_to_client, &mut conn);
            }
        }
    }
}
