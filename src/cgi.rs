use crate::prelude::*;
use crate::router::ResolvedRoute;

#[derive(Debug, PartialEq)]
pub enum CgiParsingState {
    ReadHeaders,
    StreamBody,
    StreamBodyChuncked,
}

pub fn parse_cgi_headers(bytes: &[u8]) -> (u16, Vec<(String, String)>) {
    let mut status = 200;
    let mut headers = Vec::new();
    let content = String::from_utf8_lossy(bytes);

    for line in content.lines() {
        if let Some((key, val)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let val = val.trim().to_string();

            if key == "status" {
                status = val.split_whitespace().next().and_then(|s| s.parse().ok()).unwrap_or(200);
            } else {
                headers.push((key, val));
            }
        }
    }
    (status, headers)
}

pub fn handle_cgi_event(
    poll: &Poll,
    event: &Event,
    cgi_token: Token,
    client_token: Token,
    conn: &mut HttpConnection,
    cgi_to_client: &mut HashMap<Token, Token>,
) -> Result<()> {
    if let ActiveAction::Cgi {
        out_stream,
        in_stream,
        child,
        parse_state,
        header_buf,
        ..
    } = &mut conn.action
    {
        // SCRIPT -> SERVER (Stdout)
        if event.is_readable() && Some(cgi_token) == conn.cgi_out_token {
            let mut buf = [0u8; 4096];
            match out_stream.read(&mut buf) {
                Ok(0) => {
                    if *parse_state == CgiParsingState::StreamBodyChuncked {
                        conn.write_buffer.extend_from_slice(b"0\r\n\r\n");
                        poll.registry().reregister(
                            &mut conn.stream,
                            client_token,
                            Interest::READABLE | Interest::WRITABLE,
                        )?;
                    }
                    conn.cgi_out_token = None;
                }
                Ok(n) => {
                    trace!("read {n} bytes from cgi stdout");
                    process_cgi_stdout(parse_state, header_buf, &mut conn.write_buffer, &buf[..n], conn.keep_alive)?;
                    poll.registry().reregister(
                        &mut conn.stream,
                        client_token,
                        Interest::READABLE | Interest::WRITABLE,
                    )?;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => conn.closed = true,
            }
        }

        // SERVER -> SCRIPT (Stdin)
        if event.is_writable() && Some(cgi_token) == conn.cgi_in_token && !conn.cgi_buffer.is_empty() {
            if let Some(pipe) = in_stream {
                match pipe.write(&conn.cgi_buffer) {
                    Ok(n) => {
                        trace!("wrote {n} bytes to cgi stdin");
                        conn.cgi_buffer.drain(..n);

                        if conn.cgi_buffer.len() < 65536 {
                            poll.registry().reregister(
                                &mut conn.stream,
                                client_token,
                                Interest::READABLE | Interest::WRITABLE,
                            )?;
                        }

                        if conn.body_remaining == 0 && conn.cgi_buffer.is_empty() {
                            conn.cgi_in_token = None;
                            trace!("cgi stdin pipe closed (eof sent)");
                        }
                    }
                    Err(e) if e.kind() != ErrorKind::WouldBlock => {}
                    Err(_) => conn.closed = true,
                }
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("cgi process exited with {status}");
                if let ActiveAction::Cgi { in_stream, .. } = &mut conn.action {
                    if conn.body_remaining == 0 && conn.cgi_buffer.is_empty() {
                        if let Some(pipe) = in_stream.take() {
                            drop(pipe);
                            conn.cgi_in_token = None;
                        }
                    }
                }
                cleanup_cgi(cgi_to_client, conn);
                conn.action = ActiveAction::None;
            }
            Ok(None) => {}
            Err(_) => conn.closed = true,
        }
    }
    Ok(())
}

/// Builds the CGI/1.1 meta-variable set (RFC 3875 §4). `CONTENT_LENGTH` is
/// derived from `content_length`, the value the request parser already
/// validated against `client_max_body_size` and is actually decoding and
/// forwarding to the script's stdin — not copied verbatim from the raw
/// header, which for a chunked request wouldn't exist at all and for a
/// trusted-but-wrong client could disagree with what's actually sent.
pub fn build_cgi_env(
    conn: &HttpConnection,
    s_cfg: &ServerConfig,
    route: &ResolvedRoute,
    content_length: usize,
) -> HashMap<String, String> {
    let req = &conn.request;
    let mut envs = HashMap::new();

    let (script_path, query_string) = match req.url.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (req.url.clone(), String::new()),
    };

    envs.insert("GATEWAY_INTERFACE".to_string(), "CGI/1.1".to_string());
    envs.insert("SERVER_PROTOCOL".to_string(), "HTTP/1.1".to_string());
    envs.insert("SERVER_SOFTWARE".to_string(), "origin_server".to_string());
    envs.insert("REQUEST_METHOD".to_string(), req.method.to_string());
    envs.insert("QUERY_STRING".to_string(), query_string);
    envs.insert("PATH_INFO".to_string(), script_path.clone());
    envs.insert(
        "PATH_TRANSLATED".to_string(),
        PathBuf::from(&route.root)
            .join(script_path.trim_start_matches('/'))
            .to_string_lossy()
            .into_owned(),
    );
    envs.insert("SCRIPT_NAME".to_string(), script_path);
    envs.insert(
        "SERVER_NAME".to_string(),
        s_cfg.server_names.first().cloned().unwrap_or_else(|| "_".to_string()),
    );

    if let Ok(addr) = conn.stream.peer_addr() {
        envs.insert("REMOTE_ADDR".to_string(), addr.ip().to_string());
        envs.insert("REMOTE_PORT".to_string(), addr.port().to_string());
    }
    envs.insert("SERVER_PORT".to_string(), conn.local_addr.port().to_string());

    if let Some(ct) = req.headers.get("content-type") {
        envs.insert("CONTENT_TYPE".to_string(), ct.clone());
    }
    if content_length > 0 || req.headers.contains_key("content-length") {
        envs.insert("CONTENT_LENGTH".to_string(), content_length.to_string());
    }

    for (k, v) in req.headers.iter().chain(&req.trailers) {
        if k == "content-type" || k == "content-length" {
            continue;
        }
        let env_key = format!("HTTP_{}", k.to_uppercase().replace('-', "_"));
        envs.insert(env_key, v.clone());
    }

    envs
}

pub fn process_cgi_stdout(
    parse_state: &mut CgiParsingState,
    header_buf: &mut Vec<u8>,
    write_buffer: &mut Vec<u8>,
    new_data: &[u8],
    keep_alive: bool,
) -> Result<()> {
    match parse_state {
        CgiParsingState::ReadHeaders => {
            header_buf.extend_from_slice(new_data);

            if header_buf.len() < 5 {
                return Ok(()); // not enough bytes yet to tell `HTTP/` apart from a header line
            }

            if header_buf.starts_with(b"HTTP/") {
                // NPH-style output (§4.6): an output line starting with
                // `HTTP/` is the script's own complete response, passed
                // through verbatim rather than reparsed into one of ours.
                write_buffer.extend_from_slice(header_buf);
                header_buf.clear();
                *parse_state = CgiParsingState::StreamBody;
                return Ok(());
            }

            if let Some(pos) =
                find_subsequence(header_buf, b"\r\n\r\n", 0).or_else(|| find_subsequence(header_buf, b"\n\n", 0))
            {
                let is_crlf = header_buf.contains(&b'\r');
                let delimiter_len = if is_crlf { 4 } else { 2 };

                let header_bytes = header_buf[..pos].to_vec();
                let body_start = header_buf[pos + delimiter_len..].to_vec();

                let (status, cgi_headers) = parse_cgi_headers(&header_bytes);
                let mut res = HttpResponse::new(status, &HttpResponse::status_text(status));

                res.headers.remove("content-length");

                for (k, v) in cgi_headers {
                    res.set_header(&k, &v);
                }

                let is_chunked = !res.headers.contains_key("content-length");
                if is_chunked {
                    res.set_header("transfer-encoding", "chunked");
                    *parse_state = CgiParsingState::StreamBodyChuncked;
                } else {
                    *parse_state = CgiParsingState::StreamBody;
                }
                set_connection_header(&mut res, keep_alive);

                write_buffer.extend_from_slice(&res.to_bytes_headers_only());

                if !body_start.is_empty() {
                    push_cgi_data(write_buffer, &body_start, is_chunked);
                }
            }
        }
        CgiParsingState::StreamBody => {
            write_buffer.extend_from_slice(new_data);
        }
        CgiParsingState::StreamBodyChuncked => {
            push_cgi_data(write_buffer, new_data, true);
        }
    }
    Ok(())
}

fn push_cgi_data(write_buffer: &mut Vec<u8>, data: &[u8], chunked: bool) {
    if chunked {
        let header = format!("{:X}\r\n", data.len());
        write_buffer.extend_from_slice(header.as_bytes());
        write_buffer.extend_from_slice(data);
        write_buffer.extend_from_slice(b"\r\n");
    } else {
        write_buffer.extend_from_slice(data);
    }
}

pub fn cleanup_cgi(cgi_to_client: &mut HashMap<Token, Token>, conn: &mut HttpConnection) {
    if let Some(t) = conn.cgi_out_token.take() {
        cgi_to_client.remove(&t);
    }
    if let Some(t) = conn.cgi_in_token.take() {
        cgi_to_client.remove(&t);
    }
}

/// Kills any CGI child that has run past `TIMEOUT_CGI` without producing
/// enough stdout/stdin activity to be caught by `handle_cgi_event` first.
pub fn check_time_out_cgi(connections: &mut HashMap<Token, HttpConnection>, poll: &Poll, cgi_to_client: &mut HashMap<Token, Token>) {
    for (token, conn) in connections.iter_mut() {
        let timed_out = matches!(&conn.action, ActiveAction::Cgi { start_time, .. } if start_time.elapsed() > TIMEOUT_CGI);
        if timed_out {
            warn!("cgi process on {:?} timed out after {:?}, killing", token, TIMEOUT_CGI);
            force_cgi_timeout(conn, cgi_to_client);
            poll.registry().reregister(&mut conn.stream, *token, Interest::WRITABLE).ok();
        }
    }
}

pub fn force_cgi_timeout(conn: &mut HttpConnection, cgi_to_client: &mut HashMap<Token, Token>) {
    if let ActiveAction::Cgi { ref mut child, .. } = conn.action {
        let _ = child.kill();
        let _ = child.wait();

        if let ActiveAction::Cgi { parse_state, .. } = &conn.action {
            if *parse_state == CgiParsingState::StreamBodyChuncked {
                conn.write_buffer.extend_from_slice(b"0\r\n\r\n");
            } else {
                conn.write_buffer.clear();
                let mut res = handle_error(GATEWAY_TIMEOUT, conn.s_cfg.as_ref());
                res.set_header("connection", "close");
                conn.write_buffer.extend_from_slice(&res.to_bytes());
            }
        }

        conn.cgi_in_token = None;
        conn.cgi_out_token = None;
        conn.cgi_buffer.clear();
        conn.closed = true;

        cleanup_cgi(cgi_to_client, conn);
        conn.action = ActiveAction::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_and_headers() {
        let (status, headers) = parse_cgi_headers(b"Status: 404 Not Found\r\nContent-Type: text/plain\r\n");
        assert_eq!(status, 404);
        assert_eq!(headers, vec![("content-type".to_string(), "text/plain".to_string())]);
    }

    #[test]
    fn defaults_to_200_without_status_header() {
        let (status, _) = parse_cgi_headers(b"Content-Type: text/html\r\n");
        assert_eq!(status, 200);
    }

    #[test]
    fn streams_headerless_cgi_output_as_chunked_body() {
        let mut state = CgiParsingState::ReadHeaders;
        let mut header_buf = Vec::new();
        let mut out = Vec::new();
        process_cgi_stdout(&mut state, &mut header_buf, &mut out, b"Content-Type: text/plain\r\n\r\nhello", true).unwrap();
        assert_eq!(state, CgiParsingState::StreamBodyChuncked);
        let out_str = String::from_utf8_lossy(&out);
        assert!(out_str.contains("transfer-encoding"));
        assert!(out_str.contains("5\r\nhello\r\n"));
    }

    #[test]
    fn nph_style_status_line_is_passed_through_verbatim() {
        let mut state = CgiParsingState::ReadHeaders;
        let mut header_buf = Vec::new();
        let mut out = Vec::new();
        process_cgi_stdout(
            &mut state,
            &mut header_buf,
            &mut out,
            b"HTTP/1.1 302 Found\r\nLocation: /x\r\n\r\n",
            true,
        )
        .unwrap();
        assert_eq!(state, CgiParsingState::StreamBody);
        assert_eq!(out, b"HTTP/1.1 302 Found\r\nLocation: /x\r\n\r\n");
    }
}
