use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;

use crate::config::lexer::Lexer;
use crate::config::tokens::{Loc, Token, TokenType};
use crate::config::types::{AppConfig, LocationConfig, ServerConfig};

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub loc: Option<Loc>,
    pub context: Vec<String>,
}

impl ConfigError {
    fn at(loc: Option<Loc>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            loc,
            context: Vec::new(),
        }
    }

    fn wrap(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\x1b[1;31mconfiguration error\x1b[0m: {}", self.message)?;
        if let Some(loc) = self.loc {
            write!(f, " \x1b[38;5;244m(at {loc})\x1b[0m")?;
        }
        if !self.context.is_empty() {
            writeln!(f, "\n  \x1b[1;34mcontext:\x1b[0m")?;
            for (i, ctx) in self.context.iter().rev().enumerate() {
                writeln!(f, "{}↳ {}", " ".repeat(2 + i * 2), ctx)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub type ParseResult<T> = Result<T, ConfigError>;

/// Cursor-over-tokens recursive-descent parser. Each directive gets its own
/// parse function, mirroring a config grammar where every keyword has fixed
/// arity rather than a generic value grammar.
pub struct ConfigParser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl ConfigParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, cursor: 0 }
    }

    fn peek_kind(&self) -> Option<&TokenType> {
        self.tokens.get(self.cursor).map(|t| &t.kind)
    }

    fn peek_loc(&self) -> Option<Loc> {
        self.tokens.get(self.cursor).map(|t| t.loc)
    }

    fn next_token(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.cursor).cloned();
        if t.is_some() {
            self.cursor += 1;
        }
        t
    }

    fn expect(&mut self, expected: &TokenType) -> ParseResult<Token> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(t) if std::mem::discriminant(&t.kind) == std::mem::discriminant(expected) => {
                Ok(t)
            }
            Some(t) => Err(ConfigError::at(
                Some(t.loc),
                format!("expected {expected}, found {}", t.kind),
            )),
            None => Err(ConfigError::at(loc, format!("expected {expected}, found <eof>"))),
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(Token { kind: TokenType::Ident(s), .. }) => Ok(s),
            Some(Token { kind: TokenType::StringLit(s), .. }) => Ok(s),
            Some(t) => Err(ConfigError::at(Some(t.loc), format!("expected identifier, found {}", t.kind))),
            None => Err(ConfigError::at(loc, "expected identifier, found <eof>")),
        }
    }

    fn expect_number(&mut self) -> ParseResult<u64> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(Token { kind: TokenType::Number(n), .. }) => Ok(n),
            Some(t) => Err(ConfigError::at(Some(t.loc), format!("expected number, found {}", t.kind))),
            None => Err(ConfigError::at(loc, "expected number, found <eof>")),
        }
    }

    fn expect_semicolon(&mut self) -> ParseResult<()> {
        self.expect(&TokenType::Semicolon).map(|_| ())
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenType::Eof) | None)
    }

    /// Collects bare words up to the terminating `;`, used for directives
    /// with a variable-length argument list (`server_name`, `allowed_methods`).
    fn collect_words_until_semicolon(&mut self) -> ParseResult<Vec<String>> {
        let mut words = Vec::new();
        loop {
            match self.peek_kind() {
                Some(TokenType::Semicolon) => {
                    self.expect_semicolon()?;
                    break;
                }
                Some(TokenType::Ident(_)) | Some(TokenType::StringLit(_)) => {
                    words.push(self.expect_ident()?);
                }
                Some(TokenType::Number(n)) => {
                    let n = *n;
                    self.next_token();
                    words.push(n.to_string());
                }
                Some(other) => {
                    return Err(ConfigError::at(self.peek_loc(), format!("unexpected {other} in directive arguments")))
                }
                None => return Err(ConfigError::at(None, "unterminated directive, expected ';'")),
            }
        }
        Ok(words)
    }
}

pub fn parse(input: &str) -> ParseResult<AppConfig> {
    let mut lexer = Lexer::new(input);
    let tokens = lexer
        .tokenize()
        .map_err(|e| ConfigError::at(None, e).wrap("lexing configuration"))?;
    let mut parser = ConfigParser::new(tokens);
    parse_app(&mut parser)
}

fn parse_app(parser: &mut ConfigParser) -> ParseResult<AppConfig> {
    let mut servers = Vec::new();
    while !parser.at_eof() {
        let keyword = parser.expect_ident()?;
        match keyword.as_str() {
            "server" => {
                let server = parse_server(parser).map_err(|e| e.wrap("parsing server block"))?;
                servers.push(server);
            }
            other => {
                return Err(ConfigError::at(parser.peek_loc(), format!("unknown top-level directive '{other}'")))
            }
        }
    }
    Ok(AppConfig { servers })
}

fn parse_server(parser: &mut ConfigParser) -> ParseResult<ServerConfig> {
    parser.expect(&TokenType::LBrace)?;
    let mut server = ServerConfig::default();
    server.server_names.clear();
    let mut default_host = crate::config::types::DEFAULT_HOST.to_string();

    loop {
        if matches!(parser.peek_kind(), Some(TokenType::RBrace)) {
            parser.next_token();
            break;
        }
        if parser.at_eof() {
            return Err(ConfigError::at(parser.peek_loc(), "unexpected <eof> inside server block, expected '}'"));
        }

        let directive = parser.expect_ident()?;
        match directive.as_str() {
            "listen" => {
                let (addr, port) = parse_listen(parser, &default_host)?;
                server.listen.push((addr, port));
            }
            "host" => {
                default_host = parser.expect_ident()?;
                parser.expect_semicolon()?;
            }
            "server_name" => {
                server.server_names = parser.collect_words_until_semicolon()?;
            }
            "root" => {
                server.root = parser.expect_ident()?;
                parser.expect_semicolon()?;
            }
            "index" => {
                server.index = parser.expect_ident()?;
                parser.expect_semicolon()?;
            }
            "allowed_methods" => {
                server.allowed_methods = parser.collect_words_until_semicolon()?;
            }
            "client_max_body_size" => {
                server.client_max_body_size = parser.expect_number()? as usize;
                parser.expect_semicolon()?;
            }
            "error_page" => {
                let (code, path) = parse_error_page(parser)?;
                server.error_pages.insert(code, path);
            }
            "location" => {
                let location = parse_location(parser).map_err(|e| e.wrap("parsing location block"))?;
                server.locations.push(location);
            }
            other => {
                return Err(ConfigError::at(parser.peek_loc(), format!("unknown server directive '{other}'")))
            }
        }
    }

    if server.server_names.is_empty() {
        server.server_names.push(crate::config::types::DEFAULT_SERVER_NAME.to_string());
    }

    Ok(server)
}

/// `listen HOST:PORT | PORT` (space-separated `HOST PORT` also accepted),
/// matching `ParseListen.cpp`'s `val.rfind(':')` split. A bare port uses
/// `default_host`, which a preceding `host HOST;` directive may have set.
fn parse_listen(parser: &mut ConfigParser, default_host: &str) -> ParseResult<(IpAddr, u16)> {
    let loc = parser.peek_loc();
    let first = parser.expect_ident_or_number_as_word()?;

    if let Some(colon_pos) = first.rfind(':') {
        parser.expect_semicolon()?;
        let (host_part, port_part) = (&first[..colon_pos], &first[colon_pos + 1..]);
        let port: u16 = port_part
            .parse()
            .map_err(|_| ConfigError::at(loc, format!("invalid port '{port_part}' in listen directive")))?;
        let host = if host_part.is_empty() { default_host } else { host_part };
        let addr: IpAddr = host
            .parse()
            .map_err(|_| ConfigError::at(loc, format!("invalid address '{host}' in listen directive")))?;
        return Ok((addr, port));
    }

    if matches!(parser.peek_kind(), Some(TokenType::Semicolon)) {
        parser.expect_semicolon()?;
        let port: u16 = first
            .parse()
            .map_err(|_| ConfigError::at(loc, format!("invalid port '{first}' in listen directive")))?;
        let addr: IpAddr = default_host
            .parse()
            .map_err(|_| ConfigError::at(loc, format!("invalid default host '{default_host}'")))?;
        return Ok((addr, port));
    }

    let addr: IpAddr = first
        .parse()
        .map_err(|_| ConfigError::at(loc, format!("invalid address '{first}' in listen directive")))?;
    let port = parser.expect_number()? as u16;
    parser.expect_semicolon()?;
    Ok((addr, port))
}

fn parse_error_page(parser: &mut ConfigParser) -> ParseResult<(u16, String)> {
    let loc = parser.peek_loc();
    let code = parser.expect_number()?;
    if !(400..=599).contains(&code) {
        return Err(ConfigError::at(loc, format!("error_page code {code} out of range 400-599")));
    }
    let path = parser.expect_ident()?;
    parser.expect_semicolon()?;
    Ok((code as u16, path))
}

fn parse_location(parser: &mut ConfigParser) -> ParseResult<LocationConfig> {
    let loc = parser.peek_loc();
    let path = parser.expect_ident()?;
    if !path.starts_with('/') {
        return Err(ConfigError::at(loc, format!("location path '{path}' must start with '/'")));
    }

    parser.expect(&TokenType::LBrace)?;
    let mut location = LocationConfig {
        path,
        ..Default::default()
    };

    loop {
        if matches!(parser.peek_kind(), Some(TokenType::RBrace)) {
            parser.next_token();
            break;
        }
        if parser.at_eof() {
            return Err(ConfigError::at(parser.peek_loc(), "unexpected <eof> inside location block, expected '}'"));
        }

        let directive = parser.expect_ident()?;
        match directive.as_str() {
            "root" => {
                location.root = Some(parser.expect_ident()?);
                parser.expect_semicolon()?;
            }
            "index" => {
                location.index = Some(parser.expect_ident()?);
                parser.expect_semicolon()?;
            }
            "allowed_methods" => {
                location.allowed_methods = Some(parser.collect_words_until_semicolon()?);
            }
            "autoindex" => {
                let val = parser.expect_ident()?;
                parser.expect_semicolon()?;
                location.autoindex = val == "on";
            }
            "cgi_pass" => {
                location.cgi_pass = Some(parser.expect_ident()?);
                parser.expect_semicolon()?;
            }
            "cgi_extension" => {
                location.cgi_extension = Some(parser.expect_ident()?);
                parser.expect_semicolon()?;
            }
            "return" => {
                let loc = parser.peek_loc();
                let code = parser.expect_number()?;
                if !(300..=399).contains(&code) {
                    return Err(ConfigError::at(loc, format!("redirect code {code} out of range 300-399")));
                }
                let target = parser.expect_ident()?;
                parser.expect_semicolon()?;
                location.redirect = Some((code as u16, target));
            }
            other => {
                return Err(ConfigError::at(parser.peek_loc(), format!("unknown location directive '{other}'")))
            }
        }
    }

    if location.is_cgi() && location.cgi_extension.is_none() {
        return Err(ConfigError::at(loc, "location with 'cgi_pass' must also set 'cgi_extension'"));
    }

    Ok(location)
}

impl ConfigParser {
    fn expect_ident_or_number_as_word(&mut self) -> ParseResult<String> {
        let loc = self.peek_loc();
        match self.next_token() {
            Some(Token { kind: TokenType::Ident(s), .. }) => Ok(s),
            Some(Token { kind: TokenType::Number(n), .. }) => Ok(n.to_string()),
            Some(t) => Err(ConfigError::at(Some(t.loc), format!("expected address or port, found {}", t.kind))),
            None => Err(ConfigError::at(loc, "expected address or port, found <eof>")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_server() {
        let cfg = parse("server { listen 8080; root ./www; }").unwrap();
        assert_eq!(cfg.servers.len(), 1);
        let s = &cfg.servers[0];
        assert_eq!(s.listen, vec![("0.0.0.0".parse().unwrap(), 8080)]);
        assert_eq!(s.root, "./www");
    }

    #[test]
    fn parses_listen_with_explicit_address() {
        let cfg = parse("server { listen 127.0.0.1 9000; }").unwrap();
        assert_eq!(cfg.servers[0].listen, vec![("127.0.0.1".parse().unwrap(), 9000)]);
    }

    #[test]
    fn parses_listen_with_colon_joined_host_and_port() {
        let cfg = parse("server { listen 127.0.0.1:8080; }").unwrap();
        assert_eq!(cfg.servers[0].listen, vec![("127.0.0.1".parse().unwrap(), 8080)]);
    }

    #[test]
    fn host_directive_sets_the_default_for_a_later_bare_port_listen() {
        let cfg = parse("server { host 127.0.0.1; listen 9000; }").unwrap();
        assert_eq!(cfg.servers[0].listen, vec![("127.0.0.1".parse().unwrap(), 9000)]);
    }

    #[test]
    fn parses_location_block() {
        let cfg = parse(
            r#"
            server {
                listen 8080;
                location /cgi-bin {
                    cgi_pass /usr/bin/python3;
                    cgi_extension .py;
                }
            }
            "#,
        )
        .unwrap();
        let loc = &cfg.servers[0].locations[0];
        assert_eq!(loc.path, "/cgi-bin");
        assert!(loc.is_cgi());
        assert_eq!(loc.cgi_extension.as_deref(), Some(".py"));
    }

    #[test]
    fn rejects_location_without_leading_slash() {
        let err = parse("server { location bad { root ./x; } }").unwrap_err();
        assert!(err.message.contains("must start with '/'"));
    }

    #[test]
    fn rejects_cgi_pass_without_extension() {
        let err = parse(
            r#"server { location /cgi { cgi_pass /bin/sh; } }"#,
        )
        .unwrap_err();
        assert!(err.message.contains("cgi_extension"));
    }

    #[test]
    fn parses_multiple_server_names() {
        let cfg = parse(r#"server { listen 80; server_name a.com b.com; }"#).unwrap();
        assert_eq!(cfg.servers[0].server_names, vec!["a.com", "b.com"]);
    }

    #[test]
    fn parses_error_page_directive() {
        let cfg = parse(r#"server { listen 80; error_page 404 /404.html; }"#).unwrap();
        assert_eq!(cfg.servers[0].error_pages.get(&404), Some(&"/404.html".to_string()));
    }

    #[test]
    fn rejects_unknown_directive() {
        let err = parse("server { frobnicate 1; }").unwrap_err();
        assert!(err.message.contains("unknown server directive"));
    }
}
