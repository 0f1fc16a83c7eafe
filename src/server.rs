use crate::prelude::*;
use mio::net::TcpListener as MioTcpListener;
use mio::Events;
use std::net::{IpAddr, SocketAddr};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};

const LISTENER_TOKEN_LIMIT: usize = 1024;

struct Listener {
    socket: MioTcpListener,
    configs: Vec<Arc<ServerConfig>>,
}

/// Owns the poller, every listening socket, and every live connection.
/// Tokens below `LISTENER_TOKEN_LIMIT` identify listeners; everything else
/// (client connections, CGI pipe ends) is allocated from `next_token`
/// starting above that limit, so a stray CGI event can never be confused
/// with a new accept.
pub struct Server {
    poll: Poll,
    listeners: HashMap<Token, Listener>,
    pub connections: HashMap<Token, HttpConnection>,
    pub cgi_to_client: HashMap<Token, Token>,
    pub zombie_purgatory: Vec<Child>,
    pub last_cleanup: Instant,
    next_token: usize,
    shutdown: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: AppConfig) -> Result<Self> {
        let mut by_listen: HashMap<(IpAddr, u16), Vec<Arc<ServerConfig>>> = HashMap::new();
        for server_cfg in config.servers {
            let server_cfg = Arc::new(server_cfg);
            for &pair in &server_cfg.listen {
                by_listen.entry(pair).or_default().push(Arc::clone(&server_cfg));
            }
        }

        let poll = Poll::new()?;
        let mut listeners = HashMap::new();
        let mut next_token = 0usize;

        for ((ip, port), configs) in by_listen {
            let addr = SocketAddr::new(ip, port);
            let std_listener = std::net::TcpListener::bind(addr)?;
            std_listener.set_nonblocking(true)?;
            let mut socket = MioTcpListener::from_std(std_listener);

            let token = Token(next_token);
            next_token += 1;
            poll.registry().register(&mut socket, token, Interest::READABLE)?;

            info!("listening on {addr}");
            listeners.insert(token, Listener { socket, configs });
        }

        if next_token >= LISTENER_TOKEN_LIMIT {
            return Err(crate::error::CleanError::from(format!(
                "too many listen directives: {next_token} exceeds the {LISTENER_TOKEN_LIMIT} listener token budget"
            )));
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_handle = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            warn!("shutdown signal received, draining connections");
            shutdown_handle.store(true, Ordering::SeqCst);
        })
        .map_err(|e| crate::error::CleanError::from(format!("installing signal handler: {e}")))?;

        Ok(Server {
            poll,
            listeners,
            connections: HashMap::new(),
            cgi_to_client: HashMap::new(),
            zombie_purgatory: Vec::new(),
            last_cleanup: Instant::now(),
            next_token: LISTENER_TOKEN_LIMIT,
            shutdown,
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn alloc_token(&mut self) -> Token {
        let token = Token(self.next_token);
        self.next_token += 1;
        token
    }

    pub fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);

        loop {
            if self.is_shutting_down() && self.connections.is_empty() {
                info!("all connections drained, exiting");
                return Ok(());
            }

            match self.poll.poll(&mut events, Some(CLEAN_UP)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                let token = event.token();

                if self.listeners.contains_key(&token) {
                    if !self.is_shutting_down() {
                        self.accept_connections(token)?;
                    }
                    continue;
                }

                if let Some(&client_token) = self.cgi_to_client.get(&token) {
                    self.dispatch_cgi_event(event, token, client_token);
                    continue;
                }

                self.dispatch_client_event(event, token)?;
            }

            crate::timeouts::process(self, &self.poll);
        }
    }

    fn accept_connections(&mut self, listener_token: Token) -> Result<()> {
        loop {
            let (stream, peer_addr) = match self.listeners.get_mut(&listener_token).unwrap().socket.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            };

            let mut stream = stream;
            let local_addr = stream.local_addr().unwrap_or(peer_addr);
            let configs = self.listeners.get(&listener_token).unwrap().configs.clone();

            let token = self.alloc_token();
            self.poll.registry().register(&mut stream, token, Interest::READABLE)?;

            trace!("accepted connection {peer_addr} on {local_addr} as {:?}", token);
            self.connections.insert(token, HttpConnection::new(stream, local_addr, configs));
        }
    }

    fn dispatch_cgi_event(&mut self, event: &Event, cgi_token: Token, client_token: Token) {
        let Some(conn) = self.connections.get_mut(&client_token) else {
            self.cgi_to_client.remove(&cgi_token);
            return;
        };

        if let Err(e) = handle_cgi_event(&self.poll, event, cgi_token, client_token, conn, &mut self.cgi_to_client) {
            error!("cgi event handling failed: {e}");
            conn.closed = true;
        }

        if conn.should_close() {
            HttpConnection::terminate_connection(self, client_token);
        }
    }

    fn dispatch_client_event(&mut self, event: &Event, token: Token) -> Result<()> {
        let mut next_token = self.next_token;

        {
            let Some(conn) = self.connections.get_mut(&token) else {
                return Ok(());
            };

            if event.is_readable() {
                HttpConnection::handle_read_phase(conn, &self.poll, token, &mut next_token, &mut self.cgi_to_client)?;
            }
        }

        if event.is_writable() {
            if let Some(conn) = self.connections.get_mut(&token) {
                HttpConnection::handle_write_phase(conn, &self.poll, token, &mut next_token, &mut self.cgi_to_client)?;
            }
        }

        self.next_token = next_token;

        if let Some(conn) = self.connections.get(&token) {
            if conn.should_close() {
                HttpConnection::terminate_connection(self, token);
            }
        }

        Ok(())
    }
}
