use crate::prelude::*;
use std::net::Shutdown;

/// Periodic sweep run from the event loop: closes idle connections, kills
/// CGI children that have overrun `TIMEOUT_CGI`, and reaps zombie processes
/// left behind by connections that were already torn down.
pub fn process(server: &mut Server, poll: &Poll) {
    let now = Instant::now();

    let expired: Vec<Token> = server
        .connections
        .iter()
        .filter(|(_, conn)| now.duration_since(conn.last_activity) > CLIENT_TIMEOUT)
        .map(|(token, _)| *token)
        .collect();

    for token in expired {
        if let Some(mut conn) = server.connections.remove(&token) {
            debug!("closing idle connection {:?}", token);
            force_cgi_timeout(&mut conn, &mut server.cgi_to_client);
            cleanup_connection(&mut conn, poll);
        }
    }

    let cgi_timed_out: Vec<Token> = server
        .connections
        .iter()
        .filter(|(_, conn)| {
            matches!(&conn.action, ActiveAction::Cgi { start_time, .. } if start_time.elapsed() > TIMEOUT_CGI)
        })
        .map(|(token, _)| *token)
        .collect();

    for token in cgi_timed_out {
        if let Some(conn) = server.connections.get_mut(&token) {
            force_cgi_timeout(conn, &mut server.cgi_to_client);
            poll.registry().reregister(&mut conn.stream, token, Interest::WRITABLE).ok();
        }
    }

    reap_purgatory(server);

    if server.last_cleanup.elapsed() > CLEAN_UP {
        trace!(
            "sweep: {} connections, {} zombies in purgatory",
            server.connections.len(),
            server.zombie_purgatory.len()
        );
        server.last_cleanup = now;
    }
}

fn cleanup_connection(conn: &mut HttpConnection, poll: &Poll) {
    let _ = poll.registry().deregister(&mut conn.stream);
    let _ = conn.stream.shutdown(Shutdown::Both);
}

/// Reaps children already `kill()`-ed during connection teardown but not yet
/// collected, plus any orphan left by a double fork the rest of the server
/// never tracked — `waitpid(-1, WNOHANG)` picks those up too.
fn reap_purgatory(server: &mut Server) {
    server.zombie_purgatory.retain_mut(|child| match child.try_wait() {
        Ok(Some(status)) => {
            trace!("reaped purgatory cgi child with {status}");
            false
        }
        Ok(None) => true,
        Err(_) => false,
    });

    loop {
        let pid = unsafe { libc::waitpid(-1, std::ptr::null_mut(), libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        trace!("reaped stray child pid {pid}");
    }
}
