//! The non-blocking connection front-end.
//!
//! One thread owns the listening socket and every peer that has not yet
//! handed over a complete request. Accepts and reads are drained without
//! blocking; a peer whose bytes arrived this cycle has its request parsed
//! and enqueued, transferring socket ownership to the response worker.

use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crossbeam::channel::Sender;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::protocol::{self, ParsedRequest};
use crate::server::ServerContext;

// sleep slice between scans when nothing happened
const POLL_WAIT: Duration = Duration::from_millis(10);

const READ_CHUNK: usize = 2048;

/// Accepts connections, reads and parses requests, and enqueues the
/// resulting work items through the orchestrator's entry points.
pub struct ConnectionService {
    ctx: ServerContext,
}

// a connection still waiting for its request bytes
struct Peer {
    stream: TcpStream,
    addr: SocketAddr,
    buf: Vec<u8>,
}

enum Drained {
    // no new bytes this cycle
    Pending,
    // bytes arrived; the buffered text is the request
    Request,
    // peer vanished or errored before sending anything useful
    Closed,
}

impl ConnectionService {
    /// creates the front-end over the orchestrator's interface
    pub fn new(ctx: ServerContext) -> Self {
        ConnectionService { ctx }
    }

    /// Runs the accept/read loop until the orchestrator stops.
    ///
    /// The bound address is reported once over `ready` so `start()` can wait
    /// for the socket to come up (and so tests can bind port 0).
    ///
    /// # Errors
    ///
    /// Returns the underlying error when the listener cannot be bound or the
    /// accept loop fails in a way that is not tied to a single peer.
    pub fn run(self, ready: Sender<SocketAddr>) -> Result<()> {
        let port = self.ctx.config().port;
        let listener = TcpListener::bind(("0.0.0.0", port)).map_err(|err| {
            error!(port, %err, "could not bind listening socket");
            err
        })?;
        listener.set_nonblocking(true)?;
        let _ = ready.send(listener.local_addr()?);

        let idle_wait = POLL_WAIT.min(self.ctx.config().select_timeout);
        let mut peers: Vec<Peer> = Vec::new();

        while self.ctx.is_running() {
            let mut activity = false;

            // drain the accept backlog
            loop {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        if let Err(err) = stream.set_nonblocking(true) {
                            warn!(%addr, %err, "could not configure peer socket");
                            continue;
                        }
                        debug!(%addr, "client connected");
                        peers.push(Peer {
                            stream,
                            addr,
                            buf: Vec::new(),
                        });
                        activity = true;
                    }
                    Err(ref err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        error!(%err, "accept failed");
                        return Err(err.into());
                    }
                }
            }

            // drain readable peers; a peer with fresh bytes is complete
            let mut index = 0;
            while index < peers.len() {
                match drain(&mut peers[index]) {
                    Drained::Pending => index += 1,
                    Drained::Request => {
                        activity = true;
                        let peer = peers.swap_remove(index);
                        let text = String::from_utf8_lossy(&peer.buf).into_owned();
                        self.dispatch(&text, peer.stream);
                    }
                    Drained::Closed => {
                        debug!(addr = %peers[index].addr, "client disconnected");
                        peers.swap_remove(index);
                    }
                }
            }

            if !activity {
                thread::sleep(idle_wait);
            }
        }

        Ok(())
    }

    // parse and hand the socket to the worker via the matching entry point
    fn dispatch(&self, text: &str, stream: TcpStream) {
        match protocol::parse_request(text) {
            ParsedRequest::Push {
                producer_id,
                record,
                lamport,
            } => self.ctx.enqueue_push(producer_id, record, lamport, stream),
            ParsedRequest::Fetch { id, lamport } => self.ctx.enqueue_fetch(id, lamport, stream),
            ParsedRequest::Reject {
                reason,
                status,
                lamport,
            } => self.ctx.enqueue_reject(reason, status, lamport, stream),
        }
    }
}

// Reads whatever the peer has ready. Errors on a single peer only ever
// cost that peer its connection.
fn drain(peer: &mut Peer) -> Drained {
    let mut chunk = [0u8; READ_CHUNK];
    let mut received = 0usize;
    loop {
        match peer.stream.read(&mut chunk) {
            Ok(0) => {
                // orderly shutdown; any bytes drained first still count
                return if received > 0 {
                    Drained::Request
                } else {
                    Drained::Closed
                };
            }
            Ok(n) => {
                peer.buf.extend_from_slice(&chunk[..n]);
                received += n;
            }
            Err(ref err) if err.kind() == ErrorKind::WouldBlock => break,
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(addr = %peer.addr, %err, "read failed");
                return Drained::Closed;
            }
        }
    }
    if received > 0 {
        Drained::Request
    } else {
        Drained::Pending
    }
}
