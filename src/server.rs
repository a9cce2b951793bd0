//! The orchestrator wiring the front-end, the worker and the shared state.

use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::bounded;
use tracing::{error, info};

use crate::clock::LamportClock;
use crate::connection::ConnectionService;
use crate::error::{AggError, Result};
use crate::queue::RequestQueue;
use crate::record::Record;
use crate::registry::ProducerRegistry;
use crate::store::{RecordStore, DEFAULT_CAPACITY};
use crate::work::WorkItem;
use crate::worker::ResponseService;

/// port used when none is given on the command line
pub const DEFAULT_PORT: u16 = 4567;

/// cache document path used when none is configured
pub const DEFAULT_CACHE_PATH: &str = "aggregation-cache.json";

// how long start() waits for the listening socket to come up
const BIND_WAIT: Duration = Duration::from_secs(1);

/// Tunables for one aggregation node.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on; 0 asks the OS for an ephemeral port
    pub port: u16,
    /// path of the persisted cache document
    pub cache_path: PathBuf,
    /// producers idle longer than this are expired
    pub max_idle: Duration,
    /// upper bound on the front-end's idle wait, so stop() is honored
    /// within one tick
    pub select_timeout: Duration,
    /// how long the worker parks when the queue is empty
    pub idle_backoff: Duration,
    /// record store capacity
    pub capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            cache_path: PathBuf::from(DEFAULT_CACHE_PATH),
            max_idle: Duration::from_secs(30),
            select_timeout: Duration::from_millis(1000),
            idle_backoff: Duration::from_millis(1),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

// everything both service threads share; owned once per server instance,
// never process-global
struct Shared {
    config: ServerConfig,
    clock: LamportClock,
    store: Mutex<RecordStore>,
    registry: Mutex<ProducerRegistry>,
    queue: RequestQueue,
    running: AtomicBool,
    bound_addr: Mutex<Option<SocketAddr>>,
    fatal: Mutex<Option<AggError>>,
}

/// The narrow interface the two services consume: the clock, the enqueue
/// entry points, the running flag and locked access to the shared state.
///
/// Cloning is cheap; each service thread holds one.
#[derive(Clone)]
pub struct ServerContext {
    shared: Arc<Shared>,
}

impl ServerContext {
    /// true until the orchestrator stops
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// the node's Lamport clock
    pub fn clock(&self) -> &LamportClock {
        &self.shared.clock
    }

    /// the node's configuration
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// the address the listener actually bound, once it is up
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock_recover(&self.shared.bound_addr)
    }

    /// Accepts a producer push: merges the remote clock, then queues the
    /// work item, transferring socket ownership to the worker.
    pub fn enqueue_push(
        &self,
        producer_id: String,
        record: Record,
        remote_lamport: u64,
        stream: TcpStream,
    ) {
        self.shared.clock.merge(remote_lamport);
        self.shared.queue.enqueue(WorkItem::Push {
            producer_id,
            record,
            remote_lamport,
            stream,
        });
    }

    /// Accepts a reader fetch; see [`ServerContext::enqueue_push`].
    pub fn enqueue_fetch(&self, id: String, remote_lamport: u64, stream: TcpStream) {
        self.shared.clock.merge(remote_lamport);
        self.shared.queue.enqueue(WorkItem::Fetch {
            id,
            remote_lamport,
            stream,
        });
    }

    /// Accepts a refused request; see [`ServerContext::enqueue_push`].
    pub fn enqueue_reject(
        &self,
        reason: String,
        status: u16,
        remote_lamport: u64,
        stream: TcpStream,
    ) {
        self.shared.clock.merge(remote_lamport);
        self.shared.queue.enqueue(WorkItem::Reject {
            reason,
            status,
            remote_lamport,
            stream,
        });
    }

    pub(crate) fn queue(&self) -> &RequestQueue {
        &self.shared.queue
    }

    pub(crate) fn store(&self) -> MutexGuard<'_, RecordStore> {
        lock_recover(&self.shared.store)
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, ProducerRegistry> {
        lock_recover(&self.shared.registry)
    }

    pub(crate) fn shutdown(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_fatal(&self, err: AggError) {
        *lock_recover(&self.shared.fatal) = Some(err);
    }

    fn set_bound_addr(&self, addr: SocketAddr) {
        *lock_recover(&self.shared.bound_addr) = Some(addr);
    }

    fn take_fatal(&self) -> Option<AggError> {
        lock_recover(&self.shared.fatal).take()
    }
}

// a poisoned lock only means another thread panicked mid-update; the state
// is still the best available
fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One aggregation node: owns the clock, record store, producer registry
/// and request queue, and runs the connection front-end and the response
/// worker on two named threads.
///
/// # Example
///
/// ```no_run
/// use wxagg::{AggregationServer, ServerConfig};
///
/// # fn main() -> wxagg::Result<()> {
/// let mut server = AggregationServer::new(ServerConfig::default());
/// server.start()?;
/// // ... serve ...
/// server.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct AggregationServer {
    ctx: ServerContext,
    connection: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl AggregationServer {
    /// Creates a node from `config`, opening (and loading) the cache
    /// document. A document that cannot be created is remembered and
    /// reported to producers as status 500; it does not prevent startup.
    pub fn new(config: ServerConfig) -> Self {
        let store = RecordStore::open(&config.cache_path, config.capacity);
        let registry = ProducerRegistry::new(config.max_idle);
        let shared = Shared {
            clock: LamportClock::new(),
            store: Mutex::new(store),
            registry: Mutex::new(registry),
            queue: RequestQueue::new(),
            running: AtomicBool::new(false),
            bound_addr: Mutex::new(None),
            fatal: Mutex::new(None),
            config,
        };
        AggregationServer {
            ctx: ServerContext {
                shared: Arc::new(shared),
            },
            connection: None,
            worker: None,
        }
    }

    /// Spawns the connection front-end and the response worker, then waits
    /// up to a second for the listening socket to come up.
    ///
    /// # Errors
    ///
    /// Returns the bind error when the listener never reported ready.
    pub fn start(&mut self) -> Result<()> {
        self.ctx.shared.running.store(true, Ordering::SeqCst);

        let (ready_tx, ready_rx) = bounded(1);
        let ctx = self.ctx.clone();
        let connection = thread::Builder::new()
            .name("wxagg-connection".to_string())
            .spawn(move || {
                if let Err(err) = ConnectionService::new(ctx.clone()).run(ready_tx) {
                    error!("connection service failed: {}", err);
                    ctx.record_fatal(err);
                    ctx.shutdown();
                }
            })?;

        let ctx = self.ctx.clone();
        let worker = thread::Builder::new()
            .name("wxagg-worker".to_string())
            .spawn(move || ResponseService::new(ctx).run())?;

        self.connection = Some(connection);
        self.worker = Some(worker);

        match ready_rx.recv_timeout(BIND_WAIT) {
            Ok(addr) => {
                self.ctx.set_bound_addr(addr);
                info!(%addr, "aggregation server listening");
                Ok(())
            }
            Err(_) => {
                self.ctx.shutdown();
                self.join_services();
                Err(self.ctx.take_fatal().unwrap_or_else(|| {
                    AggError::Listener("listening socket did not come up".to_string())
                }))
            }
        }
    }

    /// Stops both services, waits for them, and performs a final document
    /// sync so nothing accepted in memory is left behind.
    pub fn stop(&mut self) -> Result<()> {
        self.ctx.shutdown();
        self.join_services();
        let result = self.ctx.store().sync_to_file();
        info!("aggregation server stopped");
        result
    }

    /// Blocks until both services exit, reporting any fatal listener error.
    /// This is how the server binary serves forever.
    pub fn join(&mut self) -> Result<()> {
        self.join_services();
        match self.ctx.take_fatal() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// the address the listener actually bound, once `start` returned
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.ctx.local_addr()
    }

    /// a handle to the interface the services consume, mainly for tests
    pub fn context(&self) -> ServerContext {
        self.ctx.clone()
    }

    fn join_services(&mut self) {
        if let Some(handle) = self.connection.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback() -> TcpStream {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let _ = listener.accept().unwrap();
        stream
    }

    fn test_server() -> (AggregationServer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            port: 0,
            cache_path: dir.path().join("cache.json"),
            ..ServerConfig::default()
        };
        (AggregationServer::new(config), dir)
    }

    #[test]
    fn enqueue_merges_the_remote_clock() {
        let (server, _dir) = test_server();
        let ctx = server.context();
        ctx.enqueue_fetch("IDS60901".to_string(), 9, loopback());
        assert_eq!(ctx.clock().now(), 9);
        assert_eq!(ctx.queue().len(), 1);
    }

    #[test]
    fn queue_orders_mixed_entry_points_by_lamport() {
        let (server, _dir) = test_server();
        let ctx = server.context();
        ctx.enqueue_fetch("a".to_string(), 5, loopback());
        ctx.enqueue_reject("bad".to_string(), 400, 2, loopback());
        ctx.enqueue_fetch("b".to_string(), 4, loopback());
        let order: Vec<u64> = std::iter::from_fn(|| ctx.queue().poll())
            .map(|item| item.remote_lamport())
            .collect();
        assert_eq!(order, vec![2, 4, 5]);
    }
}
