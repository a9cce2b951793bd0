//! The single response worker.
//!
//! Exactly one thread consumes the request queue, so every mutation of the
//! record store and producer registry is serialized here. Each iteration
//! sweeps expired producers, retries any pending document sync, then
//! dispatches the causally earliest work item and closes its socket.

use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::protocol::{
    Response, MSG_CREATED, MSG_NOT_FOUND, MSG_OK, MSG_SERVER_ERROR, STATUS_BAD_REQUEST,
    STATUS_CREATED, STATUS_INTERNAL_ERROR, STATUS_NOT_FOUND, STATUS_OK,
};
use crate::record::Record;
use crate::server::ServerContext;
use crate::store::CacheFileStatus;
use crate::work::WorkItem;

/// Consumes the request queue and answers every client.
pub struct ResponseService {
    ctx: ServerContext,
}

impl ResponseService {
    /// creates the worker over the orchestrator's interface
    pub fn new(ctx: ServerContext) -> Self {
        ResponseService { ctx }
    }

    /// Runs until the orchestrator stops.
    pub fn run(self) {
        let idle_backoff = self.ctx.config().idle_backoff.max(Duration::from_millis(1));
        while self.ctx.is_running() {
            self.sweep_expired();
            self.retry_pending_sync();
            match self.ctx.queue().poll() {
                Some(item) => self.dispatch(item),
                None => self.ctx.queue().wait(idle_backoff),
            }
        }
    }

    // drop every producer that went silent, along with its record
    fn sweep_expired(&self) {
        let expired = self.ctx.registry().expire();
        if expired.is_empty() {
            return;
        }
        let mut store = self.ctx.store();
        for producer in expired {
            info!(
                producer = %producer.producer_id,
                record = %producer.record_id,
                "expiring silent producer"
            );
            store.remove(&producer.record_id);
        }
    }

    // changes left over from expiry or an earlier failed sync
    fn retry_pending_sync(&self) {
        let mut store = self.ctx.store();
        if store.has_pending_writes() {
            if let Err(err) = store.sync_to_file() {
                debug!("cache sync retry failed: {}", err);
            }
        }
    }

    fn dispatch(&self, item: WorkItem) {
        // one local event per dispatched request
        self.ctx.clock().tick();
        match item {
            WorkItem::Push {
                producer_id,
                record,
                remote_lamport,
                stream,
            } => self.handle_push(producer_id, record, remote_lamport, stream),
            WorkItem::Fetch { id, stream, .. } => self.handle_fetch(&id, stream),
            WorkItem::Reject {
                reason,
                status,
                stream,
                ..
            } => self.respond(stream, status, reason, None),
        }
    }

    fn handle_push(
        &self,
        producer_id: String,
        record: Record,
        remote_lamport: u64,
        stream: TcpStream,
    ) {
        let id = match record.require_id() {
            Ok(id) => id.to_string(),
            Err(_) => {
                self.respond(
                    stream,
                    STATUS_BAD_REQUEST,
                    "Invalid weather data: missing ID".to_string(),
                    None,
                );
                return;
            }
        };
        // a producer that did not identify itself is tracked under its station
        let producer = if producer_id.is_empty() {
            id.clone()
        } else {
            producer_id
        };
        self.ctx.registry().observe(&producer, &id, remote_lamport);

        let (status, msg) = {
            let mut store = self.ctx.store();
            store.put(&id, record);
            let sync_failed = match store.sync_to_file() {
                Ok(()) => false,
                Err(err) => {
                    warn!("cache sync failed: {}", err);
                    true
                }
            };
            match store.consume_file_status() {
                CacheFileStatus::CreateFailed => {
                    (STATUS_INTERNAL_ERROR, MSG_SERVER_ERROR.to_string())
                }
                CacheFileStatus::Created => (STATUS_CREATED, annotate(MSG_CREATED, sync_failed)),
                CacheFileStatus::Exists => (STATUS_OK, annotate(MSG_OK, sync_failed)),
            }
        };
        self.respond(stream, status, msg, None);
    }

    fn handle_fetch(&self, id: &str, stream: TcpStream) {
        let record = self.ctx.store().get(id);
        match record {
            Some(record) => self.respond(stream, STATUS_OK, MSG_OK.to_string(), Some(record)),
            None => self.respond(stream, STATUS_NOT_FOUND, MSG_NOT_FOUND.to_string(), None),
        }
    }

    // Writes the response and closes the socket. Taking the stream by value
    // means every path through the worker releases it.
    fn respond(&self, mut stream: TcpStream, status: u16, msg: String, record: Option<Record>) {
        let mut response = Response::new(status, msg, self.ctx.clock().now());
        if let Some(record) = record {
            response = response.with_record(record);
        }
        match serde_json::to_string(&response) {
            Ok(json) => {
                if let Err(err) = stream
                    .write_all(json.as_bytes())
                    .and_then(|()| stream.flush())
                {
                    // the client may already be gone
                    debug!(%err, "response write failed");
                }
            }
            Err(err) => error!(%err, "response serialization failed"),
        }
    }
}

// the in-memory accept already succeeded, so a failed sync only annotates
fn annotate(base: &str, sync_failed: bool) -> String {
    if sync_failed {
        format!("{} (File sync failed)", base)
    } else {
        base.to_string()
    }
}
