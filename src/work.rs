//! Work items queued between the front-end and the worker.

use std::net::TcpStream;

use crate::record::Record;

/// A parsed request waiting for the response worker.
///
/// Each item owns the socket it arrived on; the worker writes the response
/// to it and closes it on every exit path. `remote_lamport` is the clock
/// value the peer sent and is the queue's ordering key.
#[derive(Debug)]
pub enum WorkItem {
    /// a producer pushing the latest record for its station
    Push {
        /// id the producer reports under
        producer_id: String,
        /// the pushed record
        record: Record,
        /// clock value carried by the request
        remote_lamport: u64,
        /// socket to answer on
        stream: TcpStream,
    },
    /// a reader fetching the latest record for a station
    Fetch {
        /// station id to look up
        id: String,
        /// clock value carried by the request
        remote_lamport: u64,
        /// socket to answer on
        stream: TcpStream,
    },
    /// a request refused during parsing, answered with an error status
    Reject {
        /// message for the client
        reason: String,
        /// status code to answer with
        status: u16,
        /// clock value carried by the request, when one could be parsed
        remote_lamport: u64,
        /// socket to answer on
        stream: TcpStream,
    },
}

impl WorkItem {
    /// the clock value the peer sent, used to order the queue
    pub fn remote_lamport(&self) -> u64 {
        match self {
            WorkItem::Push { remote_lamport, .. }
            | WorkItem::Fetch { remote_lamport, .. }
            | WorkItem::Reject { remote_lamport, .. } => *remote_lamport,
        }
    }
}
