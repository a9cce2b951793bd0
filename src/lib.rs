#![deny(missing_docs)]
//! # wxagg
//! A weather-data aggregation server that mediates between content
//! producers pushing observation records and readers fetching the latest
//! record per station.
//!
//! The node keeps a bounded, least-recently-used cache of records
//! ([`RecordStore`]), persists it atomically to a single JSON document,
//! expires producers that go silent ([`ProducerRegistry`]) and orders all
//! externally observable events with a Lamport clock ([`LamportClock`]).
//! A non-blocking connection front-end parses requests into work items; a
//! single response worker drains them in causal order.

pub mod client;
pub mod clock;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod record;
pub mod registry;
pub mod server;
pub mod store;
pub mod work;
pub mod worker;

pub use client::AggClient;
pub use clock::LamportClock;
pub use error::{AggError, Result};
pub use protocol::Response;
pub use record::Record;
pub use registry::ProducerRegistry;
pub use server::{AggregationServer, ServerConfig, ServerContext};
pub use store::{CacheFileStatus, RecordStore};
