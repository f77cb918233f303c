//! The pickup worker.
//!
//! [`Pickup`] is the retrieval pipeline for a single CID: dial the origin
//! hints, export the archive from the retrieval node and stream it into the
//! destination bucket. [`Worker`] wraps it in the queue/status-store
//! protocol and runs a pool of consumers.

mod config;
mod pickup;
mod worker;

pub use config::WorkerConfig;
pub use pickup::{Buckets, FailureReason, Pickup, PickupOutcome};
pub use worker::{Settle, Worker};
