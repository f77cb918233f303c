//! Core types and traits of the pickup pinning service.
//!
//! This crate defines everything the other pickup crates share:
//!
//! - The pin lifecycle: [`Pin`], [`PinStatus`] and the forward-only
//!   [`Status`] state machine.
//! - The error taxonomy ([`PinError`]) and its wire form ([`ErrorBody`]).
//! - The deterministic storage key convention ([`Destination`]).
//! - Collaborator traits, each with its own backend crates:
//!   - [`Store`]: object storage for finished archives
//!     (`pickup_store_memory`, `pickup_store_local`, `pickup_store_s3`)
//!   - [`StatusStore`]: per-user pin records
//!     (`pickup_status_memory`, `pickup_status_redb`)
//!   - [`DispatchQueue`]: at-least-once work handoff
//!     (`pickup_queue_memory`, `pickup_queue_redb`)
//!   - [`Retriever`]: the content-addressed node (`pickup_ipfs`)
//!
//! Enable the `testutil` feature for conformance suites that every backend
//! crate runs against its implementation.

pub mod destination;
pub mod error;
pub mod pin;
pub mod query;
pub mod queue;
pub mod retrieve;
pub mod status_store;
pub mod store;

#[cfg(feature = "testutil")]
pub mod testutil;

pub use destination::Destination;
pub use error::{ErrorBody, ErrorReason, PinError};
pub use pin::{Pin, PinStatus, Status};
pub use query::{PinQuery, PinResults, TextMatch};
pub use queue::{Delivery, DispatchMessage, DispatchQueue};
pub use retrieve::Retriever;
pub use status_store::{NewPin, StatusStore};
pub use store::{ByteStream, KeyStream, Store, StoreError, StoreFeatures, StoreResult};
