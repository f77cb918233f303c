//! Keyed persistence of [`PinStatus`] records, scoped per user.

use anyhow::Result;
use async_trait::async_trait;

use crate::error::PinError;
use crate::pin::{Pin, PinStatus, Status};
use crate::query::{PinQuery, PinResults};

/// Parameters for creating a record; the store assigns nothing itself, so
/// callers can keep id generation and the clock injectable.
#[derive(Debug, Clone)]
pub struct NewPin {
    pub request_id: String,
    pub user_id: String,
    pub pin: Pin,
    pub bucket: String,
    pub delegates: Vec<String>,
}

/// Datastore contract for pin status records.
///
/// # Semantics
///
/// - Every user-facing call takes the `user_id` and treats a record owned by
///   someone else exactly like a missing one (`Ok(None)`).
/// - `transition` is a compare-and-swap: the current record is re-read,
///   checked with [`PinStatus::transition_to`] and written back atomically
///   with respect to concurrent `replace` and `transition` calls on the same
///   `request_id`.
/// - `request_id`s are globally unique, which lets the worker address a
///   record without knowing its owner.
#[async_trait]
pub trait StatusStore: std::fmt::Debug + Send + Sync {
    /// Inserts a new `queued` record. Fails if `request_id` already exists.
    async fn create(&self, new: NewPin) -> Result<PinStatus, PinError>;

    async fn get(&self, user_id: &str, request_id: &str) -> Result<Option<PinStatus>>;

    async fn list(&self, user_id: &str, query: &PinQuery) -> Result<PinResults>;

    /// Reads a record by `request_id` alone, whoever owns it. For the
    /// worker, which knows no user.
    async fn lookup(&self, request_id: &str) -> Result<Option<PinStatus>>;

    /// Resets the record to `queued` with a new generation and `pin`.
    async fn replace(
        &self,
        user_id: &str,
        request_id: &str,
        pin: Pin,
    ) -> Result<Option<PinStatus>, PinError>;

    /// Moves the record forward. `generation == 0` skips the generation check.
    async fn transition(
        &self,
        request_id: &str,
        generation: u64,
        next: Status,
        failure: Option<&str>,
    ) -> Result<PinStatus, PinError>;
}

#[async_trait]
impl<T: StatusStore + ?Sized> StatusStore for std::sync::Arc<T> {
    async fn create(&self, new: NewPin) -> Result<PinStatus, PinError> {
        (**self).create(new).await
    }

    async fn get(&self, user_id: &str, request_id: &str) -> Result<Option<PinStatus>> {
        (**self).get(user_id, request_id).await
    }

    async fn list(&self, user_id: &str, query: &PinQuery) -> Result<PinResults> {
        (**self).list(user_id, query).await
    }

    async fn lookup(&self, request_id: &str) -> Result<Option<PinStatus>> {
        (**self).lookup(request_id).await
    }

    async fn replace(
        &self,
        user_id: &str,
        request_id: &str,
        pin: Pin,
    ) -> Result<Option<PinStatus>, PinError> {
        (**self).replace(user_id, request_id, pin).await
    }

    async fn transition(
        &self,
        request_id: &str,
        generation: u64,
        next: Status,
        failure: Option<&str>,
    ) -> Result<PinStatus, PinError> {
        (**self)
            .transition(request_id, generation, next, failure)
            .await
    }
}
