use pickup_core::{
    DispatchMessage, DispatchQueue, NewPin, Pin, PinError, PinQuery, PinResults, PinStatus,
    StatusStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ApiConfig;

/// Pin API orchestration.
///
/// Reads go to the status store only. Writes create or reset the record
/// first and then hand a dispatch message to the queue; the fetch itself is
/// never awaited.
#[derive(Debug, Clone)]
pub struct PinService {
    status: Arc<dyn StatusStore>,
    queue: Arc<dyn DispatchQueue>,
    bucket: String,
    delegates: Vec<String>,
    enqueue_retries: u32,
    enqueue_backoff: Duration,
}

impl PinService {
    pub fn new(
        status: Arc<dyn StatusStore>,
        queue: Arc<dyn DispatchQueue>,
        config: &ApiConfig,
        delegates: Vec<String>,
    ) -> Self {
        Self {
            status,
            queue,
            bucket: config.bucket.clone(),
            delegates,
            enqueue_retries: config.enqueue_retries,
            enqueue_backoff: config.enqueue_backoff(),
        }
    }

    pub async fn add(&self, user_id: &str, pin: Pin) -> Result<PinStatus, PinError> {
        pin.validate()?;
        let record = self
            .status
            .create(NewPin {
                request_id: Uuid::new_v4().to_string(),
                user_id: user_id.to_owned(),
                pin,
                bucket: self.bucket.clone(),
                delegates: self.delegates.clone(),
            })
            .await?;
        info!(request_id = %record.request_id, cid = %record.cid, user_id, "pin queued");
        self.dispatch(&record).await?;
        Ok(record)
    }

    pub async fn list(&self, user_id: &str, query: &PinQuery) -> Result<PinResults, PinError> {
        query.validate()?;
        Ok(self.status.list(user_id, query).await?)
    }

    pub async fn get(&self, user_id: &str, request_id: &str) -> Result<PinStatus, PinError> {
        self.status
            .get(user_id, request_id)
            .await?
            .ok_or(PinError::NotFound)
    }

    /// Starts a new generation of `request_id` and dispatches it like a
    /// create. An in-flight pickup of the previous generation cannot
    /// overwrite the new one.
    pub async fn replace(
        &self,
        user_id: &str,
        request_id: &str,
        pin: Pin,
    ) -> Result<PinStatus, PinError> {
        pin.validate()?;
        let record = self
            .status
            .replace(user_id, request_id, pin)
            .await?
            .ok_or(PinError::NotFound)?;
        info!(
            request_id,
            cid = %record.cid,
            generation = record.generation,
            "pin replaced"
        );
        self.dispatch(&record).await?;
        Ok(record)
    }

    pub async fn delete(&self, _user_id: &str, _request_id: &str) -> Result<(), PinError> {
        Err(PinError::NotImplemented("deletePinByRequestId"))
    }

    /// Enqueues with bounded retries. On final failure the record stays
    /// `queued` without a dispatch and needs reconciliation.
    async fn dispatch(&self, record: &PinStatus) -> Result<(), PinError> {
        let message = DispatchMessage::for_status(record);
        let mut attempt = 0;
        loop {
            match self.queue.enqueue(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.enqueue_retries => {
                    attempt += 1;
                    warn!(
                        request_id = %record.request_id,
                        attempt,
                        error = %e,
                        "enqueue failed, retrying"
                    );
                    tokio::time::sleep(self.enqueue_backoff * attempt).await;
                }
                Err(e) => {
                    error!(
                        request_id = %record.request_id,
                        cid = %record.cid,
                        generation = record.generation,
                        error = %e,
                        "enqueue failed, record left queued without dispatch"
                    );
                    return Err(PinError::Dispatch {
                        request_id: record.request_id.clone(),
                        source: e,
                    });
                }
            }
        }
    }
}
