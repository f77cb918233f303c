//! The dispatch contract between the API path and the worker pool.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::pin::PinStatus;

/// Unit of work handed to a pickup worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub request_id: String,
    pub cid: String,
    #[serde(default)]
    pub origins: Vec<String>,
    pub bucket: String,
    pub key: String,
    /// Generation of the record when the message was sent; `0` means unknown.
    #[serde(default)]
    pub generation: u64,
}

impl DispatchMessage {
    pub fn for_status(status: &PinStatus) -> Self {
        Self {
            request_id: status.request_id.clone(),
            cid: status.cid.clone(),
            origins: status.origins.clone(),
            bucket: status.destination.bucket.clone(),
            key: status.destination.key.clone(),
            generation: status.generation,
        }
    }
}

/// A received message plus the handle needed to settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub receipt: u64,
    /// 1 on first delivery, incremented on each redelivery.
    pub receive_count: u32,
    pub message: DispatchMessage,
}

/// At-least-once queue of [`DispatchMessage`]s.
///
/// A received message stays invisible to other receivers until it is
/// acked (removed), nacked (visible again immediately) or its visibility
/// timeout lapses (visible again). Consumers working longer than
/// [`visibility_timeout`](DispatchQueue::visibility_timeout) keep the
/// message hidden with [`extend`](DispatchQueue::extend).
#[async_trait]
pub trait DispatchQueue: std::fmt::Debug + Send + Sync {
    async fn enqueue(&self, message: DispatchMessage) -> Result<()>;

    /// Waits up to `wait` for a visible message.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Restarts the visibility timeout of an in-flight delivery. `false`
    /// when the receipt already lapsed and the message may be redelivered.
    async fn extend(&self, delivery: &Delivery) -> Result<bool>;

    fn visibility_timeout(&self) -> Duration;
}

#[async_trait]
impl<T: DispatchQueue + ?Sized> DispatchQueue for std::sync::Arc<T> {
    async fn enqueue(&self, message: DispatchMessage) -> Result<()> {
        (**self).enqueue(message).await
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>> {
        (**self).receive(wait).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        (**self).ack(delivery).await
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        (**self).nack(delivery).await
    }

    async fn extend(&self, delivery: &Delivery) -> Result<bool> {
        (**self).extend(delivery).await
    }

    fn visibility_timeout(&self) -> Duration {
        (**self).visibility_timeout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_dispatch_schema() {
        let msg = DispatchMessage {
            request_id: "r1".into(),
            cid: "bafy".into(),
            origins: vec!["/dns4/peer/tcp/4001".into()],
            bucket: "b".into(),
            key: "pickup/bafy/bafy.root.car".into(),
            generation: 2,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["requestId"], "r1");
        assert_eq!(json["origins"][0], "/dns4/peer/tcp/4001");
        assert_eq!(json["key"], "pickup/bafy/bafy.root.car");
    }

    #[test]
    fn generation_defaults_to_zero() {
        let msg: DispatchMessage = serde_json::from_str(
            r#"{"requestId":"r","cid":"c","origins":[],"bucket":"b","key":"k"}"#,
        )
        .unwrap();
        assert_eq!(msg.generation, 0);
    }
}
