use pickup_core::{Delivery, DispatchQueue, PinError, Status, StatusStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::pickup::Pickup;

const MIN_LEASE_RENEWAL: Duration = Duration::from_millis(10);

/// What to do with a delivery after processing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    Ack,
    Nack,
}

/// Consumes dispatch messages and drives each record through
/// `queued -> pinning -> pinned | failed`.
#[derive(Debug, Clone)]
pub struct Worker {
    queue: Arc<dyn DispatchQueue>,
    status: Arc<dyn StatusStore>,
    pickup: Pickup,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn DispatchQueue>,
        status: Arc<dyn StatusStore>,
        pickup: Pickup,
    ) -> Self {
        Self {
            queue,
            status,
            pickup,
        }
    }

    /// Handles one delivery. Never fails: every error ends in a settle
    /// decision.
    ///
    /// The message is checked against the current record first. One that
    /// no longer describes it (missing record, other CID or key, older
    /// generation, terminal status) is acked and dropped. A status store
    /// error before or after the transfer nacks the message; a redelivery
    /// then finds the archive already stored.
    pub async fn process(&self, delivery: &Delivery) -> Settle {
        let msg = &delivery.message;
        let request_id = msg.request_id.as_str();
        let cid = msg.cid.as_str();

        let record = match self.status.lookup(request_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(request_id, cid, "no status record for message, dropping");
                return Settle::Ack;
            }
            Err(e) => {
                warn!(request_id, cid, error = %e, "status store unavailable, will retry");
                return Settle::Nack;
            }
        };
        // Messages without a generation are matched on content alone.
        let outdated = record.cid != msg.cid
            || record.destination.bucket != msg.bucket
            || record.destination.key != msg.key
            || (msg.generation != 0 && msg.generation != record.generation);
        if outdated {
            info!(
                request_id,
                cid,
                generation = record.generation,
                record_cid = %record.cid,
                "message does not match current record, dropping"
            );
            return Settle::Ack;
        }
        let generation = record.generation;

        match self
            .status
            .transition(request_id, generation, Status::Pinning, None)
            .await
        {
            Ok(_) => {}
            Err(PinError::Conflict {
                current: Status::Pinning,
                ..
            }) => {
                // An earlier delivery died mid-flight.
                info!(
                    request_id,
                    cid,
                    receive_count = delivery.receive_count,
                    "resuming interrupted pickup"
                );
            }
            Err(PinError::NotFound) => {
                warn!(request_id, cid, "status record vanished, dropping");
                return Settle::Ack;
            }
            Err(e @ (PinError::StaleGeneration { .. } | PinError::Conflict { .. })) => {
                info!(request_id, cid, error = %e, "message is outdated, dropping");
                return Settle::Ack;
            }
            Err(e) => {
                warn!(request_id, cid, error = %e, "status store unavailable, will retry");
                return Settle::Nack;
            }
        }

        let (next, failure) = match self
            .pickup
            .run(cid, &msg.origins, &record.destination)
            .await
        {
            Ok(_) => (Status::Pinned, None),
            Err(reason) => (Status::Failed, Some(reason)),
        };

        match self
            .status
            .transition(
                request_id,
                generation,
                next,
                failure.as_ref().map(|r| r.as_str()),
            )
            .await
        {
            Ok(_) => {
                info!(request_id, cid, generation, status = %next, "pickup finished");
                Settle::Ack
            }
            Err(
                e @ (PinError::StaleGeneration { .. }
                | PinError::Conflict { .. }
                | PinError::NotFound),
            ) => {
                warn!(request_id, cid, error = %e, "discarding outdated pickup result");
                Settle::Ack
            }
            Err(e) => {
                warn!(request_id, cid, error = %e, "could not record pickup result, will retry");
                Settle::Nack
            }
        }
    }

    /// Receives, processes and settles at most one message.
    pub async fn process_next(&self, wait: Duration) -> anyhow::Result<Option<Settle>> {
        let Some(delivery) = self.queue.receive(wait).await? else {
            return Ok(None);
        };
        let settle = self.process_leased(&delivery).await;
        self.settle(&delivery, settle).await;
        Ok(Some(settle))
    }

    /// [`process`](Self::process) while extending the delivery's visibility
    /// every third of the queue's timeout, so a long transfer is not handed
    /// to a second worker.
    async fn process_leased(&self, delivery: &Delivery) -> Settle {
        let period = (self.queue.visibility_timeout() / 3).max(MIN_LEASE_RENEWAL);
        let mut renew = tokio::time::interval_at(Instant::now() + period, period);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let work = self.process(delivery);
        tokio::pin!(work);
        loop {
            tokio::select! {
                settle = &mut work => return settle,
                _ = renew.tick() => match self.queue.extend(delivery).await {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        request_id = %delivery.message.request_id,
                        "visibility lapsed before renewal, message may be redelivered"
                    ),
                    Err(e) => warn!(
                        request_id = %delivery.message.request_id,
                        error = %e,
                        "failed to extend message visibility"
                    ),
                },
            }
        }
    }

    async fn settle(&self, delivery: &Delivery, settle: Settle) {
        let result = match settle {
            Settle::Ack => self.queue.ack(delivery).await,
            Settle::Nack => self.queue.nack(delivery).await,
        };
        if let Err(e) = result {
            warn!(
                request_id = %delivery.message.request_id,
                ?settle,
                error = %e,
                "failed to settle message"
            );
        }
    }

    /// Runs `concurrency` consumer loops until `cancel` fires. A message
    /// being processed when that happens is finished first.
    pub async fn run(&self, cancel: CancellationToken) {
        let concurrency = self.pickup.config().concurrency.max(1);
        info!(concurrency, "starting pickup workers");

        let mut tasks = JoinSet::new();
        for id in 0..concurrency {
            let worker = self.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { worker.consume(id, cancel).await });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker loop aborted");
            }
        }
        info!("pickup workers stopped");
    }

    async fn consume(&self, id: usize, cancel: CancellationToken) {
        let wait = self.pickup.config().receive_wait();
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.queue.receive(wait) => received,
            };
            match received {
                Ok(Some(delivery)) => {
                    let settle = self.process_leased(&delivery).await;
                    self.settle(&delivery, settle).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker = id, error = %e, "queue receive failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        debug!(worker = id, "worker loop stopped");
    }
}
