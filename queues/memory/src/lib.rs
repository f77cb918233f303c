//! MemoryQueue - an in-process, at-least-once `DispatchQueue`.
//!
//! The visibility bookkeeping lives in [`Ledger`], which durable queues
//! reuse on top of their own persistence.

use anyhow::Result;
use pickup_core::{Delivery, DispatchMessage, DispatchQueue};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_RECEIVES: u32 = 5;

/// A queued message. `seq` identifies it in the backing store, if any.
#[derive(Debug, Clone)]
pub struct Entry {
    pub seq: u64,
    pub receive_count: u32,
    pub message: DispatchMessage,
}

#[derive(Debug)]
struct InFlight {
    entry: Entry,
    deadline: Instant,
}

/// Ready list plus in-flight receipts with their visibility deadlines.
///
/// Receipts are unique per delivery, so settling with a receipt whose
/// visibility already lapsed is a no-op.
#[derive(Debug)]
pub struct Ledger {
    ready: VecDeque<Entry>,
    in_flight: HashMap<u64, InFlight>,
    next_receipt: u64,
    visibility_timeout: Duration,
    max_receives: u32,
}

impl Ledger {
    /// `max_receives == 0` disables dead-lettering.
    pub fn new(visibility_timeout: Duration, max_receives: u32) -> Self {
        Self {
            ready: VecDeque::new(),
            in_flight: HashMap::new(),
            next_receipt: 1,
            visibility_timeout,
            max_receives,
        }
    }

    pub fn push(&mut self, seq: u64, message: DispatchMessage) {
        self.ready.push_back(Entry {
            seq,
            receive_count: 0,
            message,
        });
    }

    /// Makes lapsed in-flight messages visible again. Returns the entries
    /// that exhausted `max_receives` instead.
    pub fn reclaim(&mut self, now: Instant) -> Vec<Entry> {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(receipt, _)| *receipt)
            .collect();
        let mut dead = Vec::new();
        for receipt in expired {
            if let Some(flight) = self.in_flight.remove(&receipt) {
                dead.extend(self.requeue(flight.entry));
            }
        }
        dead
    }

    pub fn pop(&mut self, now: Instant) -> Option<Delivery> {
        let mut entry = self.ready.pop_front()?;
        entry.receive_count += 1;
        let receipt = self.next_receipt;
        self.next_receipt += 1;
        let delivery = Delivery {
            receipt,
            receive_count: entry.receive_count,
            message: entry.message.clone(),
        };
        self.in_flight.insert(
            receipt,
            InFlight {
                entry,
                deadline: now + self.visibility_timeout,
            },
        );
        Some(delivery)
    }

    /// Pushes the deadline of `receipt` a full visibility timeout past
    /// `now`. Returns `false` for a receipt that is no longer in flight.
    pub fn extend(&mut self, receipt: u64, now: Instant) -> bool {
        match self.in_flight.get_mut(&receipt) {
            Some(flight) => {
                flight.deadline = now + self.visibility_timeout;
                true
            }
            None => false,
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight.values().map(|f| f.deadline).min()
    }

    /// Settles a delivery for good; returns the removed entry.
    pub fn ack(&mut self, receipt: u64) -> Option<Entry> {
        self.in_flight.remove(&receipt).map(|f| f.entry)
    }

    /// Returns the delivery to the ready list, or the entry if it was
    /// dead-lettered instead.
    pub fn nack(&mut self, receipt: u64) -> Option<Entry> {
        let flight = self.in_flight.remove(&receipt)?;
        self.requeue(flight.entry)
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn requeue(&mut self, entry: Entry) -> Option<Entry> {
        if self.max_receives > 0 && entry.receive_count >= self.max_receives {
            warn!(
                request_id = %entry.message.request_id,
                cid = %entry.message.cid,
                receive_count = entry.receive_count,
                "moving message to dead-letter list"
            );
            return Some(entry);
        }
        self.ready.push_back(entry);
        None
    }
}

/// Waits up to `wait` for a visible message in `ledger`.
///
/// Also returns whatever got dead-lettered while waiting so the caller can
/// record it.
pub async fn receive_from(
    ledger: &Mutex<Ledger>,
    notify: &Notify,
    wait: Duration,
) -> (Option<Delivery>, Vec<Entry>) {
    let give_up = Instant::now() + wait;
    let mut dead = Vec::new();
    loop {
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let wake_at = {
            let mut ledger = ledger.lock().await;
            let now = Instant::now();
            dead.extend(ledger.reclaim(now));
            if let Some(delivery) = ledger.pop(now) {
                return (Some(delivery), dead);
            }
            if now >= give_up {
                return (None, dead);
            }
            ledger
                .next_deadline()
                .map_or(give_up, |deadline| deadline.min(give_up))
        };

        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep_until(wake_at) => {}
        }
    }
}

#[derive(Debug)]
pub struct MemoryQueue {
    ledger: Mutex<Ledger>,
    visibility_timeout: Duration,
    notify: Notify,
    dead_letters: Mutex<Vec<DispatchMessage>>,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration, max_receives: u32) -> Self {
        Self {
            ledger: Mutex::new(Ledger::new(visibility_timeout, max_receives)),
            visibility_timeout,
            notify: Notify::new(),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Messages that exceeded `max_receives`.
    pub async fn dead_letters(&self) -> Vec<DispatchMessage> {
        self.dead_letters.lock().await.clone()
    }

    /// Ready plus in-flight messages.
    pub async fn len(&self) -> usize {
        self.ledger.lock().await.len()
    }

    async fn bury(&self, dead: impl IntoIterator<Item = Entry>) {
        let mut dead_letters = self.dead_letters.lock().await;
        dead_letters.extend(dead.into_iter().map(|e| e.message));
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_TIMEOUT, DEFAULT_MAX_RECEIVES)
    }
}

#[async_trait::async_trait]
impl DispatchQueue for MemoryQueue {
    async fn enqueue(&self, message: DispatchMessage) -> Result<()> {
        self.ledger.lock().await.push(0, message);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>> {
        let (delivery, dead) = receive_from(&self.ledger, &self.notify, wait).await;
        self.bury(dead).await;
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.ledger.lock().await.ack(delivery.receipt);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let dead = self.ledger.lock().await.nack(delivery.receipt);
        self.bury(dead).await;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn extend(&self, delivery: &Delivery) -> Result<bool> {
        Ok(self
            .ledger
            .lock()
            .await
            .extend(delivery.receipt, Instant::now()))
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickup_core::testutil::{CID_HELLO, QueueTests, message};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_queue() {
        let visibility = Duration::from_millis(50);
        let queue = MemoryQueue::new(visibility, 10);
        QueueTests::new(&queue, visibility).run_all().await.unwrap();
        assert_eq!(queue.len().await, 0);
    }

    #[tokio::test]
    async fn waiting_receiver_wakes_on_enqueue() {
        let queue = Arc::new(MemoryQueue::default());
        let receiver = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(message("wake-1", CID_HELLO)).await.unwrap();

        let delivery = receiver.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.message.request_id, "wake-1");
    }

    #[tokio::test]
    async fn exhausted_message_is_dead_lettered() {
        let queue = MemoryQueue::new(Duration::from_secs(60), 2);
        queue.enqueue(message("dlq-1", CID_HELLO)).await.unwrap();

        for _ in 0..2 {
            let delivery = queue
                .receive(Duration::from_millis(50))
                .await
                .unwrap()
                .unwrap();
            queue.nack(&delivery).await.unwrap();
        }

        assert!(
            queue
                .receive(Duration::from_millis(20))
                .await
                .unwrap()
                .is_none()
        );
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].request_id, "dlq-1");
    }

    #[tokio::test]
    async fn stale_receipt_does_not_settle_redelivery() {
        let mut ledger = Ledger::new(Duration::from_millis(10), 0);
        ledger.push(7, message("r", CID_HELLO));
        let start = Instant::now();
        let first = ledger.pop(start).unwrap();

        assert!(ledger.reclaim(start + Duration::from_millis(11)).is_empty());
        let second = ledger.pop(start + Duration::from_millis(11)).unwrap();
        assert_ne!(first.receipt, second.receipt);

        assert!(ledger.ack(first.receipt).is_none());
        assert_eq!(ledger.ack(second.receipt).map(|e| e.seq), Some(7));
        assert!(ledger.is_empty());
    }
}
