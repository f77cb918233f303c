//! RedbQueue - a `DispatchQueue` whose messages survive restarts.
//!
//! Messages are written to redb on enqueue and removed on ack. Visibility
//! state is kept in memory, so after a restart every unacked message is
//! visible again with its receive count reset.

use anyhow::anyhow;
use pickup_core::{Delivery, DispatchMessage, DispatchQueue};
use pickup_queue_memory::{Entry, Ledger, receive_from};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::{path::Path, sync::Arc, time::Duration};
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// seq -> JSON encoded `DispatchMessage`
const MESSAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("messages");
const DEAD_LETTERS: TableDefinition<u64, &[u8]> = TableDefinition::new("dead_letters");

#[derive(Clone)]
pub struct RedbQueue {
    db: Arc<Database>,
    ledger: Arc<Mutex<Ledger>>,
    visibility_timeout: Duration,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for RedbQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbQueue").finish()
    }
}

impl RedbQueue {
    pub fn open<P: AsRef<Path>>(
        path: P,
        visibility_timeout: Duration,
        max_receives: u32,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = Database::create(path.join("queue.redb"))?;

        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(MESSAGES)?;
                let _ = write_txn.open_table(DEAD_LETTERS)?;
            }
            write_txn.commit()?;
        }

        let mut ledger = Ledger::new(visibility_timeout, max_receives);
        {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(MESSAGES)?;
            for row in table.iter()? {
                let (seq, value) = row?;
                ledger.push(seq.value(), serde_json::from_slice(value.value())?);
            }
        }
        debug!(pending = ledger.len(), "opened dispatch queue");

        Ok(Self {
            db: Arc::new(db),
            ledger: Arc::new(Mutex::new(ledger)),
            visibility_timeout,
            notify: Arc::new(Notify::new()),
        })
    }

    /// Messages that exceeded `max_receives`, oldest first.
    pub async fn dead_letters(&self) -> anyhow::Result<Vec<DispatchMessage>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<DispatchMessage>> {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(DEAD_LETTERS)?;
            let mut out = Vec::new();
            for row in table.iter()? {
                let (_, value) = row?;
                out.push(serde_json::from_slice(value.value())?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| anyhow!("redb read task failed: {}", e))?
    }

    async fn remove(&self, seq: u64) -> anyhow::Result<()> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(MESSAGES)?;
                table.remove(seq)?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("redb delete task failed: {}", e))?
    }

    async fn bury(&self, dead: Vec<Entry>) -> anyhow::Result<()> {
        if dead.is_empty() {
            return Ok(());
        }
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let write_txn = db.begin_write()?;
            {
                let mut messages = write_txn.open_table(MESSAGES)?;
                let mut dead_letters = write_txn.open_table(DEAD_LETTERS)?;
                for entry in dead {
                    messages.remove(entry.seq)?;
                    dead_letters.insert(
                        entry.seq,
                        serde_json::to_vec(&entry.message)?.as_slice(),
                    )?;
                }
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| anyhow!("redb write task failed: {}", e))?
    }
}

#[async_trait::async_trait]
impl DispatchQueue for RedbQueue {
    async fn enqueue(&self, message: DispatchMessage) -> anyhow::Result<()> {
        let db = self.db.clone();
        let encoded = serde_json::to_vec(&message)?;

        let seq = tokio::task::spawn_blocking(move || -> anyhow::Result<u64> {
            let write_txn = db.begin_write()?;
            let seq = {
                // Sequence numbers are shared with the dead-letter table.
                let buried = write_txn
                    .open_table(DEAD_LETTERS)?
                    .last()?
                    .map_or(0, |(key, _)| key.value());
                let mut table = write_txn.open_table(MESSAGES)?;
                let last = table.last()?.map_or(0, |(key, _)| key.value());
                let seq = last.max(buried) + 1;
                table.insert(seq, encoded.as_slice())?;
                seq
            };
            write_txn.commit()?;
            Ok(seq)
        })
        .await
        .map_err(|e| anyhow!("redb write task failed: {}", e))??;

        self.ledger.lock().await.push(seq, message);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> anyhow::Result<Option<Delivery>> {
        let (delivery, dead) = receive_from(&self.ledger, &self.notify, wait).await;
        self.bury(dead).await?;
        Ok(delivery)
    }

    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let entry = self.ledger.lock().await.ack(delivery.receipt);
        match entry {
            Some(entry) => self.remove(entry.seq).await,
            None => Ok(()),
        }
    }

    async fn nack(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let dead = self.ledger.lock().await.nack(delivery.receipt);
        self.notify.notify_waiters();
        self.bury(dead.into_iter().collect()).await
    }

    async fn extend(&self, delivery: &Delivery) -> anyhow::Result<bool> {
        let now = tokio::time::Instant::now();
        Ok(self.ledger.lock().await.extend(delivery.receipt, now))
    }

    fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickup_core::testutil::{CID_HELLO, CID_TEST_2, QueueTests, message};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_redb_queue() {
        let dir = tempdir().unwrap();
        let visibility = Duration::from_millis(50);
        let queue = RedbQueue::open(dir.path(), visibility, 10).unwrap();
        QueueTests::new(&queue, visibility).run_all().await.unwrap();
    }

    #[tokio::test]
    async fn unacked_messages_survive_restart() {
        let dir = tempdir().unwrap();
        {
            let queue = RedbQueue::open(dir.path(), Duration::from_secs(60), 5).unwrap();
            queue.enqueue(message("keep-1", CID_HELLO)).await.unwrap();
            queue.enqueue(message("keep-2", CID_TEST_2)).await.unwrap();
            queue.enqueue(message("done", CID_HELLO)).await.unwrap();

            let first = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            assert_eq!(first.message.request_id, "keep-1");
            let second = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            let third = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            assert_eq!(third.message.request_id, "done");
            queue.ack(&third).await.unwrap();
            // `first` and `second` stay in flight when the process dies.
            let _ = (first, second);
        }

        let queue = RedbQueue::open(dir.path(), Duration::from_secs(60), 5).unwrap();
        let mut ids = Vec::new();
        while let Some(delivery) = queue.receive(Duration::from_millis(20)).await.unwrap() {
            assert_eq!(delivery.receive_count, 1);
            ids.push(delivery.message.request_id.clone());
            queue.ack(&delivery).await.unwrap();
        }
        assert_eq!(ids, ["keep-1", "keep-2"]);
    }

    #[tokio::test]
    async fn dead_letters_are_persisted() {
        let dir = tempdir().unwrap();
        {
            let queue = RedbQueue::open(dir.path(), Duration::from_secs(60), 1).unwrap();
            queue.enqueue(message("poison", CID_HELLO)).await.unwrap();
            let delivery = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            queue.nack(&delivery).await.unwrap();
        }

        let queue = RedbQueue::open(dir.path(), Duration::from_secs(60), 1).unwrap();
        assert!(queue.receive(Duration::from_millis(20)).await.unwrap().is_none());
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].request_id, "poison");
    }

    #[tokio::test]
    async fn new_messages_do_not_overwrite_dead_letters() {
        let dir = tempdir().unwrap();
        let queue = RedbQueue::open(dir.path(), Duration::from_secs(60), 1).unwrap();
        for id in ["poison-1", "poison-2"] {
            queue.enqueue(message(id, CID_HELLO)).await.unwrap();
            let delivery = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
            queue.nack(&delivery).await.unwrap();
        }

        let dead = queue.dead_letters().await.unwrap();
        let ids: Vec<_> = dead.iter().map(|m| m.request_id.as_str()).collect();
        assert_eq!(ids, ["poison-1", "poison-2"]);
    }
}
