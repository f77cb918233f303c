//! Test utilities shared by the pickup backend crates.
//!
//! Each backend crate runs the matching suite against its implementation:
//!
//! ```toml
//! [dev-dependencies]
//! pickup_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! ```ignore
//! use pickup_core::testutil::StoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     StoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use crate::error::PinError;
use crate::pin::{Pin, Status};
use crate::query::PinQuery;
use crate::queue::{DispatchMessage, DispatchQueue};
use crate::retrieve::Retriever;
use crate::status_store::{NewPin, StatusStore};
use crate::store::{ByteStream, Store, StoreResult};
use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Well-known CIDs used across the test suites.
pub const CID_HELLO: &str = "bafkreifzjut3te2nhyekklss27nh3k72ysco7y32koao5eei66wof36n5e";
pub const CID_TEST_2: &str = "bafkreig6ylslysmsgffjzgsrxpmftynqqg3uc6ebrrj4dhiy233wd5oyaq";
pub const CID_TEST_3: &str = "bafkreihyyavekzt6coios4bio3ou3rwaazxetnonvjxmdsb6pwel5exc4i";

/// Conformance suite for `Store` implementations.
///
/// Every object is written under a random prefix, which `cleanup` removes
/// again, so the suite can run against a shared bucket.
pub struct StoreTests<'a, S> {
    store: &'a S,
    prefix: String,
}

impl<'a, S: Store> StoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self::with_prefix(store, format!("_conformance_{}/", rand::rng().random::<u32>()))
    }

    pub fn with_prefix(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{name}", self.prefix)
    }

    async fn keys_under_prefix(&self) -> StoreResult<HashSet<String>> {
        let mut keys = HashSet::new();
        let mut stream = self.store.list(&self.prefix).await?;
        while let Some(key) = stream.next().await {
            keys.insert(key?);
        }
        Ok(keys)
    }

    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_chunked_archive_round_trip().await?;
        self.test_exists().await?;
        self.test_overwrite_replaces().await?;
        self.test_delete_is_idempotent().await?;
        self.test_list_by_prefix().await?;
        self.test_failed_stream_leaves_no_object().await?;
        if self.store.features().supports_rename {
            self.test_rename_finalizes().await?;
        }
        self.cleanup().await
    }

    /// Chunks come back concatenated in order and the reported length
    /// matches what was sent.
    pub async fn test_chunked_archive_round_trip(&self) -> StoreResult<()> {
        let key = self.key("round_trip.root.car");
        let archive = random_bytes(64 * 1024 + 17);
        let chunks: Vec<Result<Bytes, std::io::Error>> = archive
            .chunks(4096)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let written = self
            .store
            .put_stream(&key, Box::new(futures::stream::iter(chunks)))
            .await?;
        assert_eq!(written, archive.len() as u64);
        assert_eq!(read_all(self.store, &key).await?, archive);
        Ok(())
    }

    pub async fn test_exists(&self) -> StoreResult<()> {
        let key = self.key("present.root.car");
        assert!(!self.store.exists(&key).await?);
        assert!(self.store.read(&key).await.is_err());

        put_archive(self.store, &key, Bytes::from(vec![7u8; 4321])).await?;
        assert!(self.store.exists(&key).await?);
        assert_eq!(read_all(self.store, &key).await?.len(), 4321);
        Ok(())
    }

    pub async fn test_overwrite_replaces(&self) -> StoreResult<()> {
        let key = self.key("overwrite.root.car");
        put_archive(self.store, &key, Bytes::from_static(b"first archive, longer")).await?;
        put_archive(self.store, &key, Bytes::from_static(b"second")).await?;
        assert_eq!(read_all(self.store, &key).await?.as_ref(), b"second");
        Ok(())
    }

    pub async fn test_delete_is_idempotent(&self) -> StoreResult<()> {
        let key = self.key("deleted.root.car");
        put_archive(self.store, &key, Bytes::from_static(b"car")).await?;
        self.store.delete(&key).await?;
        assert!(!self.store.exists(&key).await?);
        self.store.delete(&key).await?;
        Ok(())
    }

    pub async fn test_list_by_prefix(&self) -> StoreResult<()> {
        let inside = [self.key("listed/a.root.car"), self.key("listed/b/c.root.car")];
        let outside = self.key("unlisted.root.car");
        for key in inside.iter().chain([&outside]) {
            put_archive(self.store, key, Bytes::from_static(b"car")).await?;
        }

        let mut found = HashSet::new();
        let mut stream = self.store.list(&self.key("listed/")).await?;
        while let Some(key) = stream.next().await {
            found.insert(key?);
        }
        assert_eq!(found, inside.into_iter().collect::<HashSet<_>>());
        assert!(self.keys_under_prefix().await?.contains(&outside));
        Ok(())
    }

    /// A stream that errors must surface the error from `put_stream`, and on
    /// atomic stores must not leave a readable object behind.
    pub async fn test_failed_stream_leaves_no_object(&self) -> StoreResult<()> {
        let key = self.key("broken.root.car");
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("source went away")),
        ];

        let result = self
            .store
            .put_stream(&key, Box::new(futures::stream::iter(chunks)))
            .await;
        assert!(result.is_err(), "broken stream should fail the put");
        if self.store.features().atomic_put {
            assert!(!self.store.exists(&key).await?, "partial object exposed");
        }
        self.store.delete(&key).await
    }

    /// Staging then renaming onto the final key replaces what was there.
    pub async fn test_rename_finalizes(&self) -> StoreResult<()> {
        let staging = self.key("pickup/x/x.root.car.attempt.part");
        let target = self.key("pickup/x/x.root.car");
        put_archive(self.store, &target, Bytes::from_static(b"stale")).await?;
        put_archive(self.store, &staging, Bytes::from_static(b"fresh")).await?;

        self.store.rename(&staging, &target).await?;
        assert!(!self.store.exists(&staging).await?);
        assert_eq!(read_all(self.store, &target).await?.as_ref(), b"fresh");
        assert!(self.store.rename(&staging, &target).await.is_err());
        Ok(())
    }

    pub async fn cleanup(&self) -> StoreResult<()> {
        for key in self.keys_under_prefix().await? {
            self.store.delete(&key).await?;
        }
        Ok(())
    }
}

/// Test suite for `StatusStore` implementations.
pub struct StatusStoreTests<'a, S> {
    store: &'a S,
}

pub fn new_pin(user_id: &str, cid: &str) -> NewPin {
    NewPin {
        request_id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_owned(),
        pin: Pin::new(cid),
        bucket: "default".to_owned(),
        delegates: Vec::new(),
    }
}

impl<'a, S: StatusStore> StatusStoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn run_all(&self) -> anyhow::Result<()> {
        self.test_create_get().await?;
        self.test_duplicate_request_id().await?;
        self.test_cross_user_isolation().await?;
        self.test_lookup_ignores_owner().await?;
        self.test_list_order_and_filters().await?;
        self.test_forward_only().await?;
        self.test_replace_resets_generation().await?;
        self.test_stale_transition_rejected().await?;
        self.test_unknown_request().await?;
        Ok(())
    }

    pub async fn test_create_get(&self) -> anyhow::Result<()> {
        let created = self.store.create(new_pin("alice", CID_HELLO)).await?;
        assert_eq!(created.status, Status::Queued);
        assert_eq!(created.generation, 1);

        let fetched = self
            .store
            .get("alice", &created.request_id)
            .await?
            .ok_or_else(|| anyhow!("created record should be readable"))?;
        assert_eq!(fetched, created);
        Ok(())
    }

    pub async fn test_duplicate_request_id(&self) -> anyhow::Result<()> {
        let new = new_pin("alice", CID_HELLO);
        self.store.create(new.clone()).await?;
        assert!(
            self.store.create(new).await.is_err(),
            "request ids must never be reused"
        );
        Ok(())
    }

    pub async fn test_cross_user_isolation(&self) -> anyhow::Result<()> {
        let bobs = self.store.create(new_pin("bob", CID_HELLO)).await?;

        assert!(self.store.get("mallory", &bobs.request_id).await?.is_none());
        assert!(
            self.store
                .replace("mallory", &bobs.request_id, Pin::new(CID_TEST_2))
                .await?
                .is_none()
        );
        let listed = self.store.list("mallory", &PinQuery::default()).await?;
        assert!(listed.results.iter().all(|p| p.user_id == "mallory"));

        let untouched = self.store.get("bob", &bobs.request_id).await?;
        assert_eq!(untouched, Some(bobs));
        Ok(())
    }

    pub async fn test_lookup_ignores_owner(&self) -> anyhow::Result<()> {
        let rec = self.store.create(new_pin("frank", CID_HELLO)).await?;
        assert_eq!(self.store.lookup(&rec.request_id).await?, Some(rec));
        assert!(self.store.lookup("no-such-id").await?.is_none());
        Ok(())
    }

    pub async fn test_list_order_and_filters(&self) -> anyhow::Result<()> {
        let user = format!("lister-{}", rand::rng().random::<u32>());
        let first = self.store.create(new_pin(&user, CID_HELLO)).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = self.store.create(new_pin(&user, CID_TEST_2)).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let third = self.store.create(new_pin(&user, CID_TEST_3)).await?;

        let all = self.store.list(&user, &PinQuery::default()).await?;
        assert_eq!(all.count, 3);
        let ids: Vec<_> = all.results.iter().map(|p| p.request_id.clone()).collect();
        assert_eq!(
            ids,
            [
                third.request_id.clone(),
                second.request_id.clone(),
                first.request_id.clone()
            ],
            "list must be newest first"
        );

        let by_cid = self
            .store
            .list(&user, &PinQuery::default().with_cid(CID_TEST_2))
            .await?;
        assert_eq!(by_cid.count, 1);
        assert_eq!(by_cid.results[0].request_id, second.request_id);

        self.store
            .transition(&first.request_id, first.generation, Status::Pinning, None)
            .await?;
        let pinning = self
            .store
            .list(&user, &PinQuery::default().with_status(Status::Pinning))
            .await?;
        assert_eq!(pinning.count, 1);
        assert_eq!(pinning.results[0].request_id, first.request_id);

        let limited = self
            .store
            .list(&user, &PinQuery::default().with_limit(1))
            .await?;
        assert_eq!(limited.count, 3);
        assert_eq!(limited.results.len(), 1);
        Ok(())
    }

    pub async fn test_forward_only(&self) -> anyhow::Result<()> {
        let rec = self.store.create(new_pin("carol", CID_HELLO)).await?;
        let id = rec.request_id.as_str();

        let err = self
            .store
            .transition(id, 1, Status::Pinned, None)
            .await
            .expect_err("queued -> pinned skips pinning");
        assert!(matches!(err, PinError::Conflict { .. }));

        let pinning = self.store.transition(id, 1, Status::Pinning, None).await?;
        assert_eq!(pinning.status, Status::Pinning);
        assert!(pinning.updated >= rec.updated);

        let pinned = self.store.transition(id, 1, Status::Pinned, None).await?;
        assert_eq!(pinned.status, Status::Pinned);

        let err = self
            .store
            .transition(id, 1, Status::Failed, Some("late"))
            .await
            .expect_err("terminal states are final");
        assert!(matches!(
            err,
            PinError::Conflict {
                current: Status::Pinned,
                ..
            }
        ));
        let current = self.store.get("carol", id).await?;
        assert_eq!(current.map(|p| p.status), Some(Status::Pinned));
        Ok(())
    }

    pub async fn test_replace_resets_generation(&self) -> anyhow::Result<()> {
        let rec = self.store.create(new_pin("dave", CID_HELLO)).await?;
        let id = rec.request_id.as_str();
        self.store.transition(id, 1, Status::Pinning, None).await?;
        self.store
            .transition(id, 1, Status::Failed, Some("retrieval_failed"))
            .await?;

        let replaced = self
            .store
            .replace("dave", id, Pin::new(CID_TEST_2))
            .await?
            .ok_or_else(|| anyhow!("replace of own record should succeed"))?;
        assert_eq!(replaced.request_id, rec.request_id);
        assert_eq!(replaced.status, Status::Queued);
        assert_eq!(replaced.generation, 2);
        assert_eq!(replaced.cid, CID_TEST_2);
        assert_eq!(replaced.created, rec.created);
        assert!(replaced.info.is_empty());
        Ok(())
    }

    /// An in-flight pickup of generation 1 finishing after a replace must
    /// not touch the generation 2 record.
    pub async fn test_stale_transition_rejected(&self) -> anyhow::Result<()> {
        let rec = self.store.create(new_pin("erin", CID_HELLO)).await?;
        let id = rec.request_id.as_str();
        self.store.transition(id, 1, Status::Pinning, None).await?;
        self.store.replace("erin", id, Pin::new(CID_TEST_2)).await?;

        let err = self
            .store
            .transition(id, 1, Status::Pinned, None)
            .await
            .expect_err("stale generation must be rejected");
        assert!(matches!(err, PinError::StaleGeneration { current: 2, .. }));

        let current = self
            .store
            .get("erin", id)
            .await?
            .ok_or_else(|| anyhow!("record vanished"))?;
        assert_eq!(current.status, Status::Queued);
        assert_eq!(current.generation, 2);
        Ok(())
    }

    pub async fn test_unknown_request(&self) -> anyhow::Result<()> {
        assert!(self.store.get("alice", "no-such-id").await?.is_none());
        let err = self
            .store
            .transition("no-such-id", 0, Status::Pinning, None)
            .await
            .expect_err("unknown request id");
        assert!(matches!(err, PinError::NotFound));
        Ok(())
    }
}

pub fn message(request_id: &str, cid: &str) -> DispatchMessage {
    DispatchMessage {
        request_id: request_id.to_owned(),
        cid: cid.to_owned(),
        origins: Vec::new(),
        bucket: "default".to_owned(),
        key: crate::destination::archive_key(cid),
        generation: 1,
    }
}

/// Test suite for `DispatchQueue` implementations.
///
/// The queue under test must be empty and configured with the given
/// `visibility_timeout` (kept short so the suite runs quickly).
pub struct QueueTests<'a, Q> {
    queue: &'a Q,
    visibility_timeout: Duration,
}

impl<'a, Q: DispatchQueue> QueueTests<'a, Q> {
    pub fn new(queue: &'a Q, visibility_timeout: Duration) -> Self {
        Self {
            queue,
            visibility_timeout,
        }
    }

    pub async fn run_all(&self) -> anyhow::Result<()> {
        self.test_empty_receive_times_out().await?;
        self.test_enqueue_receive_ack().await?;
        self.test_fifo_order().await?;
        self.test_nack_redelivers().await?;
        self.test_visibility_timeout_redelivers().await?;
        self.test_received_message_is_hidden().await?;
        self.test_extend_keeps_message_hidden().await?;
        Ok(())
    }

    pub async fn test_empty_receive_times_out(&self) -> anyhow::Result<()> {
        let got = self.queue.receive(Duration::from_millis(20)).await?;
        assert!(got.is_none(), "empty queue must not yield a message");
        Ok(())
    }

    pub async fn test_enqueue_receive_ack(&self) -> anyhow::Result<()> {
        let msg = message("ack-1", CID_HELLO);
        self.queue.enqueue(msg.clone()).await?;

        let delivery = self
            .queue
            .receive(Duration::from_secs(1))
            .await?
            .ok_or_else(|| anyhow!("message should be delivered"))?;
        assert_eq!(delivery.message, msg);
        assert_eq!(delivery.receive_count, 1);

        self.queue.ack(&delivery).await?;
        tokio::time::sleep(self.visibility_timeout * 2).await;
        assert!(
            self.queue.receive(Duration::from_millis(20)).await?.is_none(),
            "acked message must not come back"
        );
        Ok(())
    }

    pub async fn test_fifo_order(&self) -> anyhow::Result<()> {
        for i in 0..3 {
            self.queue
                .enqueue(message(&format!("fifo-{i}"), CID_HELLO))
                .await?;
        }
        for i in 0..3 {
            let delivery = self
                .queue
                .receive(Duration::from_secs(1))
                .await?
                .ok_or_else(|| anyhow!("expected fifo-{i}"))?;
            assert_eq!(delivery.message.request_id, format!("fifo-{i}"));
            self.queue.ack(&delivery).await?;
        }
        Ok(())
    }

    pub async fn test_nack_redelivers(&self) -> anyhow::Result<()> {
        self.queue.enqueue(message("nack-1", CID_HELLO)).await?;
        let first = self
            .queue
            .receive(Duration::from_secs(1))
            .await?
            .ok_or_else(|| anyhow!("first delivery"))?;
        self.queue.nack(&first).await?;

        let second = self
            .queue
            .receive(Duration::from_secs(1))
            .await?
            .ok_or_else(|| anyhow!("nacked message should be redelivered"))?;
        assert_eq!(second.message, first.message);
        assert_eq!(second.receive_count, 2);
        self.queue.ack(&second).await?;
        Ok(())
    }

    pub async fn test_visibility_timeout_redelivers(&self) -> anyhow::Result<()> {
        self.queue.enqueue(message("vis-1", CID_HELLO)).await?;
        let first = self
            .queue
            .receive(Duration::from_secs(1))
            .await?
            .ok_or_else(|| anyhow!("first delivery"))?;

        let again = self
            .queue
            .receive(self.visibility_timeout * 4)
            .await?
            .ok_or_else(|| anyhow!("unsettled message should reappear"))?;
        assert_eq!(again.message.request_id, first.message.request_id);
        assert!(again.receive_count > first.receive_count);

        // The first receipt is stale now; settling with it must not remove
        // the redelivered copy.
        self.queue.ack(&first).await?;
        self.queue.ack(&again).await?;
        Ok(())
    }

    pub async fn test_received_message_is_hidden(&self) -> anyhow::Result<()> {
        self.queue.enqueue(message("hidden-1", CID_HELLO)).await?;
        let delivery = self
            .queue
            .receive(Duration::from_secs(1))
            .await?
            .ok_or_else(|| anyhow!("first delivery"))?;
        assert!(
            self.queue.receive(Duration::from_millis(10)).await?.is_none(),
            "in-flight message must be invisible"
        );
        self.queue.ack(&delivery).await?;
        Ok(())
    }

    /// Extending past several visibility timeouts keeps the message away
    /// from other receivers; a lapsed receipt cannot be extended.
    pub async fn test_extend_keeps_message_hidden(&self) -> anyhow::Result<()> {
        assert_eq!(self.queue.visibility_timeout(), self.visibility_timeout);
        self.queue.enqueue(message("lease-1", CID_HELLO)).await?;
        let delivery = self
            .queue
            .receive(Duration::from_secs(1))
            .await?
            .ok_or_else(|| anyhow!("first delivery"))?;

        for _ in 0..4 {
            tokio::time::sleep(self.visibility_timeout / 2).await;
            assert!(self.queue.extend(&delivery).await?, "lease should still be held");
        }
        assert!(
            self.queue.receive(Duration::from_millis(10)).await?.is_none(),
            "extended message must stay invisible"
        );

        let again = self
            .queue
            .receive(self.visibility_timeout * 4)
            .await?
            .ok_or_else(|| anyhow!("lapsed lease should redeliver"))?;
        assert!(!self.queue.extend(&delivery).await?, "stale receipt extended");
        self.queue.ack(&again).await?;
        Ok(())
    }
}

/// Scripted in-memory `Retriever`.
///
/// Archives registered with [`MockRetriever::with_archive`] are served in
/// small chunks. Origins listed via [`MockRetriever::with_reachable`]
/// connect; every other origin fails, and origins starting with `/hang`
/// never answer. Exports can be scripted to break, stall mid-stream or
/// never respond at all.
#[derive(Debug, Default)]
pub struct MockRetriever {
    archives: Mutex<HashMap<String, Bytes>>,
    reachable: Mutex<HashSet<String>>,
    broken: Mutex<HashMap<String, usize>>,
    hanging_exports: Mutex<HashSet<String>>,
    unresponsive_exports: Mutex<HashSet<String>>,
    export_delay: Mutex<Option<Duration>>,
    connects: Mutex<Vec<String>>,
    exports: AtomicUsize,
}

impl MockRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(self, cid: &str, bytes: impl Into<Bytes>) -> Self {
        self.archives
            .lock()
            .unwrap()
            .insert(cid.to_owned(), bytes.into());
        self
    }

    pub fn with_reachable(self, origin: &str) -> Self {
        self.reachable.lock().unwrap().insert(origin.to_owned());
        self
    }

    /// The next `times` exports of `cid` break half-way through the stream.
    pub fn with_broken_exports(self, cid: &str, times: usize) -> Self {
        self.broken.lock().unwrap().insert(cid.to_owned(), times);
        self
    }

    /// Exports of `cid` emit one chunk and then stall forever.
    pub fn with_hanging_export(self, cid: &str) -> Self {
        self.hanging_exports.lock().unwrap().insert(cid.to_owned());
        self
    }

    /// Exports of `cid` never produce a response.
    pub fn with_unresponsive_export(self, cid: &str) -> Self {
        self.unresponsive_exports
            .lock()
            .unwrap()
            .insert(cid.to_owned());
        self
    }

    /// Every export waits `delay` between chunks.
    pub fn with_export_delay(self, delay: Duration) -> Self {
        *self.export_delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn connect_attempts(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    pub fn export_count(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    pub fn archive(&self, cid: &str) -> Option<Bytes> {
        self.archives.lock().unwrap().get(cid).cloned()
    }
}

const MOCK_CHUNK: usize = 1024;

#[async_trait]
impl Retriever for MockRetriever {
    async fn connect(&self, origin: &str) -> anyhow::Result<()> {
        self.connects.lock().unwrap().push(origin.to_owned());
        if origin.starts_with("/hang") {
            futures::future::pending::<()>().await;
        }
        if self.reachable.lock().unwrap().contains(origin) {
            Ok(())
        } else {
            Err(anyhow!("failed to dial {origin}"))
        }
    }

    async fn export_archive(&self, cid: &str) -> anyhow::Result<ByteStream> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        let unresponsive = self.unresponsive_exports.lock().unwrap().contains(cid);
        if unresponsive {
            futures::future::pending::<()>().await;
        }
        let bytes = self
            .archive(cid)
            .ok_or_else(|| anyhow!("block {cid} not found"))?;

        let mut chunks: Vec<Result<Bytes, std::io::Error>> = bytes
            .chunks(MOCK_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        if self.hanging_exports.lock().unwrap().contains(cid) {
            chunks.truncate(1);
            let stream = futures::stream::iter(chunks).chain(futures::stream::pending());
            return Ok(Box::new(stream));
        }

        let mut broken = self.broken.lock().unwrap();
        if let Some(remaining) = broken.get_mut(cid) {
            if *remaining > 0 {
                *remaining -= 1;
                let keep = chunks.len().div_ceil(2);
                chunks.truncate(keep);
                chunks.push(Err(std::io::Error::other("export interrupted")));
            }
        }

        let delay = *self.export_delay.lock().unwrap();
        match delay {
            Some(delay) => Ok(Box::new(Box::pin(futures::stream::iter(chunks).then(
                move |chunk| async move {
                    tokio::time::sleep(delay).await;
                    chunk
                },
            )))),
            None => Ok(Box::new(futures::stream::iter(chunks))),
        }
    }
}

pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}

/// Stores `bytes` under `key` as a single-chunk stream.
pub async fn put_archive<S: Store + ?Sized>(store: &S, key: &str, bytes: Bytes) -> StoreResult<u64> {
    store
        .put_stream(key, Box::new(futures::stream::iter([Ok::<_, std::io::Error>(bytes)])))
        .await
}

/// Reads a whole object back from a store.
pub async fn read_all<S: Store + ?Sized>(store: &S, key: &str) -> StoreResult<Bytes> {
    let mut stream = store.read(key).await?;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(out))
}
