use futures::StreamExt;
use pickup_core::{ByteStream, Destination, Retriever, Store};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;

/// Destination stores keyed by bucket name.
pub type Buckets = HashMap<String, Arc<dyn Store>>;

/// Machine-readable reason recorded on a `failed` pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    RetrievalFailed,
    RetrievalTimeout,
    StorageFailed,
    UnknownBucket,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::RetrievalFailed => "retrieval_failed",
            FailureReason::RetrievalTimeout => "retrieval_timeout",
            FailureReason::StorageFailed => "storage_failed",
            FailureReason::UnknownBucket => "unknown_bucket",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickupOutcome {
    /// The archive was transferred; `bytes` is its size.
    Stored { bytes: u64 },
    /// An earlier pickup of the same CID already wrote the object.
    AlreadyPresent,
}

/// Which side broke a transfer. Set by the source wrapper; absent means the
/// store failed on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFault {
    Failed,
    TimedOut,
}

/// Retrieves archives from a [`Retriever`] into named buckets.
#[derive(Debug, Clone)]
pub struct Pickup {
    retriever: Arc<dyn Retriever>,
    buckets: Buckets,
    config: WorkerConfig,
}

impl Pickup {
    pub fn new(retriever: Arc<dyn Retriever>, buckets: Buckets, config: WorkerConfig) -> Self {
        Self {
            retriever,
            buckets,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Fetches the archive for `cid` into `destination`.
    ///
    /// Origin dials never fail the pickup. Transfers are retried with a
    /// fresh export each attempt, except after an idle timeout.
    pub async fn run(
        &self,
        cid: &str,
        origins: &[String],
        destination: &Destination,
    ) -> Result<PickupOutcome, FailureReason> {
        let Some(store) = self.buckets.get(&destination.bucket) else {
            warn!(cid, bucket = %destination.bucket, "no store configured for bucket");
            return Err(FailureReason::UnknownBucket);
        };

        match store.exists(&destination.key).await {
            Ok(true) => {
                info!(cid, key = %destination.key, "archive already stored");
                return Ok(PickupOutcome::AlreadyPresent);
            }
            Ok(false) => {}
            Err(e) => warn!(cid, error = %e, "existence check failed, transferring anyway"),
        }

        self.connect_origins(cid, origins).await;

        let attempts = self.config.storage_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.transfer(cid, store.as_ref(), destination).await {
                Ok(bytes) => {
                    info!(cid, key = %destination.key, bytes, attempt, "archive stored");
                    return Ok(PickupOutcome::Stored { bytes });
                }
                Err(reason) if reason == FailureReason::RetrievalTimeout || attempt >= attempts => {
                    return Err(reason);
                }
                Err(reason) => {
                    warn!(cid, attempt, %reason, "transfer failed, retrying");
                    tokio::time::sleep(self.config.storage_backoff() * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Dials every origin concurrently, each bounded by `connect_timeout`.
    async fn connect_origins(&self, cid: &str, origins: &[String]) {
        let timeout = self.config.connect_timeout();
        let dials = origins.iter().map(|origin| async move {
            match tokio::time::timeout(timeout, self.retriever.connect(origin)).await {
                Ok(Ok(())) => debug!(cid, origin = %origin, "origin connected"),
                Ok(Err(e)) => warn!(cid, origin = %origin, error = %e, "origin connect failed"),
                Err(_) => warn!(cid, origin = %origin, ?timeout, "origin connect timed out"),
            }
        });
        futures::future::join_all(dials).await;
    }

    async fn transfer(
        &self,
        cid: &str,
        store: &dyn Store,
        destination: &Destination,
    ) -> Result<u64, FailureReason> {
        // The node may accept the export and never answer; the idle bound
        // covers the wait for the first response as well as every chunk.
        let idle_timeout = self.config.idle_timeout();
        let source = match tokio::time::timeout(idle_timeout, self.retriever.export_archive(cid)).await
        {
            Ok(Ok(source)) => source,
            Ok(Err(e)) => {
                warn!(cid, error = %e, "archive export failed");
                return Err(FailureReason::RetrievalFailed);
            }
            Err(_) => {
                warn!(cid, ?idle_timeout, "archive export did not respond");
                return Err(FailureReason::RetrievalTimeout);
            }
        };

        let fault = Arc::new(OnceLock::new());
        let stream = guard_source(source, idle_timeout, fault.clone());

        let features = store.features();
        let written = if !features.atomic_put && features.supports_rename {
            let staging = destination.staging_key(&Uuid::new_v4().to_string());
            let result = async {
                let bytes = store.put_stream(&staging, stream).await?;
                store.rename(&staging, &destination.key).await?;
                Ok::<_, anyhow::Error>(bytes)
            }
            .await;
            if result.is_err() {
                if let Err(e) = store.delete(&staging).await {
                    debug!(cid, key = %staging, error = %e, "staging cleanup failed");
                }
            }
            result
        } else {
            let result = store.put_stream(&destination.key, stream).await;
            if result.is_err() && !features.atomic_put {
                if let Err(e) = store.delete(&destination.key).await {
                    debug!(cid, key = %destination.key, error = %e, "partial object cleanup failed");
                }
            }
            result
        };

        written.map_err(|e| {
            let reason = match fault.get() {
                Some(SourceFault::TimedOut) => FailureReason::RetrievalTimeout,
                Some(SourceFault::Failed) => FailureReason::RetrievalFailed,
                None => FailureReason::StorageFailed,
            };
            warn!(cid, key = %destination.key, error = %e, %reason, "archive transfer failed");
            reason
        })
    }
}

/// Wraps the retrieval stream with an idle timeout and records whether a
/// failure came from the source side.
fn guard_source(
    source: ByteStream,
    idle_timeout: Duration,
    fault: Arc<OnceLock<SourceFault>>,
) -> ByteStream {
    let stream = futures::stream::unfold(Some(source), move |state| {
        let fault = fault.clone();
        async move {
            let mut source = state?;
            match tokio::time::timeout(idle_timeout, source.next()).await {
                Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(source))),
                Ok(Some(Err(e))) => {
                    let _ = fault.set(SourceFault::Failed);
                    Some((Err(e), None))
                }
                Ok(None) => None,
                Err(_) => {
                    let _ = fault.set(SourceFault::TimedOut);
                    Some((
                        Err(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            format!("no archive data for {idle_timeout:?}"),
                        )),
                        None,
                    ))
                }
            }
        }
    });
    Box::new(Box::pin(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickup_core::testutil::{
        CID_HELLO, CID_TEST_2, CID_TEST_3, MockRetriever, random_bytes, read_all,
    };
    use pickup_core::destination::is_staging_key;
    use pickup_store_local::LocalStore;
    use pickup_store_memory::MemoryStore;
    use std::time::Instant;
    use tempfile::tempdir;

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            connect_timeout_ms: 50,
            idle_timeout_ms: 100,
            storage_retries: 2,
            storage_backoff_ms: 1,
            ..WorkerConfig::default()
        }
    }

    fn pickup_with(retriever: Arc<MockRetriever>, store: Arc<dyn Store>) -> Pickup {
        let mut buckets = Buckets::new();
        buckets.insert("default".to_owned(), store);
        Pickup::new(retriever, buckets, fast_config())
    }

    async fn stored_keys(store: &dyn Store) -> Vec<String> {
        let mut keys = Vec::new();
        let mut list = store.list("").await.unwrap();
        while let Some(key) = list.next().await {
            keys.push(key.unwrap());
        }
        keys
    }

    #[tokio::test]
    async fn stores_archive_with_empty_origins() {
        let archive = random_bytes(10_000);
        let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, archive.clone()));
        let store = Arc::new(MemoryStore::new());
        let pickup = pickup_with(retriever, store.clone());
        let dest = Destination::for_cid("default", CID_HELLO);

        let outcome = pickup.run(CID_HELLO, &[], &dest).await.unwrap();
        assert_eq!(outcome, PickupOutcome::Stored { bytes: 10_000 });
        assert_eq!(read_all(store.as_ref(), &dest.key).await.unwrap(), archive);
    }

    #[tokio::test]
    async fn bad_origins_do_not_fail_pickup() {
        let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, "car"));
        let pickup = pickup_with(retriever.clone(), Arc::new(MemoryStore::new()));
        let dest = Destination::for_cid("default", CID_HELLO);
        let origins = vec!["derp".to_owned(), "/ip4/0.0.0.0/tcp/1".to_owned()];

        let outcome = pickup.run(CID_HELLO, &origins, &dest).await.unwrap();
        assert!(matches!(outcome, PickupOutcome::Stored { .. }));
        assert_eq!(retriever.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn hanging_origin_is_time_bounded() {
        let retriever = Arc::new(
            MockRetriever::new()
                .with_archive(CID_HELLO, "car")
                .with_reachable("/ip4/10.0.0.1/tcp/4001"),
        );
        let pickup = pickup_with(retriever.clone(), Arc::new(MemoryStore::new()));
        let dest = Destination::for_cid("default", CID_HELLO);
        let origins = vec![
            "/hang/forever".to_owned(),
            "/ip4/10.0.0.1/tcp/4001".to_owned(),
        ];

        let started = Instant::now();
        let outcome = pickup.run(CID_HELLO, &origins, &dest).await.unwrap();
        assert!(matches!(outcome, PickupOutcome::Stored { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn existing_object_is_not_rewritten() {
        let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, "car"));
        let pickup = pickup_with(retriever.clone(), Arc::new(MemoryStore::new()));
        let dest = Destination::for_cid("default", CID_HELLO);

        pickup.run(CID_HELLO, &[], &dest).await.unwrap();
        let second = pickup.run(CID_HELLO, &[], &dest).await.unwrap();
        assert_eq!(second, PickupOutcome::AlreadyPresent);
        assert_eq!(retriever.export_count(), 1);
    }

    #[tokio::test]
    async fn broken_export_is_retried() {
        let archive = random_bytes(8 * 1024);
        let retriever = Arc::new(
            MockRetriever::new()
                .with_archive(CID_TEST_2, archive.clone())
                .with_broken_exports(CID_TEST_2, 1),
        );
        let store = Arc::new(MemoryStore::new());
        let pickup = pickup_with(retriever.clone(), store.clone());
        let dest = Destination::for_cid("default", CID_TEST_2);

        pickup.run(CID_TEST_2, &[], &dest).await.unwrap();
        assert_eq!(retriever.export_count(), 2);
        assert_eq!(read_all(store.as_ref(), &dest.key).await.unwrap(), archive);
    }

    #[tokio::test]
    async fn persistent_breakage_fails_as_retrieval() {
        let retriever = Arc::new(
            MockRetriever::new()
                .with_archive(CID_TEST_2, random_bytes(4096))
                .with_broken_exports(CID_TEST_2, 100),
        );
        let store = Arc::new(MemoryStore::new());
        let pickup = pickup_with(retriever.clone(), store.clone());
        let dest = Destination::for_cid("default", CID_TEST_2);

        let err = pickup.run(CID_TEST_2, &[], &dest).await.unwrap_err();
        assert_eq!(err, FailureReason::RetrievalFailed);
        assert_eq!(retriever.export_count(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unknown_cid_fails_as_retrieval() {
        let pickup = pickup_with(Arc::new(MockRetriever::new()), Arc::new(MemoryStore::new()));
        let dest = Destination::for_cid("default", CID_TEST_3);
        let err = pickup.run(CID_TEST_3, &[], &dest).await.unwrap_err();
        assert_eq!(err, FailureReason::RetrievalFailed);
    }

    #[tokio::test]
    async fn stalled_export_times_out_without_partial_object() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(LocalStore::new(dir.path()));
        let retriever = Arc::new(
            MockRetriever::new()
                .with_archive(CID_TEST_3, random_bytes(4096))
                .with_hanging_export(CID_TEST_3),
        );
        let pickup = pickup_with(retriever.clone(), store.clone());
        let dest = Destination::for_cid("default", CID_TEST_3);

        let err = pickup.run(CID_TEST_3, &[], &dest).await.unwrap_err();
        assert_eq!(err, FailureReason::RetrievalTimeout);
        assert_eq!(retriever.export_count(), 1, "timeouts are not retried");
        assert!(!store.exists(&dest.key).await.unwrap());
        let keys = stored_keys(store.as_ref()).await;
        assert!(keys.iter().all(|k| !is_staging_key(k)), "{keys:?}");
    }

    #[tokio::test]
    async fn unresponsive_export_is_time_bounded() {
        let retriever = Arc::new(
            MockRetriever::new()
                .with_archive(CID_HELLO, "car")
                .with_unresponsive_export(CID_HELLO),
        );
        let store = Arc::new(MemoryStore::new());
        let pickup = pickup_with(retriever.clone(), store.clone());
        let dest = Destination::for_cid("default", CID_HELLO);

        let result = tokio::time::timeout(Duration::from_secs(3), pickup.run(CID_HELLO, &[], &dest))
            .await
            .expect("pickup must give up on a silent node");
        assert_eq!(result.unwrap_err(), FailureReason::RetrievalTimeout);
        assert_eq!(retriever.export_count(), 1, "timeouts are not retried");
        assert!(store.is_empty());
    }

    /// Local files, but without rename: writes go straight to the final key.
    #[derive(Debug)]
    struct DirectLocalStore(LocalStore);

    #[async_trait::async_trait]
    impl Store for DirectLocalStore {
        fn features(&self) -> pickup_core::StoreFeatures {
            pickup_core::StoreFeatures {
                supports_rename: false,
                atomic_put: false,
            }
        }

        async fn put_stream(&self, key: &str, stream: ByteStream) -> pickup_core::StoreResult<u64> {
            self.0.put_stream(key, stream).await
        }

        async fn read(&self, key: &str) -> pickup_core::StoreResult<ByteStream> {
            self.0.read(key).await
        }

        async fn exists(&self, key: &str) -> pickup_core::StoreResult<bool> {
            self.0.exists(key).await
        }

        async fn list(&self, prefix: &str) -> pickup_core::StoreResult<pickup_core::KeyStream> {
            self.0.list(prefix).await
        }

        async fn delete(&self, key: &str) -> pickup_core::StoreResult<()> {
            self.0.delete(key).await
        }

        async fn rename(&self, from: &str, to: &str) -> pickup_core::StoreResult<()> {
            self.0.rename(from, to).await
        }
    }

    #[tokio::test]
    async fn partial_object_is_removed_without_rename() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(DirectLocalStore(LocalStore::new(dir.path())));
        let retriever = Arc::new(
            MockRetriever::new()
                .with_archive(CID_TEST_2, random_bytes(4096))
                .with_broken_exports(CID_TEST_2, 100),
        );
        let pickup = pickup_with(retriever, store.clone());
        let dest = Destination::for_cid("default", CID_TEST_2);

        let err = pickup.run(CID_TEST_2, &[], &dest).await.unwrap_err();
        assert_eq!(err, FailureReason::RetrievalFailed);
        assert!(stored_keys(store.as_ref()).await.is_empty());
    }

    #[tokio::test]
    async fn local_store_is_finalised_by_rename() {
        let dir = tempdir().unwrap();
        let store: Arc<dyn Store> = Arc::new(LocalStore::new(dir.path()));
        let archive = random_bytes(3000);
        let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, archive.clone()));
        let pickup = pickup_with(retriever, store.clone());
        let dest = Destination::for_cid("default", CID_HELLO);

        pickup.run(CID_HELLO, &[], &dest).await.unwrap();
        assert_eq!(read_all(store.as_ref(), &dest.key).await.unwrap(), archive);
        assert_eq!(stored_keys(store.as_ref()).await, vec![dest.key.clone()]);
    }

    #[tokio::test]
    async fn unwritable_store_fails_as_storage() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let store: Arc<dyn Store> = Arc::new(LocalStore::new(&blocker));
        let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, "car"));
        let pickup = pickup_with(retriever.clone(), store);
        let dest = Destination::for_cid("default", CID_HELLO);

        let err = pickup.run(CID_HELLO, &[], &dest).await.unwrap_err();
        assert_eq!(err, FailureReason::StorageFailed);
        assert_eq!(retriever.export_count(), 3);
    }

    #[tokio::test]
    async fn unknown_bucket_fails_without_retrieval() {
        let retriever = Arc::new(MockRetriever::new().with_archive(CID_HELLO, "car"));
        let pickup = pickup_with(retriever.clone(), Arc::new(MemoryStore::new()));
        let dest = Destination::for_cid("elsewhere", CID_HELLO);

        let err = pickup.run(CID_HELLO, &[], &dest).await.unwrap_err();
        assert_eq!(err, FailureReason::UnknownBucket);
        assert_eq!(retriever.export_count(), 0);
    }
}
