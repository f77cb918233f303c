use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::{StreamExt, stream};
use pickup_core::store::{ByteStream, KeyStream, StoreError, StoreFeatures, StoreResult};

/// Config for a [`MemoryStore`]; it has no settings, the table only selects
/// the backend.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct MemoryStoreConfig {}

/// Archives held in process memory. Lost on restart; meant for tests and
/// single-process demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Snapshot of every key currently held.
    pub fn keys(&self) -> Vec<String> {
        self.objects.iter().map(|e| e.key().clone()).collect()
    }

    fn object(&self, key: &str) -> StoreResult<Bytes> {
        self.objects
            .get(key)
            .map(|o| o.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_owned()).into())
    }
}

#[async_trait::async_trait]
impl pickup_core::store::Store for MemoryStore {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_rename: true,
            atomic_put: true,
        }
    }

    /// The object is only inserted once the whole stream has been buffered.
    async fn put_stream(&self, key: &str, mut stream: ByteStream) -> StoreResult<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let len = buf.len() as u64;
        self.objects.insert(key.to_owned(), buf.freeze());
        Ok(len)
    }

    async fn read(&self, key: &str) -> StoreResult<ByteStream> {
        let object = self.object(key)?;
        Ok(Box::new(stream::iter([Ok::<_, std::io::Error>(object)])))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.objects.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> StoreResult<KeyStream> {
        let keys: Vec<Result<String, std::io::Error>> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| Ok(e.key().clone()))
            .collect();
        Ok(Box::new(stream::iter(keys)))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects.remove(key);
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        if from == to {
            return Ok(());
        }
        let (_, object) = self
            .objects
            .remove(from)
            .ok_or_else(|| StoreError::NotFound(from.to_owned()))?;
        self.objects.insert(to.to_owned(), object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickup_core::Store;
    use pickup_core::testutil::StoreTests;

    #[tokio::test]
    async fn passes_store_suite() {
        let store = MemoryStore::new();
        StoreTests::new(&store).run_all().await.unwrap();
        assert!(store.is_empty(), "suite cleans up after itself");
    }

    #[tokio::test]
    async fn missing_key_reports_not_found() {
        let store = MemoryStore::new();
        let err = store.read("pickup/none").await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::NotFound(key)) if key == "pickup/none"
        ));
    }
}
