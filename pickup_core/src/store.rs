use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use thiserror::Error;

pub type StoreResult<T, E = anyhow::Error> = std::result::Result<T, E>;

/// A stream of archive bytes, as produced by a retrieval node or read back
/// from object storage.
pub type ByteStream = Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin + 'static>;

/// A stream of object keys.
pub type KeyStream = Box<dyn Stream<Item = Result<String, std::io::Error>> + Send + Unpin + 'static>;

/// Object storage holding finished archives.
///
/// Keys are flat strings; `/` is only a naming convention. A `put_stream`
/// that fails must not leave a readable object at `key` on stores that
/// report `atomic_put`; on other stores callers stage under a temporary key
/// and `rename` into place.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    fn features(&self) -> StoreFeatures;

    /// Consumes `stream` into `key` and returns the number of bytes stored.
    async fn put_stream(&self, key: &str, stream: ByteStream) -> StoreResult<u64>;

    /// Streams the whole object back.
    async fn read(&self, key: &str) -> StoreResult<ByteStream>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Keys starting with `prefix`, in no particular order.
    async fn list(&self, prefix: &str) -> StoreResult<KeyStream>;

    /// Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Moves `from` to `to`, replacing any object already at `to`.
    async fn rename(&self, from: &str, to: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFeatures {
    pub supports_rename: bool,
    /// Objects only become visible once a `put_stream` completes.
    pub atomic_put: bool,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no object at '{0}'")]
    NotFound(String),
    #[error("invalid key '{0}'")]
    InvalidKey(String),
    #[error("{0} is not supported by this store")]
    Unsupported(&'static str),
}

#[async_trait]
impl<T: Store + ?Sized> Store for std::sync::Arc<T> {
    fn features(&self) -> StoreFeatures {
        (**self).features()
    }

    async fn put_stream(&self, key: &str, stream: ByteStream) -> StoreResult<u64> {
        (**self).put_stream(key, stream).await
    }

    async fn read(&self, key: &str) -> StoreResult<ByteStream> {
        (**self).read(key).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        (**self).exists(key).await
    }

    async fn list(&self, prefix: &str) -> StoreResult<KeyStream> {
        (**self).list(prefix).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        (**self).delete(key).await
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        (**self).rename(from, to).await
    }
}
