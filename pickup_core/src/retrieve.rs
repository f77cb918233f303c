use anyhow::Result;
use async_trait::async_trait;

use crate::store::ByteStream;

/// A content-addressed retrieval node.
///
/// `connect` is best effort and only ever an optimisation; `export_archive`
/// must work whether or not any `connect` succeeded.
#[async_trait]
pub trait Retriever: std::fmt::Debug + Send + Sync {
    /// Dials the peer at `origin`.
    async fn connect(&self, origin: &str) -> Result<()>;

    /// Streams a self-verifying archive of the DAG rooted at `cid`.
    async fn export_archive(&self, cid: &str) -> Result<ByteStream>;
}

#[async_trait]
impl<T: Retriever + ?Sized> Retriever for std::sync::Arc<T> {
    async fn connect(&self, origin: &str) -> Result<()> {
        (**self).connect(origin).await
    }

    async fn export_archive(&self, cid: &str) -> Result<ByteStream> {
        (**self).export_archive(cid).await
    }
}
