use anyhow::Context;
use futures::StreamExt;
use pickup_core::store::{ByteStream, KeyStream, StoreError, StoreFeatures, StoreResult};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio_util::io::{ReaderStream, StreamReader};
use walkdir::WalkDir;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalStoreConfig {
    pub base_path: String,
}

/// Archives as plain files under `base_path`, one file per key.
///
/// Writes go straight to the target file, so a broken stream leaves a
/// truncated file behind; callers finalise through `rename`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalStore {
            base_path: base_path.into(),
        }
    }

    pub fn create(config: LocalStoreConfig) -> Self {
        Self::new(config.base_path)
    }

    /// Maps a key to a file below `base_path`. Keys must be relative and
    /// made of plain segments.
    fn file_for(&self, key: &str) -> StoreResult<PathBuf> {
        let plain = !key.is_empty()
            && key
                .split('/')
                .all(|seg| !seg.is_empty() && seg != "." && seg != ".." && !seg.contains('\\'));
        if !plain {
            return Err(StoreError::InvalidKey(key.to_owned()).into());
        }
        Ok(self.base_path.join(key))
    }

    async fn create_parent(path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        Ok(())
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_path).ok()?;
        let segments: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        Some(segments.join("/"))
    }
}

fn not_found(key: &str, e: std::io::Error) -> anyhow::Error {
    if e.kind() == ErrorKind::NotFound {
        StoreError::NotFound(key.to_owned()).into()
    } else {
        e.into()
    }
}

#[async_trait::async_trait]
impl pickup_core::store::Store for LocalStore {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_rename: true,
            atomic_put: false,
        }
    }

    async fn put_stream(&self, key: &str, stream: ByteStream) -> StoreResult<u64> {
        let path = self.file_for(key)?;
        Self::create_parent(&path).await?;
        let mut file = File::create(&path).await?;
        let mut reader = StreamReader::new(stream);
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn read(&self, key: &str) -> StoreResult<ByteStream> {
        let file = File::open(self.file_for(key)?)
            .await
            .map_err(|e| not_found(key, e))?;
        Ok(Box::new(ReaderStream::new(file)))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.file_for(key)?).await?)
    }

    /// Walks only the directory named by the prefix up to its last `/`.
    async fn list(&self, prefix: &str) -> StoreResult<KeyStream> {
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) => self.file_for(dir)?,
            None => self.base_path.clone(),
        };
        let store = self.clone();
        let prefix = prefix.to_owned();
        let keys = futures::stream::iter(WalkDir::new(dir)).filter_map(move |entry| {
            let item: Option<Result<String, std::io::Error>> = match entry {
                Ok(entry) if entry.file_type().is_file() => store
                    .key_for(entry.path())
                    .filter(|key| key.starts_with(&prefix))
                    .map(Ok),
                Ok(_) => None,
                // A prefix with nothing stored under it yet.
                Err(e) if e.io_error().map(|e| e.kind()) == Some(ErrorKind::NotFound) => None,
                Err(e) => Some(Err(e.into())),
            };
            futures::future::ready(item)
        });
        Ok(Box::new(keys))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        match tokio::fs::remove_file(self.file_for(key)?).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> StoreResult<()> {
        let source = self.file_for(from)?;
        let target = self.file_for(to)?;
        Self::create_parent(&target).await?;
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| not_found(from, e))
    }
}
