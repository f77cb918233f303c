use anyhow::{anyhow, bail};
use pickup_core::store::{ByteStream, KeyStream, StoreError, StoreFeatures, StoreResult};
use s3::error::S3Error;
use s3::{Bucket, Region, creds::Credentials};
use tokio_util::io::{ReaderStream, StreamReader};

fn default_retries() -> u8 {
    5
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct S3StoreConfig {
    pub endpoint: String,
    #[serde(default)]
    pub region: String,
    pub bucket_name: String,
    pub access_key: String,
    pub secret_key: String,
    /// Request-level retries performed inside the S3 client.
    #[serde(default = "default_retries")]
    pub retries: u8,
}

/// Archives as objects in an S3-compatible bucket.
///
/// S3 only exposes an object once its upload has completed, so
/// `put_stream` straight to the final key is already all-or-nothing.
#[derive(Debug, Clone)]
pub struct S3Store {
    bucket: Box<Bucket>,
}

impl S3Store {
    pub fn create(config: S3StoreConfig) -> StoreResult<Self> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )?;
        let region = Region::Custom {
            endpoint: config.endpoint,
            region: config.region,
        };
        let bucket = Bucket::new(&config.bucket_name, region, credentials)?.with_path_style();
        s3::set_retries(config.retries.into());
        Ok(Self { bucket })
    }
}

fn ensure_success(op: &str, key: &str, code: u16) -> StoreResult<()> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(anyhow!("{op} {key} returned http status {code}"))
    }
}

#[async_trait::async_trait]
impl pickup_core::store::Store for S3Store {
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_rename: false,
            atomic_put: true,
        }
    }

    async fn put_stream(&self, key: &str, stream: ByteStream) -> StoreResult<u64> {
        let mut reader = StreamReader::new(stream);
        let response = self.bucket.put_object_stream(&mut reader, key).await?;
        ensure_success("PUT", key, response.status_code())?;
        Ok(response.uploaded_bytes() as u64)
    }

    async fn read(&self, key: &str) -> StoreResult<ByteStream> {
        match self.bucket.get_object_stream(key).await {
            Ok(body) => Ok(Box::new(ReaderStream::new(body))),
            Err(S3Error::HttpFailWithBody(404, _)) => {
                Err(StoreError::NotFound(key.to_owned()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self.bucket.head_object(key).await {
            Ok((_, 200)) => Ok(true),
            Ok((_, 404)) | Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Ok((_, code)) => bail!("HEAD {key} returned http status {code}"),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StoreResult<KeyStream> {
        let pages = self.bucket.list(prefix.to_owned(), None).await?;
        let keys: Vec<Result<String, std::io::Error>> = pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| Ok(object.key))
            .collect();
        Ok(Box::new(futures::stream::iter(keys)))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let response = self.bucket.delete_object(key).await?;
        match response.status_code() {
            404 => Ok(()),
            code => ensure_success("DELETE", key, code),
        }
    }

    async fn rename(&self, _: &str, _: &str) -> StoreResult<()> {
        Err(StoreError::Unsupported("rename").into())
    }
}
