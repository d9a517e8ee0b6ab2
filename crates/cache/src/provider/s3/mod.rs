//! Object storage provider backed by an S3 bucket
//!
//! Requests go through two seams, [`ObjectClient`] for reads and
//! [`ObjectUploader`] for writes. Both default to [`SdkObjectStore`], built
//! lazily from the ambient AWS configuration on first use; tests inject
//! in-memory fakes instead.

mod bucket;
mod client;

pub use bucket::validate_bucket_name;
pub use client::SdkObjectStore;

use super::{CacheProvider, EntryReader};
use crate::fingerprint::Fingerprint;
use crate::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::OnceCell;

/// Failure reported by an object store seam.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    /// The service answered with an error code
    #[error("{code}: {message}")]
    Api {
        /// Service error code, e.g. `NoSuchKey`
        code: String,
        /// Service error message
        message: String,
    },
    /// The request never got a service answer
    #[error("{0}")]
    Transport(String),
    /// Reading the caller's body failed
    #[error("reading upload body failed")]
    Body(#[source] io::Error),
}

/// Reads single objects.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Fetch `key` from `bucket` as a stream.
    async fn get_object(&self, bucket: &str, key: &str)
    -> std::result::Result<EntryReader, ObjectStoreError>;
}

/// Writes objects of any size without materialising them.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    /// Upload everything readable from `body` to `key` in `bucket`.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: EntryReader,
    ) -> std::result::Result<(), ObjectStoreError>;
}

/// Cache entries stored as objects named by key in one bucket.
pub struct S3Provider {
    uri: String,
    bucket: String,
    client: Option<Arc<dyn ObjectClient>>,
    uploader: Option<Arc<dyn ObjectUploader>>,
    sdk: OnceCell<Arc<SdkObjectStore>>,
}

impl std::fmt::Debug for S3Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Provider")
            .field("uri", &self.uri)
            .field("bucket", &self.bucket)
            .field("client", &if self.client.is_some() { "injected" } else { "sdk" })
            .field("uploader", &if self.uploader.is_some() { "injected" } else { "sdk" })
            .finish_non_exhaustive()
    }
}

impl S3Provider {
    /// URI prefix selecting this provider.
    pub const SCHEME: &'static str = "s3://";

    /// Parse `s3://<bucket>`. The bucket name is checked by
    /// [`validate`](CacheProvider::validate), not here.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let bucket = uri.strip_prefix(Self::SCHEME).ok_or_else(|| {
            Error::configuration(format!("'{uri}' is not an {} URI", Self::SCHEME))
        })?;
        Ok(Self {
            uri: uri.to_string(),
            bucket: bucket.to_string(),
            client: None,
            uploader: None,
            sdk: OnceCell::new(),
        })
    }

    /// Use `client` for reads instead of the SDK.
    #[must_use]
    pub fn with_client(mut self, client: Arc<dyn ObjectClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Use `uploader` for writes instead of the SDK.
    #[must_use]
    pub fn with_uploader(mut self, uploader: Arc<dyn ObjectUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Bucket named by the URI.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn sdk(&self) -> Arc<SdkObjectStore> {
        Arc::clone(
            self.sdk
                .get_or_init(|| async { Arc::new(SdkObjectStore::from_env().await) })
                .await,
        )
    }

    async fn client(&self) -> Arc<dyn ObjectClient> {
        match &self.client {
            Some(client) => Arc::clone(client),
            None => self.sdk().await,
        }
    }

    async fn uploader(&self) -> Arc<dyn ObjectUploader> {
        match &self.uploader {
            Some(uploader) => Arc::clone(uploader),
            None => self.sdk().await,
        }
    }

    fn remote_error(&self, err: ObjectStoreError) -> Error {
        match err {
            ObjectStoreError::Api { code, .. } if code == "NoSuchBucket" => Error::remote(
                Some(code),
                format!("bucket \"{}\" does not exist", self.bucket),
            ),
            ObjectStoreError::Api { code, message } => Error::remote(Some(code), message),
            ObjectStoreError::Transport(message) => Error::remote(None, message),
            ObjectStoreError::Body(source) => Error::io_no_path(source, "read cache entry"),
        }
    }
}

#[async_trait]
impl CacheProvider for S3Provider {
    fn friendly_name(&self) -> &'static str {
        "s3"
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn validate(&self) -> Result<()> {
        validate_bucket_name(&self.bucket)
    }

    async fn get_entry(&self, key: &Fingerprint) -> Result<Option<EntryReader>> {
        let name = key.to_string();
        let client = self.client().await;
        match client.get_object(&self.bucket, &name).await {
            Ok(body) => Ok(Some(body)),
            Err(ObjectStoreError::Api { code, .. }) if code == "NoSuchKey" => {
                tracing::debug!(
                    "object \"{name}\" not found in bucket \"{}\"",
                    self.bucket
                );
                Ok(None)
            }
            Err(err) => Err(self.remote_error(err)),
        }
    }

    async fn put_entry(&self, key: &Fingerprint, entry: EntryReader) -> Result<u64> {
        let name = key.to_string();
        let reader = CountingReader::new(entry);
        let counter = reader.counter();

        self.uploader()
            .await
            .upload(&self.bucket, &name, Box::pin(reader))
            .await
            .map_err(|err| self.remote_error(err))?;

        let bytes = counter.load(Ordering::Acquire);
        tracing::debug!(bucket = %self.bucket, key = %name, bytes, "Uploaded cache entry");
        Ok(bytes)
    }
}

/// Passes reads through while counting the bytes delivered.
#[derive(Debug)]
pub struct CountingReader<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R> CountingReader<R> {
    /// Wrap `inner` with a fresh counter.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared handle to the counter, readable after the reader is consumed.
    #[must_use]
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.count)
    }

    /// Bytes read so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = (buf.filled().len() - before) as u64;
            self.count.fetch_add(read, Ordering::AcqRel);
        }
        poll
    }
}
