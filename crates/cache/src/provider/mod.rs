//! Cache backends addressed by fingerprint
//!
//! Every backend implements [`CacheProvider`]. The concrete set is closed:
//! [`Provider`] selects a variant from a URI prefix (`local://` or `s3://`).

mod local;
pub mod s3;

pub use local::LocalProvider;
pub use s3::S3Provider;

use crate::fingerprint::Fingerprint;
use crate::{Error, Result};
use async_trait::async_trait;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// Byte stream of one cache entry (a gzip-compressed tar archive).
pub type EntryReader = Pin<Box<dyn AsyncRead + Send>>;

/// A backend that stores cache entries by key.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Short human name for diagnostics.
    fn friendly_name(&self) -> &'static str;

    /// URI the provider was configured with.
    fn uri(&self) -> &str;

    /// Check the configuration before first use. Performs no network I/O.
    fn validate(&self) -> Result<()>;

    /// Open the entry stored under `key`.
    ///
    /// `Ok(None)` means the key is not present. Backend failures are errors.
    async fn get_entry(&self, key: &Fingerprint) -> Result<Option<EntryReader>>;

    /// Store `entry` under `key`, returning the number of bytes consumed
    /// from `entry`.
    async fn put_entry(&self, key: &Fingerprint, entry: EntryReader) -> Result<u64>;
}

/// The configured backend behind one provider URI.
#[derive(Debug)]
pub enum Provider {
    /// Directory on this host
    Local(LocalProvider),
    /// Object storage bucket
    S3(S3Provider),
}

impl Provider {
    /// Resolve a provider from its URI prefix.
    ///
    /// Unknown prefixes are configuration errors. Nothing is touched on disk
    /// or over the network.
    pub fn from_uri(uri: &str) -> Result<Self> {
        if uri.starts_with(S3Provider::SCHEME) {
            return Ok(Self::S3(S3Provider::from_uri(uri)?));
        }
        if uri.starts_with(LocalProvider::SCHEME) {
            return Ok(Self::Local(LocalProvider::from_uri(uri)?));
        }
        Err(Error::configuration(format!(
            "unsupported cache provider '{uri}' (expected {}<path> or {}<bucket>)",
            LocalProvider::SCHEME,
            S3Provider::SCHEME
        )))
    }

    fn inner(&self) -> &dyn CacheProvider {
        match self {
            Self::Local(p) => p,
            Self::S3(p) => p,
        }
    }
}

#[async_trait]
impl CacheProvider for Provider {
    fn friendly_name(&self) -> &'static str {
        self.inner().friendly_name()
    }

    fn uri(&self) -> &str {
        self.inner().uri()
    }

    fn validate(&self) -> Result<()> {
        self.inner().validate()
    }

    async fn get_entry(&self, key: &Fingerprint) -> Result<Option<EntryReader>> {
        self.inner().get_entry(key).await
    }

    async fn put_entry(&self, key: &Fingerprint, entry: EntryReader) -> Result<u64> {
        self.inner().put_entry(key, entry).await
    }
}
