use super::{CacheProvider, EntryReader};
use crate::fingerprint::Fingerprint;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache entries stored as files in a directory, one file per key.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    uri: String,
    dir: PathBuf,
}

impl LocalProvider {
    /// URI prefix selecting this provider.
    pub const SCHEME: &'static str = "local://";

    /// Parse `local://<path>`.
    ///
    /// A leading `~/` is expanded to the home directory; relative paths are
    /// resolved against the current directory.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let raw = uri.strip_prefix(Self::SCHEME).ok_or_else(|| {
            Error::configuration(format!("'{uri}' is not a {} URI", Self::SCHEME))
        })?;
        if raw.trim().is_empty() {
            return Err(Error::configuration(format!(
                "'{uri}' does not name a directory"
            )));
        }

        let expanded = expand_home(raw)?;
        let dir = std::path::absolute(&expanded).map_err(|e| Error::io(e, &expanded, "resolve"))?;
        Ok(Self {
            uri: uri.to_string(),
            dir,
        })
    }

    /// Use `dir` directly.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            uri: format!("{}{}", Self::SCHEME, dir.display()),
            dir,
        }
    }

    /// Directory holding the entries.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &Fingerprint) -> PathBuf {
        self.dir.join(key.to_string())
    }

    async fn ensure_dir(&self) -> Result<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o750);
        builder
            .create(&self.dir)
            .await
            .map_err(|e| Error::io(e, &self.dir, "create cache directory"))
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    if raw == "~" || raw.starts_with("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::configuration("cannot expand '~': home directory is unknown")
        })?;
        let rest = raw.trim_start_matches('~').trim_start_matches('/');
        return Ok(if rest.is_empty() { home } else { home.join(rest) });
    }
    Ok(PathBuf::from(raw))
}

#[async_trait]
impl CacheProvider for LocalProvider {
    fn friendly_name(&self) -> &'static str {
        "local folder"
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn validate(&self) -> Result<()> {
        match std::fs::metadata(&self.dir) {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(Error::configuration(format!(
                "cache path {} exists but is not a directory",
                self.dir.display()
            ))),
            // Created on first put.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &self.dir, "stat")),
        }
    }

    async fn get_entry(&self, key: &Fingerprint) -> Result<Option<EntryReader>> {
        let path = self.entry_path(key);
        match tokio::fs::File::open(&path).await {
            Ok(file) => {
                tracing::debug!(path = %path.display(), "Found local cache entry");
                Ok(Some(Box::pin(file)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No local cache entry");
                Ok(None)
            }
            Err(e) => Err(Error::io(e, &path, "open")),
        }
    }

    async fn put_entry(&self, key: &Fingerprint, mut entry: EntryReader) -> Result<u64> {
        self.ensure_dir().await?;

        let target = self.entry_path(key);
        let temp = self.dir.join(format!(
            ".{key}.{}-{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        let written = async {
            let mut file = tokio::fs::File::create(&temp).await?;
            let copied = tokio::io::copy(&mut entry, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp, &target).await?;
            Ok::<_, std::io::Error>(copied)
        }
        .await;

        match written {
            Ok(bytes) => {
                tracing::debug!(path = %target.display(), bytes, "Stored local cache entry");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&temp).await
                    && cleanup.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %temp.display(), error = %cleanup, "Failed to remove partial cache entry");
                }
                Err(Error::io(e, &target, "write cache entry"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipe;
    use std::io::Write;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn key() -> Fingerprint {
        Fingerprint::from(0xdead_beef)
    }

    fn body(bytes: &'static [u8]) -> EntryReader {
        Box::pin(bytes)
    }

    async fn read_all(mut reader: EntryReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_put_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path().join("cache"));

        let bytes = provider.put_entry(&key(), body(b"hello")).await.unwrap();
        assert_eq!(bytes, 5);
        assert!(tmp.path().join("cache/00000000deadbeef").is_file());

        let entry = provider.get_entry(&key()).await.unwrap().unwrap();
        assert_eq!(read_all(entry).await, b"hello");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        assert!(provider.get_entry(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path().join("never-created"));
        assert!(provider.get_entry(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_existing_entry() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        provider.put_entry(&key(), body(b"old and long")).await.unwrap();
        provider.put_entry(&key(), body(b"new")).await.unwrap();

        let entry = provider.get_entry(&key()).await.unwrap().unwrap();
        assert_eq!(read_all(entry).await, b"new");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_directory_is_not_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache");
        LocalProvider::new(&dir)
            .put_entry(&key(), body(b"x"))
            .await
            .unwrap();

        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o007, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_put_leaves_no_entry_behind() {
        let tmp = TempDir::new().unwrap();
        let provider = LocalProvider::new(tmp.path());
        let (mut writer, reader) = pipe(2);
        std::thread::spawn(move || {
            writer.write_all(b"partial").unwrap();
            writer.fail(std::io::Error::other("producer failed"));
        });

        let err = provider.put_entry(&key(), Box::pin(reader)).await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "got {err:?}");
        assert!(provider.get_entry(&key()).await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_validate_accepts_missing_or_directory() {
        let tmp = TempDir::new().unwrap();
        LocalProvider::new(tmp.path()).validate().unwrap();
        LocalProvider::new(tmp.path().join("later")).validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_regular_file() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("cache");
        std::fs::write(&file, b"").unwrap();
        let err = LocalProvider::new(&file).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }), "got {err:?}");
    }

    #[test]
    fn test_from_uri_expands_home() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        let provider = LocalProvider::from_uri("local://~/.ccmd").unwrap();
        assert_eq!(provider.dir(), home.join(".ccmd"));
        assert_eq!(provider.uri(), "local://~/.ccmd");
    }

    #[cfg(unix)]
    #[test]
    fn test_from_uri_keeps_absolute_paths() {
        let provider = LocalProvider::from_uri("local:///var/cache/ccmd").unwrap();
        assert_eq!(provider.dir(), Path::new("/var/cache/ccmd"));
    }

    #[test]
    fn test_from_uri_rejects_empty_path() {
        assert!(matches!(
            LocalProvider::from_uri("local://"),
            Err(Error::Configuration { .. })
        ));
    }
}
