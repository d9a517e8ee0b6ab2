//! Deterministic cache keys over a set of input files

use crate::matcher::{FileSet, relative_slash_path, sort_paths};
use crate::{Error, Result};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::str::FromStr;
use xxhash_rust::xxh64::Xxh64;

/// Byte fed between a path and its content, and after each file's content.
const SEPARATOR: [u8; 1] = [0];

const READ_BUFFER: usize = 64 * 1024;

/// Cache key derived from file paths, file contents and a caller tag.
///
/// Rendered as exactly 16 lowercase hex digits. Not collision resistant
/// against an adversary, only against accidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Hash every file in `files` plus `tag`.
    ///
    /// Each file contributes its slash-separated path relative to the set
    /// root, a separator, its full content and another separator. Fails
    /// without producing a key if any file cannot be read to the end.
    pub fn compute(files: &FileSet, tag: &str) -> Result<Self> {
        let _span = tracing::debug_span!("fingerprint.compute", files = files.len()).entered();

        let mut paths = files.paths().to_vec();
        sort_paths(&mut paths);

        let mut hasher = Xxh64::new(0);
        let mut buf = vec![0u8; READ_BUFFER];
        let mut total: u64 = 0;
        for path in &paths {
            hasher.update(relative_slash_path(files.root(), path).as_bytes());
            hasher.update(&SEPARATOR);

            let mut file = File::open(path).map_err(|e| Error::io(e, path, "open"))?;
            loop {
                let n = file.read(&mut buf).map_err(|e| Error::io(e, path, "read"))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                total += n as u64;
            }
            hasher.update(&SEPARATOR);
        }
        hasher.update(tag.as_bytes());

        let key = Self(hasher.digest());
        tracing::debug!(%key, bytes_hashed = total, "Computed fingerprint");
        Ok(key)
    }

    /// The raw 64-bit value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 16 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::configuration(format!(
                "'{s}' is not a cache key (expected 16 lowercase hex digits)"
            )));
        }
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| Error::configuration(format!("'{s}' is not a cache key: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write_files(root: &std::path::Path, files: &[(&str, &[u8])]) -> Vec<PathBuf> {
        files
            .iter()
            .map(|(rel, content)| {
                let path = root.join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(&path, content).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_key_is_sixteen_lowercase_hex_digits() {
        let tmp = TempDir::new().unwrap();
        let paths = write_files(tmp.path(), &[("a.txt", b"hi")]);
        let key = Fingerprint::compute(&FileSet::new(tmp.path(), paths), "cmd").unwrap();

        let rendered = key.to_string();
        assert_eq!(rendered.len(), 16);
        assert!(rendered.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
        assert_eq!(u64::from_str_radix(&rendered, 16).unwrap(), key.as_u64());
    }

    #[test]
    fn test_small_values_are_zero_padded() {
        assert_eq!(Fingerprint::from(0xab).to_string(), "00000000000000ab");
    }

    #[test]
    fn test_parses_its_own_rendering() {
        let key = Fingerprint::from(0x0123_4567_89ab_cdef);
        assert_eq!("0123456789abcdef".parse::<Fingerprint>().unwrap(), key);
        assert!("0123456789ABCDEF".parse::<Fingerprint>().is_err());
        assert!("abc".parse::<Fingerprint>().is_err());
    }

    #[test]
    fn test_same_inputs_same_key_in_different_roots() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        let files: &[(&str, &[u8])] = &[("src/main.rs", b"fn main() {}"), ("Cargo.toml", b"[package]")];
        let a = FileSet::new(one.path(), write_files(one.path(), files));
        let b = FileSet::new(two.path(), write_files(two.path(), files));

        assert_eq!(
            Fingerprint::compute(&a, "cargo build").unwrap(),
            Fingerprint::compute(&b, "cargo build").unwrap()
        );
    }

    #[test]
    fn test_tag_changes_key() {
        let tmp = TempDir::new().unwrap();
        let set = FileSet::new(tmp.path(), write_files(tmp.path(), &[("a", b"x")]));
        assert_ne!(
            Fingerprint::compute(&set, "make").unwrap(),
            Fingerprint::compute(&set, "make test").unwrap()
        );
    }

    #[test]
    fn test_content_changes_key() {
        let tmp = TempDir::new().unwrap();
        let paths = write_files(tmp.path(), &[("a", b"one")]);
        let set = FileSet::new(tmp.path(), paths.clone());
        let before = Fingerprint::compute(&set, "").unwrap();
        fs::write(&paths[0], b"two").unwrap();
        assert_ne!(before, Fingerprint::compute(&set, "").unwrap());
    }

    #[test]
    fn test_rename_changes_key() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        let a = FileSet::new(one.path(), write_files(one.path(), &[("a", b"same")]));
        let b = FileSet::new(two.path(), write_files(two.path(), &[("b", b"same")]));
        assert_ne!(
            Fingerprint::compute(&a, "").unwrap(),
            Fingerprint::compute(&b, "").unwrap()
        );
    }

    #[test]
    fn test_separators_prevent_boundary_shifts() {
        let one = TempDir::new().unwrap();
        let two = TempDir::new().unwrap();
        let a = FileSet::new(
            one.path(),
            write_files(one.path(), &[("a", b"xy"), ("b", b"z")]),
        );
        let b = FileSet::new(
            two.path(),
            write_files(two.path(), &[("a", b"x"), ("b", b"yz")]),
        );
        assert_ne!(
            Fingerprint::compute(&a, "").unwrap(),
            Fingerprint::compute(&b, "").unwrap()
        );
    }

    #[test]
    fn test_unreadable_file_fails_without_key() {
        let tmp = TempDir::new().unwrap();
        let mut paths = write_files(tmp.path(), &[("a", b"x")]);
        paths.push(tmp.path().join("vanished"));
        let err = Fingerprint::compute(&FileSet::new(tmp.path(), paths), "").unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "got {err:?}");
    }

    #[test]
    fn test_empty_set_hashes_tag_only() {
        let tmp = TempDir::new().unwrap();
        let set = FileSet::new(tmp.path(), Vec::new());
        assert_eq!(
            Fingerprint::compute(&set, "tag").unwrap().as_u64(),
            xxhash_rust::xxh64::xxh64(b"tag", 0)
        );
    }
}
