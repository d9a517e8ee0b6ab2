//! Glob-based file discovery over a directory tree

use crate::{Error, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Directory names that are never descended into, whatever the patterns say.
pub const BUILTIN_EXCLUDES: &[&str] = &["node_modules"];

/// Sorted list of files discovered under a root directory.
///
/// Paths are absolute (rooted at [`FileSet::root`]) and ordered by their
/// byte string, which is what makes fingerprints reproducible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSet {
    root: PathBuf,
    paths: Vec<PathBuf>,
}

impl FileSet {
    /// Build a file set, sorting the paths.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, mut paths: Vec<PathBuf>) -> Self {
        sort_paths(&mut paths);
        Self {
            root: root.into(),
            paths,
        }
    }

    /// Directory the paths were discovered under.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The sorted paths.
    #[must_use]
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Whether discovery matched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Slash-separated paths relative to the root, in set order.
    pub fn relative_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.paths.iter().map(|p| relative_slash_path(&self.root, p))
    }
}

pub(crate) fn sort_paths(paths: &mut [PathBuf]) {
    paths.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
}

/// Render `path` relative to `base` with `/` separators.
///
/// Paths outside `base` are rendered in full.
pub(crate) fn relative_slash_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    slash_path(rel)
}

pub(crate) fn slash_path(path: &Path) -> String {
    let mut out = String::new();
    for comp in path.components() {
        match comp {
            Component::Normal(s) => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(&s.to_string_lossy());
            }
            Component::ParentDir => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str("..");
            }
            Component::RootDir | Component::Prefix(_) => {
                if out.is_empty() {
                    out.push_str(&comp.as_os_str().to_string_lossy().replace('\\', "/"));
                }
            }
            Component::CurDir => {}
        }
    }
    out
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| Error::InvalidPattern {
                pattern: pattern.clone(),
                source,
            })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| Error::InvalidPattern {
        pattern: patterns.join(", "),
        source,
    })
}

/// Find files under `root` matching any include pattern.
///
/// Ignore patterns are checked first: a matching directory is pruned with its
/// whole subtree, a matching file is dropped. Directories named in
/// [`BUILTIN_EXCLUDES`] are always pruned. Only non-directory entries are
/// returned, sorted by path.
pub fn find(include: &[String], ignore: &[String], root: &Path) -> Result<FileSet> {
    let _span = tracing::debug_span!(
        "matcher.find",
        root = %root.display(),
        include = include.len(),
        ignore = ignore.len()
    )
    .entered();

    let includes = build_globset(include)?;
    let ignores = build_globset(ignore)?;

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let rel = relative_slash_path(root, entry.path());
        if ignores.is_match(&rel) {
            tracing::trace!(path = %rel, "Ignored");
            return false;
        }
        let is_dir = entry.file_type().is_dir();
        if is_dir
            && BUILTIN_EXCLUDES
                .iter()
                .any(|name| entry.file_name() == std::ffi::OsStr::new(name))
        {
            tracing::trace!(path = %rel, "Skipping dependency cache directory");
            return false;
        }
        true
    });

    let mut paths = Vec::new();
    let mut visited: u64 = 0;
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(root).to_path_buf();
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            Error::io(source, path, "walk")
        })?;
        visited += 1;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = relative_slash_path(root, entry.path());
        if includes.is_match(&rel) {
            paths.push(entry.into_path());
        }
    }

    let set = FileSet::new(root, paths);
    tracing::debug!(visited, matched = set.len(), "File discovery complete");
    Ok(set)
}
