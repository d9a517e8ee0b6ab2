//! Streaming gzip-compressed tar codec for cache entries
//!
//! [`pack`] produces the archive lazily on a blocking thread and hands it to
//! the caller through a bounded [`pipe`](crate::pipe). [`unpack`] consumes any
//! [`EntryReader`] on a blocking thread. Neither side holds the whole archive
//! in memory or on disk.
//!
//! Entry names are slash-separated and relative to the base directory.
//! Ownership and absolute paths are never written. On extraction only
//! directories and regular files are materialised; symlinks, devices and
//! other special entries are skipped.

use crate::matcher::{FileSet, slash_path};
use crate::pipe::{DEFAULT_CAPACITY, PipeWriter, pipe};
use crate::provider::EntryReader;
use crate::{Error, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header, HeaderMode};
use tokio_util::io::SyncIoBridge;
use walkdir::WalkDir;

const WRITE_BUFFER: usize = 64 * 1024;

type TarWriter = Builder<GzEncoder<BufWriter<PipeWriter>>>;

/// Stream `files` as a gzip-compressed tar archive relative to `base_dir`.
///
/// Never fails eagerly: a file that cannot be read closes the stream with
/// that error, observed by the consumer's next read. Directories in the set
/// are archived recursively with the directory entry first. Must be called
/// from within a Tokio runtime.
#[must_use]
pub fn pack(files: &FileSet, base_dir: &Path) -> EntryReader {
    let (writer, reader) = pipe(DEFAULT_CAPACITY);
    let paths = files.paths().to_vec();
    let base = base_dir.to_path_buf();

    tokio::task::spawn_blocking(move || produce(&paths, &base, writer));

    Box::pin(reader)
}

fn produce(paths: &[PathBuf], base: &Path, writer: PipeWriter) {
    let _span = tracing::debug_span!("archive.pack", files = paths.len()).entered();
    let failer = writer.clone();
    let mut builder = Builder::new(GzEncoder::new(
        BufWriter::with_capacity(WRITE_BUFFER, writer),
        Compression::fast(),
    ));

    let mut entries = 0;
    for path in paths {
        match append_tree(&mut builder, path, base) {
            Ok(count) => entries += count,
            Err(err) => {
                // Poison the pipe before the builder's drop writes a trailer.
                report(&failer, err);
                return;
            }
        }
    }

    let finished = builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .and_then(|mut buffered| buffered.flush());
    match finished {
        Ok(()) => tracing::debug!(entries, "Archive complete"),
        Err(err) => report(&failer, err),
    }
}

fn report(failer: &PipeWriter, err: io::Error) {
    if err.kind() == io::ErrorKind::BrokenPipe {
        tracing::debug!("Archive consumer went away; stopping");
    } else {
        tracing::warn!(error = %err, "Failed to write archive");
        failer.fail(err);
    }
}

fn append_tree(builder: &mut TarWriter, path: &Path, base: &Path) -> io::Result<usize> {
    let mut count = 0;
    // A symlinked root is archived as the link itself, never walked.
    let walker = WalkDir::new(path)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let at = e.path().map(Path::to_path_buf);
            match e.into_io_error() {
                Some(source) => source,
                None => io::Error::other(format!(
                    "filesystem loop at {}",
                    at.unwrap_or_default().display()
                )),
            }
        })?;
        let Ok(rel) = entry.path().strip_prefix(base) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} is not under {}",
                    entry.path().display(),
                    base.display()
                ),
            ));
        };
        let name = slash_path(rel);
        if name.is_empty() {
            continue;
        }
        append_entry(builder, entry.path(), &name)?;
        count += 1;
    }
    Ok(count)
}

fn append_entry(builder: &mut TarWriter, path: &Path, name: &str) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&meta, HeaderMode::Complete);
    header.set_uid(0);
    header.set_gid(0);

    let file_type = meta.file_type();
    if file_type.is_file() {
        tracing::trace!(name, size = meta.len(), "Adding file");
        let file = File::open(path)?;
        builder.append_data(&mut header, name, file)
    } else if file_type.is_dir() {
        header.set_size(0);
        builder.append_data(&mut header, name, io::empty())
    } else if file_type.is_symlink() {
        let target = fs::read_link(path)?;
        header.set_size(0);
        builder.append_link(&mut header, name, target)
    } else {
        tracing::trace!(name, "Adding special file header only");
        header.set_size(0);
        builder.append_data(&mut header, name, io::empty())
    }
}

/// Extract a gzip-compressed tar stream into `dest`.
///
/// Returns the regular files written, in archive order. Directory entries are
/// created with their recorded mode. Entries of any other type are skipped.
/// Entries naming an absolute path or escaping `dest` through `..` are
/// rejected. On failure the returned [`Error::Archive`] lists the files
/// written before it.
pub async fn unpack(reader: EntryReader, dest: &Path) -> Result<Vec<PathBuf>> {
    let bridge = SyncIoBridge::new(reader);
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract(bridge, &dest))
        .await
        .map_err(|e| Error::archive(format!("extraction task failed: {e}"), Vec::new(), None))?
}

fn extract(reader: impl Read, dest: &Path) -> Result<Vec<PathBuf>> {
    let _span = tracing::debug_span!("archive.unpack", dest = %dest.display()).entered();
    let mut written = Vec::new();
    let mut archive = Archive::new(GzDecoder::new(reader));

    let entries = archive
        .entries()
        .map_err(|e| Error::archive("cannot read archive", Vec::new(), Some(e)))?;

    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => return Err(Error::archive("malformed archive", written, Some(e))),
        };
        let rel = match entry.path() {
            Ok(rel) => rel.into_owned(),
            Err(e) => return Err(Error::archive("invalid entry name", written, Some(e))),
        };
        let Some(target) = contained_join(dest, &rel) else {
            return Err(Error::archive(
                format!("entry '{}' escapes the destination", rel.display()),
                written,
                None,
            ));
        };
        let mode = entry.header().mode().ok();

        match entry.header().entry_type() {
            EntryType::Directory => {
                if let Err(e) = fs::create_dir_all(&target).and_then(|()| apply_mode(&target, mode)) {
                    return Err(Error::archive(
                        format!("cannot create directory {}", target.display()),
                        written,
                        Some(e),
                    ));
                }
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Err(e) = write_file(&mut entry, &target, mode) {
                    return Err(Error::archive(
                        format!("cannot write {}", target.display()),
                        written,
                        Some(e),
                    ));
                }
                tracing::trace!(path = %target.display(), "Restored file");
                written.push(target);
            }
            other => {
                tracing::debug!(entry = %rel.display(), kind = ?other, "Skipping non-regular entry");
            }
        }
    }

    // Entries stop at the tar end marker; read on so the gzip trailer is checked.
    if let Err(e) = io::copy(&mut archive.into_inner(), &mut io::sink()) {
        return Err(Error::archive("corrupt archive trailer", written, Some(e)));
    }

    tracing::debug!(files = written.len(), "Extraction complete");
    Ok(written)
}

fn write_file(entry: &mut impl Read, target: &Path, mode: Option<u32>) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    // Replace a stale symlink rather than writing through it.
    if fs::symlink_metadata(target).is_ok_and(|meta| meta.file_type().is_symlink()) {
        fs::remove_file(target)?;
    }
    let mut file = File::create(target)?;
    io::copy(entry, &mut file)?;
    file.flush()?;
    apply_mode(target, mode)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Join `rel` onto `dest`, refusing anything that would land outside it.
fn contained_join(dest: &Path, rel: &Path) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();
    for comp in rel.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}
