//! Global package cache and project-local dependency directory.
//!
//! Layout:
//! ```text
//! <cache_root>/
//! ├── poac-fmt-5.3.0/          one directory per cache name
//! ├── github-owner--repo-v1.0/
//! ├── .locks/<cache name>.lock advisory write locks
//! └── .tmp-XXXXXX/             in-flight extractions
//! <project>/deps/
//! └── fmt-5.3.0/               one directory per current name
//! ```
//! A visible directory is only ever created by `rename`, so its existence
//! means it is complete.

use crate::error::Error;
use crate::fsutil::{ensure_dir, is_hidden, safe_join};
use flate2::read::GzDecoder;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Created,
    /// Another writer finished the same entry first.
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct CacheManager {
    cache_root: PathBuf,
    deps_root: PathBuf,
}

impl CacheManager {
    pub fn new(cache_root: impl Into<PathBuf>, deps_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            deps_root: deps_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn cache_path(&self, cache_name: &str) -> Option<PathBuf> {
        safe_join(&self.cache_root, cache_name)
    }

    pub fn current_path(&self, current_name: &str) -> Option<PathBuf> {
        safe_join(&self.deps_root, current_name)
    }

    pub fn is_cached(&self, cache_name: &str) -> bool {
        !is_hidden(cache_name) && self.cache_path(cache_name).is_some_and(|p| p.is_dir())
    }

    pub fn is_materialized(&self, current_name: &str) -> bool {
        !is_hidden(current_name) && self.current_path(current_name).is_some_and(|p| p.is_dir())
    }

    /// Copy a cache entry into the project's dependency directory.
    ///
    /// The tree is copied into a hidden temporary directory first and renamed
    /// into place, so on failure the destination is left absent.
    pub fn materialize(&self, cache_name: &str, current_name: &str) -> Result<(), Error> {
        let fail = |reason: String| Error::Materialize {
            cache_name: cache_name.to_string(),
            current_name: current_name.to_string(),
            reason,
        };
        if !self.is_cached(cache_name) {
            return Err(fail("not present in the cache".into()));
        }
        let (Some(from), Some(dest)) = (self.cache_path(cache_name), self.current_path(current_name))
        else {
            return Err(fail("invalid entry name".into()));
        };
        if dest.is_dir() {
            return Ok(());
        }
        ensure_dir(&self.deps_root).map_err(|e| fail(e.to_string()))?;
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{current_name}."))
            .tempdir_in(&self.deps_root)
            .map_err(|e| fail(e.to_string()))?;
        copy_tree(&from, staging.path()).map_err(|e| fail(e.to_string()))?;
        publish(staging, &dest).map_err(|e| fail(e.to_string()))?;
        debug!(%cache_name, %current_name, "materialized");
        Ok(())
    }

    /// Extract a downloaded archive into the cache under `cache_name`.
    ///
    /// Writers of the same entry are serialized by an advisory lock; the
    /// archive is unpacked into a hidden temporary directory and renamed into
    /// place, so a partial extraction is never visible as a cache entry.
    pub fn insert_archive(&self, cache_name: &str, archive: &[u8]) -> Result<EntryState, Error> {
        let fail = |reason: String| Error::Extraction {
            cache_name: cache_name.to_string(),
            reason,
        };
        let dest = self
            .cache_path(cache_name)
            .filter(|_| !is_hidden(cache_name))
            .ok_or_else(|| fail("invalid entry name".into()))?;
        ensure_dir(&self.cache_root)?;

        let _guard = self.lock_entry(cache_name)?;
        if dest.is_dir() {
            debug!(%cache_name, "entry already written by another process");
            return Ok(EntryState::AlreadyPresent);
        }

        let staging = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempdir_in(&self.cache_root)?;
        let unpack_root = staging.path().join("root");
        fs::create_dir_all(&unpack_root)?;
        unpack(archive, &unpack_root).map_err(|e| fail(e.to_string()))?;

        let package_root = single_root(&unpack_root).map_err(|e| fail(e.to_string()))?;
        fs::rename(&package_root, &dest).map_err(|e| fail(e.to_string()))?;
        debug!(%cache_name, "cached");
        Ok(EntryState::Created)
    }

    /// Completed cache entries, sorted.
    pub fn entries(&self) -> Result<Vec<String>, Error> {
        let mut out = Vec::new();
        let rd = match fs::read_dir(&self.cache_root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        for ent in rd {
            let ent = ent?;
            if !ent.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = ent.file_name().to_str() {
                if !is_hidden(name) {
                    out.push(name.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    /// Remove every cache entry, including stale temporaries and lock files.
    pub fn clean(&self) -> Result<(), Error> {
        if self.cache_root.exists() {
            fs::remove_dir_all(&self.cache_root)?;
        }
        fs::create_dir_all(&self.cache_root)?;
        Ok(())
    }

    fn lock_entry(&self, cache_name: &str) -> Result<EntryLock, Error> {
        let dir = self.cache_root.join(".locks");
        ensure_dir(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(format!("{cache_name}.lock")))?;
        FileExt::lock_exclusive(&file)?;
        Ok(EntryLock { file })
    }
}

/// Releases the advisory lock on drop.
struct EntryLock {
    file: File,
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn unpack(archive: &[u8], into: &Path) -> io::Result<()> {
    let mut ar = Archive::new(GzDecoder::new(archive));
    for entry in ar.entries()? {
        let mut e = entry?;
        let kind = e.header().entry_type();
        if kind.is_pax_global_extensions() {
            continue;
        }
        let path = e.path()?.into_owned();
        if path.as_os_str().is_empty() || escapes(&path) {
            continue;
        }
        if kind.is_symlink() || kind.is_hard_link() {
            let target = e.link_name()?.unwrap_or_default().into_owned();
            let base = if kind.is_symlink() {
                path.parent().unwrap_or(Path::new("")).join(&target)
            } else {
                target.clone()
            };
            if target.is_absolute() || escapes(&normalize(&base)) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("link {} points outside the package: {}", path.display(), target.display()),
                ));
            }
        }
        // Rejects anything that would land outside `into`, including writes
        // through a previously unpacked link.
        if !e.unpack_in(into)? {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry escapes the package: {}", path.display()),
            ));
        }
    }
    Ok(())
}

fn escapes(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

/// Lexically resolve `..` without touching the filesystem. A leading `..`
/// that cannot be popped is kept so `escapes` sees it.
fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for c in path.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => out.push(c),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Archives carry a single top-level directory (e.g. `repo-1.0.0/`); that
/// directory is the package root. Anything else is taken as-is.
fn single_root(unpacked: &Path) -> io::Result<PathBuf> {
    let mut children = Vec::new();
    for ent in fs::read_dir(unpacked)? {
        children.push(ent?);
    }
    match children.as_slice() {
        [] => Err(io::Error::new(io::ErrorKind::InvalidData, "archive is empty")),
        [only] if only.file_type()?.is_dir() => Ok(only.path()),
        _ => Ok(unpacked.to_path_buf()),
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &dest)?;
    }
    Ok(())
}

/// Rename a fully populated staging directory onto `dest`. If a concurrent
/// run published the same entry first, theirs is kept and ours is discarded.
fn publish(staging: tempfile::TempDir, dest: &Path) -> io::Result<()> {
    match fs::rename(staging.path(), dest) {
        Ok(()) => Ok(()),
        Err(_) if dest.is_dir() => Ok(()),
        Err(e) => Err(e),
    }
}
