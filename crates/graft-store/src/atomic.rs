//! Atomic write-back
//!
//! Content is staged in a temporary file next to the target and renamed into
//! place. Dropping a [`StagedWrite`] without committing removes the temporary
//! file and leaves the target untouched.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{StoreError, StoreResult};

/// Content written to a temporary file, not yet visible at the target path
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp: NamedTempFile,
}

impl StagedWrite {
    /// Target path the staged content will replace
    #[inline]
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Path of the temporary file holding the staged content
    #[inline]
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    /// Rename the staged file over the target
    ///
    /// # Errors
    /// `StoreError::Io` if the rename fails
    pub fn commit(self) -> StoreResult<()> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| StoreError::io_error(&target, e.error))?;
        tracing::trace!(path = %target.display(), "committed staged write");
        Ok(())
    }
}

/// Stage `contents` for `path` in the same directory
///
/// The temporary file inherits the permissions of an existing target so the
/// rename does not widen access to secrets.
///
/// # Errors
/// `StoreError::Io` if the directory is not writable or the write fails
pub fn stage(path: &Path, contents: &str) -> StoreResult<StagedWrite> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io_error(dir, e))?;
    temp.write_all(contents.as_bytes())
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| StoreError::io_error(temp.path(), e))?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(temp.path(), meta.permissions())
            .map_err(|e| StoreError::io_error(temp.path(), e))?;
    }

    Ok(StagedWrite {
        target: path.to_path_buf(),
        temp,
    })
}

/// Stage and commit in one step
///
/// # Errors
/// `StoreError::Io` on any write or rename failure
pub fn write_atomic(path: &Path, contents: &str) -> StoreResult<()> {
    stage(path, contents)?.commit()
}

/// Read a whole UTF-8 file, mapping a missing file to `NotFound`
pub(crate) fn read_existing(path: &Path) -> StoreResult<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::not_found(path)),
        Err(e) => Err(StoreError::io_error(path, e)),
    }
}
