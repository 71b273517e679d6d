//! The allocation handle handed out by the store.

use std::{io, path::Path, sync::Arc};

use tempstore_spill::{SpillBuffer, SpillReader};

use crate::{
    error::{Error, Result},
    store::{EntryId, StoreState},
};

/// One temporary allocation: a writable stream whose content stays in memory
/// below the store's spill threshold and lands in the working directory above
/// it.
///
/// A handle becomes disk-backed on the write that crosses the threshold; from
/// that point it has a [`storage_path`](TempFile::storage_path) and the store
/// tracks the file for deletion. The file is deleted exactly once: by
/// [`delete`](TempFile::delete) right away, or by the background reaper after
/// the handle is dropped. Content that never outgrows the threshold has no
/// on-disk footprint at all.
///
/// A handle that spills only after the store has begun shutting down is not
/// tracked (the registry stops accepting entries at that point); it keeps
/// sole ownership of its file and deletes it itself on
/// [`delete`](TempFile::delete) or drop.
pub struct TempFile {
    state: Arc<StoreState>,
    id: EntryId,
    buffer: SpillBuffer,
    tracked: bool,
    untracked_spill: bool,
    released: bool,
}

impl TempFile {
    pub(crate) fn new(state: Arc<StoreState>) -> TempFile {
        let buffer = state.factory.create();
        let id = state.next_id();
        TempFile {
            state,
            id,
            buffer,
            tracked: false,
            untracked_spill: false,
            released: false,
        }
    }

    /// Returns the opaque id of this allocation.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Returns the path of the backing file, or `None` while the content has
    /// stayed within the in-memory threshold.
    pub fn storage_path(&self) -> Option<&Path> {
        self.buffer.spill_path()
    }

    /// Returns the number of bytes written so far.
    pub fn current_size(&self) -> u64 {
        self.buffer.current_size()
    }

    /// Returns `true` while the content has not been materialized on disk.
    pub fn is_in_memory(&self) -> bool {
        self.buffer.is_in_memory()
    }

    /// Opens a reader over the content written so far.
    pub fn reader(&self) -> Result<SpillReader> {
        self.buffer
            .reader()
            .map_err(|e| Error::io("read temp file", e))
    }

    /// Deletes this temp file synchronously.
    ///
    /// The registry entry (if any) is removed and the backing file deleted
    /// before the call returns, propagating I/O failures. Deleting a handle
    /// that never spilled, or whose file was already reclaimed by the TTL
    /// sweep, succeeds. An untracked post-shutdown spill is deleted directly,
    /// since the handle is its only owner.
    pub fn delete(mut self) -> Result<()> {
        self.released = true;
        let path = if self.tracked {
            self.state.take_entry(self.id)
        } else {
            self.buffer.spill_path().map(Path::to_path_buf)
        };
        if let Some(path) = path {
            match std::fs::remove_file(&path) {
                Ok(()) => log::debug!("deleted temp file {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                Err(e) => {
                    return Err(Error::io(format!("delete temp file '{}'", path.display()), e));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TempFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempFile")
            .field("id", &self.id)
            .field("size", &self.current_size())
            .field("storage_path", &self.storage_path())
            .finish_non_exhaustive()
    }
}

impl io::Write for TempFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.buffer.write(buf)?;
        if !self.tracked && !self.untracked_spill {
            if let Some(path) = self.buffer.spill_path() {
                // This write crossed the threshold; the file now exists and
                // needs an owner for its deletion.
                if self.state.register(self.id, path.to_path_buf()) {
                    self.tracked = true;
                } else {
                    self.untracked_spill = true;
                }
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.buffer.flush()
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.tracked {
            // Once shutdown has begun the reaper may already be gone;
            // reclaim inline instead of sending.
            if self.state.is_closed() || !self.state.send_release(self.id) {
                self.state.reclaim(self.id);
            }
        } else if self.untracked_spill {
            if let Some(path) = self.buffer.spill_path() {
                match std::fs::remove_file(path) {
                    Ok(()) => log::debug!("deleted untracked temp file {}", path.display()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                    Err(e) => {
                        log::warn!("failed to delete untracked temp file {}: {e}", path.display());
                    }
                }
            }
        } else {
            log::debug!("temp file {:?} was memory-resident, nothing to reclaim", self.id);
        }
    }
}
