//! The temp file store: allocation, tracking and lifecycle.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

use tempstore_spill::SpillFactory;

use crate::{
    container::TempContainer,
    error::{Error, Result},
    handle::TempFile,
    reaper::{Reaper, ReaperMsg},
};

/// Default byte threshold below which temp file content stays in memory.
pub const DEFAULT_SPILL_THRESHOLD: usize = 10_000;

/// Name of the subdirectory of the platform temp root that serves as the
/// default working directory.
pub const DEFAULT_TEMP_SUBDIR: &str = "xwiki-tmp";

/// A store of tracked temporary files.
///
/// The store owns a working directory (prepared at open, recovering anything
/// a previous run left behind), hands out [`TempFile`] handles whose content
/// spills from memory to that directory past a byte threshold, and guarantees
/// that every spilled file is deleted exactly once: either synchronously via
/// [`TempFile::delete`], or by a background reaper once the handle is
/// dropped.
///
/// # Lifecycle
///
/// A store is opened with [`open`](TempFileStore::open) (defaults) or through
/// the [`options`](TempFileStore::options) builder, and torn down with
/// [`close`](TempFileStore::close), which drains all pending cleanup before
/// returning. Dropping the store without closing it lets the reaper finish in
/// the background instead of blocking.
///
/// # Observability
///
/// [`live_count`](TempFileStore::live_count) reports how many disk-backed
/// files are still awaiting deletion; it is eventually consistent, since
/// reclamation happens off the caller's path.
/// [`allocated_count`](TempFileStore::allocated_count) is the monotonic count
/// of successful allocations.
pub struct TempFileStore {
    state: Arc<StoreState>,
    reaper: Mutex<Option<Reaper>>,
}

impl TempFileStore {
    /// Opens a store with default options: the working directory is
    /// `<platform temp root>/xwiki-tmp`, the spill threshold is
    /// [`DEFAULT_SPILL_THRESHOLD`] bytes.
    pub fn open() -> Result<TempFileStore> {
        Self::options().open()
    }

    /// Returns an options builder for a customized store.
    pub fn options() -> TempFileStoreOptions {
        TempFileStoreOptions::default()
    }

    fn open_with(options: TempFileStoreOptions) -> Result<TempFileStore> {
        let root = options.root.unwrap_or_else(default_root);
        let container = TempContainer::prepare(root)?;
        let factory = SpillFactory::new(options.spill_threshold, container.path());
        let (tx, rx) = mpsc::channel();
        let state = Arc::new(StoreState {
            factory,
            container,
            tracked: Mutex::new(ahash::HashMap::default()),
            allocated: AtomicU64::new(0),
            next_id: AtomicU64::new(0),
            tx,
            closed: AtomicBool::new(false),
        });
        let reaper = Reaper::spawn(state.clone(), rx, options.sweep_interval, options.entry_ttl)
            .map_err(|e| Error::initialization(state.path(), e))?;
        log::debug!("temp file store opened at {}", state.path().display());
        Ok(TempFileStore {
            state,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Allocates a new temp file.
    ///
    /// The returned handle is immediately writable. Allocation touches no
    /// disk and never waits on reclamation work; the backing file appears in
    /// the working directory only once the content outgrows the spill
    /// threshold, at which point the store starts tracking it.
    ///
    /// Successful allocations increment the lifetime counter; failed ones
    /// never do.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::Closed`](crate::error::ErrorKind::Closed) once
    /// shutdown has begun.
    pub fn allocate(&self) -> Result<TempFile> {
        if self.state.is_closed() {
            return Err(Error::closed());
        }
        let file = TempFile::new(self.state.clone());
        self.state.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(file)
    }

    /// Returns the number of disk-backed temp files still awaiting deletion.
    ///
    /// Eventually consistent: a dropped handle's file disappears from this
    /// count only once the reaper has processed it.
    pub fn live_count(&self) -> usize {
        self.state.live_count()
    }

    /// Returns the lifetime count of successful allocations. Never
    /// decremented.
    pub fn allocated_count(&self) -> u64 {
        self.state.allocated.load(Ordering::Relaxed)
    }

    /// Returns the path of the working directory all spilled files live in.
    pub fn path(&self) -> &Path {
        self.state.path()
    }

    /// Returns the byte threshold above which temp content spills to disk.
    pub fn spill_threshold(&self) -> usize {
        self.state.factory.threshold()
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Shuts the store down, draining all pending cleanup.
    ///
    /// New allocations and new tracking registrations are rejected from this
    /// point on. The call blocks until every tracked file has been reclaimed
    /// and then joins the reaper; the wait is unbounded, so callers still
    /// holding live disk-backed handles must release them (from another
    /// thread, or before calling this) for the drain to finish.
    ///
    /// Closing an already closed store is a no-op.
    pub fn close(&self) -> Result<()> {
        self.state.set_closed();
        let reaper = self.reaper.lock().unwrap().take();
        if let Some(reaper) = reaper {
            self.state.send_shutdown();
            reaper.join();
            log::debug!(
                "temp file store at {} closed after {} allocations",
                self.state.path().display(),
                self.allocated_count()
            );
        }
        Ok(())
    }
}

impl Drop for TempFileStore {
    fn drop(&mut self) {
        self.state.set_closed();
        if self.reaper.lock().unwrap().take().is_some() {
            // Detach the reaper instead of joining: it keeps draining in the
            // background and exits once the registry is empty.
            self.state.send_shutdown();
        }
    }
}

/// Options for opening a [`TempFileStore`].
#[derive(Debug, Clone)]
pub struct TempFileStoreOptions {
    root: Option<PathBuf>,
    spill_threshold: usize,
    sweep_interval: Duration,
    entry_ttl: Option<Duration>,
}

impl Default for TempFileStoreOptions {
    fn default() -> TempFileStoreOptions {
        TempFileStoreOptions {
            root: None,
            spill_threshold: DEFAULT_SPILL_THRESHOLD,
            sweep_interval: Duration::from_millis(250),
            entry_ttl: None,
        }
    }
}

impl TempFileStoreOptions {
    /// Overrides the working directory.
    ///
    /// The directory is prepared at open: existing content is purged, a
    /// missing directory is created (its parent must exist).
    pub fn root(mut self, path: impl Into<PathBuf>) -> TempFileStoreOptions {
        self.root = Some(path.into());
        self
    }

    /// Sets the byte threshold above which temp content spills to disk.
    /// Content of exactly this size stays in memory.
    pub fn spill_threshold(mut self, threshold: usize) -> TempFileStoreOptions {
        self.spill_threshold = threshold;
        self
    }

    /// Sets the reaper wakeup period, bounding how long the shutdown drain
    /// and the TTL sweep can lag behind.
    pub fn sweep_interval(mut self, interval: Duration) -> TempFileStoreOptions {
        self.sweep_interval = interval;
        self
    }

    /// Enables the TTL sweep: tracked files older than `ttl` are reclaimed
    /// even if their handle is still alive. Off by default; meant as a
    /// backstop against owners that never release.
    pub fn entry_ttl(mut self, ttl: Duration) -> TempFileStoreOptions {
        self.entry_ttl = Some(ttl);
        self
    }

    /// Opens the store with these options.
    pub fn open(self) -> Result<TempFileStore> {
        TempFileStore::open_with(self)
    }
}

fn default_root() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_TEMP_SUBDIR)
}

/// Opaque identifier of one allocation within the store's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(u64);

/// Registry record of one disk-backed temp file awaiting deletion.
struct TrackedEntry {
    path: PathBuf,
    registered_at: Instant,
}

/// State shared between the store, its handles and the reaper thread.
pub(crate) struct StoreState {
    pub(crate) factory: SpillFactory,
    container: TempContainer,
    tracked: Mutex<ahash::HashMap<EntryId, TrackedEntry>>,
    allocated: AtomicU64,
    next_id: AtomicU64,
    tx: mpsc::Sender<ReaperMsg>,
    closed: AtomicBool,
}

impl StoreState {
    pub(crate) fn path(&self) -> &Path {
        self.container.path()
    }

    pub(crate) fn next_id(&self) -> EntryId {
        EntryId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Starts tracking a spilled file under the given allocation id.
    ///
    /// Returns `false` once shutdown has begun: the registry only accepts
    /// entries while the reaper is there to drain them, and a refused caller
    /// keeps sole ownership of its file. The closed flag is checked under
    /// the registry lock, the same lock the drain's emptiness check takes,
    /// so an entry is either visible to the drain or refused; it can never
    /// slip in after the drain has finished.
    pub(crate) fn register(&self, id: EntryId, path: PathBuf) -> bool {
        let mut tracked = self.tracked.lock().unwrap();
        if self.is_closed() {
            return false;
        }
        let entry = TrackedEntry {
            path,
            registered_at: Instant::now(),
        };
        tracked.insert(id, entry);
        true
    }

    /// Removes the registry entry for `id` and returns its file path, if the
    /// entry still exists. Removal is the linearization point for deletion:
    /// whoever takes the entry owns deleting the file.
    pub(crate) fn take_entry(&self, id: EntryId) -> Option<PathBuf> {
        self.tracked.lock().unwrap().remove(&id).map(|e| e.path)
    }

    /// Reclaims one released entry: takes it off the registry and deletes its
    /// file. A no-op when the entry is already gone.
    pub(crate) fn reclaim(&self, id: EntryId) {
        let entry = self.tracked.lock().unwrap().remove(&id);
        if let Some(entry) = entry {
            remove_tracked_file(&entry.path);
        }
    }

    /// Reclaims every tracked entry older than `ttl`.
    ///
    /// The registry lock is released before any file is touched, so callers
    /// of `allocate`/`register` never wait on sweep I/O.
    pub(crate) fn sweep_expired(&self, ttl: Duration) {
        let expired: Vec<(EntryId, PathBuf)> = {
            let mut tracked = self.tracked.lock().unwrap();
            let ids: Vec<EntryId> = tracked
                .iter()
                .filter(|(_, entry)| entry.registered_at.elapsed() > ttl)
                .map(|(&id, _)| id)
                .collect();
            ids.into_iter()
                .filter_map(|id| tracked.remove(&id).map(|entry| (id, entry.path)))
                .collect()
        };
        for (id, path) in expired {
            log::debug!("temp file {id:?} exceeded its ttl, reclaiming");
            remove_tracked_file(&path);
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.tracked.lock().unwrap().len()
    }

    pub(crate) fn tracked_is_empty(&self) -> bool {
        self.tracked.lock().unwrap().is_empty()
    }

    /// Hands a released entry to the reaper. Returns `false` when the reaper
    /// is no longer receiving, in which case the caller must reclaim inline.
    pub(crate) fn send_release(&self, id: EntryId) -> bool {
        self.tx.send(ReaperMsg::Release(id)).is_ok()
    }

    fn send_shutdown(&self) {
        let _ = self.tx.send(ReaperMsg::Shutdown);
    }
}

/// Deletes a reclaimed file. Errors are logged, never propagated: a missing
/// file counts as already reclaimed.
fn remove_tracked_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("reclaimed temp file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => (),
        Err(e) => log::warn!("failed to reclaim temp file {}: {e}", path.display()),
    }
}
