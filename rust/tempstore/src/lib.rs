//! Tracked temporary file store: threshold-spilled allocations, a purged
//! working directory and deferred background cleanup.

pub mod container;
pub mod error;
pub mod handle;
mod reaper;
pub mod store;


pub use container::TempContainer;
pub use error::{Error, ErrorKind, Result};
pub use handle::TempFile;
pub use store::{
    DEFAULT_SPILL_THRESHOLD, DEFAULT_TEMP_SUBDIR, EntryId, TempFileStore, TempFileStoreOptions,
};
