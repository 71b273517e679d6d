//! Threshold-based spill buffer.
//!
//! A [`SpillBuffer`] is a writable byte buffer that keeps its content in
//! memory as long as the total size stays within a configured byte threshold,
//! and transparently moves it to a uniquely named file in a designated
//! directory ("spills") on the first write that would exceed it. Content that
//! never grows past the threshold never touches the disk.
//!
//! The buffer is deliberately unaware of any cleanup policy: dropping a
//! spilled buffer leaves the file in place, and its location is exposed
//! through [`SpillBuffer::spill_path`] so that an owning component can delete
//! it when appropriate.

use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

mod fs;

/// Produces [`SpillBuffer`] instances bound to a single spill directory and
/// byte threshold.
#[derive(Debug, Clone)]
pub struct SpillFactory {
    threshold: usize,
    dir: PathBuf,
}

impl SpillFactory {
    /// Creates a factory for buffers that spill into `dir` once their content
    /// exceeds `threshold` bytes.
    ///
    /// The directory is not touched here; it must exist by the time a buffer
    /// actually spills.
    pub fn new(threshold: usize, dir: impl Into<PathBuf>) -> SpillFactory {
        SpillFactory {
            threshold,
            dir: dir.into(),
        }
    }

    /// Returns the byte threshold above which buffers spill to disk.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Returns the directory spilled files are created in.
    pub fn spill_dir(&self) -> &Path {
        &self.dir
    }

    /// Creates a fresh, empty buffer.
    ///
    /// This performs no I/O: a new buffer starts memory-resident and touches
    /// the disk only when a write crosses the threshold.
    pub fn create(&self) -> SpillBuffer {
        SpillBuffer {
            threshold: self.threshold,
            dir: self.dir.clone(),
            state: State::Memory(Vec::new()),
        }
    }
}

/// A writable buffer that stays in memory up to a byte threshold and moves to
/// a file in the spill directory on the write that would exceed it.
///
/// Writing exactly up to the threshold keeps the content in memory; the spill
/// triggers strictly when `current_size + write_len > threshold`. After a
/// spill the backing file holds the complete content (the former memory
/// prefix followed by everything written since), and all further writes go
/// directly to the file.
///
/// A failed spill (file creation or the initial transfer) leaves the buffer
/// memory-resident and usable, with its content unchanged.
pub struct SpillBuffer {
    threshold: usize,
    dir: PathBuf,
    state: State,
}

enum State {
    Memory(Vec<u8>),
    Disk { file: File, path: PathBuf, size: u64 },
}

impl SpillBuffer {
    /// Returns the total number of bytes written so far.
    pub fn current_size(&self) -> u64 {
        match &self.state {
            State::Memory(data) => data.len() as u64,
            State::Disk { size, .. } => *size,
        }
    }

    /// Returns `true` while the content has not been materialized on disk.
    pub fn is_in_memory(&self) -> bool {
        matches!(self.state, State::Memory(_))
    }

    /// Returns the path of the backing file, or `None` while the content is
    /// memory-resident.
    pub fn spill_path(&self) -> Option<&Path> {
        match &self.state {
            State::Memory(_) => None,
            State::Disk { path, .. } => Some(path),
        }
    }

    /// Returns the buffered content while memory-resident, `None` once
    /// spilled.
    pub fn in_memory_bytes(&self) -> Option<&[u8]> {
        match &self.state {
            State::Memory(data) => Some(data),
            State::Disk { .. } => None,
        }
    }

    /// Opens a reader over the current content.
    ///
    /// For a memory-resident buffer this snapshots the content (bounded by
    /// the threshold); for a spilled buffer it opens the backing file again,
    /// independently of the write handle.
    pub fn reader(&self) -> io::Result<SpillReader> {
        match &self.state {
            State::Memory(data) => Ok(SpillReader(ReaderInner::Memory {
                data: data.clone(),
                pos: 0,
            })),
            State::Disk { path, .. } => Ok(SpillReader(ReaderInner::Disk(File::open(path)?))),
        }
    }
}

impl io::Write for SpillBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            State::Memory(data) => {
                let end = data.len().checked_add(buf.len()).expect("write end position");
                if end <= self.threshold {
                    data.extend_from_slice(buf);
                    Ok(buf.len())
                } else {
                    let data = std::mem::take(data);
                    match spill_to_disk(&self.dir, &data, buf) {
                        Ok(state) => {
                            self.state = state;
                            Ok(buf.len())
                        }
                        Err(e) => {
                            self.state = State::Memory(data);
                            Err(e)
                        }
                    }
                }
            }
            State::Disk { file, size, .. } => {
                file.write_all(buf)?;
                *size += buf.len() as u64;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.state {
            State::Memory(_) => Ok(()),
            State::Disk { file, .. } => file.flush(),
        }
    }
}

/// Moves `data` followed by `buf` into a fresh spill file in `dir`.
///
/// On any failure the partially written file is removed and the error is
/// returned, so the caller can restore its memory state.
fn spill_to_disk(dir: &Path, data: &[u8], buf: &[u8]) -> io::Result<State> {
    let (mut file, path) = fs::create_spill_file(dir)?;
    if let Err(e) = file.write_all(data).and_then(|()| file.write_all(buf)) {
        drop(file);
        let _ = std::fs::remove_file(&path);
        return Err(e);
    }
    Ok(State::Disk {
        file,
        path,
        size: (data.len() + buf.len()) as u64,
    })
}

/// Reader over a [`SpillBuffer`] snapshot, obtained from
/// [`SpillBuffer::reader`].
pub struct SpillReader(ReaderInner);

enum ReaderInner {
    Memory { data: Vec<u8>, pos: usize },
    Disk(File),
}

impl Read for SpillReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            ReaderInner::Memory { data, pos } => {
                let end = std::cmp::min(*pos + buf.len(), data.len());
                let read_len = end - *pos;
                if read_len != 0 {
                    buf[..read_len].copy_from_slice(&data[*pos..end]);
                    *pos = end;
                }
                Ok(read_len)
            }
            ReaderInner::Disk(file) => file.read(buf),
        }
    }
}
