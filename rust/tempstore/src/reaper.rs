//! Background reclamation of tracked temp files.

use std::{
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use crate::store::{EntryId, StoreState};

/// Messages consumed by the reaper thread.
pub(crate) enum ReaperMsg {
    /// A dropped handle hands its registry entry over for deletion.
    Release(EntryId),
    /// Begin the shutdown drain.
    Shutdown,
}

/// Owner of the background thread that deletes released temp files.
///
/// One reaper serves one store for its whole lifetime. Handles enqueue
/// `Release` messages as they drop, keeping file deletion off their owners'
/// threads; reclamation failures are logged inside the thread and never
/// surface anywhere. On `Shutdown` the thread drains until the registry is
/// empty, so a joining `close` observes a fully cleaned working directory.
pub(crate) struct Reaper {
    thread: thread::JoinHandle<()>,
}

impl Reaper {
    pub(crate) fn spawn(
        state: Arc<StoreState>,
        rx: mpsc::Receiver<ReaperMsg>,
        sweep_interval: Duration,
        entry_ttl: Option<Duration>,
    ) -> std::io::Result<Reaper> {
        let thread = thread::Builder::new()
            .name("tempstore-reaper".to_string())
            .spawn(move || run(state, rx, sweep_interval, entry_ttl))?;
        Ok(Reaper { thread })
    }

    /// Waits for the thread to finish the shutdown drain.
    pub(crate) fn join(self) {
        if self.thread.join().is_err() {
            log::error!("reaper thread terminated abnormally");
        }
    }
}

fn run(
    state: Arc<StoreState>,
    rx: mpsc::Receiver<ReaperMsg>,
    sweep_interval: Duration,
    entry_ttl: Option<Duration>,
) {
    loop {
        match rx.recv_timeout(sweep_interval) {
            Ok(ReaperMsg::Release(id)) => state.reclaim(id),
            Ok(ReaperMsg::Shutdown) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(ttl) = entry_ttl {
                    state.sweep_expired(ttl);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
    drain(&state, &rx, sweep_interval, entry_ttl);
    log::debug!("reaper drained, exiting");
}

/// Shutdown phase: keep reclaiming until the registry is empty.
///
/// Live handles may still be out there; once the store is closed their drops
/// and explicit deletions shrink the registry directly, and the periodic
/// emptiness check picks that up. Release messages sent before shutdown
/// began are still consumed here.
fn drain(
    state: &StoreState,
    rx: &mpsc::Receiver<ReaperMsg>,
    sweep_interval: Duration,
    entry_ttl: Option<Duration>,
) {
    while !state.tracked_is_empty() {
        match rx.recv_timeout(sweep_interval) {
            Ok(ReaperMsg::Release(id)) => state.reclaim(id),
            Ok(ReaperMsg::Shutdown) => (),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(ttl) = entry_ttl {
                    state.sweep_expired(ttl);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}
