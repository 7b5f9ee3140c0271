//! The session pool: one slot per mountable client, each served by its own
//! worker thread.
//!
//! The receiver thread fills a slot's work field and signals its condition
//! variable; the worker processes the request while holding the slot's
//! mutex, so a session's requests are handled strictly in order. Slot
//! allocation scans for the lowest unmounted slot under the pool's
//! allocation lock, which also makes ids of unmounted sessions reusable.

use std::{
    fs::File,
    path::PathBuf,
    sync::{Condvar, Mutex, MutexGuard},
};

use tfs_fs_types::MAX_FILE_NAME;
use tfs_protocol::MAX_SESSIONS;

/// A decoded request waiting for a session's worker.
pub(crate) enum WorkItem {
    Mount,
    Unmount,
    Open { flags: i32, name: [u8; MAX_FILE_NAME] },
    Close { handle: i32 },
    Write { handle: i32, data: Vec<u8> },
    Read { handle: i32, len: u64 },
    Shutdown,
}

pub(crate) struct SessionState {
    /// A mount reserved this slot; cleared again on unmount.
    pub(crate) mounted: bool,
    /// A request is pending or being processed.
    pub(crate) active: bool,
    /// Tells the worker to exit.
    pub(crate) quit: bool,
    pub(crate) work: Option<WorkItem>,
    /// Write end of the client's private pipe, open while mounted.
    pub(crate) tx: Option<File>,
    pub(crate) client_pipe: PathBuf,
}

pub(crate) struct SessionSlot {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) available: Condvar,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState {
                mounted: false,
                active: false,
                quit: false,
                work: None,
                tx: None,
                client_pipe: PathBuf::new(),
            }),
            available: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().expect("session mutex poisoned")
    }
}

pub(crate) struct SessionPool {
    slots: Box<[SessionSlot]>,
    alloc_lock: Mutex<()>,
}

impl SessionPool {
    pub(crate) fn new() -> Self {
        Self {
            slots: (0..MAX_SESSIONS).map(|_| SessionSlot::new()).collect(),
            alloc_lock: Mutex::new(()),
        }
    }

    /// The slot serving 1-indexed `session_id`, if the id is in range.
    pub(crate) fn get(&self, session_id: i32) -> Option<&SessionSlot> {
        if session_id < 1 || session_id as usize > MAX_SESSIONS {
            return None;
        }
        Some(&self.slots[session_id as usize - 1])
    }

    pub(crate) fn slot_by_index(&self, index: usize) -> &SessionSlot {
        &self.slots[index]
    }

    /// Reserves the lowest unmounted slot and returns its session id.
    pub(crate) fn allocate(&self, client_pipe: PathBuf) -> Option<i32> {
        let _alloc = self.alloc_lock.lock().expect("allocation mutex poisoned");
        for (i, slot) in self.slots.iter().enumerate() {
            let mut state = slot.lock();
            if state.mounted {
                continue;
            }
            state.mounted = true;
            state.client_pipe = client_pipe;
            return Some(i as i32 + 1);
        }
        None
    }

    /// Wakes every worker and tells it to exit.
    pub(crate) fn request_quit(&self) {
        for slot in &self.slots {
            let mut state = slot.lock();
            state.quit = true;
            slot.available.notify_one();
        }
    }
}
