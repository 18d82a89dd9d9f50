//! Sync Scheduler
//!
//! Decides what each heartbeat should ask the database for. Until a node
//! list has been fetched the only thing it produces is a fetch; afterwards
//! each heartbeat produces one sync, never more than one in flight.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    /// No node list loaded and no fetch in flight
    NoTopology,
    FetchPending,
    Synchronized,
    SyncPending,
    Cancelled,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::NoTopology => write!(f, "NO_TOPOLOGY"),
            SyncState::FetchPending => write!(f, "FETCH_PENDING"),
            SyncState::Synchronized => write!(f, "SYNCHRONIZED"),
            SyncState::SyncPending => write!(f, "SYNC_PENDING"),
            SyncState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Request a heartbeat should submit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Pull the node and server list
    Fetch,
    /// Push our own server row and pull everyone else's
    Sync,
}

#[derive(Debug)]
pub struct SyncScheduler {
    state: SyncState,
    has_nodes: bool,
    ticks: u64,
    syncs: u64,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self {
            state: SyncState::NoTopology,
            has_nodes: false,
            ticks: 0,
            syncs: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn has_nodes(&self) -> bool {
        self.has_nodes
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Syncs handed out so far
    pub fn syncs(&self) -> u64 {
        self.syncs
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == SyncState::Cancelled
    }

    /// Kick off the initial fetch
    pub fn start(&mut self) -> Option<SyncAction> {
        match self.state {
            SyncState::NoTopology => {
                self.state = SyncState::FetchPending;
                Some(SyncAction::Fetch)
            }
            _ => None,
        }
    }

    /// One heartbeat
    pub fn tick(&mut self) -> Option<SyncAction> {
        if self.is_cancelled() {
            return None;
        }
        self.ticks += 1;
        match self.state {
            // A failed fetch leaves us here; try again
            SyncState::NoTopology => self.start(),
            SyncState::Synchronized => {
                self.state = SyncState::SyncPending;
                self.syncs += 1;
                Some(SyncAction::Sync)
            }
            SyncState::FetchPending | SyncState::SyncPending | SyncState::Cancelled => None,
        }
    }

    /// A fetch finished. A fetch delivered after `cancel` still counts as loaded.
    pub fn fetch_completed(&mut self, ok: bool) {
        if ok {
            self.has_nodes = true;
        }
        if self.state != SyncState::FetchPending {
            return;
        }
        self.state = if ok {
            SyncState::Synchronized
        } else {
            SyncState::NoTopology
        };
    }

    /// A sync finished; a failed one is simply retried on the next tick
    pub fn sync_completed(&mut self) {
        if self.state == SyncState::SyncPending {
            self.state = SyncState::Synchronized;
        }
    }

    /// Stop handing out work. Requests already in flight still complete.
    pub fn cancel(&mut self) {
        self.state = SyncState::Cancelled;
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}
