use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;

/// Read-only view of the shared mute flag.
#[derive(Debug, Clone)]
pub struct MuteFlag {
    cell: Arc<RwLock<bool>>,
}

impl MuteFlag {
    pub fn get(&self) -> bool {
        *self.cell.read()
    }
}

/// Owns the single mute flag for the whole feed and fans changes out to
/// subscribers. Entries never hold their own copy; they read the flag.
#[derive(Debug)]
pub struct MuteCoordinator {
    cell: Arc<RwLock<bool>>,
    subscribers: Vec<Sender<bool>>,
}

impl Default for MuteCoordinator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MuteCoordinator {
    pub fn new(muted: bool) -> Self {
        Self {
            cell: Arc::new(RwLock::new(muted)),
            subscribers: Vec::new(),
        }
    }

    pub fn is_muted(&self) -> bool {
        *self.cell.read()
    }

    pub fn flag(&self) -> MuteFlag {
        MuteFlag {
            cell: self.cell.clone(),
        }
    }

    /// Receives every subsequent change. Dropped receivers are pruned on the
    /// next broadcast.
    pub fn subscribe(&mut self) -> Receiver<bool> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn toggle(&mut self) -> bool {
        let next = !self.is_muted();
        self.set(next);
        next
    }

    /// Returns whether the value changed.
    pub fn set(&mut self, muted: bool) -> bool {
        {
            let mut cell = self.cell.write();
            if *cell == muted {
                return false;
            }
            *cell = muted;
        }
        self.subscribers.retain(|tx| tx.send(muted).is_ok());
        true
    }
}
