//! The fstab/crypttab watch collaborators.
//!
//! Both are treated identically by the registry: any entry-added or
//! entry-removed notification fans out to [`crate::registry::Registry::update_all_block_objects`].
//! Parsing `/etc/fstab`/`/etc/crypttab` and watching them for changes is an
//! external concern this crate doesn't implement.

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    FstabEntryAdded,
    FstabEntryRemoved,
    CrypttabEntryAdded,
    CrypttabEntryRemoved,
}

pub trait ConfigMonitor: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<ConfigChange>;
}

/// A config monitor that never emits a change, for daemons/tests that
/// don't need one wired up.
pub struct NoopConfigMonitor {
    sender: broadcast::Sender<ConfigChange>,
}

impl Default for NoopConfigMonitor {
    fn default() -> Self {
        let (sender, _receiver) = broadcast::channel(16);
        Self { sender }
    }
}

impl ConfigMonitor for NoopConfigMonitor {
    fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.sender.subscribe()
    }
}
