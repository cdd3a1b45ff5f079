//! The Registry: the object catalog's single source of truth.
//!
//! Owns the three indexes (block devices by sysfs path, drives by vpd, and
//! the sysfs-path-to-drive back-reference), demultiplexes kernel uevents
//! onto them in the order that avoids transiently-orphaned block objects,
//! and drives the periodic housekeeping sweep and the config-change
//! fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

use crate::block::BlockObject;
use crate::cleanup::CleanupSubsystem;
use crate::config::Config;
use crate::config_monitor::ConfigMonitor;
use crate::device::Snapshot;
use crate::drive::DriveObject;
use crate::manager::Manager;
use crate::mdraid::MDRaidObject;

struct Inner {
    sysfs_to_block: HashMap<String, BlockObject>,
    vpd_to_drive: HashMap<String, DriveObject>,
    sysfs_path_to_drive: HashMap<String, String>,
    uuid_to_mdraid: HashMap<String, MDRaidObject>,
    coldplug: bool,
    housekeeping_running: bool,
    housekeeping_last: Option<Instant>,
}

impl Inner {
    fn new() -> Self {
        Self {
            sysfs_to_block: HashMap::new(),
            vpd_to_drive: HashMap::new(),
            sysfs_path_to_drive: HashMap::new(),
            uuid_to_mdraid: HashMap::new(),
            coldplug: false,
            housekeeping_running: false,
            housekeeping_last: None,
        }
    }
}

/// The registry mutex is a `tokio::sync::Mutex` (not a `std::sync::Mutex`)
/// because a single uevent's handling must stay lock-held across the
/// Interface Updater's async bus publish/update calls, which are in-process
/// skeleton operations rather than calls into arbitrary interface method
/// handlers. Background worker jobs (housekeeping, initial-housekeeping)
/// and the snapshot-then-release fan-outs below only ever touch the lock
/// to read or mutate the indexes themselves, never across a later `.await`
/// into bus or worker code.
pub struct Registry {
    connection: Connection,
    inner: Mutex<Inner>,
    housekeeping_interval: std::time::Duration,
    next_drive_id: AtomicU64,
    next_block_id: AtomicU64,
    cleanup: Arc<dyn CleanupSubsystem>,
    #[cfg(test)]
    initial_housekeeping_scheduled: AtomicU64,
}

impl Registry {
    /// Starts the registry: publishes the Manager object, enumerates
    /// existing block devices as synthetic `add` events (coldplug),
    /// triggers one initial housekeeping tick, starts the periodic
    /// housekeeping ticker, and subscribes to config-change notifications.
    pub async fn start(
        connection: Connection,
        config: &Config,
        cleanup: Arc<dyn CleanupSubsystem>,
        config_monitor: Arc<dyn ConfigMonitor>,
    ) -> crate::error::Result<Arc<Self>> {
        let registry = Arc::new(Self {
            connection: connection.clone(),
            inner: Mutex::new(Inner::new()),
            housekeeping_interval: config.housekeeping_interval,
            next_drive_id: AtomicU64::new(0),
            next_block_id: AtomicU64::new(0),
            cleanup,
            #[cfg(test)]
            initial_housekeeping_scheduled: AtomicU64::new(0),
        });

        {
            let mut inner = registry.inner.lock().await;
            inner.coldplug = true;
        }

        let manager = Manager::new(env!("CARGO_PKG_VERSION"));
        connection
            .object_server()
            .at(crate::manager::OBJECT_PATH, manager)
            .await?;

        let mut enumerator = udev::Enumerator::new()?;
        enumerator.match_subsystem("block")?;
        for device in enumerator.scan_devices()? {
            let snapshot = Snapshot::from_udev(&device);
            registry.handle_uevent("add", snapshot).await;
        }

        {
            let mut inner = registry.inner.lock().await;
            inner.coldplug = false;
        }

        registry.trigger_housekeeping_tick().await;

        tokio::spawn({
            let registry = Arc::clone(&registry);
            async move {
                let mut ticker = tokio::time::interval(registry.housekeeping_interval);
                ticker.tick().await; // first tick fires immediately; the initial sweep above already covers it
                loop {
                    ticker.tick().await;
                    registry.trigger_housekeeping_tick().await;
                }
            }
        });

        tokio::spawn({
            let registry = Arc::clone(&registry);
            let mut changes = config_monitor.subscribe();
            async move {
                while changes.recv().await.is_ok() {
                    registry.update_all_block_objects().await;
                }
            }
        });

        Ok(registry)
    }

    fn allocate_drive_path(&self) -> OwnedObjectPath {
        let id = self.next_drive_id.fetch_add(1, Ordering::Relaxed);
        ObjectPath::try_from(format!("/org/freedesktop/UDisks2/drives/drive_{id}"))
            .expect("generated path is always valid")
            .into()
    }

    fn allocate_block_path(&self) -> OwnedObjectPath {
        let id = self.next_block_id.fetch_add(1, Ordering::Relaxed);
        ObjectPath::try_from(format!("/org/freedesktop/UDisks2/block_devices/block_{id}"))
            .expect("generated path is always valid")
            .into()
    }

    /// Entry point for one kernel uevent. Routes `block`-subsystem events
    /// through the drive/block ordering discipline, and additionally
    /// routes events carrying an `MD_UUID` property through the MD-RAID
    /// array lifecycle (an array's own top-level device, and each of its
    /// members, are block-subsystem devices too).
    pub async fn handle_uevent(self: &Arc<Self>, action: &str, device: Snapshot) {
        tracing::debug!(action, sysfs_path = %device.sysfs_path, "uevent");

        if device.subsystem != "block" {
            return;
        }

        self.handle_block_uevent(action, &device).await;

        if device.property("MD_UUID").is_some() {
            self.handle_mdraid_uevent(action, &device).await;
        }
    }

    async fn handle_block_uevent(self: &Arc<Self>, action: &str, device: &Snapshot) {
        let mut inner = self.inner.lock().await;

        if action == "remove" {
            self.handle_block_uevent_for_block(&mut inner, action, device)
                .await;
            self.handle_block_uevent_for_drive(&mut inner, action, device)
                .await;
        } else {
            self.handle_block_uevent_for_drive(&mut inner, action, device)
                .await;
            self.handle_block_uevent_for_block(&mut inner, action, device)
                .await;
        }

        if action != "add" {
            self.cleanup.check();
        }
    }

    async fn handle_block_uevent_for_drive(&self, inner: &mut Inner, action: &str, device: &Snapshot) {
        if action == "remove" {
            let Some(vpd) = inner.sysfs_path_to_drive.remove(&device.sysfs_path) else {
                return;
            };
            let Some(drive) = inner.vpd_to_drive.get(&vpd).cloned() else {
                let err = crate::error::Error::Internal {
                    detail: format!("sysfs_path_to_drive referenced unknown drive vpd {vpd}"),
                };
                tracing::warn!(error = %err, "registry invariant violated");
                return;
            };
            if let Err(err) = drive.uevent(action, Some(device)).await {
                tracing::warn!(error = %err, "drive uevent failed");
            }
            if drive.is_empty().await {
                inner.vpd_to_drive.remove(&vpd);
                if let Err(err) = drive.unpublish().await {
                    tracing::warn!(error = %err, "failed to unpublish drive object");
                }
            }
            return;
        }

        let (include, vpd) = DriveObject::should_include_device(device);
        if !include {
            return;
        }
        let Some(vpd) = vpd else {
            tracing::debug!(sysfs_path = %device.sysfs_path, "ignoring block device with no serial or WWN");
            return;
        };

        if let Some(drive) = inner.vpd_to_drive.get(&vpd).cloned() {
            inner
                .sysfs_path_to_drive
                .entry(device.sysfs_path.clone())
                .or_insert_with(|| vpd.clone());
            if let Err(err) = drive.uevent(action, Some(device)).await {
                tracing::warn!(error = %err, "drive uevent failed");
            }
            return;
        }

        let path = self.allocate_drive_path();
        match DriveObject::new(self.connection.clone(), path, vpd.clone(), device.clone()).await {
            Ok(drive) => {
                inner
                    .sysfs_path_to_drive
                    .insert(device.sysfs_path.clone(), vpd.clone());
                inner.vpd_to_drive.insert(vpd, drive.clone());
                if !inner.coldplug {
                    self.schedule_initial_housekeeping(drive);
                }
            }
            Err(err) => tracing::warn!(error = %err, "failed to create drive object"),
        }
    }

    async fn handle_block_uevent_for_block(&self, inner: &mut Inner, action: &str, device: &Snapshot) {
        if action == "remove" {
            if let Some(block) = inner.sysfs_to_block.remove(&device.sysfs_path) {
                if let Err(err) = block.unpublish().await {
                    tracing::warn!(error = %err, "failed to unpublish block object");
                }
            }
            return;
        }

        if let Some(block) = inner.sysfs_to_block.get(&device.sysfs_path).cloned() {
            if let Err(err) = block.uevent(action, Some(device)).await {
                tracing::warn!(error = %err, "block uevent failed");
            }
            return;
        }

        let path = self.allocate_block_path();
        match BlockObject::new(self.connection.clone(), path, device.clone()).await {
            Ok(block) => {
                inner.sysfs_to_block.insert(device.sysfs_path.clone(), block);
            }
            Err(err) => tracing::warn!(error = %err, "failed to create block object"),
        }
    }

    async fn handle_mdraid_uevent(self: &Arc<Self>, action: &str, device: &Snapshot) {
        let Some(uuid) = device.property("MD_UUID").map(str::to_owned) else {
            return;
        };
        let mut inner = self.inner.lock().await;

        if action == "remove" {
            let Some(mdraid) = inner.uuid_to_mdraid.get(&uuid).cloned() else {
                let err = crate::error::Error::Protocol {
                    sysfs_path: device.sysfs_path.clone(),
                };
                tracing::warn!(error = %err, uuid, "remove for unknown mdraid array");
                return;
            };
            if let Err(err) = mdraid.uevent(action, Some(device)).await {
                tracing::warn!(error = %err, "mdraid uevent failed");
            }
            if mdraid.is_empty().await {
                inner.uuid_to_mdraid.remove(&uuid);
                if let Err(err) = mdraid.unpublish().await {
                    tracing::warn!(error = %err, "failed to unpublish mdraid object");
                }
            }
            return;
        }

        if let Some(mdraid) = inner.uuid_to_mdraid.get(&uuid).cloned() {
            if let Err(err) = mdraid.uevent(action, Some(device)).await {
                tracing::warn!(error = %err, "mdraid uevent failed");
            }
            return;
        }

        match MDRaidObject::new(self.connection.clone(), device.clone()).await {
            Ok(mdraid) => {
                inner.uuid_to_mdraid.insert(uuid, mdraid);
            }
            Err(err) => tracing::warn!(error = %err, "failed to create mdraid object"),
        }
    }

    fn schedule_initial_housekeeping(&self, drive: DriveObject) {
        #[cfg(test)]
        self.initial_housekeeping_scheduled
            .fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(err) = drive.housekeeping(0, None).await {
                tracing::warn!(error = %err, "error performing initial housekeeping for drive");
            }
        });
    }

    /// Single-flight trigger for a housekeeping sweep: if a sweep is
    /// already running, this is a no-op.
    pub async fn trigger_housekeeping_tick(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock().await;
            if inner.housekeeping_running {
                return;
            }
            inner.housekeeping_running = true;
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            registry.run_housekeeping_pass().await;
        });
    }

    async fn run_housekeeping_pass(self: Arc<Self>) {
        let now = Instant::now();
        let (secs_since_last, drives) = {
            let mut inner = self.inner.lock().await;
            let secs_since_last = inner
                .housekeeping_last
                .map(|last| now.duration_since(last).as_secs())
                .unwrap_or(0);
            inner.housekeeping_last = Some(now);
            let drives: Vec<DriveObject> = inner.vpd_to_drive.values().cloned().collect();
            (secs_since_last, drives)
        };

        tracing::info!(secs_since_last, "housekeeping initiated");
        for drive in &drives {
            if let Err(err) = drive.housekeeping(secs_since_last, None).await {
                tracing::warn!(
                    object_path = %drive.object_path().await,
                    error = %err,
                    "housekeeping failed for drive"
                );
            }
        }
        tracing::info!("housekeeping complete");

        let mut inner = self.inner.lock().await;
        inner.housekeeping_running = false;
    }

    /// Re-runs the interface update for every known block object with no
    /// new device data, used to fan out fstab/crypttab changes. Takes a
    /// snapshot of the block set under the lock, then releases it before
    /// calling into any interface code.
    pub async fn update_all_block_objects(&self) {
        let blocks: Vec<BlockObject> = {
            let inner = self.inner.lock().await;
            inner.sysfs_to_block.values().cloned().collect()
        };
        for block in blocks {
            if let Err(err) = block.uevent("change", None).await {
                tracing::warn!(error = %err, "block config update failed");
            }
        }
    }

    #[cfg(test)]
    async fn drive_count(&self) -> usize {
        self.inner.lock().await.vpd_to_drive.len()
    }

    #[cfg(test)]
    async fn block_count(&self) -> usize {
        self.inner.lock().await.sysfs_to_block.len()
    }

    #[cfg(test)]
    async fn mdraid_count(&self) -> usize {
        self.inner.lock().await.uuid_to_mdraid.len()
    }

    #[cfg(test)]
    fn initial_housekeeping_scheduled_count(&self) -> u64 {
        self.initial_housekeeping_scheduled.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    async fn set_coldplug(&self, coldplug: bool) {
        self.inner.lock().await.coldplug = coldplug;
    }

    #[cfg(test)]
    async fn set_housekeeping_running(&self, running: bool) {
        self.inner.lock().await.housekeeping_running = running;
    }

    #[cfg(test)]
    async fn housekeeping_running(&self) -> bool {
        self.inner.lock().await.housekeeping_running
    }

    #[cfg(test)]
    async fn housekeeping_last_is_set(&self) -> bool {
        self.inner.lock().await.housekeeping_last.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::NoopCleanup;

    async fn peer_connection_pair() -> (Connection, Connection) {
        let (left, right) = tokio::net::UnixStream::pair().expect("unix socket pair");
        let server = zbus::connection::Builder::unix_stream(left)
            .p2p()
            .build()
            .await
            .expect("server peer connection");
        let client = zbus::connection::Builder::unix_stream(right)
            .p2p()
            .build()
            .await
            .expect("client peer connection");
        (server, client)
    }

    async fn test_registry() -> Arc<Registry> {
        let (connection, _client) = peer_connection_pair().await;
        Arc::new(Registry {
            connection,
            inner: Mutex::new(Inner::new()),
            housekeeping_interval: std::time::Duration::from_secs(600),
            next_drive_id: AtomicU64::new(0),
            next_block_id: AtomicU64::new(0),
            cleanup: Arc::new(NoopCleanup),
            initial_housekeeping_scheduled: AtomicU64::new(0),
        })
    }

    #[tokio::test]
    async fn a_whole_disk_with_identity_creates_both_drive_and_block() {
        let registry = test_registry().await;
        let device = Snapshot::new("block", "/sys/block/sda")
            .with_property("DEVTYPE", "disk")
            .with_property("ID_SERIAL", "S1")
            .with_property("ID_WWN", "W1");

        registry.handle_uevent("add", device).await;

        assert_eq!(registry.drive_count().await, 1);
        assert_eq!(registry.block_count().await, 1);
    }

    #[tokio::test]
    async fn identity_less_device_gets_a_block_object_but_no_drive() {
        let registry = test_registry().await;
        let device = Snapshot::new("block", "/sys/block/loop0").with_property("DEVTYPE", "disk");

        registry.handle_uevent("add", device).await;

        assert_eq!(registry.drive_count().await, 0);
        assert_eq!(registry.block_count().await, 1);
    }

    #[tokio::test]
    async fn two_paths_to_the_same_drive_share_one_drive_object() {
        let registry = test_registry().await;
        let path_a = Snapshot::new("block", "/sys/block/sda")
            .with_property("DEVTYPE", "disk")
            .with_property("ID_SERIAL", "S1")
            .with_property("ID_WWN", "W1");
        let path_b = Snapshot::new("block", "/sys/block/sdb")
            .with_property("DEVTYPE", "disk")
            .with_property("ID_SERIAL", "S1")
            .with_property("ID_WWN", "W1");

        registry.handle_uevent("add", path_a).await;
        registry.handle_uevent("add", path_b).await;

        assert_eq!(registry.drive_count().await, 1);
        assert_eq!(registry.block_count().await, 2);
    }

    #[tokio::test]
    async fn removing_the_last_member_removes_the_drive() {
        let registry = test_registry().await;
        let device = Snapshot::new("block", "/sys/block/sda")
            .with_property("DEVTYPE", "disk")
            .with_property("ID_SERIAL", "S1")
            .with_property("ID_WWN", "W1");

        registry.handle_uevent("add", device.clone()).await;
        assert_eq!(registry.drive_count().await, 1);

        registry.handle_uevent("remove", device).await;
        assert_eq!(registry.drive_count().await, 0);
        assert_eq!(registry.block_count().await, 0);
    }

    #[tokio::test]
    async fn mdraid_array_and_member_device_are_tracked_separately_from_drives() {
        let registry = test_registry().await;
        let member = Snapshot::new("block", "/sys/block/md0")
            .with_property("DEVTYPE", "disk")
            .with_property("MD_UUID", "ab:cd-01 02");

        registry.handle_uevent("add", member).await;

        assert_eq!(registry.mdraid_count().await, 1);
        assert_eq!(registry.block_count().await, 1);
    }

    #[tokio::test]
    async fn removing_all_mdraid_members_removes_the_array() {
        let registry = test_registry().await;
        let member = Snapshot::new("block", "/sys/block/md0")
            .with_property("DEVTYPE", "disk")
            .with_property("MD_UUID", "uuid-1");

        registry.handle_uevent("add", member.clone()).await;
        assert_eq!(registry.mdraid_count().await, 1);

        registry.handle_uevent("remove", member).await;
        assert_eq!(registry.mdraid_count().await, 0);
    }

    #[tokio::test]
    async fn update_all_block_objects_does_not_panic_with_no_blocks() {
        let registry = test_registry().await;
        registry.update_all_block_objects().await;
        assert_eq!(registry.block_count().await, 0);
    }

    #[tokio::test]
    async fn config_fanout_reaches_every_block_object_exactly_once() {
        let registry = test_registry().await;

        let mut blocks = Vec::new();
        for i in 0..3 {
            let sysfs_path = format!("/sys/block/sd{i}");
            let path: OwnedObjectPath = ObjectPath::try_from(format!(
                "/org/freedesktop/UDisks2/block_devices/block_{i}"
            ))
            .unwrap()
            .into();
            let device = Snapshot::new("block", sysfs_path.clone()).with_property("DEVTYPE", "disk");
            let block = BlockObject::new(registry.connection.clone(), path, device)
                .await
                .unwrap();
            blocks.push((sysfs_path, block));
        }

        {
            let mut inner = registry.inner.lock().await;
            for (sysfs_path, block) in &blocks {
                inner.sysfs_to_block.insert(sysfs_path.clone(), block.clone());
            }
        }

        let mut before = Vec::new();
        for (_, block) in &blocks {
            before.push(block.uevent_calls().await);
        }

        registry.update_all_block_objects().await;

        for ((_, block), before) in blocks.iter().zip(before) {
            assert_eq!(block.uevent_calls().await, before + 1);
        }
    }

    #[tokio::test]
    async fn coldplug_suppresses_initial_housekeeping_for_newly_discovered_drives() {
        let registry = test_registry().await;
        registry.set_coldplug(true).await;

        let device = Snapshot::new("block", "/sys/block/sda")
            .with_property("DEVTYPE", "disk")
            .with_property("ID_SERIAL", "S1")
            .with_property("ID_WWN", "W1");
        registry.handle_uevent("add", device).await;

        assert_eq!(registry.drive_count().await, 1);
        assert_eq!(registry.initial_housekeeping_scheduled_count(), 0);

        registry.set_coldplug(false).await;

        let other = Snapshot::new("block", "/sys/block/sdb")
            .with_property("DEVTYPE", "disk")
            .with_property("ID_SERIAL", "S2")
            .with_property("ID_WWN", "W2");
        registry.handle_uevent("add", other).await;

        assert_eq!(registry.drive_count().await, 2);
        assert_eq!(registry.initial_housekeeping_scheduled_count(), 1);
    }

    #[tokio::test]
    async fn a_tick_firing_mid_sweep_enqueues_no_second_pass() {
        let registry = test_registry().await;
        registry.set_housekeeping_running(true).await;

        registry.trigger_housekeeping_tick().await;

        // A genuine pass would have flipped `housekeeping_running` back to
        // false and recorded a `housekeeping_last` timestamp; neither
        // happened, so no second pass was enqueued.
        assert!(registry.housekeeping_running().await);
        assert!(!registry.housekeeping_last_is_set().await);
    }
}
