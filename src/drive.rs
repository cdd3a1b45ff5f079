//! The Drive Object: one physical device, correlated across however many
//! block devices expose it.
//!
//! This should not be confused with the `org.freedesktop.UDisks2.Block`
//! interface, which represents a low-level block device the OS knows
//! about. For example, if `/dev/sda` and `/dev/sdb` are two paths to the
//! same physical drive, there is only one Drive object but two Block
//! objects.

use std::sync::Arc;

use tokio::sync::Mutex;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use crate::device::Snapshot;
use crate::error::{Error, Result};
use crate::interface::update_interface;

/// D-Bus interface skeleton for `org.freedesktop.UDisks2.Drive`.
///
/// The property surface here is intentionally small: the concrete
/// semantics of every property a real drive object exposes are an
/// external, out-of-scope concern. This struct carries just enough state
/// to prove the add/update/remove protocol and the drive/block
/// correlation logic are correct.
#[derive(Debug, Default, Clone)]
pub struct DriveIface {
    pub vendor: String,
    pub model: String,
    pub serial: String,
    pub wwn: String,
    pub size: u64,
}

#[zbus::interface(name = "org.freedesktop.UDisks2.Drive")]
impl DriveIface {
    #[zbus(property)]
    async fn vendor(&self) -> String {
        self.vendor.clone()
    }

    #[zbus(property)]
    async fn model(&self) -> String {
        self.model.clone()
    }

    #[zbus(property, name = "Serial")]
    async fn serial(&self) -> String {
        self.serial.clone()
    }

    #[zbus(property, name = "WWN")]
    async fn wwn(&self) -> String {
        self.wwn.clone()
    }

    #[zbus(property)]
    async fn size(&self) -> u64 {
        self.size
    }
}

struct State {
    connection: Connection,
    path: OwnedObjectPath,
    members: Vec<Snapshot>,
    iface_published: bool,
}

/// A physical drive, correlated by vpd across one or more member block
/// devices.
///
/// Cheaply `Clone`-able: cloning shares the same underlying state, which is
/// how the registry hands a drive off to a background housekeeping task
/// while keeping its own reference in the index.
#[derive(Clone)]
pub struct DriveObject {
    vpd: Arc<str>,
    state: Arc<Mutex<State>>,
}

impl DriveObject {
    /// Constructs a drive at `path` for the given `vpd`, and immediately
    /// runs an `add` uevent for `device` so the interface is never attached
    /// to the bus with default-valued properties.
    pub async fn new(
        connection: Connection,
        path: OwnedObjectPath,
        vpd: String,
        device: Snapshot,
    ) -> Result<Self> {
        let object = Self {
            vpd: Arc::from(vpd.as_str()),
            state: Arc::new(Mutex::new(State {
                connection,
                path,
                members: Vec::new(),
                iface_published: false,
            })),
        };
        object.uevent("add", Some(&device)).await?;
        Ok(object)
    }

    /// The vpd tag this drive was constructed with. Immutable for the
    /// drive's lifetime.
    pub fn vpd(&self) -> &str {
        &self.vpd
    }

    pub async fn object_path(&self) -> OwnedObjectPath {
        self.state.lock().await.path.clone()
    }

    pub async fn get_devices(&self) -> Vec<Snapshot> {
        self.state.lock().await.members.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.members.is_empty()
    }

    /// Applies one uevent for a member device: on `remove`, drops the
    /// member matching `device`'s sysfs path; otherwise inserts or replaces
    /// it. Then runs the interface updater so the Drive interface reflects
    /// the current member set.
    pub async fn uevent(&self, action: &str, device: Option<&Snapshot>) -> Result<bool> {
        let mut state = self.state.lock().await;

        if action == "remove" {
            if let Some(device) = device {
                state.members.retain(|m| m.sysfs_path != device.sysfs_path);
            }
        } else if let Some(device) = device {
            match state
                .members
                .iter_mut()
                .find(|m| m.sysfs_path == device.sysfs_path)
            {
                Some(existing) => *existing = device.clone(),
                None => state.members.push(device.clone()),
            }
        }

        let has = !state.members.is_empty();
        let primary = state.members.first().cloned();
        let path = state.path.clone();
        let connection = state.connection.clone();

        update_interface(
            connection.object_server(),
            &path,
            &mut state.iface_published,
            action,
            has,
            DriveIface::default,
            move |iface, _action| {
                let Some(primary) = &primary else {
                    return false;
                };
                iface.vendor = primary.property("ID_VENDOR").unwrap_or_default().to_owned();
                iface.model = primary.property("ID_MODEL").unwrap_or_default().to_owned();
                iface.serial = primary
                    .property("ID_SERIAL")
                    .or_else(|| primary.property("ID_SERIAL_SHORT"))
                    .unwrap_or_default()
                    .to_owned();
                iface.wwn = primary
                    .property("ID_WWN")
                    .or_else(|| primary.property("ID_WWN_WITH_EXTENSION"))
                    .unwrap_or_default()
                    .to_owned();
                iface.size = primary
                    .property("ID_PART_TABLE_SIZE")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default();
                true
            },
        )
        .await
        .map_err(Error::from)
    }

    /// Detaches the Drive interface from the bus, if attached. Called once
    /// the member set has become empty.
    pub async fn unpublish(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.iface_published {
            state
                .connection
                .object_server()
                .remove::<DriveIface, _>(&state.path)
                .await?;
            state.iface_published = false;
        }
        Ok(())
    }

    /// Runs a housekeeping pass for this drive (e.g. SMART polling). The
    /// concrete work is an external, out-of-scope concern; this stub logs
    /// and tolerates a missing cancellation handle.
    pub async fn housekeeping(
        &self,
        secs_since_last: u64,
        cancel: Option<&crate::housekeeping::CancellationHandle>,
    ) -> Result<()> {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Ok(());
        }
        let path = self.state.lock().await.path.clone();
        tracing::debug!(object_path = %path, secs_since_last, "drive housekeeping");
        Ok(())
    }

    /// Classifies whether a device should ever become (or remain) a member
    /// of a drive object.
    ///
    /// Returns `(false, _)` if the device can never be a drive member (it
    /// is a partition). Returns `(true, None)` if the device qualifies
    /// structurally but carries no usable identity (no serial or WWN).
    /// Returns `(true, Some(vpd))` otherwise.
    pub fn should_include_device(device: &Snapshot) -> (bool, Option<String>) {
        if device.property("DEVTYPE") == Some("partition") {
            return (false, None);
        }
        let vpd = device.identity().map(|identity| identity.vpd());
        (true, vpd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_are_never_drive_members() {
        let device = Snapshot::new("block", "/sys/block/sda/sda1")
            .with_property("DEVTYPE", "partition")
            .with_property("ID_SERIAL", "S1");
        assert_eq!(DriveObject::should_include_device(&device), (false, None));
    }

    #[test]
    fn whole_disks_without_identity_are_included_with_no_vpd() {
        let device = Snapshot::new("block", "/sys/block/sda").with_property("DEVTYPE", "disk");
        assert_eq!(DriveObject::should_include_device(&device), (true, None));
    }

    #[test]
    fn whole_disks_with_identity_are_included_with_a_vpd() {
        let device = Snapshot::new("block", "/sys/block/sda")
            .with_property("DEVTYPE", "disk")
            .with_property("ID_SERIAL", "S1")
            .with_property("ID_WWN", "W1");
        let (include, vpd) = DriveObject::should_include_device(&device);
        assert!(include);
        assert_eq!(vpd.as_deref(), Some("S1_W1"));
    }
}
