//! The Block Object: a single block device the kernel knows about.
//!
//! This should not be confused with the Drive Object: a block device
//! doesn't always correspond to a drive (e.g. loop devices), and a single
//! drive can surface as several block devices (e.g. multipath).

use std::sync::Arc;

use tokio::sync::Mutex;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

use crate::device::Snapshot;
use crate::error::{Error, Result};
use crate::interface::update_interface;

/// D-Bus interface skeleton for `org.freedesktop.UDisks2.Block`.
#[derive(Debug, Default, Clone)]
pub struct BlockIface {
    pub device: String,
    pub id_usage: String,
    pub id_type: String,
}

#[zbus::interface(name = "org.freedesktop.UDisks2.Block")]
impl BlockIface {
    #[zbus(property)]
    async fn device(&self) -> String {
        self.device.clone()
    }

    #[zbus(property, name = "IdUsage")]
    async fn id_usage(&self) -> String {
        self.id_usage.clone()
    }

    #[zbus(property, name = "IdType")]
    async fn id_type(&self) -> String {
        self.id_type.clone()
    }
}

struct State {
    connection: Connection,
    path: OwnedObjectPath,
    snapshot: Snapshot,
    iface_published: bool,
    #[cfg(test)]
    uevent_calls: u64,
}

/// A single block device, created on its first non-remove uevent and
/// destroyed (by the registry) on its `remove` uevent. Cheaply `Clone`-able
/// so the fstab/crypttab fan-out can snapshot the full block set without
/// holding the registry lock while re-running updates.
#[derive(Clone)]
pub struct BlockObject {
    state: Arc<Mutex<State>>,
}

impl BlockObject {
    pub async fn new(connection: Connection, path: OwnedObjectPath, device: Snapshot) -> Result<Self> {
        let object = Self {
            state: Arc::new(Mutex::new(State {
                connection,
                path,
                snapshot: device.clone(),
                iface_published: false,
                #[cfg(test)]
                uevent_calls: 0,
            })),
        };
        object.uevent("add", Some(&device)).await?;
        Ok(object)
    }

    pub async fn object_path(&self) -> OwnedObjectPath {
        self.state.lock().await.path.clone()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.snapshot.clone()
    }

    /// Applies one uevent. `device` is `None` for the synthetic `change`
    /// events fstab/crypttab updates fan out as: the cached snapshot is
    /// left untouched and only the interface is refreshed.
    pub async fn uevent(&self, action: &str, device: Option<&Snapshot>) -> Result<bool> {
        let mut state = self.state.lock().await;
        #[cfg(test)]
        {
            state.uevent_calls += 1;
        }
        if let Some(device) = device {
            state.snapshot = device.clone();
        }

        let snapshot = state.snapshot.clone();
        let path = state.path.clone();
        let connection = state.connection.clone();

        update_interface(
            connection.object_server(),
            &path,
            &mut state.iface_published,
            action,
            true,
            BlockIface::default,
            move |iface, _action| {
                iface.device = snapshot.sysfs_path.clone();
                iface.id_usage = snapshot.property("ID_FS_USAGE").unwrap_or_default().to_owned();
                iface.id_type = snapshot.property("ID_FS_TYPE").unwrap_or_default().to_owned();
                true
            },
        )
        .await
        .map_err(Error::from)
    }

    pub async fn unpublish(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.iface_published {
            state
                .connection
                .object_server()
                .remove::<BlockIface, _>(&state.path)
                .await?;
            state.iface_published = false;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn uevent_calls(&self) -> u64 {
        self.state.lock().await.uevent_calls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_iface_defaults_are_empty() {
        let iface = BlockIface::default();
        assert_eq!(iface.device, "");
        assert_eq!(iface.id_usage, "");
    }
}
