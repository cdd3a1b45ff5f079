//! The MD-RAID Object: a Linux Software RAID array, correlated by its
//! array UUID across however many member block devices report it.
//!
//! Both running and stopped arrays are represented. Block devices point to
//! the owning array via the (out-of-scope) `MDRaid`/`MDRaidMember`
//! properties on `org.freedesktop.UDisks2.Block`.

use std::sync::Arc;

use tokio::sync::Mutex;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

use crate::device::Snapshot;
use crate::error::Result;
use crate::interface::update_interface;

/// D-Bus interface skeleton for `org.freedesktop.UDisks2.MDRaid`. As with
/// [`crate::drive::DriveIface`], only enough surface to exercise the
/// add/update/remove protocol and the member-set bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct MDRaidIface {
    pub uuid: String,
    pub level: String,
    pub num_devices: u32,
}

#[zbus::interface(name = "org.freedesktop.UDisks2.MDRaid")]
impl MDRaidIface {
    #[zbus(property, name = "UUID")]
    async fn uuid(&self) -> String {
        self.uuid.clone()
    }

    #[zbus(property)]
    async fn level(&self) -> String {
        self.level.clone()
    }

    #[zbus(property)]
    async fn num_devices(&self) -> u32 {
        self.num_devices
    }
}

/// Trims ASCII whitespace, then maps each of `' '`, `'-'`, `':'` to `'_'`.
/// Used to turn an array UUID (which may contain any of those characters)
/// into something safe to use as an object path segment.
pub fn strip_and_replace_with_uscore(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' | ':' => '_',
            other => other,
        })
        .collect()
}

struct State {
    connection: Connection,
    path: OwnedObjectPath,
    members: Vec<Snapshot>,
    iface_published: bool,
}

/// A software RAID array, correlated by `MD_UUID` across its member block
/// devices.
#[derive(Clone)]
pub struct MDRaidObject {
    uuid: Arc<str>,
    state: Arc<Mutex<State>>,
}

impl MDRaidObject {
    /// Builds the object path an array with the given UUID is published
    /// at.
    pub fn object_path(uuid: &str) -> Result<OwnedObjectPath> {
        let sanitized = strip_and_replace_with_uscore(uuid);
        let path = format!("/org/freedesktop/UDisks2/mdraid/{sanitized}");
        Ok(OwnedObjectPath::from(ObjectPath::try_from(path)?))
    }

    /// Constructs an array object from its first known member device and
    /// immediately runs an initial coldplug `add` uevent as part of
    /// construction.
    pub async fn new(connection: Connection, device: Snapshot) -> Result<Self> {
        let uuid = device.property("MD_UUID").unwrap_or_default().to_owned();
        let path = Self::object_path(&uuid)?;
        let object = Self {
            uuid: Arc::from(uuid.as_str()),
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

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub async fn object_path_current(&self) -> OwnedObjectPath {
        self.state.lock().await.path.clone()
    }

    pub async fn get_devices(&self) -> Vec<Snapshot> {
        self.state.lock().await.members.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.members.is_empty()
    }

    pub async fn uevent(&self, action: &str, device: Option<&Snapshot>) -> Result<bool> {
        let mut state = self.state.lock().await;

        if action == "remove" {
            match device {
                Some(device) => {
                    let before = state.members.len();
                    state.members.retain(|m| m.sysfs_path != device.sysfs_path);
                    if state.members.len() == before {
                        tracing::warn!(
                            sysfs_path = %device.sysfs_path,
                            "MDRaid doesn't have device with sysfs path on remove event"
                        );
                    }
                }
                None => {
                    tracing::warn!(
                        sysfs_path = "<unknown>",
                        "MDRaid doesn't have device with sysfs path on remove event"
                    );
                }
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
        let num_devices = state.members.len() as u32;
        let level = state
            .members
            .first()
            .and_then(|m| m.property("MD_LEVEL"))
            .unwrap_or_default()
            .to_owned();
        let uuid = self.uuid.to_string();
        let path = state.path.clone();
        let connection = state.connection.clone();

        update_interface(
            connection.object_server(),
            &path,
            &mut state.iface_published,
            action,
            has,
            MDRaidIface::default,
            move |iface, _action| {
                iface.uuid = uuid.clone();
                iface.level = level.clone();
                iface.num_devices = num_devices;
                true
            },
        )
        .await
        .map_err(crate::error::Error::from)
    }

    pub async fn unpublish(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.iface_published {
            state
                .connection
                .object_server()
                .remove::<MDRaidIface, _>(&state.path)
                .await?;
            state.iface_published = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_whitespace_dashes_and_colons() {
        assert_eq!(
            strip_and_replace_with_uscore(" 12:34-ab cd "),
            "12_34_ab_cd"
        );
    }

    #[test]
    fn leaves_already_clean_uuids_untouched() {
        assert_eq!(
            strip_and_replace_with_uscore("a1b2c3d4e5f6"),
            "a1b2c3d4e5f6"
        );
    }

    #[test]
    fn object_path_is_rooted_under_the_mdraid_prefix() {
        let path = MDRaidObject::object_path("ab:cd-01 02").unwrap();
        assert_eq!(
            path.as_str(),
            "/org/freedesktop/UDisks2/mdraid/ab_cd_01_02"
        );
    }
}
