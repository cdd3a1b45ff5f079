//! A point-in-time read of one kernel device, and the identity derived
//! from it.

use std::collections::HashMap;

/// Stable vendor/product descriptors for a device, used to correlate
/// multiple block devices (e.g. the paths making up a drive) onto a single
/// drive object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub serial: Option<String>,
    pub wwn: Option<String>,
}

impl Identity {
    /// The "vital product data" tag derived from this identity: combines
    /// serial and WWN when both are present, otherwise falls back to
    /// whichever single component is available.
    pub fn vpd(&self) -> String {
        match (&self.serial, &self.wwn) {
            (Some(serial), Some(wwn)) => format!("{serial}_{wwn}"),
            (Some(serial), None) => serial.clone(),
            (None, Some(wwn)) => wwn.clone(),
            (None, None) => String::new(),
        }
    }
}

/// An immutable-for-its-lifetime read of one kernel device: its subsystem,
/// sysfs path, and the udev properties attached to it at the moment of the
/// uevent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub subsystem: String,
    pub sysfs_path: String,
    pub properties: HashMap<String, String>,
}

impl Snapshot {
    pub fn new(subsystem: impl Into<String>, sysfs_path: impl Into<String>) -> Self {
        Self {
            subsystem: subsystem.into(),
            sysfs_path: sysfs_path.into(),
            properties: HashMap::new(),
        }
    }

    /// Builder-style helper for constructing synthetic snapshots in tests.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Stable identity derived from `ID_SERIAL`/`ID_SERIAL_SHORT` and
    /// `ID_WWN`/`ID_WWN_WITH_EXTENSION`. `None` if neither yields a usable
    /// value, meaning this device can only ever be a block-only device.
    pub fn identity(&self) -> Option<Identity> {
        let serial = self
            .property("ID_SERIAL")
            .or_else(|| self.property("ID_SERIAL_SHORT"))
            .map(str::to_owned);
        let wwn = self
            .property("ID_WWN")
            .or_else(|| self.property("ID_WWN_WITH_EXTENSION"))
            .map(str::to_owned);
        if serial.is_none() && wwn.is_none() {
            None
        } else {
            Some(Identity { serial, wwn })
        }
    }

    pub fn from_udev(device: &udev::Device) -> Self {
        let subsystem = device
            .subsystem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_owned();
        let sysfs_path = device.syspath().to_string_lossy().into_owned();
        let properties = device
            .properties()
            .filter_map(|property| {
                let key = property.name().to_str()?.to_owned();
                let value = property.value().to_str()?.to_owned();
                Some((key, value))
            })
            .collect();
        Self {
            subsystem,
            sysfs_path,
            properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_none_without_serial_or_wwn() {
        let snapshot = Snapshot::new("block", "/sys/devices/virtual/block/loop0");
        assert!(snapshot.identity().is_none());
    }

    #[test]
    fn vpd_combines_serial_and_wwn() {
        let snapshot = Snapshot::new("block", "/sys/block/sda")
            .with_property("ID_SERIAL", "S1")
            .with_property("ID_WWN", "W1");
        let vpd = snapshot.identity().unwrap().vpd();
        assert_eq!(vpd, "S1_W1");
    }

    #[test]
    fn vpd_falls_back_to_serial_short_and_wwn_with_extension() {
        let snapshot = Snapshot::new("block", "/sys/block/sdb")
            .with_property("ID_SERIAL_SHORT", "S2")
            .with_property("ID_WWN_WITH_EXTENSION", "W2x");
        let vpd = snapshot.identity().unwrap().vpd();
        assert_eq!(vpd, "S2_W2x");
    }

    #[test]
    fn vpd_falls_back_to_whichever_single_component_is_present() {
        let serial_only = Snapshot::new("block", "/sys/block/sdc")
            .with_property("ID_SERIAL", "S3")
            .identity()
            .unwrap()
            .vpd();
        assert_eq!(serial_only, "S3");

        let wwn_only = Snapshot::new("block", "/sys/block/sdd")
            .with_property("ID_WWN", "W4")
            .identity()
            .unwrap()
            .vpd();
        assert_eq!(wwn_only, "W4");
    }
}
