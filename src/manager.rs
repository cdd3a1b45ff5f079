//! The fixed `org.freedesktop.UDisks2.Manager` object.
//!
//! Published once, at a fixed path, for the lifetime of the daemon. The
//! full method surface (`GetBlockDevices`, `LoopSetup`, `MDRaidCreate`, ...)
//! belongs to the interface-logic layer this crate doesn't implement; only
//! the `Version` property is exposed here, enough for a client to confirm
//! the registry is alive and to discover its build.

use zbus::interface;

/// Fixed object path the manager is published at.
pub const OBJECT_PATH: &str = "/org/freedesktop/UDisks2/Manager";

pub struct Manager {
    version: String,
}

impl Manager {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

#[interface(name = "org.freedesktop.UDisks2.Manager")]
impl Manager {
    #[zbus(property)]
    async fn version(&self) -> String {
        self.version.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_path_matches_the_well_known_manager_path() {
        assert_eq!(OBJECT_PATH, "/org/freedesktop/UDisks2/Manager");
    }
}
