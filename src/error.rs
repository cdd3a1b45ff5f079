//! Error types for the registry and lifecycle engine.

/// Alias for a `Result` with the error type [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while maintaining the block/drive/mdraid catalog.
///
/// Most variants are recoverable: the registry logs them and continues
/// processing other devices. Only [`Error::Zbus`] and [`Error::Zvariant`]
/// indicate the underlying bus connection itself is in trouble.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Housekeeping failed for a single drive. Logged and skipped; never
    /// aborts a housekeeping pass over the other drives.
    #[error("housekeeping failed for drive {object_path}: {reason}")]
    Transient { object_path: String, reason: String },

    /// A `remove` uevent referenced a sysfs path this registry never saw
    /// an `add` for.
    #[error("unexpected remove for unknown sysfs path {sysfs_path}")]
    Protocol { sysfs_path: String },

    /// A device has neither a serial number nor a WWN, so no drive identity
    /// can be derived for it.
    #[error("device at {sysfs_path} has neither a serial number nor a WWN")]
    Identity { sysfs_path: String },

    /// An index was found in a state its own invariants forbid, e.g. a
    /// back-reference pointing at a drive that is no longer registered.
    #[error("registry invariant violated: {detail}")]
    Internal { detail: String },

    #[error(transparent)]
    Zbus(#[from] zbus::Error),

    #[error(transparent)]
    Zvariant(#[from] zbus::zvariant::Error),

    /// A kernel device enumeration call (coldplug, or the live uevent
    /// monitor socket) failed at the `udev`/`io` layer.
    #[error(transparent)]
    Udev(#[from] std::io::Error),
}
