//! The generic add/update/remove protocol shared by every published
//! interface in this crate.
//!
//! An interface is only attached to the bus after its first successful
//! update, so a client can never observe it with stale (default-valued)
//! properties. At most one instance of a given interface type is ever
//! attached to a given path at a time; `published` tracks that.

use zbus::object_server::ObjectServer;
use zbus::zvariant::ObjectPath;

/// Runs one add/update/remove cycle for interface type `T` on `path`.
///
/// - If `published` is `false` and `has` is `false`: nothing to do.
/// - If `published` is `false` and `has` is `true`: `connect` builds the
///   initial skeleton, `update` populates it, and only then is it attached
///   to `path` via `object_server`.
/// - If `published` is `true` and `has` is `false`: the interface is
///   detached and `published` is cleared.
/// - If `published` is `true` and `has` is `true`: the live instance is
///   fetched back from the object server and `update` is applied in place.
///
/// Returns whether `update` reported a change.
pub async fn update_interface<T>(
    object_server: &ObjectServer,
    path: &ObjectPath<'_>,
    published: &mut bool,
    action: &str,
    has: bool,
    connect: impl FnOnce() -> T,
    mut update: impl FnMut(&mut T, &str) -> bool,
) -> zbus::Result<bool>
where
    T: zbus::object_server::Interface,
{
    if !*published {
        if !has {
            return Ok(false);
        }
        let mut iface = connect();
        let changed = update(&mut iface, action);
        object_server.at(path, iface).await?;
        *published = true;
        return Ok(changed);
    }

    if !has {
        object_server.remove::<T, _>(path).await?;
        *published = false;
        return Ok(false);
    }

    let iface_ref = object_server.interface::<_, T>(path).await?;
    let mut iface = iface_ref.get_mut().await;
    Ok(update(&mut iface, action))
}
