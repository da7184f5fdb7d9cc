//! Observer traits for host and spare lifecycle events

use crate::{ids::HostId, launcher::ChildProcessTerminationInfo};

/// Receives lifecycle events of one host
///
/// Observers are notified from a snapshot taken after the host has left every
/// registry, so an observer may freely call back into the pool.
pub trait HostObserver {
    fn process_ready(&self, _host: HostId) {}

    fn process_exited(&self, _host: HostId, _info: &ChildProcessTerminationInfo) {}

    fn host_destroyed(&self, _host: HostId) {}
}

/// Receives spare pool changes
pub trait SpareObserver {
    /// A spare finished launching
    fn spare_ready(&self, _host: HostId) {}

    /// The set of pooled spares changed
    fn spares_changed(&self, _spares: &[HostId]) {}
}
