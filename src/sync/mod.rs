//! Reconnect-triggered replay and the connectivity state it reports into.

mod drain;
mod monitor;
mod probe;

pub use drain::drain;
pub use monitor::{ConnectivityMonitor, MonitorHandle, Reachability, SyncEvent};
pub use probe::ReachabilityProbe;
