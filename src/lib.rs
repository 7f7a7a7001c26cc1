//! Offline resilience for point-of-sale clients.
//!
//! Reads are cached with a read-time freshness window, writes that cannot
//! reach the server are queued durably, and the queue is replayed in order
//! when connectivity returns.

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod logging;
pub mod queue;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

pub use cache::{CacheSource, Cached, ResponseCache};
pub use client::{OfflineClient, SendOutcome};
pub use queue::{PendingWriteQueue, QueueEvent};
pub use store::{NoopStore, SqliteStore, Storage, StoreFault, StoreResult};
pub use sync::{drain, ConnectivityMonitor, MonitorHandle, Reachability, ReachabilityProbe, SyncEvent};
pub use transport::{HttpTransport, Transport};
pub use types::{CacheEntry, ConnectivityState, DrainSummary, PendingWrite, WriteRequest};
