pub mod backoff;
pub mod connectivity;
pub mod coordinator;
pub mod resolver;

pub use backoff::Backoff;
pub use connectivity::{ConnectivityMonitor, debounce};
pub use coordinator::{
    DrainReport, RemoteOutcome, SyncCoordinator, SyncEvent, SyncState, SyncSummary,
};
pub use resolver::{Winner, merge, resolve, resolve_reorder};
