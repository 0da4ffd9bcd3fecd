pub mod config;
pub mod error;
pub mod model;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod task_api;

pub use error::AppError;
pub use sync::{SyncCoordinator, SyncEvent, SyncState};
