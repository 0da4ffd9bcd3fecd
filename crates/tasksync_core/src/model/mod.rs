mod sync;
mod task;
mod timestamp;

pub use sync::{MutationKind, MutationRecord, SyncMetadata, SyncStatus};
pub use task::{Priority, Task, TaskChanges};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};
