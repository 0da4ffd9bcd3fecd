pub mod json_store;
pub mod local_store;
pub mod mutation_log;

pub use local_store::{LocalStore, StoredTask, TaskFilter};
pub use mutation_log::MutationLog;
