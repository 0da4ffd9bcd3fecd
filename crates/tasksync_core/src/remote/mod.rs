//! Contract for the authoritative remote store.

pub mod file;
pub mod memory;

use crate::error::AppError;
use crate::model::{MutationRecord, Task};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use file::FileRemote;
pub use memory::{MemoryRemote, RemoteTable};

/// Identity and credential for the current user, supplied by the host's auth layer and passed
/// explicitly on every remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub identity: String,
    pub access_token: String,
}

impl Session {
    pub fn new(identity: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            access_token: access_token.into(),
        }
    }
}

/// Remote answer to a sent mutation. `conflict` means the server kept its own newer version,
/// returned in `server_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub server_state: Task,
    pub conflict: bool,
}

/// Server-assigned change counter. Orders writes from every device independently of their
/// clocks; pull cursors are kept in revisions, never in task timestamps.
pub type Revision = u64;

/// Result of `fetch_all`: the changed tasks, oldest revision first, and the newest revision the
/// server had when it answered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub tasks: Vec<Task>,
    pub revision: Revision,
}

/// Live change feed for one owner. Ends when the subscription drops; the caller re-subscribes.
pub type TaskStream = BoxStream<'static, Task>;

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn send(&self, session: &Session, mutation: &MutationRecord) -> Result<Ack, AppError>;

    async fn fetch_all(
        &self,
        session: &Session,
        owner_id: &str,
        since: Option<Revision>,
    ) -> Result<ChangeSet, AppError>;

    async fn subscribe(&self, session: &Session, owner_id: &str) -> Result<TaskStream, AppError>;
}
