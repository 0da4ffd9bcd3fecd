use super::{Ack, ChangeSet, RemoteGateway, RemoteTable, Revision, Session, TaskStream};
use crate::error::AppError;
use crate::model::MutationRecord;
use crate::storage::json_store;
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Authoritative store kept in a shared JSON file, so that two local data directories can
/// play two devices of the same user. Has no live feed; changes arrive through `fetch_all`.
pub struct FileRemote {
    path: PathBuf,
    io_lock: Mutex<()>,
}

impl FileRemote {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            io_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<RemoteTable, AppError> {
        json_store::load::<RemoteTable>(&self.path)
            .map(Option::unwrap_or_default)
            .map_err(unreachable_remote)
    }
}

fn unreachable_remote(err: AppError) -> AppError {
    match err {
        AppError::InvalidData(message) => AppError::rejected(message),
        other => AppError::transient(other.message().to_string()),
    }
}

#[async_trait]
impl RemoteGateway for FileRemote {
    async fn send(&self, session: &Session, mutation: &MutationRecord) -> Result<Ack, AppError> {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = self.load()?;
        let ack = table.apply(session, mutation)?;
        if !ack.conflict {
            json_store::save(&self.path, &table).map_err(unreachable_remote)?;
        }
        Ok(ack)
    }

    async fn fetch_all(
        &self,
        _session: &Session,
        owner_id: &str,
        since: Option<Revision>,
    ) -> Result<ChangeSet, AppError> {
        let _guard = self.io_lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.changed_since(owner_id, since))
    }

    async fn subscribe(&self, _session: &Session, _owner_id: &str) -> Result<TaskStream, AppError> {
        Ok(futures::stream::pending().boxed())
    }
}
