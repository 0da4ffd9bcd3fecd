//! Last-write-wins reconciliation.
//!
//! The later `modified_at` wins; the remote version wins ties. Soft deletion is just another
//! field, so a later edit on one device resurrects a task deleted concurrently on another.

use crate::model::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

pub fn winner(local: &Task, remote: &Task) -> Winner {
    if local.modified_at > remote.modified_at {
        Winner::Local
    } else {
        Winner::Remote
    }
}

pub fn resolve(local: &Task, remote: &Task) -> Task {
    match winner(local, remote) {
        Winner::Local => local.clone(),
        Winner::Remote => remote.clone(),
    }
}

/// Ordering index under the same timestamp rule, independent of the other fields.
pub fn resolve_reorder(local: &Task, remote: &Task) -> i64 {
    match winner(local, remote) {
        Winner::Local => local.order_index,
        Winner::Remote => remote.order_index,
    }
}

/// Resolved task with its ordering index settled by [`resolve_reorder`].
pub fn merge(local: &Task, remote: &Task) -> Task {
    let mut merged = resolve(local, remote);
    merged.order_index = resolve_reorder(local, remote);
    merged
}

#[cfg(test)]
mod tests {
    use super::{Winner, merge, resolve, resolve_reorder, winner};
    use crate::model::{Priority, Task, Timestamp};

    fn version(title: &str, modified: i64) -> Task {
        Task {
            id: "task-1".to_string(),
            owner_id: "user-1".to_string(),
            title: title.to_string(),
            description: None,
            due_at: None,
            priority: Priority::Medium,
            completed: false,
            order_index: modified,
            created_at: Timestamp::from_unix_millis(0),
            modified_at: Timestamp::from_unix_millis(modified),
            deleted: false,
            deleted_at: None,
        }
    }

    #[test]
    fn later_timestamp_wins_either_side() {
        let local = version("A", 10);
        let remote = version("B", 20);
        assert_eq!(resolve(&local, &remote).title, "B");
        assert_eq!(resolve(&remote, &local).title, "B");
        assert_eq!(winner(&remote, &local), Winner::Local);
    }

    #[test]
    fn ties_go_to_remote() {
        let local = version("local", 7);
        let remote = version("remote", 7);
        assert_eq!(resolve(&local, &remote), remote);
        assert_eq!(resolve_reorder(&local, &remote), remote.order_index);
    }

    #[test]
    fn later_edit_resurrects_concurrent_delete() {
        let mut deleted = version("gone", 10);
        deleted.deleted = true;
        deleted.deleted_at = Some(Timestamp::from_unix_millis(10));
        let edited = version("still here", 15);

        let resolved = resolve(&edited, &deleted);
        assert!(!resolved.deleted);
        assert_eq!(resolved.title, "still here");

        let mut late_delete = deleted.clone();
        late_delete.modified_at = Timestamp::from_unix_millis(30);
        assert!(resolve(&edited, &late_delete).deleted);
    }

    #[test]
    fn reorder_follows_timestamp_rule() {
        let local = version("x", 40);
        let remote = version("x", 12);
        assert_eq!(resolve_reorder(&local, &remote), 40);
        assert_eq!(resolve_reorder(&remote, &local), 40);
    }

    #[test]
    fn merge_matches_resolve_for_whole_task() {
        let local = version("A", 3);
        let remote = version("B", 9);
        assert_eq!(merge(&local, &remote), resolve(&local, &remote));
    }

    #[test]
    fn resolve_is_deterministic() {
        let local = version("A", 3);
        let remote = version("B", 9);
        let first = resolve(&local, &remote);
        for _ in 0..10 {
            assert_eq!(resolve(&local, &remote), first);
        }
    }
}
