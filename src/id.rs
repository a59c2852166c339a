//! Task id allocation.
//!
//! Ids are plain integers. The next id is derived from the highest id in
//! either store every time the index loads; nothing is persisted on its own,
//! so an archived task can never have its id handed out again.

use crate::error::{Error, Result};
use crate::task::Task;

/// `max(ids in active ∪ completed, default 0) + 1`
pub fn next_id(active: &[Task], completed: &[Task]) -> Result<u64> {
    successor(highest_id(active.iter().chain(completed.iter())))
}

/// The id after `id`. Fails once the id space is used up.
pub fn successor(id: u64) -> Result<u64> {
    id.checked_add(1)
        .ok_or_else(|| Error::schema("id", format!("an id below {}", u64::MAX), id.to_string()))
}

pub fn highest_id<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> u64 {
    tasks.into_iter().map(|task| task.id).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::NewTask;
    use chrono::Utc;

    fn tasks(ids: &[u64]) -> Vec<Task> {
        ids.iter()
            .map(|id| NewTask::new(format!("task {id}")).into_task(*id, Utc::now()))
            .collect()
    }

    #[test]
    fn empty_stores_start_at_one() {
        assert_eq!(next_id(&[], &[]).unwrap(), 1);
    }

    #[test]
    fn archived_ids_count() {
        assert_eq!(next_id(&tasks(&[2, 3]), &tasks(&[7])).unwrap(), 8);
    }

    #[test]
    fn file_order_does_not_matter() {
        assert_eq!(next_id(&tasks(&[9, 1, 4]), &[]).unwrap(), 10);
    }

    #[test]
    fn exhausted_id_space_is_an_error() {
        assert_eq!(next_id(&tasks(&[u64::MAX - 1]), &[]).unwrap(), u64::MAX);
        match next_id(&tasks(&[3]), &tasks(&[u64::MAX])) {
            Err(Error::SchemaInvalid { field, found, .. }) => {
                assert_eq!(field, "id");
                assert_eq!(found, u64::MAX.to_string());
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }
}
