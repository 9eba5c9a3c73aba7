//! Todo entity and its write payloads

use crate::identity::{OwnerId, Timestamp, TodoId};
use serde::{Deserialize, Serialize};

/// A single todo as persisted by the store.
///
/// Soft-deleted todos keep their row with `deleted_at` set; stores never
/// return them from reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: TodoId,
    pub owner_id: OwnerId,
    pub title: String,
    pub description: String,
    pub is_done: bool,
    pub due_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
}

impl Todo {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Open, not deleted, and due strictly before `now`.
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        !self.is_done && !self.is_deleted() && self.due_at.is_some_and(|due| due < now)
    }

    /// Case-insensitive substring match on title or description.
    ///
    /// `needle` must already be lowercased. An empty needle matches every
    /// todo, mirroring `ILIKE '%%'`.
    pub fn matches_query(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
    }
}

/// Fields supplied when creating a todo.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewTodo {
    pub title: String,
    pub description: String,
    pub due_at: Option<Timestamp>,
}

impl NewTodo {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_due_at(mut self, due_at: Timestamp) -> Self {
        self.due_at = Some(due_at);
        self
    }
}

/// Partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_at: Option<Timestamp>,
    pub is_done: Option<bool>,
}

impl TodoPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_at.is_none()
            && self.is_done.is_none()
    }

    /// Apply the present fields onto `todo`. Does not touch timestamps.
    pub fn apply_to(&self, todo: &mut Todo) {
        if let Some(title) = &self.title {
            todo.title = title.clone();
        }
        if let Some(description) = &self.description {
            todo.description = description.clone();
        }
        if let Some(due_at) = self.due_at {
            todo.due_at = Some(due_at);
        }
        if let Some(is_done) = self.is_done {
            todo.is_done = is_done;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn make_todo(title: &str) -> Todo {
        let now = Utc::now();
        Todo {
            id: TodoId::new(1),
            owner_id: OwnerId::new(42),
            title: title.to_string(),
            description: "Pick up from the shop".to_string(),
            is_done: false,
            due_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_is_overdue() {
        let now = Utc::now();
        let mut todo = make_todo("Milk");
        assert!(!todo.is_overdue(now), "no due date is never overdue");

        todo.due_at = Some(now - Duration::hours(1));
        assert!(todo.is_overdue(now));

        todo.is_done = true;
        assert!(!todo.is_overdue(now), "done todos are not overdue");

        todo.is_done = false;
        todo.deleted_at = Some(now);
        assert!(!todo.is_overdue(now), "deleted todos are not overdue");

        todo.deleted_at = None;
        todo.due_at = Some(now + Duration::hours(1));
        assert!(!todo.is_overdue(now));
    }

    #[test]
    fn test_matches_query_is_case_insensitive() {
        let todo = make_todo("Buy MILK");
        assert!(todo.matches_query("milk"));
        assert!(todo.matches_query("shop"));
        assert!(todo.matches_query(""));
        assert!(!todo.matches_query("bread"));
    }

    #[test]
    fn test_patch_apply_only_present_fields() {
        let mut todo = make_todo("Milk");
        let patch = TodoPatch {
            is_done: Some(true),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        patch.apply_to(&mut todo);
        assert!(todo.is_done);
        assert_eq!(todo.title, "Milk");
        assert!(TodoPatch::default().is_empty());
    }
}
