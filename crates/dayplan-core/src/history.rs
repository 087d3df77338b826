use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::TaskStore;
use crate::task::Task;

pub const DEFAULT_HISTORY_LIMIT: usize = 500;

/// One reversible mutation. Every variant carries full task snapshots, so
/// undoing it never depends on later entries touching the same task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    Add {
        task: Task,
    },
    Delete {
        task: Task,
    },
    /// Only the completion flag flips; the task is looked up again on apply.
    Toggle {
        task_id: String,
        previous: bool,
    },
    Edit {
        before: Task,
        after: Task,
    },
    Drag {
        previous: Task,
        new: Task,
    },
    Resize {
        previous: Task,
        new: Task,
    },
    ClearCompleted {
        removed: Vec<Task>,
    },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
            Self::Toggle { .. } => "toggle",
            Self::Edit { .. } => "edit",
            Self::Drag { .. } => "drag",
            Self::Resize { .. } => "resize",
            Self::ClearCompleted { .. } => "clearCompleted",
        }
    }
}

/// An action plus the date partition it was recorded against. `None` means
/// "whatever store the caller applies it to".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<NaiveDate>,
    pub action: Action,
}

/// Linear undo/redo history. Recording a new action discards the redo chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    undo_stack: Vec<Entry>,
    redo_stack: Vec<Entry>,
    #[serde(skip, default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

impl History {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// A limit of 0 keeps every entry.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            limit,
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
        self.enforce_limit();
    }

    pub fn push(&mut self, action: Action) {
        self.push_entry(Entry {
            partition: None,
            action,
        });
    }

    /// Records an action taken on `date`'s partition.
    pub fn push_in(&mut self, date: NaiveDate, action: Action) {
        self.push_entry(Entry {
            partition: Some(date),
            action,
        });
    }

    #[tracing::instrument(skip(self, entry), fields(kind = entry.action.kind()))]
    fn push_entry(&mut self, entry: Entry) {
        self.undo_stack.push(entry);
        self.enforce_limit();
        self.redo_stack.clear();
    }

    /// Pops the newest action, applies its inverse to `store` and moves it to
    /// the redo stack. Returns false when there is nothing to undo.
    #[tracing::instrument(skip(self, store), fields(key = store.key()))]
    pub fn undo(&mut self, store: &mut TaskStore) -> bool {
        let Some(entry) = self.undo_stack.pop() else {
            return false;
        };
        debug!(kind = entry.action.kind(), "undo");
        apply_inverse(&entry.action, store);
        self.redo_stack.push(entry);
        true
    }

    #[tracing::instrument(skip(self, store), fields(key = store.key()))]
    pub fn redo(&mut self, store: &mut TaskStore) -> bool {
        let Some(entry) = self.redo_stack.pop() else {
            return false;
        };
        debug!(kind = entry.action.kind(), "redo");
        apply_forward(&entry.action, store);
        self.undo_stack.push(entry);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn peek_undo(&self) -> Option<&Entry> {
        self.undo_stack.last()
    }

    pub fn peek_redo(&self) -> Option<&Entry> {
        self.redo_stack.last()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn enforce_limit(&mut self) {
        if self.limit > 0 && self.undo_stack.len() > self.limit {
            let excess = self.undo_stack.len() - self.limit;
            self.undo_stack.drain(..excess);
        }
    }
}

fn apply_inverse(action: &Action, store: &mut TaskStore) {
    match action {
        Action::Add { task } => {
            store.delete(&task.id);
        }
        Action::Delete { task } => {
            store.save(task.clone());
        }
        Action::Toggle { task_id, previous } => set_completed(store, task_id, *previous),
        Action::Edit { before, .. } => {
            store.save(before.clone());
        }
        Action::Drag { previous, .. } | Action::Resize { previous, .. } => {
            store.save(previous.clone());
        }
        Action::ClearCompleted { removed } => {
            for task in removed {
                store.save(task.clone());
            }
        }
    }
}

fn apply_forward(action: &Action, store: &mut TaskStore) {
    match action {
        Action::Add { task } => {
            store.save(task.clone());
        }
        Action::Delete { task } => {
            store.delete(&task.id);
        }
        Action::Toggle { task_id, previous } => set_completed(store, task_id, !*previous),
        Action::Edit { after, .. } => {
            store.save(after.clone());
        }
        Action::Drag { new, .. } | Action::Resize { new, .. } => {
            store.save(new.clone());
        }
        Action::ClearCompleted { .. } => {
            store.clear_completed();
        }
    }
}

fn set_completed(store: &mut TaskStore, task_id: &str, completed: bool) {
    let Some(task) = store.find_by_id(task_id) else {
        warn!(task_id, "toggle target no longer exists; skipping");
        return;
    };
    let mut task = task.clone();
    task.completed = completed;
    store.save(task);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DEFAULT_PREFIX, MemoryBackend};

    fn store() -> TaskStore {
        TaskStore::current(MemoryBackend::shared(), DEFAULT_PREFIX)
    }

    fn task(id: &str, start: &str, end: &str) -> Task {
        Task::with_id(id, format!("Task {id}"), start, end, None)
    }

    #[test]
    fn new_history_is_empty() {
        let mut history = History::new();
        let mut store = store();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert!(!history.undo(&mut store));
        assert!(!history.redo(&mut store));
    }

    #[test]
    fn push_clears_redo() {
        let mut history = History::new();
        let mut store = store();
        let a = task("a", "09:00", "10:00");
        store.save(a.clone());
        history.push(Action::Add { task: a });
        assert!(history.undo(&mut store));
        assert!(history.can_redo());

        history.push(Action::Add {
            task: task("b", "11:00", "12:00"),
        });
        assert!(!history.can_redo());
        assert!(history.peek_redo().is_none());
    }

    #[test]
    fn limit_drops_oldest_entries() {
        let mut history = History::with_limit(3);
        for i in 0..5 {
            history.push(Action::Add {
                task: task(&format!("t{i}"), "09:00", "10:00"),
            });
        }
        assert_eq!(history.undo_len(), 3);
        let Some(Entry {
            action: Action::Add { task },
            ..
        }) = history.peek_undo()
        else {
            panic!("expected add on top");
        };
        assert_eq!(task.id, "t4");
    }

    #[test]
    fn add_undo_deletes_and_redo_saves() {
        let mut history = History::new();
        let mut store = store();
        let a = task("a", "09:00", "10:00");
        store.save(a.clone());
        history.push(Action::Add { task: a.clone() });

        history.undo(&mut store);
        assert!(store.find_all().is_empty());
        history.redo(&mut store);
        assert_eq!(store.find_all(), vec![a]);
    }

    #[test]
    fn delete_undo_restores_identical_snapshot() {
        let mut history = History::new();
        let mut store = store();
        let mut a = task("a", "22:00", "06:00");
        a.completed = true;
        store.save(a.clone());

        history.push(Action::Delete { task: a.clone() });
        store.delete("a");

        assert!(history.undo(&mut store));
        assert_eq!(store.find_by_id("a"), Some(&a));
        assert!(history.redo(&mut store));
        assert!(store.find_by_id("a").is_none());
    }

    #[test]
    fn toggle_restores_previous_flag() {
        let mut history = History::new();
        let mut store = store();
        let mut a = task("a", "09:00", "10:00");
        store.save(a.clone());

        history.push(Action::Toggle {
            task_id: "a".to_string(),
            previous: false,
        });
        a.completed = true;
        store.save(a);

        history.undo(&mut store);
        assert_eq!(store.find_by_id("a").map(|t| t.completed), Some(false));
        history.redo(&mut store);
        assert_eq!(store.find_by_id("a").map(|t| t.completed), Some(true));
    }

    #[test]
    fn toggle_on_missing_task_is_skipped() {
        let mut history = History::new();
        let mut store = store();
        history.push(Action::Toggle {
            task_id: "gone".to_string(),
            previous: true,
        });
        assert!(history.undo(&mut store));
        assert!(store.find_all().is_empty());
        assert!(history.can_redo());
    }

    #[test]
    fn snapshot_kinds_swap_between_states() {
        let before = task("a", "09:00", "10:00");
        let after = task("a", "10:00", "11:00");
        let actions = vec![
            Action::Edit {
                before: before.clone(),
                after: after.clone(),
            },
            Action::Drag {
                previous: before.clone(),
                new: after.clone(),
            },
            Action::Resize {
                previous: before.clone(),
                new: after.clone(),
            },
        ];

        for action in actions {
            let mut history = History::new();
            let mut store = store();
            store.save(after.clone());
            history.push(action.clone());

            history.undo(&mut store);
            assert_eq!(store.find_all(), vec![before.clone()], "undo {}", action.kind());
            history.redo(&mut store);
            assert_eq!(store.find_all(), vec![after.clone()], "redo {}", action.kind());
        }
    }

    #[test]
    fn clear_completed_round_trip() {
        let mut history = History::new();
        let mut store = store();
        let mut done = task("a", "09:00", "10:00");
        done.completed = true;
        let open = task("b", "10:00", "11:00");
        store.save(done.clone());
        store.save(open.clone());

        let removed = store.clear_completed();
        history.push(Action::ClearCompleted { removed });

        history.undo(&mut store);
        assert_eq!(store.find_all(), vec![open.clone(), done]);
        history.redo(&mut store);
        assert_eq!(store.find_all(), vec![open]);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let mut history = History::new();
        let day = NaiveDate::from_ymd_opt(2025, 1, 1).expect("date");
        history.push_in(
            day,
            Action::Toggle {
                task_id: "a".to_string(),
                previous: true,
            },
        );
        let json = serde_json::to_value(&history).expect("serialize");
        assert_eq!(json["undoStack"][0]["partition"], "2025-01-01");
        assert_eq!(json["undoStack"][0]["action"]["kind"], "toggle");
        assert_eq!(json["undoStack"][0]["action"]["taskId"], "a");

        let back: History = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back.undo_len(), 1);
        assert_eq!(back.peek_undo().and_then(|e| e.partition), Some(day));
        assert_eq!(back.limit, DEFAULT_HISTORY_LIMIT);
    }
}
