use std::collections::{BTreeSet, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::lanes::{PlacedTask, calculate_lanes};
use crate::store::{SharedBackend, TaskStore, load_partition, partition_exists, partition_key};
use crate::task::{Repeat, Task};
use crate::time::{format_date, shift_date};

/// Which edge of the rendered day list became visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Append,
    Prepend,
}

/// A newly loaded day, ready to be inserted at one edge of the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedDate {
    pub date: NaiveDate,
    pub tasks: Vec<PlacedTask>,
    pub placement: Placement,
}

/// Tracks which dates are on screen around `current_date`. Boundary signals
/// come straight from the caller, so any visibility mechanism (or a test) can
/// drive it.
pub struct DateWindow {
    backend: SharedBackend,
    prefix: String,
    current_date: NaiveDate,
    loaded_dates: BTreeSet<NaiveDate>,
}

impl std::fmt::Debug for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateWindow")
            .field("prefix", &self.prefix)
            .field("current_date", &self.current_date)
            .field("loaded_dates", &self.loaded_dates)
            .finish_non_exhaustive()
    }
}

impl DateWindow {
    pub fn new(backend: SharedBackend, prefix: impl Into<String>, current_date: NaiveDate) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            current_date,
            loaded_dates: BTreeSet::from([current_date]),
        }
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    pub fn loaded_dates(&self) -> &BTreeSet<NaiveDate> {
        &self.loaded_dates
    }

    pub fn is_loaded(&self, date: NaiveDate) -> bool {
        self.loaded_dates.contains(&date)
    }

    pub fn open_store(&self, date: NaiveDate) -> TaskStore {
        TaskStore::for_date(self.backend.clone(), &self.prefix, date)
    }

    /// Recentres on `date`: the window shrinks back to that single day, daily
    /// tasks from the day before are carried over, and the day's store is
    /// returned as the new active partition.
    #[tracing::instrument(skip(self))]
    pub fn set_date(&mut self, date: NaiveDate) -> TaskStore {
        self.current_date = date;
        self.loaded_dates = BTreeSet::from([date]);

        let mut store = self.open_store(date);
        let generated = generate_repeat_tasks(&self.backend, &self.prefix, date, &mut store);
        info!(generated = generated.len(), "switched date");
        store
    }

    /// Handles a sentinel becoming visible next to `from`. Loads the adjacent
    /// date unless it is already on screen; repeated signals for a loaded
    /// date return `None`.
    #[tracing::instrument(skip(self))]
    pub fn on_boundary_intersection(
        &mut self,
        direction: BoundaryDirection,
        from: NaiveDate,
    ) -> Option<MaterializedDate> {
        let (date, placement) = match direction {
            BoundaryDirection::Forward => (shift_date(from, 1), Placement::Append),
            BoundaryDirection::Backward => (shift_date(from, -1), Placement::Prepend),
        };

        if !self.loaded_dates.insert(date) {
            debug!(date = %format_date(date), "date already loaded");
            return None;
        }

        Some(self.materialize(date, placement))
    }

    fn materialize(&self, date: NaiveDate, placement: Placement) -> MaterializedDate {
        let tasks = self.open_store(date).find_all();
        let tasks = calculate_lanes(&tasks);
        debug!(date = %format_date(date), count = tasks.len(), ?placement, "materialized date");
        MaterializedDate {
            date,
            tasks,
            placement,
        }
    }
}

/// Clones every `repeat: daily` task of the previous date's partition into
/// `target_store`. Duplicates are detected by title only, so two different
/// recurring tasks that share a title suppress each other.
#[tracing::instrument(skip(backend, target_store))]
pub fn generate_repeat_tasks(
    backend: &SharedBackend,
    prefix: &str,
    target: NaiveDate,
    target_store: &mut TaskStore,
) -> Vec<Task> {
    let previous_key = partition_key(prefix, shift_date(target, -1));
    if !partition_exists(backend.as_ref(), &previous_key) {
        return vec![];
    }

    let existing_titles: HashSet<String> = target_store
        .find_all()
        .into_iter()
        .map(|t| t.title)
        .collect();

    let target_str = format_date(target);
    let mut generated = Vec::new();
    for template in load_partition(backend.as_ref(), &previous_key)
        .into_iter()
        .filter(|t| t.repeat == Repeat::Daily && !existing_titles.contains(&t.title))
    {
        let clone = Task {
            id: format!("{}-{target_str}", template.id),
            date: Some(target),
            completed: false,
            ..template
        };
        if target_store.save(clone.clone()) {
            generated.push(clone);
        }
    }

    debug!(count = generated.len(), "generated repeat tasks");
    generated
}
