use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::history::{Action, DEFAULT_HISTORY_LIMIT, History};
use crate::lanes::{PlacedTask, calculate_lanes};
use crate::quick_add::parse_quick_add;
use crate::store::{DEFAULT_PREFIX, SharedBackend, TaskStore, clear_all_partitions};
use crate::task::{EditData, Priority, Task, TaskStats, new_task_id};
use crate::templates::Template;
use crate::time::{
    LAST_MINUTE, ScaleMode, clamp_minutes, crosses_midnight, duration_minutes, format_date,
    is_valid_time_format, minutes_to_time, pixel_delta_to_minutes, shift_date, time_to_minutes,
    wrap_minutes,
};
use crate::window::{BoundaryDirection, DateWindow, MaterializedDate};

/// Shortest task a resize may leave behind, in minutes.
pub const MIN_RESIZE_MINUTES: i64 = 15;

/// Signals from the planner to whatever draws it.
pub trait RenderSink {
    /// The active store changed; redraw the day and its counters.
    fn refresh(&mut self) {}

    fn date_materialized(&mut self, _materialized: &MaterializedDate) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RenderSink for NullSink {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeEdge {
    Start,
    End,
}

impl FromStr for ResizeEdge {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" | "top" => Ok(Self::Start),
            "end" | "bottom" => Ok(Self::End),
            other => Err(anyhow!("unknown resize edge: {other} (expected start or end)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriorityFilter {
    #[default]
    All,
    Only(Priority),
}

impl PriorityFilter {
    pub fn matches(self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Only(priority) => task.priority == priority,
        }
    }
}

impl FromStr for PriorityFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        s.parse::<Priority>().map(Self::Only)
    }
}

#[derive(Debug, Clone)]
pub struct PlannerSettings {
    pub prefix: String,
    pub default_start: String,
    pub default_duration: i64,
    pub scale: ScaleMode,
    pub history_limit: usize,
    pub templates: BTreeMap<String, Template>,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            default_start: "09:00".to_string(),
            default_duration: 60,
            scale: ScaleMode::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            templates: crate::templates::builtin_templates(),
        }
    }
}

impl PlannerSettings {
    /// Typed view of `cfg`. Values that do not parse fall back to the
    /// defaults; `Config::get_parsed` has already warned about them.
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();

        let prefix = cfg
            .get("storage.prefix")
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or(defaults.prefix);

        let default_start = match cfg.get("task.default_start") {
            Some(start) if is_valid_time_format(start.trim()) => start.trim().to_string(),
            Some(start) => {
                warn!(value = %start, "invalid task.default_start; using default");
                defaults.default_start
            }
            None => defaults.default_start,
        };

        let default_duration = cfg
            .get_parsed::<i64>("task.default_duration")
            .filter(|d| *d > 0)
            .unwrap_or(defaults.default_duration);

        Self {
            prefix,
            default_start,
            default_duration,
            scale: cfg.get_parsed("timeline.scale").unwrap_or(defaults.scale),
            history_limit: cfg
                .get_parsed("history.limit")
                .unwrap_or(defaults.history_limit),
            templates: cfg.templates(),
        }
    }
}

/// The operations a day-planner UI drives. Owns the active partition, the
/// history and the date window; every successful mutation is recorded for
/// undo and followed by a `refresh` on the sink.
pub struct Planner<S: RenderSink = NullSink> {
    backend: SharedBackend,
    settings: PlannerSettings,
    store: TaskStore,
    history: History,
    window: DateWindow,
    scale: ScaleMode,
    sink: S,
}

impl<S: RenderSink> std::fmt::Debug for Planner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("store", &self.store)
            .field("window", &self.window)
            .field("scale", &self.scale)
            .finish_non_exhaustive()
    }
}

impl Planner<NullSink> {
    pub fn new(backend: SharedBackend, settings: PlannerSettings, date: NaiveDate) -> Self {
        Self::with_sink(backend, settings, date, NullSink)
    }
}

impl<S: RenderSink> Planner<S> {
    /// Opens `date` as the active partition, carrying daily tasks over from
    /// the day before.
    pub fn with_sink(
        backend: SharedBackend,
        settings: PlannerSettings,
        date: NaiveDate,
        sink: S,
    ) -> Self {
        let mut window = DateWindow::new(backend.clone(), settings.prefix.clone(), date);
        let store = window.set_date(date);
        Self {
            backend,
            history: History::with_limit(settings.history_limit),
            scale: settings.scale,
            settings,
            store,
            window,
            sink,
        }
    }

    /// Replaces the empty history with one restored by the caller.
    pub fn with_history(mut self, mut history: History) -> Self {
        history.set_limit(self.settings.history_limit);
        self.history = history;
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn into_history(self) -> History {
        self.history
    }

    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    pub fn window(&self) -> &DateWindow {
        &self.window
    }

    pub fn store_mut(&mut self) -> &mut TaskStore {
        &mut self.store
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn current_date(&self) -> NaiveDate {
        self.window.current_date()
    }

    pub fn scale(&self) -> ScaleMode {
        self.scale
    }

    pub fn set_scale(&mut self, scale: ScaleMode) {
        debug!(scale = scale.as_str(), "scale changed");
        self.scale = scale;
        self.sink.refresh();
    }

    pub fn find_task(&self, id: &str) -> Option<&Task> {
        self.store.find_by_id(id)
    }

    fn record(&mut self, action: Action) {
        let date = self.current_date();
        self.history.push_in(date, action);
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    pub fn add_task(&mut self, task: Task) -> bool {
        if task.id.is_empty() || !task.has_valid_times() {
            warn!(start = %task.start_time, end = %task.end_time, "rejecting task");
            return false;
        }
        if !self.store.save(task.clone()) {
            return false;
        }
        self.record(Action::Add { task });
        self.sink.refresh();
        true
    }

    /// Parses one line of quick-add text into a task on the current date.
    #[tracing::instrument(skip(self))]
    pub fn quick_add(&mut self, text: &str) -> Option<Task> {
        let parsed = parse_quick_add(text, self.settings.default_duration);
        if parsed.title.is_empty() {
            warn!("quick-add text has no title");
            return None;
        }

        let start = parsed
            .start_time
            .unwrap_or_else(|| self.settings.default_start.clone());
        let end = parsed.end_time.unwrap_or_else(|| {
            minutes_to_time(wrap_minutes(
                time_to_minutes(&start) + self.settings.default_duration,
            ))
        });

        let mut task = Task::new(parsed.title, start, end, Some(self.current_date()));
        task.priority = parsed.priority;
        self.add_task(task.clone()).then_some(task)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_task(&mut self, id: &str) -> bool {
        let Some(task) = self.store.find_by_id(id).cloned() else {
            warn!("no such task");
            return false;
        };
        self.store.delete(id);
        self.record(Action::Delete { task });
        self.sink.refresh();
        true
    }

    #[tracing::instrument(skip(self))]
    pub fn toggle_completion(&mut self, id: &str) -> bool {
        let Some(mut task) = self.store.find_by_id(id).cloned() else {
            warn!("no such task");
            return false;
        };
        let previous = task.completed;
        task.completed = !previous;
        self.store.save(task);
        self.record(Action::Toggle {
            task_id: id.to_string(),
            previous,
        });
        self.sink.refresh();
        true
    }

    #[tracing::instrument(skip(self, edit))]
    pub fn edit_task(&mut self, id: &str, edit: &EditData) -> bool {
        let Some(before) = self.store.find_by_id(id).cloned() else {
            warn!("no such task");
            return false;
        };
        if let Err(err) = edit.validate() {
            warn!(error = %err, "edit rejected");
            return false;
        }

        let after = edit.apply_to(&before);
        self.store.save(after.clone());
        self.record(Action::Edit { before, after });
        self.sink.refresh();
        true
    }

    /// Moves a task by a pointer offset measured at the current scale.
    #[tracing::instrument(skip(self))]
    pub fn apply_drag(&mut self, id: &str, delta_px: f64) -> bool {
        let Some(previous) = self.store.find_by_id(id).cloned() else {
            warn!("no such task");
            return false;
        };
        let delta = pixel_delta_to_minutes(delta_px, self.scale.pixels_per_minute());
        let (start, end) = dragged_times(previous.start_minutes(), previous.end_minutes(), delta);
        let new = Task {
            start_time: minutes_to_time(start),
            end_time: minutes_to_time(end),
            ..previous.clone()
        };
        debug!(delta, start = %new.start_time, end = %new.end_time, "drag applied");

        self.store.save(new.clone());
        self.record(Action::Drag { previous, new });
        self.sink.refresh();
        true
    }

    #[tracing::instrument(skip(self))]
    pub fn apply_resize(&mut self, id: &str, delta_px: f64, edge: ResizeEdge) -> bool {
        let Some(previous) = self.store.find_by_id(id).cloned() else {
            warn!("no such task");
            return false;
        };
        let delta = pixel_delta_to_minutes(delta_px, self.scale.pixels_per_minute());
        let (start, end) =
            resized_times(previous.start_minutes(), previous.end_minutes(), delta, edge);
        let new = Task {
            start_time: minutes_to_time(start),
            end_time: minutes_to_time(end),
            ..previous.clone()
        };
        debug!(delta, start = %new.start_time, end = %new.end_time, "resize applied");

        self.store.save(new.clone());
        self.record(Action::Resize { previous, new });
        self.sink.refresh();
        true
    }

    /// Returns how many tasks were removed. Nothing is recorded when none
    /// were completed.
    #[tracing::instrument(skip(self))]
    pub fn clear_completed(&mut self) -> usize {
        let removed = self.store.clear_completed();
        if removed.is_empty() {
            return 0;
        }
        let count = removed.len();
        self.record(Action::ClearCompleted { removed });
        self.sink.refresh();
        count
    }

    #[tracing::instrument(skip(self))]
    pub fn undo(&mut self) -> bool {
        let elsewhere = self
            .history
            .peek_undo()
            .and_then(|entry| entry.partition)
            .filter(|date| *date != self.current_date());

        let applied = match elsewhere {
            Some(date) => {
                debug!(date = %format_date(date), "undoing in another partition");
                let mut store = self.window.open_store(date);
                self.history.undo(&mut store)
            }
            None => self.history.undo(&mut self.store),
        };
        if applied {
            self.sink.refresh();
        }
        applied
    }

    #[tracing::instrument(skip(self))]
    pub fn redo(&mut self) -> bool {
        let elsewhere = self
            .history
            .peek_redo()
            .and_then(|entry| entry.partition)
            .filter(|date| *date != self.current_date());

        let applied = match elsewhere {
            Some(date) => {
                debug!(date = %format_date(date), "redoing in another partition");
                let mut store = self.window.open_store(date);
                self.history.redo(&mut store)
            }
            None => self.history.redo(&mut self.store),
        };
        if applied {
            self.sink.refresh();
        }
        applied
    }

    #[tracing::instrument(skip(self))]
    pub fn set_date(&mut self, date: NaiveDate) {
        self.store = self.window.set_date(date);
        self.sink.refresh();
    }

    pub fn go_to_prev_day(&mut self) {
        self.set_date(shift_date(self.current_date(), -1));
    }

    pub fn go_to_next_day(&mut self) {
        self.set_date(shift_date(self.current_date(), 1));
    }

    /// Forwards a sentinel signal to the date window. The neighbour is always
    /// counted from the current date, so repeating a signal is a no-op. A
    /// date that loads is handed to the sink and returned.
    #[tracing::instrument(skip(self))]
    pub fn on_boundary_intersection(
        &mut self,
        direction: BoundaryDirection,
    ) -> Option<MaterializedDate> {
        let from = self.current_date();
        let materialized = self.window.on_boundary_intersection(direction, from)?;
        self.sink.date_materialized(&materialized);
        Some(materialized)
    }

    /// Instantiates template `name` on the current date. With `drop_minutes`
    /// the template's duration is kept from that minute, ending no later than
    /// 23:59. A result that crosses midnight is split across two dates.
    #[tracing::instrument(skip(self))]
    pub fn add_template_task(&mut self, name: &str, drop_minutes: Option<u32>) -> bool {
        let Some(template) = self.settings.templates.get(name).cloned() else {
            warn!("unknown template");
            return false;
        };

        let (start, end) = match drop_minutes {
            Some(drop) => {
                let tpl_start = time_to_minutes(&template.start_time);
                let tpl_end = time_to_minutes(&template.end_time);
                let duration = duration_minutes(tpl_start, tpl_end);
                let start = clamp_minutes(i64::from(drop));
                if start + duration > LAST_MINUTE {
                    (clamp_minutes(LAST_MINUTE - duration), LAST_MINUTE)
                } else {
                    (start, start + duration)
                }
            }
            None => (
                time_to_minutes(&template.start_time),
                time_to_minutes(&template.end_time),
            ),
        };

        let today = self.current_date();
        if !crosses_midnight(start, end) {
            return self.add_task(Task::with_id(
                new_task_id(&format!("task-{name}")),
                template.title,
                minutes_to_time(start),
                minutes_to_time(end),
                Some(today),
            ));
        }

        let tomorrow = shift_date(today, 1);
        let first = Task::with_id(
            new_task_id(&format!("task-{name}-a")),
            template.title.clone(),
            minutes_to_time(start),
            minutes_to_time(LAST_MINUTE),
            Some(today),
        );
        let second = Task::with_id(
            new_task_id(&format!("task-{name}-b")),
            template.title,
            "00:00",
            minutes_to_time(end),
            Some(tomorrow),
        );
        info!(
            first = %first.id,
            second = %second.id,
            next = %format_date(tomorrow),
            "template split across midnight"
        );

        self.store.save(first.clone());
        self.record(Action::Add { task: first });

        let mut next_store = self.window.open_store(tomorrow);
        next_store.save(second.clone());
        self.history.push_in(tomorrow, Action::Add { task: second });

        self.sink.refresh();
        true
    }

    /// A sleep block of `hours` starting at `start`, wrapping past midnight.
    #[tracing::instrument(skip(self))]
    pub fn add_sleep_task(&mut self, start: &str, hours: u32) -> Option<Task> {
        if hours == 0 || !is_valid_time_format(start) {
            warn!("invalid sleep block");
            return None;
        }
        let end = wrap_minutes(time_to_minutes(start) + i64::from(hours) * 60);
        let task = Task::with_id(
            new_task_id("task-sleep"),
            format!("Sleep ({hours}h)"),
            start,
            minutes_to_time(end),
            Some(self.current_date()),
        );
        self.add_task(task.clone()).then_some(task)
    }

    /// Drops every task partition and starts the current date over empty.
    #[tracing::instrument(skip(self))]
    pub fn reset_all(&mut self) -> usize {
        let removed = clear_all_partitions(self.backend.as_ref(), &self.settings.prefix);
        let date = self.current_date();
        self.window = DateWindow::new(self.backend.clone(), self.settings.prefix.clone(), date);
        self.store = self.window.open_store(date);
        self.sink.refresh();
        removed
    }

    pub fn laid_out_tasks(&mut self) -> Vec<PlacedTask> {
        calculate_lanes(&self.store.find_all())
    }

    /// Active partition sorted by start time, optionally one priority only.
    pub fn task_list(&mut self, filter: PriorityFilter) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .store
            .find_all()
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tasks.sort_by_key(Task::start_minutes);
        tasks
    }

    pub fn stats(&mut self) -> TaskStats {
        TaskStats::from_tasks(&self.store.find_all())
    }

    /// Switches to `today` if needed and returns the scroll offset that
    /// centres `now_minutes` in a viewport of `viewport_px`.
    pub fn jump_to_now(&mut self, today: NaiveDate, now_minutes: i64, viewport_px: f64) -> f64 {
        if self.current_date() != today {
            self.set_date(today);
        }
        let target = now_minutes as f64 * self.scale.pixels_per_minute();
        (target - viewport_px / 2.0).max(0.0)
    }
}

/// New `(start, end)` after moving by `delta` minutes. The duration is kept;
/// a same-day task is pinned to end at 23:59 and a task that crosses midnight
/// wraps its end onto the next day.
pub fn dragged_times(start: i64, end: i64, delta: i64) -> (i64, i64) {
    let duration = duration_minutes(start, end);
    let new_start = clamp_minutes(start.saturating_add(delta));

    if crosses_midnight(start, end) {
        return (new_start, wrap_minutes(new_start + duration));
    }

    let new_end = new_start + duration;
    if new_end > LAST_MINUTE {
        (clamp_minutes(LAST_MINUTE - duration), LAST_MINUTE)
    } else {
        (new_start, new_end)
    }
}

/// New `(start, end)` after moving one edge by `delta` minutes. A same-day
/// task never collapses below `MIN_RESIZE_MINUTES`.
pub fn resized_times(start: i64, end: i64, delta: i64, edge: ResizeEdge) -> (i64, i64) {
    let same_day = !crosses_midnight(start, end);
    match edge {
        ResizeEdge::End => {
            let new_end = clamp_minutes(end.saturating_add(delta));
            if new_end == start || (same_day && new_end < start) {
                (start, clamp_minutes(start + MIN_RESIZE_MINUTES))
            } else {
                (start, new_end)
            }
        }
        ResizeEdge::Start => {
            let new_start = clamp_minutes(start.saturating_add(delta));
            if new_start == end || (same_day && new_start > end) {
                (clamp_minutes(end - MIN_RESIZE_MINUTES), end)
            } else {
                (new_start, end)
            }
        }
    }
}
