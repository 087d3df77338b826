use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};

use crate::cli::Command;
use crate::config::Config;
use crate::history::History;
use crate::lanes::PlacedTask;
use crate::planner::{Planner, PriorityFilter, RenderSink};
use crate::render::Renderer;
use crate::store::StorageBackend;
use crate::task::EditData;
use crate::time::{is_valid_time_format, time_to_minutes};
use crate::window::{BoundaryDirection, MaterializedDate, Placement};

/// Storage key holding the undo/redo stacks between invocations.
pub const HISTORY_KEY: &str = "history";

/// Keeps the days loaded by boundary signals until the command prints them.
#[derive(Debug, Default)]
pub struct CommandSink {
    pub materialized: Vec<MaterializedDate>,
}

impl RenderSink for CommandSink {
    fn refresh(&mut self) {
        debug!("store changed");
    }

    fn date_materialized(&mut self, materialized: &MaterializedDate) {
        self.materialized.push(materialized.clone());
    }
}

/// Restores the persisted history; anything unreadable starts a fresh one.
#[instrument(skip(backend))]
pub fn load_history(backend: &dyn StorageBackend) -> History {
    match backend.get(HISTORY_KEY) {
        Ok(Some(json)) => match serde_json::from_str(&json) {
            Ok(history) => history,
            Err(err) => {
                error!(error = %err, "stored history is corrupt; starting empty");
                History::new()
            }
        },
        Ok(None) => History::new(),
        Err(err) => {
            error!(error = %err, "failed reading history; starting empty");
            History::new()
        }
    }
}

#[instrument(skip_all)]
pub fn save_history(backend: &dyn StorageBackend, history: &History) -> anyhow::Result<()> {
    let json = serde_json::to_string(history).context("failed to serialize history")?;
    backend
        .set(HISTORY_KEY, &json)
        .context("failed to persist history")?;
    debug!(undo = history.undo_len(), redo = history.redo_len(), "history saved");
    Ok(())
}

#[instrument(skip(planner, cfg, renderer, command), fields(command = command.name()))]
pub fn dispatch(
    planner: &mut Planner<CommandSink>,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Command,
) -> anyhow::Result<()> {
    debug!(?command, date = %planner.current_date(), "dispatching command");

    match command {
        Command::Add { text } => cmd_add(planner, &text.join(" ")),
        Command::List { priority } => cmd_list(planner, renderer, priority),
        Command::Timeline { next, prev } => cmd_timeline(planner, renderer, next, prev),
        Command::Show { id } => {
            let task = planner
                .find_task(&id)
                .ok_or_else(|| anyhow!("no task with id {id}"))?
                .clone();
            renderer.print_task_info(&task)
        }
        Command::Toggle { id } => cmd_toggle(planner, &id),
        Command::Delete { id } => {
            if !planner.delete_task(&id) {
                return Err(anyhow!("no task with id {id}"));
            }
            println!("Deleted task {id}.");
            Ok(())
        }
        Command::Edit {
            id,
            title,
            start,
            end,
            priority,
            repeat,
        } => {
            let task = planner
                .find_task(&id)
                .ok_or_else(|| anyhow!("no task with id {id}"))?;
            let mut edit = EditData::from_task(task);
            if let Some(title) = title {
                edit.title = title;
            }
            if let Some(start) = start {
                edit.start_time = start;
            }
            if let Some(end) = end {
                edit.end_time = end;
            }
            if let Some(priority) = priority {
                edit.priority = priority;
            }
            if repeat.is_some() {
                edit.repeat = repeat;
            }
            edit.validate().context("invalid edit")?;

            if !planner.edit_task(&id, &edit) {
                return Err(anyhow!("edit of {id} was rejected"));
            }
            println!("Edited task {id}.");
            Ok(())
        }
        Command::Drag { id, pixels, scale } => {
            if let Some(scale) = scale {
                planner.set_scale(scale);
            }
            if !planner.apply_drag(&id, pixels) {
                return Err(anyhow!("no task with id {id}"));
            }
            print_times(planner, &id);
            Ok(())
        }
        Command::Resize {
            id,
            pixels,
            edge,
            scale,
        } => {
            if let Some(scale) = scale {
                planner.set_scale(scale);
            }
            if !planner.apply_resize(&id, pixels, edge) {
                return Err(anyhow!("no task with id {id}"));
            }
            print_times(planner, &id);
            Ok(())
        }
        Command::Template { name, at } => cmd_template(planner, &name, at.as_deref()),
        Command::Templates => renderer.print_templates(&planner.settings().templates),
        Command::Sleep { start, hours } => {
            let task = planner
                .add_sleep_task(&start, hours)
                .ok_or_else(|| anyhow!("invalid sleep block: {start} for {hours}h"))?;
            println!(
                "Added {} {}-{} ({}).",
                task.title, task.start_time, task.end_time, task.id
            );
            Ok(())
        }
        Command::ClearCompleted => {
            let removed = planner.clear_completed();
            println!("Cleared {removed} completed task(s).");
            Ok(())
        }
        Command::Undo => {
            if planner.undo() {
                println!("Undo completed.");
            } else {
                println!("Nothing to undo.");
            }
            Ok(())
        }
        Command::Redo => {
            if planner.redo() {
                println!("Redo completed.");
            } else {
                println!("Nothing to redo.");
            }
            Ok(())
        }
        Command::Stats => {
            let stats = planner.stats();
            renderer.print_stats(&stats)
        }
        Command::Export => {
            println!("{}", planner.store_mut().export_as_json());
            Ok(())
        }
        Command::Import { file } => cmd_import(planner, file.as_deref()),
        Command::Reset { yes } => {
            if !yes {
                return Err(anyhow!(
                    "reset removes every stored task; rerun with --yes to confirm"
                ));
            }
            let removed = planner.reset_all();
            println!("Removed {removed} task partition(s).");
            Ok(())
        }
        Command::Config => {
            let mut entries: Vec<_> = cfg.iter().collect();
            entries.sort();
            for (k, v) in entries {
                println!("{k}={v}");
            }
            Ok(())
        }
    }
}

#[instrument(skip(planner))]
fn cmd_add(planner: &mut Planner<CommandSink>, text: &str) -> anyhow::Result<()> {
    info!("command add");
    let task = planner
        .quick_add(text)
        .ok_or_else(|| anyhow!("could not add a task from: {text}"))?;
    println!(
        "Added task {} {}-{} {}.",
        task.id, task.start_time, task.end_time, task.title
    );
    Ok(())
}

#[instrument(skip(planner, renderer))]
fn cmd_list(
    planner: &mut Planner<CommandSink>,
    renderer: &mut Renderer,
    priority: PriorityFilter,
) -> anyhow::Result<()> {
    let tasks = planner.task_list(priority);
    renderer.print_task_table(&tasks)
}

#[instrument(skip(planner, renderer))]
fn cmd_timeline(
    planner: &mut Planner<CommandSink>,
    renderer: &mut Renderer,
    next: bool,
    prev: bool,
) -> anyhow::Result<()> {
    if prev {
        planner.on_boundary_intersection(BoundaryDirection::Backward);
    }
    if next {
        planner.on_boundary_intersection(BoundaryDirection::Forward);
    }

    let current = (planner.current_date(), planner.laid_out_tasks());
    let loaded = std::mem::take(&mut planner.sink_mut().materialized);
    for (idx, (date, tasks)) in arrange_days(current, loaded).iter().enumerate() {
        if idx > 0 {
            println!();
        }
        renderer.print_day(*date, tasks)?;
    }
    Ok(())
}

/// Orders the current day and the days loaded around it the way they were
/// inserted: prepends go before everything shown so far, appends after.
fn arrange_days(
    current: (NaiveDate, Vec<PlacedTask>),
    loaded: Vec<MaterializedDate>,
) -> Vec<(NaiveDate, Vec<PlacedTask>)> {
    let mut days = vec![current];
    for day in loaded {
        match day.placement {
            Placement::Prepend => days.insert(0, (day.date, day.tasks)),
            Placement::Append => days.push((day.date, day.tasks)),
        }
    }
    days
}

#[instrument(skip(planner))]
fn cmd_toggle(planner: &mut Planner<CommandSink>, id: &str) -> anyhow::Result<()> {
    if !planner.toggle_completion(id) {
        return Err(anyhow!("no task with id {id}"));
    }
    let done = planner.find_task(id).is_some_and(|t| t.completed);
    println!(
        "Task {id} marked {}.",
        if done { "completed" } else { "not completed" }
    );
    Ok(())
}

#[instrument(skip(planner))]
fn cmd_template(
    planner: &mut Planner<CommandSink>,
    name: &str,
    at: Option<&str>,
) -> anyhow::Result<()> {
    let drop = match at {
        Some(at) if is_valid_time_format(at) => u32::try_from(time_to_minutes(at)).ok(),
        Some(at) => return Err(anyhow!("invalid --at time: {at} (expected HH:MM)")),
        None => None,
    };

    if !planner.add_template_task(name, drop) {
        return Err(anyhow!(
            "unknown template: {name} (see `dayplan templates`)"
        ));
    }
    println!("Added template {name}.");
    Ok(())
}

#[instrument(skip(planner))]
fn cmd_import(planner: &mut Planner<CommandSink>, file: Option<&Path>) -> anyhow::Result<()> {
    info!("command import");

    let text = match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        None => {
            let mut stdin = String::new();
            io::stdin()
                .read_to_string(&mut stdin)
                .context("failed reading stdin")?;
            stdin
        }
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("import: empty input"));
    }

    if !planner.store_mut().import_from_json(trimmed) {
        warn!("import rejected");
        return Err(anyhow!(
            "import rejected: expected a JSON array of tasks with id, title and HH:MM times"
        ));
    }

    let count = planner.task_list(PriorityFilter::All).len();
    println!("Imported {count} task(s).");
    Ok(())
}

fn print_times(planner: &Planner<CommandSink>, id: &str) {
    if let Some(task) = planner.find_task(id) {
        println!("Task {id} now {}-{}.", task.start_time, task.end_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Action;
    use crate::store::MemoryBackend;
    use crate::task::Task;

    fn date(s: &str) -> NaiveDate {
        crate::time::parse_date(s).expect("date")
    }

    #[test]
    fn history_round_trips_through_the_backend() {
        let backend = MemoryBackend::new();
        let mut history = History::new();
        history.push_in(
            date("2025-01-01"),
            Action::Add {
                task: Task::with_id("a", "A", "09:00", "10:00", None),
            },
        );

        save_history(&backend, &history).expect("save history");
        let restored = load_history(&backend);
        assert_eq!(restored.undo_len(), 1);
        assert_eq!(restored.peek_undo(), history.peek_undo());
    }

    #[test]
    fn corrupt_history_starts_empty() {
        let backend = MemoryBackend::new();
        backend.set(HISTORY_KEY, "{not json").expect("seed");
        assert!(!load_history(&backend).can_undo());
        assert!(!load_history(&MemoryBackend::new()).can_undo());
    }

    #[test]
    fn days_are_arranged_by_placement() {
        let day = |s: &str, placement| MaterializedDate {
            date: date(s),
            tasks: vec![],
            placement,
        };
        let arranged = arrange_days(
            (date("2025-01-10"), vec![]),
            vec![
                day("2025-01-09", Placement::Prepend),
                day("2025-01-08", Placement::Prepend),
                day("2025-01-11", Placement::Append),
            ],
        );
        let dates: Vec<NaiveDate> = arranged.iter().map(|(d, _)| *d).collect();
        assert_eq!(
            dates,
            vec![
                date("2025-01-08"),
                date("2025-01-09"),
                date("2025-01-10"),
                date("2025-01-11")
            ]
        );
    }
}
