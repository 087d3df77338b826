//! Side-by-side layout for tasks that run at the same time.
//!
//! Lanes are a projection of one task set: recompute them on every read and
//! never compare lanes produced from different sets.

use serde::Serialize;

use crate::task::Task;
use crate::time::MINUTES_PER_DAY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedTask {
    #[serde(flatten)]
    pub task: Task,
    /// 1-based column.
    pub lane: u32,
}

/// Half-open `[start, end)` in minutes, with `end` pushed past 1440 when the
/// task crosses midnight.
pub fn interval(task: &Task) -> (i64, i64) {
    let start = task.start_minutes();
    let mut end = task.end_minutes();
    if end <= start {
        end += MINUTES_PER_DAY;
    }
    (start, end)
}

fn overlap(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn shifted((start, end): (i64, i64)) -> (i64, i64) {
    (start + MINUTES_PER_DAY, end + MINUTES_PER_DAY)
}

/// True when the two tasks share wall-clock time, including the case where
/// one runs past midnight into the other's early-morning slot.
pub fn is_time_overlap(a: &Task, b: &Task) -> bool {
    let first = interval(a);
    let second = interval(b);

    overlap(first, second)
        || overlap(first, shifted(second))
        || overlap(shifted(first), second)
}

/// Greedy first-fit: each task, in input order, takes the lowest lane not
/// held by an overlapping task placed before it.
#[tracing::instrument(skip(tasks), fields(count = tasks.len()))]
pub fn calculate_lanes(tasks: &[Task]) -> Vec<PlacedTask> {
    let mut placed: Vec<PlacedTask> = Vec::with_capacity(tasks.len());

    for task in tasks {
        let lane = first_free_lane(task, &placed);
        placed.push(PlacedTask {
            task: task.clone(),
            lane,
        });
    }

    placed
}

fn first_free_lane(task: &Task, placed: &[PlacedTask]) -> u32 {
    let mut lane = 1;
    while placed
        .iter()
        .any(|p| p.lane == lane && is_time_overlap(task, &p.task))
    {
        lane += 1;
    }
    lane
}

/// Number of columns a laid-out set needs.
pub fn lane_count(placed: &[PlacedTask]) -> u32 {
    placed.iter().map(|p| p.lane).max().unwrap_or(0)
}
