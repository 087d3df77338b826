use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::{self, is_valid_time_format};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(anyhow!("invalid priority: {other} (expected low, medium or high)")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `Daily` task acts as a template that is cloned onto the following date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    #[default]
    None,
    Daily,
}

impl Repeat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Daily => "daily",
        }
    }
}

impl FromStr for Repeat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "daily" => Ok(Self::Daily),
            other => Err(anyhow!("invalid repeat: {other} (expected none or daily)")),
        }
    }
}

/// A task as stored in a date partition. Lanes are never part of the record;
/// see [`crate::lanes::PlacedTask`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub title: String,

    pub start_time: String,

    pub end_time: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub completed: bool,

    #[serde(default)]
    pub repeat: Repeat,
}

impl Task {
    pub fn new(
        title: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
        date: Option<NaiveDate>,
    ) -> Self {
        Self::with_id(new_task_id("task"), title, start_time, end_time, date)
    }

    pub fn with_id(
        id: impl Into<String>,
        title: impl Into<String>,
        start_time: impl Into<String>,
        end_time: impl Into<String>,
        date: Option<NaiveDate>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            start_time: start_time.into(),
            end_time: end_time.into(),
            date,
            priority: Priority::Medium,
            completed: false,
            repeat: Repeat::None,
        }
    }

    pub fn start_minutes(&self) -> i64 {
        time::time_to_minutes(&self.start_time)
    }

    pub fn end_minutes(&self) -> i64 {
        time::time_to_minutes(&self.end_time)
    }

    pub fn crosses_midnight(&self) -> bool {
        time::crosses_midnight(self.start_minutes(), self.end_minutes())
    }

    pub fn duration_minutes(&self) -> i64 {
        time::duration_minutes(self.start_minutes(), self.end_minutes())
    }

    pub fn has_valid_times(&self) -> bool {
        is_valid_time_format(&self.start_time) && is_valid_time_format(&self.end_time)
    }
}

/// `<prefix>-<uuid>`; opaque to everything but humans reading the store.
pub fn new_task_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Replacement fields for an edit. Applied over the stored task, so fields not
/// named here (id, date, completed) survive the edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditData {
    pub title: String,
    pub start_time: String,
    pub end_time: String,
    pub priority: Priority,
    pub repeat: Option<Repeat>,
}

impl EditData {
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            start_time: task.start_time.clone(),
            end_time: task.end_time.clone(),
            priority: task.priority,
            repeat: Some(task.repeat),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.title.trim().is_empty() {
            return Err(anyhow!("title must not be empty"));
        }
        if !is_valid_time_format(&self.start_time) {
            return Err(anyhow!("invalid start time: {}", self.start_time));
        }
        if !is_valid_time_format(&self.end_time) {
            return Err(anyhow!("invalid end time: {}", self.end_time));
        }
        let start = time::time_to_minutes(&self.start_time);
        let end = time::time_to_minutes(&self.end_time);
        if start >= end {
            return Err(anyhow!(
                "start time {} must be before end time {}",
                self.start_time,
                self.end_time
            ));
        }
        Ok(())
    }

    pub fn apply_to(&self, task: &Task) -> Task {
        Task {
            title: self.title.trim().to_string(),
            start_time: self.start_time.clone(),
            end_time: self.end_time.clone(),
            priority: self.priority,
            repeat: self.repeat.unwrap_or(task.repeat),
            ..task.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub remaining: usize,
    /// Rounded percentage; 0 for an empty set.
    pub completion_rate: u32,
}

impl TaskStats {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let total = tasks.len();
        let completed = tasks.iter().filter(|t| t.completed).count();
        let completion_rate = if total == 0 {
            0
        } else {
            ((completed as f64 / total as f64) * 100.0).round() as u32
        };
        Self {
            total,
            completed,
            remaining: total - completed,
            completion_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Task {
        Task::with_id("task-1", "Write report", "09:00", "10:00", None)
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let json = serde_json::to_value(sample()).expect("serialize");
        assert_eq!(json["startTime"], "09:00");
        assert_eq!(json["endTime"], "10:00");
        assert_eq!(json["priority"], "medium");
        assert_eq!(json["repeat"], "none");
        assert!(json.get("date").is_none());
    }

    #[test]
    fn legacy_lane_field_is_ignored() {
        let raw = r#"{"id":"a","title":"Sleep","startTime":"22:00","endTime":"06:00",
            "date":"2025-01-01","priority":"high","completed":true,"lane":3}"#;
        let task: Task = serde_json::from_str(raw).expect("parse");
        assert_eq!(task.priority, Priority::High);
        assert!(task.completed);
        assert!(task.crosses_midnight());
        assert_eq!(task.duration_minutes(), 480);
        assert_eq!(task.date, NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[test]
    fn edit_validation_rejects_bad_payloads() {
        let mut edit = EditData::from_task(&sample());
        assert!(edit.validate().is_ok());

        edit.title = "   ".to_string();
        assert!(edit.validate().is_err());

        let mut edit = EditData::from_task(&sample());
        edit.end_time = "25:00".to_string();
        assert!(edit.validate().is_err());

        let mut edit = EditData::from_task(&sample());
        edit.end_time = "09:00".to_string();
        assert!(edit.validate().is_err());
    }

    #[test]
    fn edit_keeps_identity_and_completion() {
        let mut task = sample();
        task.completed = true;
        let edit = EditData {
            title: " Review ".to_string(),
            start_time: "13:00".to_string(),
            end_time: "14:30".to_string(),
            priority: Priority::High,
            repeat: None,
        };
        let updated = edit.apply_to(&task);
        assert_eq!(updated.id, "task-1");
        assert_eq!(updated.title, "Review");
        assert!(updated.completed);
        assert_eq!(updated.repeat, Repeat::None);
    }

    #[test]
    fn stats_round_completion_rate() {
        let mut tasks = vec![sample(), sample(), sample()];
        tasks[0].completed = true;
        let stats = TaskStats::from_tasks(&tasks);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.remaining, 2);
        assert_eq!(stats.completion_rate, 33);
        assert_eq!(TaskStats::from_tasks(&[]).completion_rate, 0);
    }
}
