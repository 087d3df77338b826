use std::sync::OnceLock;

use regex::Regex;

use crate::task::Priority;
use crate::time::{minutes_to_time, time_to_minutes, wrap_minutes};

/// Result of parsing one line of quick-add text. Times are zero-padded but
/// not range-checked; the planner validates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickAdd {
    pub title: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub priority: Priority,
}

fn range_regex() -> Option<&'static Regex> {
    static RANGE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    RANGE_RE
        .get_or_init(|| Regex::new(r"^\s*(\d{1,2}:\d{2})\s*-\s*(\d{1,2}:\d{2})\s+(.+)$").ok())
        .as_ref()
}

fn start_regex() -> Option<&'static Regex> {
    static START_RE: OnceLock<Option<Regex>> = OnceLock::new();
    START_RE
        .get_or_init(|| Regex::new(r"^\s*(\d{1,2}:\d{2})\s+(.+)$").ok())
        .as_ref()
}

fn pad(time: &str) -> String {
    match time.split_once(':') {
        Some((h, m)) => format!("{h:0>2}:{m:0>2}"),
        None => time.to_string(),
    }
}

/// Only the `HH:MM-HH:MM title` form.
pub fn parse_time_range(input: &str) -> Option<QuickAdd> {
    let caps = range_regex()?.captures(input.trim())?;
    Some(QuickAdd {
        title: caps[3].trim().to_string(),
        start_time: Some(pad(&caps[1])),
        end_time: Some(pad(&caps[2])),
        priority: Priority::Medium,
    })
}

/// Accepts `HH:MM-HH:MM title`, `HH:MM title` (ending `default_duration`
/// minutes later) or a bare title.
pub fn parse_quick_add(input: &str, default_duration: i64) -> QuickAdd {
    let trimmed = input.trim();

    if let Some(parsed) = parse_time_range(trimmed) {
        return parsed;
    }

    if let Some(caps) = start_regex().and_then(|re| re.captures(trimmed)) {
        let start = pad(&caps[1]);
        let end = minutes_to_time(wrap_minutes(time_to_minutes(&start) + default_duration));
        return QuickAdd {
            title: caps[2].trim().to_string(),
            start_time: Some(start),
            end_time: Some(end),
            priority: Priority::Medium,
        };
    }

    QuickAdd {
        title: trimmed.to_string(),
        start_time: None,
        end_time: None,
        priority: Priority::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_time_range() {
        let parsed = parse_quick_add("9:00-10:30 Team sync", 60);
        assert_eq!(parsed.title, "Team sync");
        assert_eq!(parsed.start_time.as_deref(), Some("09:00"));
        assert_eq!(parsed.end_time.as_deref(), Some("10:30"));
    }

    #[test]
    fn range_tolerates_spaces_around_dash() {
        let parsed = parse_quick_add("  14:00 - 15:00   Gym ", 60);
        assert_eq!(parsed.title, "Gym");
        assert_eq!(parsed.start_time.as_deref(), Some("14:00"));
        assert_eq!(parsed.end_time.as_deref(), Some("15:00"));
    }

    #[test]
    fn start_only_uses_default_duration() {
        let parsed = parse_quick_add("7:30 Run", 45);
        assert_eq!(parsed.title, "Run");
        assert_eq!(parsed.start_time.as_deref(), Some("07:30"));
        assert_eq!(parsed.end_time.as_deref(), Some("08:15"));
    }

    #[test]
    fn start_only_late_evening_wraps_past_midnight() {
        let parsed = parse_quick_add("23:30 Movie", 60);
        assert_eq!(parsed.end_time.as_deref(), Some("00:30"));
    }

    #[test]
    fn bare_title_has_no_times() {
        let parsed = parse_quick_add("  Buy milk ", 60);
        assert_eq!(parsed.title, "Buy milk");
        assert!(parsed.start_time.is_none());
        assert!(parsed.end_time.is_none());
        assert_eq!(parsed.priority, Priority::Medium);
    }

    #[test]
    fn time_without_title_is_a_title() {
        let parsed = parse_quick_add("10:00", 60);
        assert_eq!(parsed.title, "10:00");
        assert!(parsed.start_time.is_none());
    }
}
