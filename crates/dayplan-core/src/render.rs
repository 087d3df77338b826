use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

use chrono::NaiveDate;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::lanes::{PlacedTask, lane_count};
use crate::task::{Priority, Task, TaskStats};
use crate::templates::Template;
use crate::time::format_date;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, tasks))]
    pub fn print_task_table(&mut self, tasks: &[Task]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let rows = tasks.iter().map(|task| self.task_row(task, None)).collect();
        write_table(&mut out, task_headers(false), rows)?;
        Ok(())
    }

    /// A day heading followed by its laid-out tasks.
    #[tracing::instrument(skip(self, tasks))]
    pub fn print_day(&mut self, date: NaiveDate, tasks: &[PlacedTask]) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let heading = format!(
            "{}  ({} task(s), {} lane(s))",
            format_date(date),
            tasks.len(),
            lane_count(tasks)
        );
        writeln!(out, "{}", self.paint(&heading, "1"))?;

        let rows = tasks
            .iter()
            .map(|placed| self.task_row(&placed.task, Some(placed)))
            .collect();
        write_table(&mut out, task_headers(true), rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, task))]
    pub fn print_task_info(&mut self, task: &Task) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id        {}", task.id)?;
        writeln!(out, "title     {}", task.title)?;
        writeln!(out, "time      {}-{}", task.start_time, task.end_time)?;
        writeln!(out, "duration  {} min", task.duration_minutes())?;
        if let Some(date) = task.date {
            writeln!(out, "date      {}", format_date(date))?;
        }
        writeln!(out, "priority  {}", task.priority)?;
        writeln!(out, "repeat    {}", task.repeat.as_str())?;
        writeln!(out, "completed {}", if task.completed { "yes" } else { "no" })?;
        if task.crosses_midnight() {
            writeln!(out, "note      runs past midnight")?;
        }

        Ok(())
    }

    pub fn print_stats(&mut self, stats: &TaskStats) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "total      {}", stats.total)?;
        writeln!(out, "completed  {}", stats.completed)?;
        writeln!(out, "remaining  {}", stats.remaining)?;
        writeln!(out, "done       {}%", stats.completion_rate)?;
        Ok(())
    }

    pub fn print_templates(&mut self, templates: &BTreeMap<String, Template>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let rows = templates
            .iter()
            .map(|(name, tpl)| {
                vec![
                    self.paint(name, "33"),
                    format!("{}-{}", tpl.start_time, tpl.end_time),
                    tpl.title.clone(),
                ]
            })
            .collect();
        write_table(
            &mut out,
            vec!["Name".to_string(), "Time".to_string(), "Title".to_string()],
            rows,
        )?;
        Ok(())
    }

    fn task_row(&self, task: &Task, placed: Option<&PlacedTask>) -> Vec<String> {
        let mut row = vec![self.paint(&task.id, "33")];
        if let Some(placed) = placed {
            row.push(placed.lane.to_string());
        }

        let time = format!("{}-{}", task.start_time, task.end_time);
        let time = if task.crosses_midnight() {
            self.paint(&format!("{time}+"), "36")
        } else {
            time
        };
        row.push(time);

        let priority = match task.priority {
            Priority::High => self.paint(task.priority.as_str(), "31"),
            Priority::Medium => task.priority.as_str().to_string(),
            Priority::Low => self.paint(task.priority.as_str(), "2"),
        };
        row.push(priority);
        row.push(if task.completed { "x".to_string() } else { String::new() });

        let title = if task.completed {
            self.paint(&task.title, "9")
        } else {
            task.title.clone()
        };
        row.push(title);
        row
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn task_headers(with_lane: bool) -> Vec<String> {
    let mut headers = vec!["ID"];
    if with_lane {
        headers.push("Lane");
    }
    headers.extend(["Time", "Pri", "Done", "Title"]);
    headers.into_iter().map(str::to_string).collect()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, &width) in headers.iter().zip(&widths) {
        write!(writer, "{header:width$} ")?;
    }
    writeln!(writer)?;

    for &width in &widths {
        write!(writer, "{:-<width$} ", "")?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, &width) in row.iter().zip(&widths).take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_pads_by_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["Title".to_string(), "Time".to_string()],
            vec![
                vec!["会議".to_string(), "09:00-10:00".to_string()],
                vec!["\x1b[31mGym\x1b[0m".to_string(), "18:00-19:00".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Title Time        ");
        assert_eq!(lines[1], "----- ----------- ");
        assert_eq!(lines[2], "会議  09:00-10:00 ");
        assert_eq!(strip_ansi(lines[3]), "Gym   18:00-19:00 ");
    }

    #[test]
    fn strips_escape_sequences() {
        assert_eq!(strip_ansi("\x1b[1mbold\x1b[0m text"), "bold text");
    }

    #[test]
    fn rejects_unknown_color_setting() {
        let mut cfg = Config::defaults();
        cfg.apply_overrides([("color".to_string(), "sometimes".to_string())]);
        assert!(Renderer::new(&cfg).is_err());

        cfg.apply_overrides([("color".to_string(), "OFF".to_string())]);
        assert!(!Renderer::new(&cfg).expect("renderer").color);
    }

    #[test]
    fn lane_column_only_in_timeline() {
        assert_eq!(task_headers(false).len(), 5);
        assert_eq!(task_headers(true)[1], "Lane");
    }
}
