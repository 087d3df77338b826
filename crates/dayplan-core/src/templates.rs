use std::collections::BTreeMap;

use anyhow::anyhow;

use crate::quick_add::parse_time_range;
use crate::time::is_valid_time_format;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub title: String,
    pub start_time: String,
    pub end_time: String,
}

impl Template {
    fn new(title: &str, start_time: &str, end_time: &str) -> Self {
        Self {
            title: title.to_string(),
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
        }
    }

    /// Parses a `template.<name>` config value: `HH:MM-HH:MM Title`.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let parsed = parse_time_range(spec)
            .ok_or_else(|| anyhow!("expected `HH:MM-HH:MM Title`, got: {spec}"))?;
        let (Some(start), Some(end)) = (parsed.start_time, parsed.end_time) else {
            return Err(anyhow!("template needs start and end times: {spec}"));
        };
        if !is_valid_time_format(&start) || !is_valid_time_format(&end) {
            return Err(anyhow!("template times out of range: {spec}"));
        }
        Ok(Self {
            title: parsed.title,
            start_time: start,
            end_time: end,
        })
    }
}

pub fn builtin_templates() -> BTreeMap<String, Template> {
    [
        ("nightshift", Template::new("Night shift", "17:00", "09:00")),
        ("travel", Template::new("Travel", "09:00", "09:10")),
        ("meal", Template::new("Meal", "12:00", "12:30")),
        ("sleep", Template::new("Sleep", "22:00", "06:00")),
        ("lunch", Template::new("Lunch", "12:00", "13:00")),
        ("breakfast", Template::new("Breakfast", "08:00", "08:30")),
        ("dinner", Template::new("Dinner", "19:00", "19:30")),
    ]
    .into_iter()
    .map(|(name, tpl)| (name.to_string(), tpl))
    .collect()
}
