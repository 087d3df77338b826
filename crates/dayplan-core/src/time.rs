use std::str::FromStr;
use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::{
  Duration,
  Local,
  NaiveDate,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

pub const MINUTES_PER_HOUR: i64 = 60;
pub const MINUTES_PER_DAY: i64 = 1440;
pub const LAST_MINUTE: i64 =
  MINUTES_PER_DAY - 1;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn time_regex() -> Option<&'static Regex>
{
  static TIME_RE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  TIME_RE
    .get_or_init(|| {
      Regex::new(
        r"^([0-1]?[0-9]|2[0-3]):[0-5][0-9]$"
      )
      .ok()
    })
    .as_ref()
}

fn date_regex() -> Option<&'static Regex>
{
  static DATE_RE: OnceLock<
    Option<Regex>
  > = OnceLock::new();
  DATE_RE
    .get_or_init(|| {
      Regex::new(r"^\d{4}-\d{2}-\d{2}$")
        .ok()
    })
    .as_ref()
}

/// Strict `HH:MM` check: hours 0-23,
/// minutes 0-59. A single-digit hour
/// such as `9:30` is accepted.
#[must_use]
pub fn is_valid_time_format(
  text: &str
) -> bool {
  let Some(re) = time_regex() else {
    return false;
  };
  if !re.is_match(text) {
    return false;
  }

  let Some((h, m)) =
    text.split_once(':')
  else {
    return false;
  };
  match (
    h.parse::<i64>(),
    m.parse::<i64>()
  ) {
    | (Ok(hours), Ok(minutes)) => {
      (0..=23).contains(&hours)
        && (0..=59).contains(&minutes)
    }
    | _ => false
  }
}

/// Minutes since midnight. Empty or
/// malformed input yields 0.
#[must_use]
pub fn time_to_minutes(
  text: &str
) -> i64 {
  if !is_valid_time_format(text) {
    return 0;
  }

  text
    .split_once(':')
    .and_then(|(h, m)| {
      Some(
        h.parse::<i64>().ok()?
          * MINUTES_PER_HOUR
          + m.parse::<i64>().ok()?
      )
    })
    .unwrap_or(0)
}

/// Zero-padded `HH:MM`. Does not wrap:
/// callers clamp into `0..=1439` first,
/// otherwise the text is out of range
/// (`1440` gives `24:00`, `-30` gives
/// `-1:-30`).
#[must_use]
pub fn minutes_to_time(
  minutes: i64
) -> String {
  let hours =
    minutes.div_euclid(MINUTES_PER_HOUR);
  let mins = minutes % MINUTES_PER_HOUR;
  format!("{hours:02}:{mins:02}")
}

#[must_use]
pub fn clamp_minutes(
  minutes: i64
) -> i64 {
  minutes.clamp(0, LAST_MINUTE)
}

/// Wraps any minute count onto the
/// 24-hour clock.
#[must_use]
pub fn wrap_minutes(
  minutes: i64
) -> i64 {
  minutes.rem_euclid(MINUTES_PER_DAY)
}

/// `round(delta / scale)` with halves
/// rounded towards positive infinity.
/// A zero scale yields 0. The result
/// is bounded to one day either way,
/// since anything larger clamps to the
/// same times.
#[must_use]
pub fn pixel_delta_to_minutes(
  delta_px: f64,
  scale: f64
) -> i64 {
  if scale == 0.0 {
    return 0;
  }
  let minutes =
    (delta_px / scale + 0.5).floor()
      as i64;
  minutes.clamp(
    -MINUTES_PER_DAY,
    MINUTES_PER_DAY
  )
}

/// `end <= start` means the interval
/// runs past midnight.
#[must_use]
pub fn crosses_midnight(
  start: i64,
  end: i64
) -> bool {
  end <= start
}

/// Wall-clock duration, adding a day
/// when the interval crosses midnight.
#[must_use]
pub fn duration_minutes(
  start: i64,
  end: i64
) -> i64 {
  if crosses_midnight(start, end) {
    end + MINUTES_PER_DAY - start
  } else {
    end - start
  }
}

/// Pixels per minute for each timeline
/// zoom level.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default
)]
pub enum ScaleMode {
  Second,
  #[default]
  Minute,
  Hour,
  Day
}

impl ScaleMode {
  #[must_use]
  pub fn pixels_per_minute(
    self
  ) -> f64 {
    match self {
      | Self::Second => 60.0,
      | Self::Minute => 1.0,
      | Self::Hour => 0.2,
      | Self::Day => 0.05
    }
  }

  #[must_use]
  pub fn as_str(self) -> &'static str {
    match self {
      | Self::Second => "second",
      | Self::Minute => "minute",
      | Self::Hour => "hour",
      | Self::Day => "day"
    }
  }
}

impl FromStr for ScaleMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "second" => Ok(Self::Second),
      | "minute" => Ok(Self::Minute),
      | "hour" => Ok(Self::Hour),
      | "day" => Ok(Self::Day),
      | other => {
        Err(anyhow!(
          "unknown timeline scale: \
           {other} (expected second, \
           minute, hour or day)"
        ))
      }
    }
  }
}

/// Parses a strict `YYYY-MM-DD` date.
pub fn parse_date(
  text: &str
) -> anyhow::Result<NaiveDate> {
  let trimmed = text.trim();
  let shaped = date_regex()
    .map(|re| re.is_match(trimmed))
    .unwrap_or(false);
  if !shaped {
    return Err(anyhow!(
      "expected YYYY-MM-DD, got: \
       {text}"
    ));
  }

  NaiveDate::parse_from_str(
    trimmed,
    DATE_FORMAT
  )
  .map_err(|err| {
    anyhow!(
      "invalid calendar date {text}: \
       {err}"
    )
  })
}

#[must_use]
pub fn format_date(
  date: NaiveDate
) -> String {
  date.format(DATE_FORMAT).to_string()
}

#[must_use]
pub fn shift_date(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  date
    .checked_add_signed(Duration::days(
      days
    ))
    .unwrap_or(date)
}

/// Today's calendar date, in `tz` when
/// one is configured and in local time
/// otherwise.
#[must_use]
pub fn today(
  tz: Option<Tz>
) -> NaiveDate {
  match tz {
    | Some(tz) => {
      Utc::now()
        .with_timezone(&tz)
        .date_naive()
    }
    | None => Local::now().date_naive()
  }
}
