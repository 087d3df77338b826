pub mod cli;
pub mod commands;
pub mod config;
pub mod history;
pub mod lanes;
pub mod planner;
pub mod quick_add;
pub mod render;
pub mod store;
pub mod task;
pub mod templates;
pub mod time;
pub mod window;

use std::ffi::OsString;
use std::rc::Rc;

use anyhow::Context;
use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::Parser;
use tracing::{
  debug,
  info,
  warn
};

use crate::cli::Command;
use crate::planner::{
  Planner,
  PlannerSettings,
  PriorityFilter
};
use crate::store::{
  FileBackend,
  SharedBackend
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting dayplan"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.dayplanrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );
  debug!(
    files = ?cfg.loaded_files,
    "configuration loaded"
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let backend: SharedBackend = Rc::new(
    FileBackend::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open task storage \
           at {}",
          data_dir.display()
        )
      })?
  );

  let date = resolve_date(
    cli.date.as_deref(),
    cfg.timezone()
  );
  let settings =
    PlannerSettings::from_config(&cfg);
  let history =
    commands::load_history(
      backend.as_ref()
    );
  let mut planner = Planner::with_sink(
    backend.clone(),
    settings,
    date,
    commands::CommandSink::default()
  )
  .with_history(history);

  let mut renderer =
    render::Renderer::new(&cfg)?;
  let command =
    cli.command.unwrap_or(
      Command::List {
        priority: PriorityFilter::All
      }
    );

  let outcome = commands::dispatch(
    &mut planner,
    &cfg,
    &mut renderer,
    command
  );

  commands::save_history(
    backend.as_ref(),
    planner.history()
  )?;
  outcome?;

  info!("done");
  Ok(())
}

/// `--date` when it parses, otherwise
/// today in the configured timezone.
fn resolve_date(
  arg: Option<&str>,
  tz: Option<Tz>
) -> NaiveDate {
  if let Some(raw) = arg {
    match time::parse_date(raw) {
      | Ok(date) => return date,
      | Err(err) => {
        warn!(
          date = raw,
          error = %err,
          "ignoring invalid --date; \
           using today"
        );
      }
    }
  }
  time::today(tz)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn explicit_date_wins() {
    let date = resolve_date(
      Some("2025-02-28"),
      None
    );
    assert_eq!(
      time::format_date(date),
      "2025-02-28"
    );
  }

  #[test]
  fn invalid_date_falls_back_to_today()
  {
    let tz = Some(chrono_tz::UTC);
    assert_eq!(
      resolve_date(Some("2025-13-40"), tz),
      time::today(tz)
    );
  }
}
