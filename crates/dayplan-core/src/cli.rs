use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::planner::{PriorityFilter, ResizeEdge};
use crate::task::{Priority, Repeat};
use crate::time::ScaleMode;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "dayplan",
    version,
    about = "Day planner with a 24-hour timeline, lanes and undo",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "dayplanrc")]
    pub dayplanrc: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    /// Day to operate on (YYYY-MM-DD); today when absent or invalid.
    #[arg(long = "date")]
    pub date: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Quick-add: `HH:MM-HH:MM title`, `HH:MM title` or a bare title.
    Add {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        text: Vec<String>,
    },
    List {
        #[arg(long, default_value = "all")]
        priority: PriorityFilter,
    },
    /// Lays out the day in lanes, optionally with the day before or after.
    Timeline {
        #[arg(long)]
        next: bool,
        #[arg(long)]
        prev: bool,
    },
    Show {
        id: String,
    },
    Toggle {
        id: String,
    },
    Delete {
        id: String,
    },
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        repeat: Option<Repeat>,
    },
    /// Moves a task by a pixel offset on the timeline.
    Drag {
        id: String,
        #[arg(allow_hyphen_values = true)]
        pixels: f64,
        #[arg(long)]
        scale: Option<ScaleMode>,
    },
    Resize {
        id: String,
        #[arg(allow_hyphen_values = true)]
        pixels: f64,
        #[arg(long, default_value = "end")]
        edge: ResizeEdge,
        #[arg(long)]
        scale: Option<ScaleMode>,
    },
    Template {
        name: String,
        /// Drop position; keeps the template's length from this time.
        #[arg(long)]
        at: Option<String>,
    },
    Templates,
    Sleep {
        start: String,
        hours: u32,
    },
    ClearCompleted,
    Undo,
    Redo,
    Stats,
    Export,
    /// Replaces the day's tasks with a JSON array from a file or stdin.
    Import {
        file: Option<PathBuf>,
    },
    /// Removes every stored task partition.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Prints the effective configuration.
    Config,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::List { .. } => "list",
            Self::Timeline { .. } => "timeline",
            Self::Show { .. } => "show",
            Self::Toggle { .. } => "toggle",
            Self::Delete { .. } => "delete",
            Self::Edit { .. } => "edit",
            Self::Drag { .. } => "drag",
            Self::Resize { .. } => "resize",
            Self::Template { .. } => "template",
            Self::Templates => "templates",
            Self::Sleep { .. } => "sleep",
            Self::ClearCompleted => "clear-completed",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Stats => "stats",
            Self::Export => "export",
            Self::Import { .. } => "import",
            Self::Reset { .. } => "reset",
            Self::Config => "config",
        }
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}
