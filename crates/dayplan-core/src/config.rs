use std::collections::{
  BTreeMap,
  HashMap
};
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::templates::{
  Template,
  builtin_templates
};

const RC_ENV_VAR: &str = "DAYPLANRC";
const RC_FILE_NAME: &str = ".dayplanrc";
const DEFAULT_DATA_DIR: &str =
  ".dayplan";
const TEMPLATE_KEY_PREFIX: &str =
  "template.";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Built-in defaults only; reads
  /// nothing from disk.
  pub fn defaults() -> Self {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };

    for (k, v) in [
      ("data.location", "~/.dayplan"),
      ("storage.prefix", "tasks"),
      ("task.default_start", "09:00"),
      ("task.default_duration", "60"),
      ("timeline.scale", "minute"),
      ("history.limit", "500"),
      ("color", "on")
    ] {
      cfg
        .map
        .insert(k.to_string(), v.to_string());
    }

    cfg
  }

  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let rc = resolve_rc_path(rc_override)?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading dayplanrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no dayplanrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Reads `key` as a boolean. Values
  /// other than the usual on/off words
  /// are an error.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    parse_bool(raw)
      .map(Some)
      .ok_or_else(|| {
        anyhow!(
          "invalid {key} setting: {raw}"
        )
      })
  }

  /// Parses `key` as `T`. A value that
  /// does not parse is reported and
  /// treated as missing.
  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> Option<T>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    let raw = self.map.get(key)?;
    match raw.trim().parse::<T>() {
      | Ok(value) => Some(value),
      | Err(err) => {
        warn!(
          key,
          value = %raw,
          error = %err,
          "ignoring invalid config value"
        );
        None
      }
    }
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  /// Timezone used for "today"; `None`
  /// means local time.
  pub fn timezone(&self) -> Option<Tz> {
    let raw = self.map.get("timezone")?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
      return None;
    }

    match trimmed.parse::<Tz>() {
      | Ok(tz) => Some(tz),
      | Err(err) => {
        warn!(
          timezone = %trimmed,
          error = %err,
          "invalid timezone; using local time"
        );
        None
      }
    }
  }

  /// Built-in templates overlaid with
  /// every `template.<name>` entry.
  pub fn templates(
    &self
  ) -> BTreeMap<String, Template> {
    let mut templates =
      builtin_templates();

    for (key, value) in &self.map {
      let Some(name) =
        key.strip_prefix(TEMPLATE_KEY_PREFIX)
      else {
        continue;
      };
      match Template::parse(value) {
        | Ok(tpl) => {
          trace!(name, "loaded template");
          templates
            .insert(name.to_string(), tpl);
        }
        | Err(err) => {
          warn!(
            name,
            error = %err,
            "skipping invalid template"
          );
        }
      }
    }

    templates
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping dayplanrc"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(DEFAULT_DATA_DIR))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_cover_planner_keys() {
    let cfg = Config::defaults();
    assert_eq!(
      cfg.get("storage.prefix").as_deref(),
      Some("tasks")
    );
    assert_eq!(
      cfg.get_parsed::<i64>(
        "task.default_duration"
      ),
      Some(60)
    );
    assert_eq!(
      cfg
        .get_bool("color")
        .expect("color"),
      Some(true)
    );
    assert_eq!(
      cfg
        .get_bool("missing")
        .expect("missing"),
      None
    );
    assert!(cfg.timezone().is_none());
  }

  #[test]
  fn loads_file_with_include_and_comments()
  {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let extra = dir.path().join("extra.rc");
    fs::write(
      &extra,
      "template.standup = 09:45-10:00 Standup\n"
    )
    .expect("write include");
    let rc = dir.path().join("main.rc");
    fs::write(
      &rc,
      "# planner settings\n\
       storage.prefix = plan # inline\n\
       timezone = Asia/Tokyo\n\
       include extra.rc\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(rc.as_path()))
      .expect("load config");
    assert_eq!(
      cfg.get("storage.prefix").as_deref(),
      Some("plan")
    );
    assert_eq!(
      cfg.timezone(),
      Some(chrono_tz::Asia::Tokyo)
    );
    assert_eq!(cfg.loaded_files.len(), 2);
    let templates = cfg.templates();
    assert_eq!(
      templates["standup"].title,
      "Standup"
    );
    assert!(templates.contains_key("sleep"));
  }

  #[test]
  fn rejects_lines_without_equals() {
    let dir = tempfile::tempdir()
      .expect("tempdir");
    let rc = dir.path().join("bad.rc");
    fs::write(&rc, "storage.prefix\n")
      .expect("write rc");
    assert!(Config::load(Some(rc.as_path())).is_err());
  }

  #[test]
  fn overrides_strip_rc_prefix_and_win() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides([
      (
        "rc.timeline.scale".to_string(),
        "hour".to_string()
      ),
      (
        "history.limit".to_string(),
        "lots".to_string()
      )
    ]);
    assert_eq!(
      cfg.get("timeline.scale").as_deref(),
      Some("hour")
    );
    assert_eq!(
      cfg.get_parsed::<usize>(
        "history.limit"
      ),
      None
    );
  }

  #[test]
  fn invalid_templates_and_timezones_are_skipped()
  {
    let mut cfg = Config::defaults();
    cfg.apply_overrides([
      (
        "template.broken".to_string(),
        "whenever".to_string()
      ),
      (
        "timezone".to_string(),
        "Mars/Olympus".to_string()
      )
    ]);
    assert!(
      !cfg.templates().contains_key("broken")
    );
    assert!(cfg.timezone().is_none());
  }
}
