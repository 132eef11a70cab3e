use std::collections::{
  BTreeMap,
  HashMap
};
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::DEFAULT_LOCALE_DATE_FORMAT;

const QUICK_FILTER_PREFIX: &str =
  "quickfilter.";

const DEFAULTS: &[(&str, &str)] = &[
  ("data.location", "~/.wander"),
  (
    "locale.date_format",
    DEFAULT_LOCALE_DATE_FORMAT
  ),
  ("quickfilter.creative", "3"),
  ("quickfilter.solo", "4"),
  ("quickfilter.plans", "5"),
  ("quickfilter.mindful", "6"),
  ("section.unique_experiences", "1"),
  ("section.date_ideas", "2"),
  ("featured.tag", "featured"),
  ("default.sort", "popular"),
  (
    "share.base_url",
    "https://wander.city"
  ),
  ("color", "on")
];

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Self {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading wanderrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no wanderrc found; using \
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

  pub fn get_or(
    &self,
    key: &str,
    fallback: &str
  ) -> String {
    self
      .map
      .get(key)
      .map(|v| v.trim())
      .filter(|v| !v.is_empty())
      .unwrap_or(fallback)
      .to_string()
  }

  /// Every `quickfilter.<id> = <tag>`
  /// entry, keyed by filter id.
  pub fn quick_filter_tags(
    &self
  ) -> BTreeMap<String, String> {
    self
      .map
      .iter()
      .filter_map(|(k, v)| {
        let id = k.strip_prefix(
          QUICK_FILTER_PREFIX
        )?;
        let tag = v.trim();
        if id.is_empty() || tag.is_empty()
        {
          return None;
        }
        Some((
          id.to_string(),
          tag.to_string()
        ))
      })
      .collect()
  }

  /// Reads one rc file into the map,
  /// following `include` lines relative to
  /// the including file.
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path) {
      warn!(file = %path.display(), "rc file already loaded; skipping repeated include");
      return Ok(());
    }
    let text = fs::read_to_string(&path)
      .with_context(|| {
        format!(
          "cannot read rc file {}",
          path.display()
        )
      })?;
    self.loaded_files.push(path.clone());

    let base_dir = path
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .to_path_buf();

    for (idx, raw) in
      text.lines().enumerate()
    {
      let parsed = parse_rc_line(raw)
        .with_context(|| {
          format!(
            "{}:{}",
            path.display(),
            idx + 1
          )
        })?;

      match parsed {
        | None => {}
        | Some(RcLine::Include(target)) => {
          let target = resolve_include_path(
            &base_dir, target
          )?;
          if !target.exists() {
            warn!(include = %target.display(), "included rc file missing");
            continue;
          }
          debug!(from = %path.display(), include = %target.display(), "following include");
          self.load_file(&target)?;
        }
        | Some(RcLine::Setting(key, value)) => {
          trace!(key, value, "rc setting");
          self.map.insert(
            key.to_string(),
            value.to_string()
          );
        }
      }
    }

    Ok(())
  }
}

enum RcLine<'a> {
  Include(&'a str),
  Setting(&'a str, &'a str)
}

/// Blank lines and comments yield `None`.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<Option<RcLine<'_>>> {
  let line = raw
    .split_once('#')
    .map_or(raw, |(before, _)| before)
    .trim();
  if line.is_empty() {
    return Ok(None);
  }

  if let Some(target) =
    line.strip_prefix("include ")
  {
    return Ok(Some(RcLine::Include(
      target.trim()
    )));
  }

  match line.split_once('=') {
    | Some((key, value))
      if !key.trim().is_empty() =>
    {
      Ok(Some(RcLine::Setting(
        key.trim(),
        value.trim()
      )))
    }
    | _ => Err(anyhow!(
      "expected `key = value` or `include \
       <path>`, got {raw:?}"
    ))
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
  let dir = match override_dir {
    | Some(path) => path.to_path_buf(),
    | None => expand_tilde(Path::new(
      &cfg.get_or(
        "data.location",
        "~/.wander"
      )
    ))
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "cannot create data directory {}",
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
    std::env::var("WANDERRC")
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
       directory; skipping ~/.wanderrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".wanderrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn resolve_include_path(
  base_dir: &Path,
  target: &str
) -> anyhow::Result<PathBuf> {
  if target.is_empty() {
    return Err(anyhow!(
      "include needs a path"
    ));
  }
  let expanded =
    expand_tilde(Path::new(target));
  Ok(if expanded.is_absolute() {
    expanded
  } else {
    base_dir.join(expanded)
  })
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  match path.strip_prefix("~") {
    | Ok(rest) => dirs::home_dir()
      .map(|home| home.join(rest))
      .unwrap_or_else(|| path.to_path_buf()),
    | Err(_) => path.to_path_buf()
  }
}
