use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::anyhow;
use chrono::format::{
  Item,
  StrftimeItems
};
use chrono::{
  DateTime,
  Datelike,
  Days,
  NaiveDate,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tracing::trace;

const TIMEZONE_CONFIG_FILE: &str =
  "wander-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "WANDER_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "WANDER_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "Asia/Kolkata";

pub const DEFAULT_LOCALE_DATE_FORMAT:
  &str = "%-m/%-d/%Y";

const WEEKEND_KEYWORDS: &[&str] = &[
  "weekend",
  "saturday",
  "sunday",
  "sat & sun",
  "sat-sun",
  "sat - sun",
  "sat/sun",
  "sat and sun",
  "sat, sun"
];

const UPCOMING_WEEKEND_PHRASES: &[&str] =
  &[
    "this weekend",
    "upcoming weekend",
    "coming weekend"
  ];

const MONTH_NAMES: [(&str, &str); 12] = [
  ("jan", "january"),
  ("feb", "february"),
  ("mar", "march"),
  ("apr", "april"),
  ("may", "may"),
  ("jun", "june"),
  ("jul", "july"),
  ("aug", "august"),
  ("sep", "september"),
  ("oct", "october"),
  ("nov", "november"),
  ("dec", "december")
];

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

/// Calendar date of `now` in the
/// project timezone. This is "today"
/// for the date heuristics.
#[must_use]
pub fn project_today(
  now: DateTime<Utc>
) -> NaiveDate {
  now
    .with_timezone(project_timezone())
    .date_naive()
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) = parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &PathBuf
) -> Option<Tz> {
  if !path.exists() {
    tracing::debug!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Rejects strftime strings chrono
/// cannot render.
pub fn validate_date_format(
  format: &str
) -> anyhow::Result<()> {
  if format.trim().is_empty() {
    return Err(anyhow!(
      "date format cannot be empty"
    ));
  }
  if StrftimeItems::new(format)
    .any(|item| {
      matches!(item, Item::Error)
    })
  {
    return Err(anyhow!(
      "invalid date format: {format}"
    ));
  }
  Ok(())
}

/// Renders `date` the way listings
/// spell dates. Returns an empty string
/// if the format cannot be rendered.
#[must_use]
pub fn format_locale_date(
  date: NaiveDate,
  format: &str
) -> String {
  let mut out = String::new();
  if write!(out, "{}", date.format(format))
    .is_err()
  {
    return String::new();
  }
  out
}

/// Saturday and Sunday of the weekend
/// that is current or next relative to
/// `today`.
#[must_use]
pub fn weekend_window(
  today: NaiveDate
) -> (NaiveDate, NaiveDate) {
  match today.weekday() {
    | Weekday::Sun => {
      let saturday = today
        .checked_sub_days(Days::new(1))
        .unwrap_or(today);
      (saturday, today)
    }
    | Weekday::Sat => {
      let sunday = today
        .checked_add_days(Days::new(1))
        .unwrap_or(today);
      (today, sunday)
    }
    | other => {
      let delta = Weekday::Sat
        .num_days_from_monday()
        - other.num_days_from_monday();
      let saturday = today
        .checked_add_days(Days::new(
          u64::from(delta)
        ))
        .unwrap_or(today);
      let sunday = saturday
        .checked_add_days(Days::new(1))
        .unwrap_or(saturday);
      (saturday, sunday)
    }
  }
}

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq
)]
pub struct DateClass {
  pub is_today:   bool,
  pub is_weekend: bool
}

/// Classifies the free-text date of a
/// listing relative to a reference day.
pub trait DateClassifier {
  fn classify(
    &self,
    text: &str,
    reference: NaiveDate
  ) -> DateClass;
}

/// Substring and pattern heuristics
/// over listing date text. No calendar
/// parsing happens here.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
  date_format: String
}

impl Default for HeuristicClassifier {
  fn default() -> Self {
    Self {
      date_format:
        DEFAULT_LOCALE_DATE_FORMAT
          .to_string()
    }
  }
}

impl HeuristicClassifier {
  pub fn new(
    date_format: &str
  ) -> anyhow::Result<Self> {
    validate_date_format(date_format)?;
    Ok(Self {
      date_format: date_format
        .to_string()
    })
  }

  #[must_use]
  pub fn is_today(
    &self,
    text: &str,
    today: NaiveDate
  ) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
      return false;
    }
    trimmed
      == format_locale_date(
        today,
        &self.date_format
      )
      || trimmed
        .to_lowercase()
        .contains("today")
  }

  #[must_use]
  pub fn is_weekend(
    &self,
    text: &str,
    today: NaiveDate
  ) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
      return false;
    }

    let lower = trimmed.to_lowercase();
    let (saturday, sunday) =
      weekend_window(today);

    if WEEKEND_KEYWORDS
      .iter()
      .any(|kw| lower.contains(kw))
    {
      trace!(text, rule = "keyword", "weekend match");
      return true;
    }

    if trimmed
      == format_locale_date(
        saturday,
        &self.date_format
      )
      || trimmed
        == format_locale_date(
          sunday,
          &self.date_format
        )
    {
      trace!(text, rule = "locale-date", "weekend match");
      return true;
    }

    let weekend_days =
      [saturday.day(), sunday.day()];

    if contains_day_number(
      trimmed,
      &weekend_days
    ) {
      trace!(text, rule = "day-number", "weekend match");
      return true;
    }

    if mentions_month(
      &lower,
      today.month()
    ) && weekend_days.iter().any(
      |day| {
        lower.contains(&day.to_string())
      }
    ) {
      trace!(text, rule = "month-and-day", "weekend match");
      return true;
    }

    if UPCOMING_WEEKEND_PHRASES
      .iter()
      .any(|p| lower.contains(p))
    {
      trace!(text, rule = "upcoming-phrase", "weekend match");
      return true;
    }

    if matches_range_pattern(
      &lower, saturday, sunday
    ) {
      trace!(text, rule = "range-pattern", "weekend match");
      return true;
    }

    false
  }
}

impl DateClassifier
  for HeuristicClassifier
{
  fn classify(
    &self,
    text: &str,
    reference: NaiveDate
  ) -> DateClass {
    DateClass {
      is_today:   self
        .is_today(text, reference),
      is_weekend: self
        .is_weekend(text, reference)
    }
  }
}

// Any digit run counts, so prices and
// street numbers can match too.
fn contains_day_number(
  text: &str,
  days: &[u32]
) -> bool {
  let Ok(digits_re) = Regex::new(r"\d+")
  else {
    return false;
  };
  digits_re.find_iter(text).any(|m| {
    m.as_str()
      .parse::<u32>()
      .map(|n| days.contains(&n))
      .unwrap_or(false)
  })
}

fn month_names(
  month: u32
) -> Option<(&'static str, &'static str)>
{
  let idx =
    usize::try_from(month).ok()?;
  MONTH_NAMES
    .get(idx.checked_sub(1)?)
    .copied()
}

fn mentions_month(
  lower: &str,
  month: u32
) -> bool {
  month_names(month)
    .map(|(short, long)| {
      lower.contains(short)
        || lower.contains(long)
    })
    .unwrap_or(false)
}

fn month_alternation(
  month: u32
) -> Option<String> {
  let (short, long) =
    month_names(month)?;
  if short == long {
    Some(short.to_string())
  } else {
    Some(format!("{long}|{short}"))
  }
}

fn matches_range_pattern(
  lower: &str,
  saturday: NaiveDate,
  sunday: NaiveDate
) -> bool {
  let mut patterns = Vec::new();

  for day in [saturday, sunday] {
    patterns.push(format!(
      r"\b{}/{}\b",
      day.month(),
      day.day()
    ));
    if let Some(months) =
      month_alternation(day.month())
    {
      patterns.push(format!(
        r"\b(?:{months})\.?\s+{}\b",
        day.day()
      ));
    }
  }

  if let Some(months) =
    month_alternation(saturday.month())
  {
    patterns.push(format!(
      r"\b(?:{months})\.?\s+{}\s*[-–]\s*{}\b",
      saturday.day(),
      sunday.day()
    ));
    patterns.push(format!(
      r"\b{}\s*[-–]\s*{}\s+(?:{months})\b",
      saturday.day(),
      sunday.day()
    ));
  }

  patterns.iter().any(|pattern| {
    Regex::new(pattern)
      .map(|re| re.is_match(lower))
      .unwrap_or(false)
  })
}

/// Turns a 24-hour `H:MM` listing time
/// into `h:mm AM/PM`.
///
/// Hours 50-59 are placeholder values
/// and yield an empty string, as does
/// anything unparseable. Text already
/// carrying AM/PM is returned as-is.
#[must_use]
pub fn format_time(raw: &str) -> String {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return String::new();
  }

  let leading_hour =
    leading_number(trimmed);
  if leading_hour
    .map(is_sentinel_hour)
    .unwrap_or(false)
  {
    return String::new();
  }

  if has_meridiem(trimmed) {
    return raw.to_string();
  }

  let Some((hour, minute)) =
    parse_clock(trimmed)
  else {
    return String::new();
  };

  let suffix =
    if hour >= 12 { "PM" } else { "AM" };
  let display_hour = match hour % 12 {
    | 0 => 12,
    | h => h
  };
  format!(
    "{display_hour}:{minute:02} {suffix}"
  )
}

fn is_sentinel_hour(hour: u32) -> bool {
  (50..=59).contains(&hour)
}

fn leading_number(
  text: &str
) -> Option<u32> {
  let digits: String = text
    .chars()
    .take_while(|c| c.is_ascii_digit())
    .collect();
  if digits.is_empty() {
    return None;
  }
  digits.parse().ok()
}

fn has_meridiem(text: &str) -> bool {
  Regex::new(
    r"(?i)(?:^|[^a-z])[ap]\.?m\b"
  )
  .map(|re| re.is_match(text))
  .unwrap_or(false)
}

fn parse_clock(
  text: &str
) -> Option<(u32, u32)> {
  let clock_re = Regex::new(
    r"^(?P<hour>\d{1,2}):(?P<minute>\d{2})(?::\d{2})?$"
  )
  .ok()?;
  let captures =
    clock_re.captures(text)?;

  let hour = captures
    .name("hour")?
    .as_str()
    .parse::<u32>()
    .ok()?;
  let minute = captures
    .name("minute")?
    .as_str()
    .parse::<u32>()
    .ok()?;

  if hour > 23 || minute > 59 {
    return None;
  }
  Some((hour, minute))
}
