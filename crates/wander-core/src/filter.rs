use std::collections::{
  BTreeMap,
  BTreeSet
};
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use tracing::{
  debug,
  trace
};

use crate::activity::Activity;
use crate::config::Config;
use crate::datetime::{
  DateClassifier,
  HeuristicClassifier
};

#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq
)]
pub enum SortOption {
  #[default]
  Popular,
  Newest,
  PriceLowHigh,
  PriceHighLow
}

impl SortOption {
  /// Unknown identifiers sort as
  /// `popular`.
  pub fn from_id(id: &str) -> Self {
    match id
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "newest" => Self::Newest,
      | "price_low_high" => {
        Self::PriceLowHigh
      }
      | "price_high_low" => {
        Self::PriceHighLow
      }
      | _ => Self::Popular
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      | Self::Popular => "popular",
      | Self::Newest => "newest",
      | Self::PriceLowHigh => {
        "price_low_high"
      }
      | Self::PriceHighLow => {
        "price_high_low"
      }
    }
  }
}

/// Listing tab.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq
)]
pub enum SectionKind {
  #[default]
  All,
  UniqueExperiences,
  DateIdeas
}

impl FromStr for SectionKind {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "" | "all" => Ok(Self::All),
      | "unique-experiences"
      | "unique_experiences" => {
        Ok(Self::UniqueExperiences)
      }
      | "date-ideas" | "date_ideas" => {
        Ok(Self::DateIdeas)
      }
      | other => {
        Err(anyhow!(
          "unknown section: {other} \
           (expected all, \
           unique-experiences or \
           date-ideas)"
        ))
      }
    }
  }
}

impl fmt::Display for SectionKind {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(match self {
      | Self::All => "all",
      | Self::UniqueExperiences => {
        "unique-experiences"
      }
      | Self::DateIdeas => "date-ideas"
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuickFilter {
  Free,
  Today,
  Weekend,
  Tag { id: String, tag: String }
}

/// Maps tag-backed quick filter ids to
/// the tag a listing must carry.
#[derive(Debug, Clone)]
pub struct QuickFilterMap {
  tags: BTreeMap<String, String>
}

impl Default for QuickFilterMap {
  fn default() -> Self {
    Self::from_config(&Config::default())
  }
}

impl QuickFilterMap {
  /// Ids are matched case-insensitively,
  /// like the built-in filters.
  pub fn new(
    tags: BTreeMap<String, String>
  ) -> Self {
    Self {
      tags: tags
        .into_iter()
        .map(|(id, tag)| {
          (id.trim().to_ascii_lowercase(), tag)
        })
        .collect()
    }
  }

  pub fn from_config(
    cfg: &Config
  ) -> Self {
    Self::new(cfg.quick_filter_tags())
  }

  pub fn resolve(
    &self,
    id: &str
  ) -> Option<QuickFilter> {
    let id = id.trim().to_ascii_lowercase();
    match id.as_str() {
      | "free" => Some(QuickFilter::Free),
      | "today" => {
        Some(QuickFilter::Today)
      }
      | "weekend" => {
        Some(QuickFilter::Weekend)
      }
      | _ => {
        let tag = self.tags.get(&id)?.clone();
        Some(QuickFilter::Tag { id, tag })
      }
    }
  }

  pub fn ids(
    &self
  ) -> impl Iterator<Item = &String> {
    self.tags.keys()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionTags {
  pub unique_experiences: String,
  pub date_ideas:         String
}

impl Default for SectionTags {
  fn default() -> Self {
    Self::from_config(&Config::default())
  }
}

impl SectionTags {
  pub fn from_config(
    cfg: &Config
  ) -> Self {
    Self {
      unique_experiences: cfg.get_or(
        "section.unique_experiences",
        "1"
      ),
      date_ideas:         cfg.get_or(
        "section.date_ideas",
        "2"
      )
    }
  }

  fn tag_for(
    &self,
    section: SectionKind
  ) -> Option<&str> {
    match section {
      | SectionKind::All => None,
      | SectionKind::UniqueExperiences => {
        Some(&self.unique_experiences)
      }
      | SectionKind::DateIdeas => {
        Some(&self.date_ideas)
      }
    }
  }
}

/// Criteria chosen by the user. An empty
/// category set means "all".
#[derive(Debug, Clone, Default)]
pub struct FilterState {
  pub categories:    BTreeSet<String>,
  pub quick_filters: BTreeSet<String>,
  pub search:        String,
  pub sort:          SortOption,
  pub section:       SectionKind
}

pub struct Pipeline {
  classifier:    Box<dyn DateClassifier>,
  quick_filters: QuickFilterMap,
  sections:      SectionTags,
  featured_tag:  String
}

impl fmt::Debug for Pipeline {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.debug_struct("Pipeline")
      .field(
        "quick_filters",
        &self.quick_filters
      )
      .field("sections", &self.sections)
      .field(
        "featured_tag",
        &self.featured_tag
      )
      .finish_non_exhaustive()
  }
}

impl Default for Pipeline {
  fn default() -> Self {
    Self::new(Box::new(
      HeuristicClassifier::default()
    ))
  }
}

impl Pipeline {
  pub fn new(
    classifier: Box<dyn DateClassifier>
  ) -> Self {
    Self {
      classifier,
      quick_filters: QuickFilterMap::default(),
      sections: SectionTags::default(),
      featured_tag: "featured"
        .to_string()
    }
  }

  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let classifier =
      HeuristicClassifier::new(
        &cfg.get_or(
          "locale.date_format",
          crate::datetime::DEFAULT_LOCALE_DATE_FORMAT
        )
      )?;
    Ok(Self {
      classifier:    Box::new(classifier),
      quick_filters:
        QuickFilterMap::from_config(cfg),
      sections:
        SectionTags::from_config(cfg),
      featured_tag:  cfg
        .get_or("featured.tag", "featured")
    })
  }

  pub fn with_quick_filters(
    mut self,
    quick_filters: QuickFilterMap
  ) -> Self {
    self.quick_filters = quick_filters;
    self
  }

  pub fn quick_filters(
    &self
  ) -> &QuickFilterMap {
    &self.quick_filters
  }

  /// Filters and orders `activities`
  /// for display. The input is left
  /// untouched; survivors are cloned.
  #[tracing::instrument(skip(
    self, activities, filters
  ), fields(input = activities.len()))]
  pub fn apply(
    &self,
    activities: &[Activity],
    filters: &FilterState,
    today: NaiveDate
  ) -> Vec<Activity> {
    let quick: Vec<QuickFilter> = filters
      .quick_filters
      .iter()
      .filter_map(|id| {
        let resolved =
          self.quick_filters.resolve(id);
        if resolved.is_none() {
          debug!(id = %id, "ignoring unknown quick filter");
        }
        resolved
      })
      .collect();
    let needle =
      filters.search.trim().to_lowercase();
    let section_tag = self
      .sections
      .tag_for(filters.section);

    let mut out: Vec<Activity> =
      activities
        .iter()
        .filter(|activity| {
          section_tag
            .map(|tag| activity.has_tag(tag))
            .unwrap_or(true)
        })
        .filter(|activity| {
          matches_categories(
            activity,
            &filters.categories
          )
        })
        .filter(|activity| {
          quick.iter().all(|qf| {
            self.matches_quick_filter(
              qf, activity, today
            )
          })
        })
        .filter(|activity| {
          matches_search(activity, &needle)
        })
        .cloned()
        .collect();

    sort_activities(
      &mut out,
      filters.sort,
      &self.featured_tag
    );

    debug!(
      output = out.len(),
      sort = filters.sort.as_str(),
      "filter pipeline finished"
    );
    out
  }

  fn matches_quick_filter(
    &self,
    filter: &QuickFilter,
    activity: &Activity,
    today: NaiveDate
  ) -> bool {
    let ok = match filter {
      | QuickFilter::Free => {
        activity
          .price_range
          .to_lowercase()
          .contains("free")
      }
      | QuickFilter::Today => {
        self
          .classifier
          .classify(&activity.date, today)
          .is_today
      }
      | QuickFilter::Weekend => {
        self
          .classifier
          .classify(&activity.date, today)
          .is_weekend
      }
      | QuickFilter::Tag {
        tag, ..
      } => activity.has_tag(tag)
    };

    trace!(filter = ?filter, id = %activity.id, ok, "quick filter evaluation");
    ok
  }
}

fn matches_categories(
  activity: &Activity,
  selected: &BTreeSet<String>
) -> bool {
  if selected.is_empty() {
    return true;
  }
  activity
    .category_ids
    .iter()
    .any(|id| selected.contains(id))
}

fn matches_search(
  activity: &Activity,
  needle: &str
) -> bool {
  if needle.is_empty() {
    return true;
  }
  let hit = |text: &str| {
    text.to_lowercase().contains(needle)
  };
  hit(&activity.title)
    || hit(&activity.description)
    || hit(&activity.location)
    || activity.tags.iter().any(|t| hit(t))
}

// `sort_by` is stable, so ties keep
// their input order.
fn sort_activities(
  activities: &mut [Activity],
  sort: SortOption,
  featured_tag: &str
) {
  match sort {
    | SortOption::PriceLowHigh => {
      activities.sort_by(|a, b| {
        a.price_range.cmp(&b.price_range)
      });
    }
    | SortOption::PriceHighLow => {
      activities.sort_by(|a, b| {
        b.price_range.cmp(&a.price_range)
      });
    }
    | SortOption::Newest => {
      activities.sort_by(|a, b| {
        b.updated_at.cmp(&a.updated_at)
      });
    }
    | SortOption::Popular => {
      activities.sort_by_key(|a| {
        !a.has_tag(featured_tag)
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::{
    BTreeMap,
    BTreeSet
  };

  use chrono::{
    NaiveDate,
    TimeZone,
    Utc
  };

  use super::{
    FilterState,
    Pipeline,
    QuickFilter,
    QuickFilterMap,
    SectionKind,
    SortOption
  };
  use crate::activity::{
    Activity,
    ActivityRow
  };

  fn activity(
    id: &str,
    title: &str
  ) -> Activity {
    Activity::from(ActivityRow {
      id: Some(id.to_string()),
      title: Some(title.to_string()),
      ..ActivityRow::default()
    })
  }

  fn ids(out: &[Activity]) -> Vec<&str> {
    out.iter().map(|a| a.id.as_str()).collect()
  }

  // 2026-10-21 is a Wednesday.
  fn wednesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 21)
      .expect("valid date")
  }

  fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  fn sample() -> Vec<Activity> {
    let mut pottery =
      activity("a", "Pottery Night");
    pottery.price_range =
      "₹0 - Free entry".to_string();
    pottery.category_ids = vec!["arts".to_string()];
    pottery.tags = vec!["3".to_string()];
    pottery.date = "10/24/2026".to_string();

    let mut gig = activity("b", "Indie Gig");
    gig.price_range = "₹200".to_string();
    gig.category_ids = vec!["music".to_string()];
    gig.tags = vec!["featured".to_string(), "5".to_string()];
    gig.date = "Monday workshop".to_string();
    gig.location = "Indiranagar".to_string();

    let mut walk = activity("c", "Heritage Walk");
    walk.price_range = "₹500".to_string();
    walk.category_ids =
      vec!["outdoors".to_string(), "arts".to_string()];
    walk.tags = vec!["featured".to_string(), "1".to_string()];
    walk.date = "Today".to_string();
    walk.description = "Old city pottery lanes".to_string();

    vec![pottery, gig, walk]
  }

  #[test]
  fn empty_category_set_is_a_noop() {
    let pipeline = Pipeline::default();
    let input = sample();
    let filters = FilterState {
      sort: SortOption::Newest,
      ..FilterState::default()
    };
    let out =
      pipeline.apply(&input, &filters, wednesday());
    assert_eq!(ids(&out), vec!["a", "b", "c"]);
  }

  #[test]
  fn category_filter_keeps_intersections() {
    let pipeline = Pipeline::default();
    let filters = FilterState {
      categories: set(&["arts"]),
      ..FilterState::default()
    };
    let out =
      pipeline.apply(&sample(), &filters, wednesday());
    assert_eq!(ids(&out), vec!["c", "a"]);
  }

  #[test]
  fn popular_puts_featured_first_stably() {
    let pipeline = Pipeline::default();
    let out = pipeline.apply(
      &sample(),
      &FilterState::default(),
      wednesday()
    );
    assert_eq!(ids(&out), vec!["b", "c", "a"]);
  }

  #[test]
  fn pipeline_is_idempotent_and_pure() {
    let pipeline = Pipeline::default();
    let input = sample();
    let before = input.clone();
    let filters = FilterState {
      quick_filters: set(&["weekend"]),
      search: "o".to_string(),
      sort: SortOption::PriceHighLow,
      ..FilterState::default()
    };
    let first =
      pipeline.apply(&input, &filters, wednesday());
    let second =
      pipeline.apply(&input, &filters, wednesday());
    assert_eq!(first, second);
    assert_eq!(input, before);
  }

  #[test]
  fn free_quick_filter() {
    let pipeline = Pipeline::default();
    let filters = FilterState {
      quick_filters: set(&["free"]),
      ..FilterState::default()
    };
    let out =
      pipeline.apply(&sample(), &filters, wednesday());
    assert_eq!(ids(&out), vec!["a"]);
  }

  #[test]
  fn weekend_and_today_quick_filters() {
    let pipeline = Pipeline::default();
    let weekend = FilterState {
      quick_filters: set(&["weekend"]),
      ..FilterState::default()
    };
    assert_eq!(
      ids(&pipeline.apply(&sample(), &weekend, wednesday())),
      vec!["a"]
    );

    let today = FilterState {
      quick_filters: set(&["today"]),
      ..FilterState::default()
    };
    assert_eq!(
      ids(&pipeline.apply(&sample(), &today, wednesday())),
      vec!["c"]
    );
  }

  #[test]
  fn quick_filters_combine_with_and() {
    let pipeline = Pipeline::default();
    let filters = FilterState {
      quick_filters: set(&["free", "plans"]),
      ..FilterState::default()
    };
    assert!(
      pipeline
        .apply(&sample(), &filters, wednesday())
        .is_empty()
    );
  }

  #[test]
  fn tag_quick_filters_follow_the_mapping() {
    let pipeline = Pipeline::default();
    let creative = FilterState {
      quick_filters: set(&["creative"]),
      ..FilterState::default()
    };
    assert_eq!(
      ids(&pipeline.apply(&sample(), &creative, wednesday())),
      vec!["a"]
    );

    let remapped = Pipeline::default().with_quick_filters(
      QuickFilterMap::new(BTreeMap::from([(
        "creative".to_string(),
        "5".to_string()
      )]))
    );
    assert_eq!(
      ids(&remapped.apply(&sample(), &creative, wednesday())),
      vec!["b"]
    );
  }

  #[test]
  fn quick_filter_ids_ignore_case() {
    let map = QuickFilterMap::new(
      BTreeMap::from([(
        "Outdoors".to_string(),
        "9".to_string()
      )])
    );
    assert_eq!(
      map.resolve("FREE"),
      Some(QuickFilter::Free)
    );
    assert_eq!(
      map.resolve(" outdoors "),
      Some(QuickFilter::Tag {
        id:  "outdoors".to_string(),
        tag: "9".to_string()
      })
    );
    assert_eq!(map.resolve("OUTDOORS"), map.resolve("outdoors"));

    let pipeline = Pipeline::default();
    let creative = FilterState {
      quick_filters: set(&["Creative"]),
      ..FilterState::default()
    };
    assert_eq!(
      ids(&pipeline.apply(&sample(), &creative, wednesday())),
      vec!["a"]
    );
  }

  #[test]
  fn unknown_quick_filter_is_ignored() {
    let pipeline = Pipeline::default();
    let filters = FilterState {
      quick_filters: set(&["nonsense"]),
      ..FilterState::default()
    };
    assert_eq!(
      pipeline.apply(&sample(), &filters, wednesday()).len(),
      3
    );
  }

  #[test]
  fn search_spans_title_description_location_and_tags() {
    let pipeline = Pipeline::default();
    let search = |q: &str| {
      let filters = FilterState {
        search: q.to_string(),
        ..FilterState::default()
      };
      ids(&pipeline.apply(&sample(), &filters, wednesday()))
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>()
    };

    assert_eq!(search("pottery"), vec!["c", "a"]);
    assert_eq!(search("INDIRA"), vec!["b"]);
    assert_eq!(search("featured"), vec!["b", "c"]);
    assert!(search("zzz").is_empty());
  }

  #[test]
  fn price_sorts_are_lexicographic() {
    let pipeline = Pipeline::default();
    let low = FilterState {
      sort: SortOption::PriceLowHigh,
      ..FilterState::default()
    };
    assert_eq!(
      ids(&pipeline.apply(&sample(), &low, wednesday())),
      vec!["a", "b", "c"]
    );

    let high = FilterState {
      sort: SortOption::PriceHighLow,
      ..FilterState::default()
    };
    assert_eq!(
      ids(&pipeline.apply(&sample(), &high, wednesday())),
      vec!["c", "b", "a"]
    );
  }

  #[test]
  fn newest_orders_by_timestamp_missing_last() {
    let pipeline = Pipeline::default();
    let mut input = sample();
    input[0].updated_at = Some(
      Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap()
    );
    input[2].updated_at = Some(
      Utc.with_ymd_and_hms(2026, 10, 5, 0, 0, 0).unwrap()
    );
    let filters = FilterState {
      sort: SortOption::Newest,
      ..FilterState::default()
    };
    assert_eq!(
      ids(&pipeline.apply(&input, &filters, wednesday())),
      vec!["c", "a", "b"]
    );
  }

  #[test]
  fn section_filters_by_section_tag() {
    let pipeline = Pipeline::default();
    let filters = FilterState {
      section: SectionKind::UniqueExperiences,
      ..FilterState::default()
    };
    assert_eq!(
      ids(&pipeline.apply(&sample(), &filters, wednesday())),
      vec!["c"]
    );
    assert!(
      "date-ideas".parse::<SectionKind>().is_ok()
    );
    assert!("bogus".parse::<SectionKind>().is_err());
  }

  #[test]
  fn sort_ids_fall_back_to_popular() {
    assert_eq!(
      SortOption::from_id("price_high_low"),
      SortOption::PriceHighLow
    );
    assert_eq!(
      SortOption::from_id("whatever"),
      SortOption::Popular
    );
  }

  #[test]
  fn empty_input_yields_empty_output() {
    let pipeline = Pipeline::default();
    assert!(
      pipeline
        .apply(&[], &FilterState::default(), wednesday())
        .is_empty()
    );
  }
}
