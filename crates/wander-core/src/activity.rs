use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PLACEHOLDER_IMAGE: &str = "/placeholder.svg";
pub const DEFAULT_PRICE_RANGE: &str = "Free";
pub const DEFAULT_LOCATION: &str = "Bangalore";

/// One listing as the pipeline and views see it. Absent wire fields have
/// already been replaced by their fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub title: String,
    pub image: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub price_range: String,
    pub location: String,
    pub date: String,
    pub time: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_link: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category_ids: Vec<String>,
}

/// Row shape of the `activities` collection on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_range: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_ids: Option<Vec<String>>,
}

impl From<ActivityRow> for Activity {
    fn from(row: ActivityRow) -> Self {
        Self {
            id: row.id.unwrap_or_default(),
            title: row.title.unwrap_or_default(),
            image: non_empty_or(row.image_url, PLACEHOLDER_IMAGE),
            tags: row.tags.unwrap_or_default(),
            price_range: non_empty_or(row.price_range, DEFAULT_PRICE_RANGE),
            location: non_empty_or(row.location, DEFAULT_LOCATION),
            date: row.date.unwrap_or_default(),
            time: row.time.unwrap_or_default(),
            description: row.description.unwrap_or_default(),
            map_link: row.map_link,
            contact_info: row.contact_info,
            instagram_link: row.instagram_link,
            ticket_link: row.ticket_link,
            updated_at: row.updated_at.or(row.created_at),
            category_ids: row.category_ids.unwrap_or_default(),
        }
    }
}

impl From<&Activity> for ActivityRow {
    fn from(activity: &Activity) -> Self {
        Self {
            id: Some(activity.id.clone()),
            title: Some(activity.title.clone()),
            image_url: Some(activity.image.clone()),
            tags: Some(activity.tags.clone()),
            price_range: Some(activity.price_range.clone()),
            location: Some(activity.location.clone()),
            date: Some(activity.date.clone()),
            time: Some(activity.time.clone()),
            description: Some(activity.description.clone()),
            map_link: activity.map_link.clone(),
            contact_info: activity.contact_info.clone(),
            instagram_link: activity.instagram_link.clone(),
            ticket_link: activity.ticket_link.clone(),
            created_at: None,
            updated_at: activity.updated_at,
            category_ids: Some(activity.category_ids.clone()),
        }
    }
}

impl Activity {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

fn non_empty_or(value: Option<String>, fallback: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => fallback.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}
