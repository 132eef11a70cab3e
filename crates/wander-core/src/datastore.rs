use std::cmp::Ordering;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::{Activity, ActivityRow, Category, ContactSubmission, Tag};

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Collection {
    Activities,
    Categories,
    Tags,
    Users,
    ContactSubmissions,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Activities,
        Collection::Categories,
        Collection::Tags,
        Collection::Users,
        Collection::ContactSubmissions,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Activities => "activities",
            Collection::Categories => "categories",
            Collection::Tags => "tags",
            Collection::Users => "users",
            Collection::ContactSubmissions => "contact_submissions",
        }
    }

    fn file_name(&self) -> String {
        format!("{}.data", self.name())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub eq: Vec<(String, Value)>,
    pub order_by: Option<OrderBy>,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.eq.push((column.to_string(), value.into()));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order_by = Some(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    fn matches(&self, row: &Row) -> bool {
        self.eq
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

/// Row-oriented access to the hosted collections.
pub trait Backend {
    fn select(&self, collection: Collection, query: &Query) -> anyhow::Result<Vec<Row>>;
    fn insert(&self, collection: Collection, row: Row) -> anyhow::Result<Row>;
    fn update(&self, collection: Collection, id: &str, patch: Row) -> anyhow::Result<Row>;
    fn delete(&self, collection: Collection, id: &str) -> anyhow::Result<()>;
}

/// File-backed stand-in for the hosted backend: one JSONL file per
/// collection under `data_dir`.
#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
}

impl DataStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        for collection in Collection::ALL {
            let path = data_dir.join(collection.file_name());
            if !path.exists() {
                fs::write(&path, "")
                    .with_context(|| format!("failed to create {}", path.display()))?;
            }
        }

        info!(data_dir = %data_dir.display(), "opened datastore");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, collection: Collection) -> PathBuf {
        self.data_dir.join(collection.file_name())
    }

    fn load(&self, collection: Collection) -> anyhow::Result<Vec<Row>> {
        let path = self.path_for(collection);
        load_jsonl(&path).with_context(|| format!("failed to load {}", collection.name()))
    }

    fn save(&self, collection: Collection, rows: &[Row]) -> anyhow::Result<()> {
        let path = self.path_for(collection);
        save_jsonl_atomic(&path, rows).with_context(|| format!("failed to save {}", collection.name()))
    }
}

impl Backend for DataStore {
    #[tracing::instrument(skip(self, query), fields(collection = collection.name()))]
    fn select(&self, collection: Collection, query: &Query) -> anyhow::Result<Vec<Row>> {
        let mut rows: Vec<Row> = self
            .load(collection)?
            .into_iter()
            .filter(|row| query.matches(row))
            .collect();

        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        debug!(count = rows.len(), "selected rows");
        Ok(rows)
    }

    #[tracing::instrument(skip(self, row), fields(collection = collection.name()))]
    fn insert(&self, collection: Collection, mut row: Row) -> anyhow::Result<Row> {
        let mut rows = self.load(collection)?;

        let id = match row.get("id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        if rows.iter().any(|r| row_id(r) == Some(id.as_str())) {
            return Err(anyhow!("{} already has a row with id {id}", collection.name()));
        }

        let now = timestamp(Utc::now());
        row.insert("id".to_string(), Value::String(id.clone()));
        row.entry("created_at".to_string())
            .or_insert_with(|| Value::String(now.clone()));
        row.insert("updated_at".to_string(), Value::String(now));

        rows.push(row.clone());
        self.save(collection, &rows)?;
        info!(id = %id, "inserted row");
        Ok(row)
    }

    #[tracing::instrument(skip(self, patch), fields(collection = collection.name()))]
    fn update(&self, collection: Collection, id: &str, patch: Row) -> anyhow::Result<Row> {
        let mut rows = self.load(collection)?;
        let row = rows
            .iter_mut()
            .find(|r| row_id(r) == Some(id))
            .ok_or_else(|| anyhow!("{} has no row with id {id}", collection.name()))?;

        for (key, value) in patch {
            if key == "id" {
                continue;
            }
            row.insert(key, value);
        }
        row.insert(
            "updated_at".to_string(),
            Value::String(timestamp(Utc::now())),
        );

        let updated = row.clone();
        self.save(collection, &rows)?;
        info!(id, "updated row");
        Ok(updated)
    }

    #[tracing::instrument(skip(self), fields(collection = collection.name()))]
    fn delete(&self, collection: Collection, id: &str) -> anyhow::Result<()> {
        let mut rows = self.load(collection)?;
        let before = rows.len();
        rows.retain(|r| row_id(r) != Some(id));
        if rows.len() == before {
            return Err(anyhow!("{} has no row with id {id}", collection.name()));
        }
        self.save(collection, &rows)?;
        info!(id, "deleted row");
        Ok(())
    }
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// Missing and null sort first; mixed types fall back to their JSON text.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

pub fn to_row<T: serde::Serialize>(value: &T) -> anyhow::Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("expected a JSON object, got {other}")),
    }
}

fn decode_rows<T: DeserializeOwned>(collection: Collection, rows: Vec<Row>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| {
            let id = row_id(&row).unwrap_or("-").to_string();
            match serde_json::from_value::<T>(Value::Object(row)) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(collection = collection.name(), id = %id, error = %err, "skipping undecodable row");
                    None
                }
            }
        })
        .collect()
}

#[tracing::instrument(skip(backend, query))]
pub fn fetch_activities(backend: &dyn Backend, query: &Query) -> anyhow::Result<Vec<Activity>> {
    let rows = backend.select(Collection::Activities, query)?;
    Ok(decode_rows::<ActivityRow>(Collection::Activities, rows)
        .into_iter()
        .map(Activity::from)
        .collect())
}

#[tracing::instrument(skip(backend))]
pub fn fetch_activity(backend: &dyn Backend, id: &str) -> anyhow::Result<Option<Activity>> {
    let query = Query::all().eq("id", id);
    Ok(fetch_activities(backend, &query)?.into_iter().next())
}

#[tracing::instrument(skip(backend))]
pub fn fetch_categories(backend: &dyn Backend) -> anyhow::Result<Vec<Category>> {
    let rows = backend.select(Collection::Categories, &Query::all().order("name", true))?;
    Ok(decode_rows(Collection::Categories, rows))
}

#[tracing::instrument(skip(backend))]
pub fn fetch_tags(backend: &dyn Backend) -> anyhow::Result<Vec<Tag>> {
    let rows = backend.select(Collection::Tags, &Query::all().order("name", true))?;
    Ok(decode_rows(Collection::Tags, rows))
}

#[tracing::instrument(skip(backend, submission), fields(email = %submission.email))]
pub fn submit_contact(
    backend: &dyn Backend,
    submission: &ContactSubmission,
) -> anyhow::Result<()> {
    if submission.name.trim().is_empty()
        || submission.email.trim().is_empty()
        || submission.message.trim().is_empty()
    {
        return Err(anyhow!("name, email and message are required"));
    }
    if !submission.email.contains('@') {
        return Err(anyhow!("invalid email address: {}", submission.email));
    }
    let row = to_row(submission)?;
    backend.insert(Collection::ContactSubmissions, row)?;
    Ok(())
}

#[tracing::instrument(skip(path))]
fn load_jsonl(path: &Path) -> anyhow::Result<Vec<Row>> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let row: Row = serde_json::from_str(trimmed)
            .with_context(|| format!("failed parsing {} line {}", path.display(), idx + 1))?;
        out.push(row);
    }

    debug!(count = out.len(), "loaded rows from jsonl");
    Ok(out)
}

#[tracing::instrument(skip(path, rows))]
fn save_jsonl_atomic(path: &Path, rows: &[Row]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = rows.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    for row in rows {
        let serialized = serde_json::to_string(row)?;
        writeln!(temp, "{serialized}")?;
    }
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::{Backend, Collection, DataStore, Query, Row, fetch_activities};

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn insert_assigns_id_and_timestamps() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");

        let inserted = store
            .insert(Collection::Activities, row(json!({"title": "Jam"})))
            .expect("insert");
        assert!(inserted.get("id").and_then(|v| v.as_str()).is_some());
        assert!(inserted.contains_key("created_at"));
        assert!(inserted.contains_key("updated_at"));
    }

    #[test]
    fn select_filters_and_orders() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");
        for (id, name, cat) in [("1", "b", "x"), ("2", "a", "x"), ("3", "c", "y")] {
            store
                .insert(
                    Collection::Categories,
                    row(json!({"id": id, "name": name, "group": cat})),
                )
                .expect("insert");
        }

        let rows = store
            .select(
                Collection::Categories,
                &Query::all().eq("group", "x").order("name", false),
            )
            .expect("select");
        let names: Vec<_> = rows
            .iter()
            .filter_map(|r| r.get("name").and_then(|v| v.as_str()))
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn update_and_delete_unknown_ids_fail() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");
        assert!(store.update(Collection::Tags, "nope", Row::new()).is_err());
        assert!(store.delete(Collection::Tags, "nope").is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");
        store
            .insert(Collection::Tags, row(json!({"id": "3", "name": "creative"})))
            .expect("insert");
        assert!(
            store
                .insert(Collection::Tags, row(json!({"id": "3", "name": "again"})))
                .is_err()
        );
    }

    #[test]
    fn undecodable_rows_are_skipped() {
        let temp = tempdir().expect("tempdir");
        let store = DataStore::open(temp.path()).expect("open");
        store
            .insert(Collection::Activities, row(json!({"id": "ok", "title": "Fine"})))
            .expect("insert");
        store
            .insert(Collection::Activities, row(json!({"id": "bad", "tags": "not-a-list"})))
            .expect("insert");

        let activities = fetch_activities(&store, &Query::all()).expect("fetch");
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].id, "ok");
    }
}
