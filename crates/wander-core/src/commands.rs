use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::activity::{Activity, ActivityRow, ContactSubmission};
use crate::cli::{ActivityFields, Command, ListArgs};
use crate::config::Config;
use crate::datastore::{
    Backend, Collection, DataStore, Query, Row, fetch_activities, fetch_activity, fetch_categories,
    fetch_tags, submit_contact, to_row,
};
use crate::datetime::{DEFAULT_LOCALE_DATE_FORMAT, project_today};
use crate::fetch::FetchSequencer;
use crate::filter::{FilterState, Pipeline, SortOption};
use crate::import::parse_event_page;
use crate::render::{Renderer, share_text};
use crate::storage::{Favorites, FileStore, dismiss_install_prompt, install_prompt_dismissed};

const EDITABLE_COLUMNS: &[&str] = &[
    "title",
    "image_url",
    "tags",
    "price_range",
    "location",
    "date",
    "time",
    "description",
    "map_link",
    "contact_info",
    "instagram_link",
    "ticket_link",
    "category_ids",
];

const LIST_COLUMNS: &[&str] = &["tags", "category_ids"];

#[instrument(skip(store, kv, cfg, renderer, command))]
pub fn dispatch(
    store: &DataStore,
    kv: &FileStore,
    cfg: &Config,
    renderer: &mut Renderer,
    command: Option<Command>,
) -> anyhow::Result<()> {
    let today = project_today(Utc::now());
    let command = command.unwrap_or(Command::List {
        filters: ListArgs::default(),
        json: false,
    });
    debug!(?command, %today, "dispatching command");

    match command {
        Command::List { filters, json } => cmd_list(store, kv, cfg, renderer, &filters, json, today),
        Command::Export { filters } => cmd_list(store, kv, cfg, renderer, &filters, true, today),
        Command::Show { id } => cmd_show(store, kv, renderer, &id),
        Command::Share { id } => cmd_share(store, cfg, &id),
        Command::Like { id } => cmd_like(store, kv, &id),
        Command::Favorites => cmd_favorites(store, kv, renderer),
        Command::Categories => cmd_categories(store, renderer),
        Command::Tags => cmd_tags(store),
        Command::Add { title, fields } => cmd_add(store, &title, fields),
        Command::Modify { id, changes } => cmd_modify(store, &id, &changes),
        Command::Delete { id } => cmd_delete(store, kv, &id),
        Command::Import { source, dry_run } => cmd_import(store, cfg, &source, dry_run),
        Command::Contact {
            name,
            email,
            subject,
            message,
        } => cmd_contact(
            store,
            ContactSubmission {
                name,
                email,
                subject,
                message,
                created_at: None,
            },
        ),
        Command::DismissInstall => {
            dismiss_install_prompt(kv)?;
            println!("Install prompt dismissed.");
            Ok(())
        }
    }
}

pub fn filter_state(cfg: &Config, args: &ListArgs) -> anyhow::Result<FilterState> {
    let sort = args
        .sort
        .clone()
        .unwrap_or_else(|| cfg.get_or("default.sort", "popular"));
    Ok(FilterState {
        categories: args.categories.iter().cloned().collect(),
        quick_filters: args.quick.iter().cloned().collect(),
        search: args.search.clone().unwrap_or_default(),
        sort: SortOption::from_id(&sort),
        section: args.section.parse()?,
    })
}

#[instrument(skip(store, kv, cfg, renderer, args))]
fn cmd_list(
    store: &DataStore,
    kv: &FileStore,
    cfg: &Config,
    renderer: &mut Renderer,
    args: &ListArgs,
    json: bool,
    today: NaiveDate,
) -> anyhow::Result<()> {
    info!("command list");

    let pipeline = Pipeline::from_config(cfg)?;
    let filters = filter_state(cfg, args)?;
    for id in &filters.quick_filters {
        if pipeline.quick_filters().resolve(id).is_none() {
            let known: Vec<&String> = pipeline.quick_filters().ids().collect();
            warn!(id = %id, ?known, "unknown quick filter; free, today, weekend or a configured tag filter expected");
        }
    }
    let favorites = Favorites::load(kv)?;

    let sequencer = FetchSequencer::new();
    let Some(mut activities) =
        sequencer.fetch_activities(store, &Query::all().order("created_at", false))?
    else {
        warn!("activity fetch superseded; nothing to render");
        return Ok(());
    };

    if args.liked {
        activities.retain(|a| favorites.is_liked(&a.id));
    }

    let visible = pipeline.apply(&activities, &filters, today);
    debug!(fetched = activities.len(), visible = visible.len(), "listing activities");

    if json {
        println!("{}", serde_json::to_string_pretty(&visible)?);
        return Ok(());
    }

    if visible.is_empty() {
        println!("No activities match.");
        return Ok(());
    }
    renderer.print_activity_table(&visible, &|id: &str| favorites.is_liked(id))?;
    println!();
    println!("{} activit{}", visible.len(), if visible.len() == 1 { "y" } else { "ies" });

    if !install_prompt_dismissed(kv)? {
        eprintln!("Tip: add `wander` to your PATH for quick access. Run `wander dismiss-install` to hide this.");
    }
    Ok(())
}

fn require_activity(store: &DataStore, id: &str) -> anyhow::Result<Activity> {
    fetch_activity(store, id)?.ok_or_else(|| anyhow!("activity not found: {id}"))
}

#[instrument(skip(store, kv, renderer))]
fn cmd_show(
    store: &DataStore,
    kv: &FileStore,
    renderer: &mut Renderer,
    id: &str,
) -> anyhow::Result<()> {
    info!("command show");
    let activity = require_activity(store, id)?;
    let favorites = Favorites::load(kv)?;
    renderer.print_activity_info(&activity, favorites.is_liked(&activity.id))
}

#[instrument(skip(store, cfg))]
fn cmd_share(store: &DataStore, cfg: &Config, id: &str) -> anyhow::Result<()> {
    info!("command share");
    let activity = require_activity(store, id)?;
    let base_url = cfg.get_or("share.base_url", "https://wander.city");
    println!("{}", share_text(&activity, &base_url));
    Ok(())
}

#[instrument(skip(store, kv))]
fn cmd_like(store: &DataStore, kv: &FileStore, id: &str) -> anyhow::Result<()> {
    info!("command like");
    let activity = require_activity(store, id)?;
    let mut favorites = Favorites::load(kv)?;
    if favorites.toggle(&activity.id)? {
        println!("Liked {}.", activity.title);
    } else {
        println!("Removed {} from favorites.", activity.title);
    }
    Ok(())
}

#[instrument(skip(store, kv, renderer))]
fn cmd_favorites(store: &DataStore, kv: &FileStore, renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command favorites");
    let favorites = Favorites::load(kv)?;
    if favorites.ids().is_empty() {
        println!("No favorites yet.");
        return Ok(());
    }

    let mut by_id: BTreeMap<String, Activity> = fetch_activities(store, &Query::all())?
        .into_iter()
        .map(|a| (a.id.clone(), a))
        .collect();
    let mut liked = Vec::with_capacity(favorites.ids().len());
    for id in favorites.ids() {
        match by_id.remove(id) {
            Some(activity) => liked.push(activity),
            None => debug!(id = %id, "liked activity no longer exists"),
        }
    }

    renderer.print_activity_table(&liked, &|_: &str| true)
}

#[instrument(skip(store, renderer))]
fn cmd_categories(store: &DataStore, renderer: &mut Renderer) -> anyhow::Result<()> {
    info!("command categories");
    let categories = fetch_categories(store)?;
    if categories.is_empty() {
        println!("No categories.");
        return Ok(());
    }
    renderer.print_categories(&categories)
}

#[instrument(skip(store))]
fn cmd_tags(store: &DataStore) -> anyhow::Result<()> {
    info!("command tags");
    for tag in fetch_tags(store)? {
        println!("{}\t{}", tag.id, tag.name);
    }
    Ok(())
}

#[instrument(skip(store, fields))]
fn cmd_add(store: &DataStore, title: &str, fields: ActivityFields) -> anyhow::Result<()> {
    info!("command add");
    if title.trim().is_empty() {
        return Err(anyhow!("title cannot be empty"));
    }

    let row = ActivityRow {
        title: Some(title.trim().to_string()),
        image_url: fields.image,
        tags: Some(fields.tags),
        price_range: fields.price,
        location: fields.location,
        date: fields.date,
        time: fields.time,
        description: fields.description,
        map_link: fields.map_link,
        contact_info: fields.contact_info,
        instagram_link: fields.instagram_link,
        ticket_link: fields.ticket_link,
        category_ids: Some(fields.categories),
        ..ActivityRow::default()
    };

    let inserted = store.insert(Collection::Activities, to_row(&row)?)?;
    let id = inserted.get("id").and_then(Value::as_str).unwrap_or("-");
    println!("Created activity {id}.");
    Ok(())
}

/// Turns `column=value` pairs into an update patch. List columns take
/// comma-separated values; an empty value clears the column.
pub fn parse_changes(changes: &[String]) -> anyhow::Result<Row> {
    let mut patch = Row::new();
    for change in changes {
        let (column, value) = change
            .split_once('=')
            .ok_or_else(|| anyhow!("expected COLUMN=VALUE, got: {change}"))?;
        let column = column.trim();
        if !EDITABLE_COLUMNS.contains(&column) {
            return Err(anyhow!(
                "unknown column: {column} (editable: {})",
                EDITABLE_COLUMNS.join(", ")
            ));
        }

        let value = value.trim();
        let json = if value.is_empty() {
            Value::Null
        } else if LIST_COLUMNS.contains(&column) {
            Value::Array(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(s.to_string()))
                    .collect(),
            )
        } else {
            Value::String(value.to_string())
        };
        patch.insert(column.to_string(), json);
    }

    serde_json::from_value::<ActivityRow>(Value::Object(patch.clone()))
        .context("changes do not form a valid activity")?;
    Ok(patch)
}

#[instrument(skip(store, changes))]
fn cmd_modify(store: &DataStore, id: &str, changes: &[String]) -> anyhow::Result<()> {
    info!("command modify");
    let patch = parse_changes(changes)?;
    store.update(Collection::Activities, id, patch)?;
    println!("Modified activity {id}.");
    Ok(())
}

#[instrument(skip(store, kv))]
fn cmd_delete(store: &DataStore, kv: &FileStore, id: &str) -> anyhow::Result<()> {
    info!("command delete");
    store.delete(Collection::Activities, id)?;

    let mut favorites = Favorites::load(kv)?;
    if favorites.is_liked(id) {
        favorites.toggle(id)?;
    }
    println!("Deleted activity {id}.");
    Ok(())
}

#[instrument(skip(store, cfg))]
fn cmd_import(store: &DataStore, cfg: &Config, source: &Path, dry_run: bool) -> anyhow::Result<()> {
    info!("command import");
    let html = if source == Path::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed reading page from stdin")?;
        buf
    } else {
        fs::read_to_string(source).with_context(|| format!("failed to read {}", source.display()))?
    };

    let date_format = cfg.get_or("locale.date_format", DEFAULT_LOCALE_DATE_FORMAT);
    let draft = parse_event_page(&html, &date_format)?;

    if dry_run {
        println!("{}", serde_json::to_string_pretty(&draft)?);
        return Ok(());
    }

    let inserted = store.insert(Collection::Activities, to_row(&draft)?)?;
    let id = inserted.get("id").and_then(Value::as_str).unwrap_or("-");
    println!(
        "Imported activity {id}: {}",
        draft.title.as_deref().unwrap_or("(untitled)")
    );
    Ok(())
}

#[instrument(skip(store, submission))]
fn cmd_contact(store: &DataStore, submission: ContactSubmission) -> anyhow::Result<()> {
    info!("command contact");
    submit_contact(store, &submission)?;
    println!("Thanks, {}! We'll be in touch.", submission.name.trim());
    Ok(())
}
