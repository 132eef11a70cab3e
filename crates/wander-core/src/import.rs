use std::collections::HashMap;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::activity::ActivityRow;
use crate::datetime::format_locale_date;

/// Builds a draft activity from an event page's HTML.
///
/// Open Graph meta tags are preferred for display fields; an embedded
/// JSON-LD `Event` supplies schedule, venue and price. Fields the page does
/// not carry stay `None`.
#[instrument(skip(html, date_format), fields(bytes = html.len()))]
pub fn parse_event_page(html: &str, date_format: &str) -> anyhow::Result<ActivityRow> {
    let meta = collect_meta(html)?;
    let event = find_event_json_ld(html)?;
    let ld_str = |key: &str| event.as_ref().and_then(|e| string_field(e, key));

    let title = meta
        .get("og:title")
        .cloned()
        .or_else(|| page_title(html))
        .or_else(|| ld_str("name"));
    let image_url = meta
        .get("og:image")
        .cloned()
        .or_else(|| event.as_ref().and_then(|e| e.get("image")).and_then(first_url));
    let description = meta
        .get("og:description")
        .or_else(|| meta.get("description"))
        .cloned()
        .or_else(|| ld_str("description"));
    let ticket_link = meta.get("og:url").cloned().or_else(|| ld_str("url"));

    let (date, time) = match ld_str("startDate") {
        Some(raw) => split_start_date(&raw, date_format),
        None => (None, None),
    };
    let location = event
        .as_ref()
        .and_then(|e| e.get("location"))
        .and_then(location_name);
    let price_range = event
        .as_ref()
        .and_then(|e| e.get("offers"))
        .and_then(price_text);

    let row = ActivityRow {
        title,
        image_url,
        description,
        ticket_link,
        date,
        time,
        location,
        price_range,
        ..ActivityRow::default()
    };

    if row == ActivityRow::default() {
        return Err(anyhow!("no importable fields found in page"));
    }

    debug!(title = ?row.title, date = ?row.date, "parsed event page");
    Ok(row)
}

fn collect_meta(html: &str) -> anyhow::Result<HashMap<String, String>> {
    let tag_re = Regex::new(r"(?is)<meta\b[^>]*>")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
    let attr_re = Regex::new(r#"(?is)([a-z][a-z0-9:_-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

    let mut out = HashMap::new();
    for tag in tag_re.find_iter(html) {
        let mut key = None;
        let mut content = None;
        for caps in attr_re.captures_iter(tag.as_str()) {
            let Some(name) = caps.get(1) else {
                continue;
            };
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match name.as_str().to_ascii_lowercase().as_str() {
                "property" | "name" => key = Some(value.trim().to_ascii_lowercase()),
                "content" => content = Some(decode_entities(value.trim())),
                _ => {}
            }
        }
        if let (Some(key), Some(content)) = (key, content)
            && !content.is_empty()
        {
            out.entry(key).or_insert(content);
        }
    }
    Ok(out)
}

fn page_title(html: &str) -> Option<String> {
    let re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    let text = decode_entities(re.captures(html)?.get(1)?.as_str().trim());
    if text.is_empty() { None } else { Some(text) }
}

fn find_event_json_ld(html: &str) -> anyhow::Result<Option<Value>> {
    let re = Regex::new(
        r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#,
    )
    .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

    let mut fallback = None;
    for caps in re.captures_iter(html) {
        let Some(body) = caps.get(1) else {
            continue;
        };
        let value: Value = match serde_json::from_str(body.as_str().trim()) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "skipping malformed json-ld block");
                continue;
            }
        };
        for candidate in flatten_json_ld(value) {
            if is_event(&candidate) {
                return Ok(Some(candidate));
            }
            if fallback.is_none() && candidate.get("startDate").is_some() {
                fallback = Some(candidate);
            }
        }
    }
    Ok(fallback)
}

fn flatten_json_ld(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.into_iter().flat_map(flatten_json_ld).collect(),
        Value::Object(mut map) => match map.remove("@graph") {
            Some(graph) => flatten_json_ld(graph),
            None => vec![Value::Object(map)],
        },
        _ => vec![],
    }
}

fn is_event(value: &Value) -> bool {
    let is_event_type = |t: &str| t.ends_with("Event");
    match value.get("@type") {
        Some(Value::String(t)) => is_event_type(t),
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).any(is_event_type),
        _ => false,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| decode_entities(s.trim()))
        .filter(|s| !s.is_empty())
}

fn first_url(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(first_url),
        Value::Object(_) => value.get("url").and_then(first_url),
        _ => None,
    }
}

fn location_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(decode_entities(s.trim())),
        Value::Array(items) => items.iter().find_map(location_name),
        Value::Object(_) => string_field(value, "name"),
        _ => None,
    }
}

fn price_text(offers: &Value) -> Option<String> {
    let offer = match offers {
        Value::Array(items) => items.first()?,
        other => other,
    };
    let price = match offer.get("price")? {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    if price.is_empty() {
        return None;
    }
    if price.parse::<f64>().map(|p| p == 0.0).unwrap_or(false) {
        return Some("Free".to_string());
    }
    match offer.get("priceCurrency").and_then(Value::as_str) {
        Some(currency) if !currency.eq_ignore_ascii_case("INR") => {
            Some(format!("{currency} {price}"))
        }
        _ => Some(format!("₹{price}")),
    }
}

/// Splits a schema.org `startDate` into the listing's date text and an
/// `HH:MM` time. Date-only values carry no time.
fn split_start_date(raw: &str, date_format: &str) -> (Option<String>, Option<String>) {
    let raw = raw.trim();
    let naive = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        });

    if let Some(ndt) = naive {
        return (
            Some(format_locale_date(ndt.date(), date_format)),
            Some(ndt.format("%H:%M").to_string()),
        );
    }

    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => (Some(format_locale_date(date, date_format)), None),
        Err(_) => (Some(raw.to_string()), None),
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::parse_event_page;
    use crate::datetime::DEFAULT_LOCALE_DATE_FORMAT;

    const PAGE: &str = r#"<!doctype html>
<html><head>
<title>Fallback title</title>
<meta property="og:title" content="Sunset Jazz &amp; Chai">
<meta content="https://img.example/jazz.jpg" property="og:image">
<meta name="description" content="Live jazz on the terrace">
<meta property="og:url" content="https://tickets.example/jazz">
<script type="application/ld+json">
{"@context":"https://schema.org","@graph":[
  {"@type":"Organization","name":"Org"},
  {"@type":"MusicEvent","name":"Sunset Jazz","startDate":"2026-10-24T18:30:00+05:30",
   "location":{"@type":"Place","name":"The Terrace, Indiranagar"},
   "offers":[{"price":"499","priceCurrency":"INR"}]}
]}
</script>
</head><body></body></html>"#;

    #[test]
    fn extracts_meta_and_json_ld_fields() {
        let row = parse_event_page(PAGE, DEFAULT_LOCALE_DATE_FORMAT).expect("parse page");

        assert_eq!(row.title.as_deref(), Some("Sunset Jazz & Chai"));
        assert_eq!(row.image_url.as_deref(), Some("https://img.example/jazz.jpg"));
        assert_eq!(row.description.as_deref(), Some("Live jazz on the terrace"));
        assert_eq!(row.ticket_link.as_deref(), Some("https://tickets.example/jazz"));
        assert_eq!(row.date.as_deref(), Some("10/24/2026"));
        assert_eq!(row.time.as_deref(), Some("18:30"));
        assert_eq!(row.location.as_deref(), Some("The Terrace, Indiranagar"));
        assert_eq!(row.price_range.as_deref(), Some("₹499"));
        assert!(row.id.is_none());
    }

    #[test]
    fn zero_price_is_free_and_title_falls_back() {
        let page = r#"<title>Open Mic</title>
<script type="application/ld+json">{"@type":"Event","startDate":"2026-11-01","offers":{"price":0}}</script>"#;
        let row = parse_event_page(page, "%d/%m/%Y").expect("parse page");

        assert_eq!(row.title.as_deref(), Some("Open Mic"));
        assert_eq!(row.price_range.as_deref(), Some("Free"));
        assert_eq!(row.date.as_deref(), Some("01/11/2026"));
        assert!(row.time.is_none());
    }

    #[test]
    fn page_without_fields_is_rejected() {
        assert!(parse_event_page("<html><body>hi</body></html>", DEFAULT_LOCALE_DATE_FORMAT).is_err());
    }
}
