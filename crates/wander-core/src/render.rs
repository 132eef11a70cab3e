use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use unicode_width::UnicodeWidthStr;

use crate::activity::{Activity, Category};
use crate::config::Config;
use crate::datetime::format_time;

const MAX_TITLE_WIDTH: usize = 40;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, activities, is_liked))]
    pub fn print_activity_table(
        &mut self,
        activities: &[Activity],
        is_liked: &dyn Fn(&str) -> bool,
    ) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        let rows = activities
            .iter()
            .map(|activity| {
                let marker = if is_liked(&activity.id) {
                    self.paint("♥", "31")
                } else {
                    String::new()
                };
                vec![
                    self.paint(&activity.id, "33"),
                    marker,
                    truncate(&activity.title, MAX_TITLE_WIDTH),
                    activity.date.clone(),
                    format_time(&activity.time),
                    activity.price_range.clone(),
                    activity.location.clone(),
                ]
            })
            .collect();

        write_table(
            out,
            ["ID", "", "Title", "Date", "Time", "Price", "Location"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            rows,
        )?;
        Ok(())
    }

    #[tracing::instrument(skip(self, activity))]
    pub fn print_activity_info(&mut self, activity: &Activity, liked: bool) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        writeln!(out, "id          {}", self.paint(&activity.id, "33"))?;
        writeln!(out, "title       {}", activity.title)?;
        writeln!(out, "liked       {}", if liked { "yes" } else { "no" })?;
        writeln!(out, "date        {}", activity.date)?;
        let time = format_time(&activity.time);
        if !time.is_empty() {
            writeln!(out, "time        {time}")?;
        }
        writeln!(out, "price       {}", activity.price_range)?;
        writeln!(out, "location    {}", activity.location)?;
        writeln!(out, "image       {}", activity.image)?;
        writeln!(out, "tags        {}", activity.tags.join(", "))?;
        writeln!(out, "categories  {}", activity.category_ids.join(", "))?;

        for (label, value) in [
            ("map         ", &activity.map_link),
            ("contact     ", &activity.contact_info),
            ("instagram   ", &activity.instagram_link),
            ("tickets     ", &activity.ticket_link),
        ] {
            if let Some(value) = value {
                writeln!(out, "{label}{value}")?;
            }
        }
        if let Some(updated) = activity.updated_at {
            writeln!(out, "updated     {}", updated.format("%Y-%m-%d %H:%M UTC"))?;
        }
        if !activity.description.trim().is_empty() {
            writeln!(out)?;
            writeln!(out, "{}", activity.description.trim())?;
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, categories))]
    pub fn print_categories(&mut self, categories: &[Category]) -> anyhow::Result<()> {
        let out = io::stdout().lock();
        let rows = categories
            .iter()
            .map(|c| {
                vec![
                    self.paint(&c.id, "33"),
                    c.icon.clone().unwrap_or_default(),
                    c.name.clone(),
                ]
            })
            .collect();
        write_table(
            out,
            vec!["ID".to_string(), "Icon".to_string(), "Name".to_string()],
            rows,
        )
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

/// Text a user can paste anywhere to point a friend at a listing.
pub fn share_text(activity: &Activity, base_url: &str) -> String {
    let mut headline = activity.title.trim().to_string();

    let when = [activity.date.trim().to_string(), format_time(&activity.time)]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !when.is_empty() {
        headline.push_str(" | ");
        headline.push_str(&when);
    }
    if !activity.location.trim().is_empty() {
        headline.push_str(" @ ");
        headline.push_str(activity.location.trim());
    }

    format!(
        "{headline}\n{}/activity/{}",
        base_url.trim_end_matches('/'),
        activity.id
    )
}

fn truncate(text: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut width = 0;
    for ch in text.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if width + ch_width + 1 > max_width {
            break;
        }
        out.push(ch);
        width += ch_width;
    }
    out.push('…');
    out
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        write!(writer, "{:width$} ", header, width = widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::{share_text, strip_ansi, truncate, write_table};
    use crate::activity::{Activity, ActivityRow};

    #[test]
    fn share_text_skips_empty_parts() {
        let mut activity = Activity::from(ActivityRow {
            id: Some("abc".to_string()),
            title: Some("Pottery Night".to_string()),
            ..ActivityRow::default()
        });
        activity.time = "19:00".to_string();

        assert_eq!(
            share_text(&activity, "https://wander.city/"),
            "Pottery Night | 7:00 PM @ Bangalore\nhttps://wander.city/activity/abc"
        );
    }

    #[test]
    fn table_pads_by_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["A".to_string(), "B".to_string()],
            vec![vec!["₹20".to_string(), "x".to_string()]],
        )
        .expect("write table");
        let text = String::from_utf8(buf).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "A   B ");
        assert_eq!(lines[2], "₹20 x ");
    }

    #[test]
    fn long_titles_are_truncated() {
        let out = truncate("abcdefghij", 5);
        assert_eq!(out, "abcd…");
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(strip_ansi("\x1b[33mid\x1b[0m"), "id");
    }
}
