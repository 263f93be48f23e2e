//! Calendar sink: a one-shot side-effect interface the pipeline's consumers
//! can push accepted events into, with a file-based implementation that
//! emits a single-VEVENT iCalendar file per event.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};

/// Extra fields carried along with an all-day event.
#[derive(Debug, Clone, Default)]
pub struct CalendarEventOptions {
    pub description: String,
    pub time: String,
    pub link: String,
}

pub trait CalendarSink {
    fn create_all_day_event(
        &self,
        title: &str,
        date: NaiveDate,
        opts: &CalendarEventOptions,
    ) -> Result<()>;
}

// ── .ics file sink ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IcsFileSink {
    dir: PathBuf,
}

impl IcsFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Destination file for a given event: `<slug(title)>-<date>.ics`.
    pub fn event_path(&self, title: &str, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}-{date}.ics", slug(title)))
    }
}

/// Lowercased alphanumeric runs joined by dashes, for use as a filename.
fn slug(s: &str) -> String {
    let mut out = String::new();
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "event".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Escape TEXT values per RFC 5545: backslash, comma, semicolon, newline.
fn escape_text(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(';', "\\;")
        .replace('\n', "\\n")
}

impl CalendarSink for IcsFileSink {
    fn create_all_day_event(
        &self,
        title: &str,
        date: NaiveDate,
        opts: &CalendarEventOptions,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating calendar dir {}", self.dir.display()))?;

        // All-day events span [date, date+1) with VALUE=DATE stamps.
        let end = date + Duration::days(1);
        let description = format!(
            "{}\n\nTime: {}\nLink: {}",
            opts.description, opts.time, opts.link
        );

        let body = format!(
            "BEGIN:VCALENDAR\r\n\
             VERSION:2.0\r\n\
             PRODID:-//confwatch//EN\r\n\
             BEGIN:VEVENT\r\n\
             UID:{uid}\r\n\
             DTSTART;VALUE=DATE:{start}\r\n\
             DTEND;VALUE=DATE:{end}\r\n\
             SUMMARY:{summary}\r\n\
             DESCRIPTION:{description}\r\n\
             END:VEVENT\r\n\
             END:VCALENDAR\r\n",
            uid = format!("{}-{}@confwatch", slug(title), date),
            start = date.format("%Y%m%d"),
            end = end.format("%Y%m%d"),
            summary = escape_text(title),
            description = escape_text(&description),
        );

        let path = self.event_path(title, date);
        fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
