use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Mailbox ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Maildir-style root directory.  Unread messages live in `new/`,
    /// read ones in `cur/`.
    pub path: String,
    /// A message is a candidate when its subject contains any of these
    /// keywords (case-insensitive) ...
    pub subject_keywords: Vec<String>,
    /// ... or its body contains any of these phrases.
    pub body_keywords: Vec<String>,
    /// Maximum number of candidate messages pulled per run.
    pub batch_size: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            path: ".confwatch/mailbox".to_string(),
            subject_keywords: vec![
                "seminar".to_string(),
                "conference".to_string(),
                "talk".to_string(),
                "workshop".to_string(),
            ],
            body_keywords: vec!["call for papers".to_string()],
            batch_size: 10,
        }
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Model identifier passed to the generateContent endpoint.
    pub model: String,
    /// API key for the extraction endpoint.  Overridden at load time by the
    /// `GEMINI_API_KEY` environment variable when set.
    pub api_key: String,
    pub base_url: String,
    /// Message bodies are cut to this many characters before being sent to
    /// the model.  Truncation bounds cost and latency; it never fails a call.
    pub body_truncation: usize,
    /// Per-request network timeout in seconds.  A stalled extraction call
    /// blocks the whole run, so keep this tight.
    pub timeout_secs: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".to_string(),
            api_key: String::new(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            body_truncation: 5000,
            timeout_secs: 30,
        }
    }
}

// ── Store ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSONL ledger file holding one accepted event per line.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: ".confwatch/events.jsonl".to_string(),
        }
    }
}

// ── Pipeline policy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// What to do with a message whose extraction call failed outright
    /// (transport error, bad status, unparseable reply), as opposed to one
    /// the model classified as "not an event", which is always marked read.
    ///
    /// `true` (the default) marks the message read anyway, trading a
    /// possibly-lost event on a transient failure for never retrying the
    /// same message forever.  Set to `false` to leave such messages unread
    /// so the next run retries them.
    pub mark_read_on_failure: bool,
    /// Directory the calendar export writes `.ics` files into.
    pub export_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mark_read_on_failure: true,
            export_dir: ".confwatch/calendar".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub mailbox: MailboxConfig,
    pub extract: ExtractConfig,
    pub store: StoreConfig,
    pub pipeline: PipelineConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        // API key env override (takes precedence over the config file).
        if let Ok(key) = env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                config.extract.api_key = key;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
