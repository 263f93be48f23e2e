//! Language-model extraction service: free message text in, structured
//! event out.
//!
//! "This text is not an event" and transport-level failures are both
//! expected, common outcomes, so the [`Extractor`] trait never
//! returns `Err`.  Everything the endpoint can do wrong (unreachable,
//! non-200, unparseable reply) collapses into [`ExtractionOutcome::Failed`]
//! so a single bad message can never abort a batch.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use confwatch_config::ExtractConfig;

/// Structured event pulled out of one message, plus the original subject
/// for traceability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEvent {
    pub title: String,
    /// Calendar date as the model produced it; day-precision normalization
    /// happens at fingerprint time, not here.
    pub date: String,
    pub time: String,
    pub description: String,
    pub link: String,
    pub original_subject: String,
}

/// Outcome of a single extraction call.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Event(ExtractedEvent),
    /// The model's `{"error": "no event"}` sentinel: valid reply, no event.
    NoEvent,
    /// Transport failure, bad status, or a reply we could not parse.  The
    /// reason is for the operator log only.
    Failed(String),
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, subject: &str, body: &str) -> ExtractionOutcome;
}

// ── Model reply parsing ──────────────────────────────────────────────────────

/// Shape the prompt instructs the model to emit: the five event fields, or
/// a sentinel `error` object when the text does not describe an event.
#[derive(Debug, Deserialize)]
struct ModelReply {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    time: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    link: String,
}

/// Extract the first valid JSON object from an LLM reply.
///
/// Models asked for JSON still sometimes wrap it in prose or a fenced
/// ` ```json ` block.  Strategy 1 looks for a fenced block; strategy 2
/// takes the span from the first `{` to the last `}`.  Returns `None` when
/// neither parses.
pub fn extract_json_reply<T: serde::de::DeserializeOwned>(response: &str) -> Option<T> {
    if let Some(fence_start) = response.find("```json") {
        let after_fence = &response[fence_start + "```json".len()..];
        if let Some(json_start) = after_fence.find(|c: char| !c.is_whitespace()) {
            let json_body = &after_fence[json_start..];
            if let Some(fence_end) = json_body.find("```") {
                let json_str = json_body[..fence_end].trim();
                if let Ok(val) = serde_json::from_str(json_str) {
                    return Some(val);
                }
            }
        }
    }

    let trimmed = response.trim();
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                if let Ok(val) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(val);
                }
            }
        }
    }

    None
}

/// Truncate `s` to at most `max_chars` Unicode scalar values, returning a
/// sub-slice.  Never fails; truncation only reduces model context.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn build_prompt(subject: &str, body: &str) -> String {
    format!(
        "Extract event details as JSON:\n\
         - title, date (YYYY-MM-DD), time, description, link.\n\
         If NOT an event, return {{\"error\": \"no event\"}}.\n\
         Subject: {subject} Body: {body}"
    )
}

// ── Gemini client ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GeminiExtractor {
    client: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    body_truncation: usize,
}

impl GeminiExtractor {
    pub fn from_config(config: &ExtractConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            body_truncation: config.body_truncation,
        })
    }

    fn interpret(&self, subject: &str, reply_text: &str) -> ExtractionOutcome {
        let Some(reply) = extract_json_reply::<ModelReply>(reply_text) else {
            return ExtractionOutcome::Failed("unparseable model reply".to_string());
        };

        if reply.error.is_some() {
            return ExtractionOutcome::NoEvent;
        }
        if reply.title.trim().is_empty() {
            return ExtractionOutcome::Failed("model reply missing title".to_string());
        }

        ExtractionOutcome::Event(ExtractedEvent {
            title: reply.title,
            date: reply.date,
            time: reply.time,
            description: reply.description,
            link: reply.link,
            original_subject: subject.to_string(),
        })
    }
}

#[async_trait]
impl Extractor for GeminiExtractor {
    async fn extract(&self, subject: &str, body: &str) -> ExtractionOutcome {
        let prompt = build_prompt(subject, truncate_chars(body, self.body_truncation));
        let endpoint = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        let response = match self.client.post(&endpoint).json(&payload).send().await {
            Ok(response) => response,
            Err(error) => return ExtractionOutcome::Failed(format!("transport: {error}")),
        };

        let status = response.status();
        if !status.is_success() {
            return ExtractionOutcome::Failed(format!("extraction endpoint returned {status}"));
        }

        let envelope: serde_json::Value = match response.json().await {
            Ok(value) => value,
            Err(error) => return ExtractionOutcome::Failed(format!("invalid response body: {error}")),
        };

        let Some(reply_text) = envelope
            .get("candidates")
            .and_then(|candidates| candidates.get(0))
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(|parts| parts.get(0))
            .and_then(|part| part.get("text"))
            .and_then(|text| text.as_str())
        else {
            return ExtractionOutcome::Failed("response missing candidates".to_string());
        };

        debug!(subject, reply_len = reply_text.len(), "model replied");
        self.interpret(subject, reply_text)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
