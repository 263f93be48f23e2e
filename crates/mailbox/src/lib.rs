//! Message source abstraction and its maildir-backed implementation.
//!
//! The ingestion pipeline only ever sees the narrow [`MessageSource`]
//! interface: search for unread candidates, re-check unread state, mark a
//! message read.  [`MaildirSource`] maps that onto a maildir-style directory
//! pair: unread messages are files under `new/`, read ones under `cur/`,
//! and marking read is a single rename, which makes it atomic and naturally
//! idempotent.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::warn;

/// Identity of a message within its source, used for marking it read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An immutable unit of input text, consumed at most once per run.
#[derive(Debug, Clone)]
pub struct CandidateMessage {
    pub id: MessageId,
    pub subject: String,
    pub body: String,
}

// ── Search filter ────────────────────────────────────────────────────────────

/// Boolean keyword filter restricting candidates to likely event
/// announcements: any subject keyword in the subject, OR any body phrase in
/// the body.  Matching is case-insensitive substring containment.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    subject_any: Vec<String>,
    body_any: Vec<String>,
}

impl SearchFilter {
    pub fn new(subject_any: Vec<String>, body_any: Vec<String>) -> Self {
        let lower = |words: Vec<String>| {
            words
                .into_iter()
                .map(|w| w.to_lowercase())
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            subject_any: lower(subject_any),
            body_any: lower(body_any),
        }
    }

    pub fn matches(&self, subject: &str, body: &str) -> bool {
        let subject = subject.to_lowercase();
        if self.subject_any.iter().any(|kw| subject.contains(kw)) {
            return true;
        }
        let body = body.to_lowercase();
        self.body_any.iter().any(|kw| body.contains(kw))
    }
}

// ── Source interface ─────────────────────────────────────────────────────────

/// Narrow contract the pipeline consumes.  Implementations are treated as
/// opaque providers; if the source is unreachable the run aborts before any
/// mutation.
pub trait MessageSource: Send + Sync {
    /// Up to `max` unread messages matching `filter`.  Order beyond
    /// "unread" is not guaranteed and must not be relied upon.
    fn search_unread(&self, filter: &SearchFilter, max: usize) -> Result<Vec<CandidateMessage>>;

    /// Idempotent: marking an already-read message again is a no-op.
    fn mark_read(&self, id: &MessageId) -> Result<()>;

    /// Defensive re-check before processing a message from a search snapshot.
    fn is_unread(&self, id: &MessageId) -> Result<bool>;
}

// ── Maildir implementation ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MaildirSource {
    root: PathBuf,
}

impl MaildirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn new_dir(&self) -> PathBuf {
        self.root.join("new")
    }

    fn cur_dir(&self) -> PathBuf {
        self.root.join("cur")
    }

    /// Write a message file into `new/`, creating the maildir layout on
    /// demand.  Used by tests and by anything feeding the mailbox locally.
    pub fn deliver(&self, name: &str, subject: &str, body: &str) -> Result<MessageId> {
        fs::create_dir_all(self.new_dir())?;
        fs::create_dir_all(self.cur_dir())?;
        let path = self.new_dir().join(name);
        fs::write(&path, format!("Subject: {subject}\n\n{body}"))
            .with_context(|| format!("writing message {}", path.display()))?;
        Ok(MessageId::new(name))
    }
}

/// Split a raw message file into (subject, body).  Headers run until the
/// first blank line; only `Subject:` is interesting.  A file without a
/// header block is treated as all body.
fn parse_message(raw: &str) -> (String, String) {
    let Some((headers, body)) = raw.split_once("\n\n") else {
        return (String::new(), raw.to_string());
    };

    let subject = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("subject").then(|| value.trim().to_string())
        })
        .unwrap_or_default();

    (subject, body.to_string())
}

impl MessageSource for MaildirSource {
    fn search_unread(&self, filter: &SearchFilter, max: usize) -> Result<Vec<CandidateMessage>> {
        let new_dir = self.new_dir();
        let entries = fs::read_dir(&new_dir)
            .with_context(|| format!("mailbox unreachable at {}", new_dir.display()))?;

        // Sort by filename so a run processes messages in a stable order;
        // callers must not rely on anything stronger.
        let mut names: Vec<String> = entries
            .filter_map(|entry| Some(entry.ok()?.file_name().to_string_lossy().into_owned()))
            .collect();
        names.sort();

        let mut candidates = Vec::new();
        for name in names {
            if candidates.len() >= max {
                break;
            }
            let path = new_dir.join(&name);
            let raw = match fs::read_to_string(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    // A message can vanish between listing and reading when
                    // another process touches the maildir.
                    warn!(file = %name, %err, "skipping unreadable message file");
                    continue;
                }
            };
            let (subject, body) = parse_message(&raw);
            if filter.matches(&subject, &body) {
                candidates.push(CandidateMessage {
                    id: MessageId::new(name),
                    subject,
                    body,
                });
            }
        }

        Ok(candidates)
    }

    fn mark_read(&self, id: &MessageId) -> Result<()> {
        let unread = self.new_dir().join(id.as_str());
        let read = self.cur_dir().join(id.as_str());

        if !unread.exists() {
            if read.exists() {
                // Already marked read earlier; repeat calls are no-ops.
                return Ok(());
            }
            bail!("unknown message id: {}", id.as_str());
        }

        fs::create_dir_all(self.cur_dir())?;
        fs::rename(&unread, &read)
            .with_context(|| format!("marking {} read", id.as_str()))?;
        Ok(())
    }

    fn is_unread(&self, id: &MessageId) -> Result<bool> {
        Ok(self.new_dir().join(id.as_str()).exists())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn filter() -> SearchFilter {
        SearchFilter::new(
            vec!["seminar".to_string(), "conference".to_string()],
            vec!["call for papers".to_string()],
        )
    }

    #[test]
    fn filter_matches_subject_keyword_case_insensitive() {
        let f = filter();
        assert!(f.matches("Upcoming SEMINAR on Rust", "hello"));
        assert!(f.matches("conference announcement", ""));
        assert!(!f.matches("lunch on friday", "see you there"));
    }

    #[test]
    fn filter_matches_body_phrase() {
        let f = filter();
        assert!(f.matches("FYI", "Second Call for Papers: ICFP 2026"));
        assert!(!f.matches("FYI", "call for volunteers"));
    }

    #[test]
    fn empty_filter_matches_nothing() {
        let f = SearchFilter::new(vec![], vec![]);
        assert!(!f.matches("seminar", "call for papers"));
    }

    #[test]
    fn search_returns_matching_unread_in_name_order() {
        let dir = TempDir::new().unwrap();
        let source = MaildirSource::new(dir.path());
        source.deliver("b-msg", "Conference on B", "body").unwrap();
        source.deliver("a-msg", "Seminar on A", "body").unwrap();
        source.deliver("c-msg", "team standup", "no keywords here").unwrap();

        let found = source.search_unread(&filter(), 10).unwrap();
        let subjects: Vec<_> = found.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["Seminar on A", "Conference on B"]);
    }

    #[test]
    fn search_caps_at_max() {
        let dir = TempDir::new().unwrap();
        let source = MaildirSource::new(dir.path());
        for i in 0..5 {
            source
                .deliver(&format!("msg-{i}"), &format!("Seminar {i}"), "body")
                .unwrap();
        }
        let found = source.search_unread(&filter(), 3).unwrap();
        assert_eq!(found.len(), 3);
    }

    #[test]
    fn search_unreachable_root_errors() {
        let dir = TempDir::new().unwrap();
        let source = MaildirSource::new(dir.path().join("missing"));
        assert!(source.search_unread(&filter(), 10).is_err());
    }

    #[test]
    fn mark_read_moves_message_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let source = MaildirSource::new(dir.path());
        let id = source.deliver("msg-1", "Seminar", "body").unwrap();

        assert!(source.is_unread(&id).unwrap());
        source.mark_read(&id).unwrap();
        assert!(!source.is_unread(&id).unwrap());
        assert!(dir.path().join("cur/msg-1").exists());

        // Second call is a no-op, not an error.
        source.mark_read(&id).unwrap();
    }

    #[test]
    fn mark_read_unknown_id_errors() {
        let dir = TempDir::new().unwrap();
        let source = MaildirSource::new(dir.path());
        source.deliver("seed", "Seminar", "body").unwrap();
        assert!(source.mark_read(&MessageId::new("never-delivered")).is_err());
    }

    #[test]
    fn marked_read_message_not_searched_again() {
        let dir = TempDir::new().unwrap();
        let source = MaildirSource::new(dir.path());
        let id = source.deliver("msg-1", "Seminar", "body").unwrap();
        source.mark_read(&id).unwrap();
        assert!(source.search_unread(&filter(), 10).unwrap().is_empty());
    }

    #[test]
    fn parse_message_extracts_subject_and_body() {
        let (subject, body) = parse_message("Subject: Hello\nFrom: x@y\n\nthe body\nline two");
        assert_eq!(subject, "Hello");
        assert_eq!(body, "the body\nline two");
    }

    #[test]
    fn parse_message_subject_header_case_insensitive() {
        let (subject, _) = parse_message("SUBJECT: shouty\n\nbody");
        assert_eq!(subject, "shouty");
    }

    #[test]
    fn parse_message_without_headers_is_all_body() {
        let (subject, body) = parse_message("just text, no blank separator");
        assert_eq!(subject, "");
        assert_eq!(body, "just text, no blank separator");
    }
}
