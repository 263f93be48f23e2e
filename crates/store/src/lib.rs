//! Durable tabular ledger of accepted events: one JSONL row per event,
//! full-scan reads, fsync'd appends, and the single admin mutation
//! (delete-first-matching-title) implemented as an atomic rewrite.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

/// Workflow status of a stored row.  Every ingested event starts `Pending`;
/// review states beyond that belong to the admin surface, which only reads
/// and deletes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    #[default]
    Pending,
}

/// One persisted row.  Field order is the ledger's column order:
/// title, date, time, description, link, original subject, status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub title: String,
    /// Stored as the extraction produced it; readers normalize to a
    /// day-precision string before any comparison.
    pub date: String,
    pub time: String,
    pub description: String,
    pub link: String,
    pub original_subject: String,
    #[serde(default)]
    pub status: EventStatus,
}

/// Read-all and append-one contract the pipeline writes through, plus the
/// out-of-core admin deletion.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Full scan in insertion order.  A store that does not exist yet reads
    /// as empty.
    fn read_all(&self) -> Result<Vec<EventRecord>>;

    /// Append one row, durable before return.
    async fn append(&self, record: &EventRecord) -> Result<()>;

    /// Delete the first row whose title matches exactly; reports whether a
    /// match was found.
    async fn delete_first_matching_title(&self, title: &str) -> Result<bool>;
}

// ── JSONL implementation ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EventLedger {
    path: PathBuf,
}

impl EventLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the ledger contents: write to a `.tmp` sibling,
    /// fsync, then rename over the original.  A crash before the rename
    /// leaves the old file untouched; after it, a consistent new one.
    async fn overwrite(&self, records: &[EventRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = {
            let filename = self
                .path
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "events.jsonl".to_string());
            self.path.with_file_name(format!("{filename}.tmp"))
        };

        let write_result: Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            for record in records {
                let line = serde_json::to_string(record)?;
                file.write_all(line.as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }
}

#[async_trait]
impl EventStore for EventLedger {
    fn read_all(&self) -> Result<Vec<EventRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = OpenOptions::new().read(true).open(&self.path)?;
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut corrupt_count = 0usize;

        for (line_idx, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<EventRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    corrupt_count += 1;
                    tracing::warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt ledger row, skipping line"
                    );
                }
            }
        }

        if corrupt_count > 0 {
            tracing::warn!(
                corrupt_lines = corrupt_count,
                path = %self.path.display(),
                "ledger loaded with skipped corrupt rows"
            );
        }

        Ok(records)
    }

    async fn append(&self, record: &EventRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = serde_json::to_string(record)?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        // Flush userspace buffers and fsync so the row survives a process
        // crash immediately after append.
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    async fn delete_first_matching_title(&self, title: &str) -> Result<bool> {
        let mut records = self.read_all()?;
        let Some(index) = records.iter().position(|record| record.title == title) else {
            return Ok(false);
        };
        records.remove(index);
        self.overwrite(&records).await?;
        Ok(true)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(title: &str, date: &str) -> EventRecord {
        EventRecord {
            title: title.to_string(),
            date: date.to_string(),
            time: "10:00".to_string(),
            description: "a talk".to_string(),
            link: "https://example.org".to_string(),
            original_subject: format!("Fwd: {title}"),
            status: EventStatus::Pending,
        }
    }

    fn ledger(dir: &TempDir) -> EventLedger {
        EventLedger::new(dir.path().join("events.jsonl"))
    }

    #[tokio::test]
    async fn append_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = ledger(&dir);
        store.append(&record("Talk A", "2026-05-01")).await.unwrap();

        let rows = store.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Talk A");
        assert_eq!(rows[0].status, EventStatus::Pending);
    }

    #[tokio::test]
    async fn append_preserves_insertion_order() {
        let dir = TempDir::new().unwrap();
        let store = ledger(&dir);
        for i in 0..4 {
            store
                .append(&record(&format!("Talk {i}"), "2026-05-01"))
                .await
                .unwrap();
        }
        let titles: Vec<_> = store
            .read_all()
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["Talk 0", "Talk 1", "Talk 2", "Talk 3"]);
    }

    #[test]
    fn read_missing_file_is_empty_store() {
        let dir = TempDir::new().unwrap();
        assert!(ledger(&dir).read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_skips_corrupt_lines() {
        let dir = TempDir::new().unwrap();
        let store = ledger(&dir);
        store.append(&record("Good", "2026-01-01")).await.unwrap();
        std::fs::OpenOptions::new()
            .append(true)
            .open(store.path())
            .map(|mut f| {
                use std::io::Write;
                writeln!(f, "{{not a record}}").unwrap();
            })
            .unwrap();
        store.append(&record("Also Good", "2026-01-02")).await.unwrap();

        let rows = store.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Good");
        assert_eq!(rows[1].title, "Also Good");
    }

    #[tokio::test]
    async fn delete_removes_only_first_matching_title() {
        let dir = TempDir::new().unwrap();
        let store = ledger(&dir);
        store.append(&record("Dup", "2026-01-01")).await.unwrap();
        store.append(&record("Keep", "2026-02-02")).await.unwrap();
        store.append(&record("Dup", "2026-03-03")).await.unwrap();

        assert!(store.delete_first_matching_title("Dup").await.unwrap());

        let rows = store.read_all().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Keep");
        assert_eq!(rows[1].title, "Dup");
        assert_eq!(rows[1].date, "2026-03-03");
    }

    #[tokio::test]
    async fn delete_unknown_title_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let store = ledger(&dir);
        store.append(&record("Only", "2026-01-01")).await.unwrap();

        assert!(!store.delete_first_matching_title("Missing").await.unwrap());
        assert_eq!(store.read_all().unwrap().len(), 1);
    }

    #[test]
    fn status_defaults_to_pending_when_absent() {
        let raw = r#"{"title":"T","date":"2026-01-01","time":"","description":"","link":"","original_subject":"s"}"#;
        let row: EventRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(row.status, EventStatus::Pending);
    }
}
