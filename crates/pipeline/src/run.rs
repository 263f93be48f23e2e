//! Orchestration of one ingestion run: search → extract → fingerprint →
//! dedup-check → append-or-skip → mark-read.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use confwatch_extract::{ExtractionOutcome, Extractor};
use confwatch_mailbox::{CandidateMessage, MessageId, MessageSource, SearchFilter};
use confwatch_store::{EventRecord, EventStatus, EventStore};

use crate::fingerprint::{FingerprintIndex, fingerprint, is_calendar_date};

/// Errors that abort a run.  Everything else (non-events, extraction
/// failures, duplicates) is an expected outcome counted in [`RunReport`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source could not be searched; the run aborts before any mutation.
    #[error("message source unavailable: {0}")]
    SourceUnavailable(anyhow::Error),
    /// The store snapshot could not be read; the run aborts before any
    /// mutation.
    #[error("event store unavailable: {0}")]
    StoreUnavailable(anyhow::Error),
    /// An append failed mid-run.  Earlier appends stand; their messages are
    /// already marked read.
    #[error("event store write failed: {0}")]
    StoreWrite(anyhow::Error),
    #[error("another ingestion run holds the lock at {}", .0.display())]
    AlreadyRunning(PathBuf),
    #[error("run lock: {0}")]
    Lock(#[from] std::io::Error),
}

/// Injected pipeline configuration (search filter, batch size, and the
/// failed-extraction retry policy).
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub filter: SearchFilter,
    pub batch_size: usize,
    /// When `true`, a message whose extraction call failed outright is still
    /// marked read (the original lossy-but-forward-progressing behavior).
    /// When `false`, it is left unread so the next run retries it.
    pub mark_read_on_failure: bool,
}

/// Per-run outcome counts, one line per operator log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub searched: usize,
    pub appended: usize,
    pub duplicates: usize,
    pub non_events: usize,
    pub failures: usize,
    pub skipped: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} searched: {} appended, {} duplicate, {} non-event, {} failed, {} skipped",
            self.searched, self.appended, self.duplicates, self.non_events, self.failures, self.skipped
        )
    }
}

/// One-shot batch orchestrator over the three seams.
///
/// A run is strictly sequential: the store snapshot is taken once, the
/// fingerprint index lives in memory for the duration, and messages are
/// processed in source order.  Nothing here protects against a concurrent
/// run in another process; hold a [`crate::RunLock`] around `run()` when
/// triggers can overlap.
pub struct IngestionPipeline<S, X, T> {
    source: S,
    extractor: X,
    store: T,
    opts: PipelineOptions,
}

impl<S, X, T> IngestionPipeline<S, X, T>
where
    S: MessageSource,
    X: Extractor,
    T: EventStore,
{
    pub fn new(source: S, extractor: X, store: T, opts: PipelineOptions) -> Self {
        Self {
            source,
            extractor,
            store,
            opts,
        }
    }

    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let candidates = self
            .source
            .search_unread(&self.opts.filter, self.opts.batch_size)
            .map_err(PipelineError::SourceUnavailable)?;

        let mut report = RunReport {
            searched: candidates.len(),
            ..Default::default()
        };
        if candidates.is_empty() {
            info!("no unread candidate messages");
            return Ok(report);
        }

        // One snapshot per run; mid-run external mutation is not re-validated.
        let existing = self
            .store
            .read_all()
            .map_err(PipelineError::StoreUnavailable)?;
        let mut index = FingerprintIndex::build(&existing);
        debug!(
            candidates = candidates.len(),
            known_fingerprints = index.len(),
            "dedup index ready"
        );

        for message in candidates {
            self.process(message, &mut index, &mut report).await?;
        }

        info!(%report, "ingestion run complete");
        Ok(report)
    }

    async fn process(
        &self,
        message: CandidateMessage,
        index: &mut FingerprintIndex,
        report: &mut RunReport,
    ) -> Result<(), PipelineError> {
        // The message may have been read out from under us between the
        // search snapshot and now; leave it alone in that case.
        match self.source.is_unread(&message.id) {
            Ok(true) => {}
            Ok(false) => {
                debug!(message_id = message.id.as_str(), "no longer unread; skipping");
                report.skipped += 1;
                return Ok(());
            }
            Err(err) => {
                warn!(message_id = message.id.as_str(), %err, "unread re-check failed; skipping");
                report.skipped += 1;
                return Ok(());
            }
        }

        match self.extractor.extract(&message.subject, &message.body).await {
            ExtractionOutcome::NoEvent => {
                debug!(subject = %message.subject, "not an event");
                report.non_events += 1;
                // Marked read so the same non-event text is never re-sent to
                // the model on every run.
                self.mark_read_logged(&message.id);
            }
            ExtractionOutcome::Failed(reason) => {
                warn!(subject = %message.subject, %reason, "extraction failed; treating as non-event");
                report.failures += 1;
                if self.opts.mark_read_on_failure {
                    self.mark_read_logged(&message.id);
                }
            }
            ExtractionOutcome::Event(event) => {
                if !is_calendar_date(&event.date) {
                    warn!(
                        title = %event.title,
                        date = %event.date,
                        "extracted date is not day-precision; keeping raw value"
                    );
                }

                let candidate = fingerprint(&event.title, &event.date);
                if index.contains(&candidate) {
                    info!(title = %event.title, "duplicate event; skipping append");
                    report.duplicates += 1;
                    self.mark_read_logged(&message.id);
                } else {
                    let record = EventRecord {
                        title: event.title,
                        date: event.date,
                        time: event.time,
                        description: event.description,
                        link: event.link,
                        original_subject: event.original_subject,
                        status: EventStatus::Pending,
                    };
                    self.store
                        .append(&record)
                        .await
                        .map_err(PipelineError::StoreWrite)?;
                    index.insert(candidate);
                    report.appended += 1;
                    info!(title = %record.title, date = %record.date, "event appended");
                    // The append succeeded, so mark-read must still be
                    // attempted; on failure the row stands (at-least-once).
                    self.mark_read_logged(&message.id);
                }
            }
        }

        Ok(())
    }

    fn mark_read_logged(&self, id: &MessageId) {
        if let Err(err) = self.source.mark_read(id) {
            error!(
                message_id = id.as_str(),
                %err,
                "failed to mark message read; it may be reprocessed next run"
            );
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
