use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use confwatch_config::AppConfig;
use confwatch_extract::GeminiExtractor;
use confwatch_mailbox::{MaildirSource, SearchFilter};
use confwatch_pipeline::{
    CalendarEventOptions, CalendarSink, IcsFileSink, IngestionPipeline, PipelineOptions, RunLock,
    RunReport, normalize_day,
};
use confwatch_store::{EventLedger, EventStore};

#[derive(Debug, Parser)]
#[command(
    name = "confwatch",
    version,
    about = "Scan a mailbox for event announcements and record them in a ledger"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a fresh config file with default settings.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Execute one ingestion run.
    Run,
    /// Run the pipeline periodically until interrupted.
    Watch {
        /// Minutes between runs.
        #[arg(long, default_value_t = 30)]
        every: u64,
    },
    /// Print recorded events (the public list view).
    List,
    /// Delete the first stored event whose title matches exactly.
    Delete { title: String },
    /// Export a stored event as an all-day .ics calendar entry.
    Export { title: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if let Commands::Init { force } = &cli.command {
        return cmd_init(&cli.config, *force);
    }

    let config = AppConfig::load_from(&cli.config)?;
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::Run => cmd_run(&config).await,
        Commands::Watch { every } => cmd_watch(&config, every).await,
        Commands::List => cmd_list(&config),
        Commands::Delete { title } => cmd_delete(&config, &title).await,
        Commands::Export { title } => cmd_export(&config, &title),
    }
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn cmd_init(path: &str, force: bool) -> Result<()> {
    if Path::new(path).exists() && !force {
        bail!("config file {path} already exists (use --force to overwrite)");
    }
    AppConfig::default().save_to(path)?;
    println!("wrote {path}");
    Ok(())
}

// ── Ingestion ────────────────────────────────────────────────────────────────

fn lock_path(config: &AppConfig) -> PathBuf {
    Path::new(&config.store.path).with_extension("lock")
}

async fn run_once(config: &AppConfig) -> Result<RunReport> {
    // Held until the report is back; overlapping triggers abort instead of
    // double-appending.
    let _lock = RunLock::acquire(&lock_path(config))?;

    let source = MaildirSource::new(&config.mailbox.path);
    let extractor = GeminiExtractor::from_config(&config.extract)?;
    let store = EventLedger::new(&config.store.path);
    let opts = PipelineOptions {
        filter: SearchFilter::new(
            config.mailbox.subject_keywords.clone(),
            config.mailbox.body_keywords.clone(),
        ),
        batch_size: config.mailbox.batch_size,
        mark_read_on_failure: config.pipeline.mark_read_on_failure,
    };

    let pipeline = IngestionPipeline::new(source, extractor, store, opts);
    Ok(pipeline.run().await?)
}

async fn cmd_run(config: &AppConfig) -> Result<()> {
    let report = run_once(config).await?;
    println!("{report}");
    Ok(())
}

async fn cmd_watch(config: &AppConfig, every_minutes: u64) -> Result<()> {
    if every_minutes == 0 {
        bail!("--every must be at least 1 minute");
    }
    info!(every_minutes, "watching mailbox");

    loop {
        // A failed run never halts future runs; each tick starts fresh from
        // current mailbox and ledger state.
        match run_once(config).await {
            Ok(report) => info!(%report, "run finished"),
            Err(err) => error!(%err, "run failed; will retry on next tick"),
        }
        tokio::time::sleep(Duration::from_secs(every_minutes * 60)).await;
    }
}

// ── Presentation & admin glue ────────────────────────────────────────────────

fn cmd_list(config: &AppConfig) -> Result<()> {
    let store = EventLedger::new(&config.store.path);
    let records = store.read_all()?;
    if records.is_empty() {
        println!("no events recorded yet");
        return Ok(());
    }

    for record in records {
        let title = if record.title.is_empty() {
            "No Title"
        } else {
            &record.title
        };
        let link = if record.link.is_empty() {
            "#"
        } else {
            &record.link
        };
        let time = if record.time.is_empty() {
            "-"
        } else {
            &record.time
        };
        println!("{}  {:?}  {title}  [{time}]  {link}", normalize_day(&record.date), record.status);
    }
    Ok(())
}

async fn cmd_delete(config: &AppConfig, title: &str) -> Result<()> {
    let store = EventLedger::new(&config.store.path);
    if store.delete_first_matching_title(title).await? {
        println!("deleted '{title}'");
    } else {
        println!("no stored event titled '{title}'");
    }
    Ok(())
}

fn cmd_export(config: &AppConfig, title: &str) -> Result<()> {
    let store = EventLedger::new(&config.store.path);
    let records = store.read_all()?;
    let Some(record) = records.iter().find(|record| record.title == title) else {
        bail!("no stored event titled '{title}'");
    };

    let day = normalize_day(&record.date);
    let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
        .with_context(|| format!("event date '{}' is not a calendar date", record.date))?;

    let sink = IcsFileSink::new(&config.pipeline.export_dir);
    sink.create_all_day_event(
        &record.title,
        date,
        &CalendarEventOptions {
            description: record.description.clone(),
            time: record.time.clone(),
            link: record.link.clone(),
        },
    )?;
    println!("exported {}", sink.event_path(&record.title, date).display());
    Ok(())
}
