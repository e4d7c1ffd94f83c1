//! Fundguard audit log CLI
//!
//! Offline reports and pattern scans over an exported transaction log.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use fundguard_compliance::audit::{PatternThresholds, TransactionLog, detect_patterns, risk_level};
use fundguard_types::{SystemClock, UserId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "fundguard-compliance")]
#[command(version, about = "Fundguard audit trail reporting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate an exported log into a report
    Report {
        /// JSON export produced by the transaction log
        #[arg(short, long)]
        log: PathBuf,

        /// Start of the range (RFC 3339). Defaults to 30 days before --to
        #[arg(long)]
        from: Option<DateTime<Utc>>,

        /// End of the range (RFC 3339). Defaults to now
        #[arg(long)]
        to: Option<DateTime<Utc>>,

        /// Restrict to one user id
        #[arg(short, long)]
        actor: Option<u64>,
    },

    /// List suspicious-activity patterns for a user
    Scan {
        #[arg(short, long)]
        log: PathBuf,

        #[arg(short, long)]
        actor: u64,

        /// Trailing window in seconds
        #[arg(short, long, default_value_t = 3600)]
        window_secs: i64,

        /// End of the window (RFC 3339). Defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Print the risk level of an action string
    Risk {
        action: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Report {
            log,
            from,
            to,
            actor,
        } => report(&log, from, to, actor),
        Commands::Scan {
            log,
            actor,
            window_secs,
            at,
        } => scan(&log, actor, window_secs, at),
        Commands::Risk { action } => {
            println!("{}", risk_level(&action));
            Ok(())
        }
    }
}

fn load_log(path: &Path) -> Result<TransactionLog> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let log = TransactionLog::from_json(&json, Arc::new(SystemClock))
        .with_context(|| format!("Failed to load transaction log from {}", path.display()))?;
    info!(entries = log.len(), "loaded transaction log");
    Ok(log)
}

fn report(
    path: &Path,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    actor: Option<u64>,
) -> Result<()> {
    let log = load_log(path)?;
    let end = to.unwrap_or_else(Utc::now);
    let start = from.unwrap_or(end - Duration::days(30));
    if start > end {
        bail!("--from ({start}) is after --to ({end})");
    }

    let report = log.generate_report(start, end, actor.map(UserId::new));
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    Ok(())
}

fn scan(path: &Path, actor: u64, window_secs: i64, at: Option<DateTime<Utc>>) -> Result<()> {
    if window_secs <= 0 {
        bail!("--window-secs must be positive");
    }
    let log = load_log(path)?;
    let thresholds = PatternThresholds::default().with_window(Duration::seconds(window_secs));

    let now = at.unwrap_or_else(Utc::now);

    let entries = log.entries();
    let tags = detect_patterns(&entries, UserId::new(actor), now, &thresholds);
    if tags.is_empty() {
        println!("no suspicious patterns for user {actor}");
    }
    for tag in tags {
        println!("{tag}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundguard_compliance::audit::AuditQuery;
    use fundguard_types::{Actor, RecordRef, RequestContext, Role};
    use serde_json::Map;

    #[test]
    fn test_load_log_reads_export() {
        let source = TransactionLog::new();
        let actor = Actor::new(3u64, "investor@example.com", Role::Investor);
        let mut details = Map::new();
        details.insert("file_type".to_string(), "pdf".into());
        source
            .record(
                Some(&actor),
                "data_download",
                &RecordRef::new("Startup", 9),
                details,
                &RequestContext::system(),
            )
            .expect("record");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("log.json");
        std::fs::write(&path, source.export_json(&AuditQuery::default()).expect("export"))
            .expect("write");

        let loaded = load_log(&path).expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.entries()[0].action, "data_download");
    }

    #[test]
    fn test_load_log_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_log(&dir.path().join("absent.json")).is_err());
    }
}
