use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use headlines::config::Config;
use headlines::digest::{DigestSink, SmtpSink, StdoutSink};
use headlines::feed::{Fetcher, UserAgents};
use headlines::pipeline::{Aggregator, RunContext, RunError};
use headlines::storage::{PublicationTracker, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "headlines", about = "Mail a digest of new headlines from configured feeds")]
struct Args {
    /// Path to the configuration file
    #[arg(long, value_name = "FILE", default_value = "headlines.toml")]
    config: PathBuf,

    /// Print the digest to stdout instead of mailing it, and record nothing
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Cancel `token` when the run deadline passes or on Ctrl-C.
fn spawn_deadline(token: CancellationToken, timeout: std::time::Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Run deadline reached, cancelling");
                token.cancel();
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
                    return;
                }
                tracing::warn!("Interrupted, cancelling run");
                token.cancel();
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let sink: Box<dyn DigestSink> = if args.dry_run {
        Box::new(StdoutSink::default())
    } else {
        let smtp = config
            .smtp
            .as_ref()
            .context("[smtp] section is required unless --dry-run is given")?;
        Box::new(SmtpSink::new(smtp).context("Failed to set up SMTP transport")?)
    };

    let db_path = config.database_path.to_string_lossy();
    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path))?;
    let tracker = PublicationTracker::new(Arc::new(store));

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let fetcher = Fetcher::new(client, UserAgents::with_contact(&config.contact));

    let aggregator =
        Aggregator::new(config.feeds.clone(), fetcher, tracker, sink).dry_run(args.dry_run);

    let cancel = CancellationToken::new();
    spawn_deadline(cancel.clone(), config.run_timeout);
    let ctx = RunContext::with_cancellation(cancel.clone());

    let outcome = aggregator.run(&ctx).await;
    cancel.cancel();

    match outcome {
        Ok(report) => {
            tracing::info!(
                feeds = report.feeds,
                failed_feeds = report.failed_feeds.len(),
                delivered = report.delivered.len(),
                marked = report.marked,
                "Done"
            );
            Ok(())
        }
        Err(e @ RunError::Store(_)) => {
            Err(anyhow::Error::new(e).context("Digest was sent but not recorded"))
        }
        Err(e) => Err(anyhow::Error::new(e).context("Run failed")),
    }
}
