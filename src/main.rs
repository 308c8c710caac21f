use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;

use feedhq::config::{Config, MAX_INTERVAL_MINUTES};
use feedhq::feed::Fetcher;
use feedhq::model::{PollEvent, PollOutcome, RetentionPeriod};
use feedhq::sanitize::Sanitizer;
use feedhq::scheduler::Scheduler;
use feedhq::storage::{Database, NewFeed};

#[derive(Parser, Debug)]
#[command(
    name = "feedhq",
    version,
    about = "Feed-ingestion daemon: polls, normalizes, deduplicates and sanitizes feeds"
)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, short, value_name = "FILE", default_value = "feedhq.toml")]
    config: PathBuf,

    /// Override the database path from the configuration
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll due feeds until interrupted
    Run,
    /// Run a single scheduling cycle and print what happened
    PollOnce,
    /// Create a user (or print the ID of an existing one)
    AddUser { username: String },
    /// Create a category with a retention period
    AddCategory {
        #[arg(long)]
        user: i64,
        name: String,
        /// 1day, 2days, 1week, 1month, 1year or never
        #[arg(long, default_value = "1month")]
        retention: String,
    },
    /// Subscribe a user to a feed
    Add {
        #[arg(long)]
        user: i64,
        url: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<i64>,
        /// Base polling interval, defaults to the configured one
        #[arg(
            long,
            value_name = "MINUTES",
            value_parser = clap::value_parser!(u64).range(1..=MAX_INTERVAL_MINUTES)
        )]
        interval: Option<u64>,
        /// Show entry media without placeholders
        #[arg(long)]
        media_safe: bool,
    },
    /// Re-enable a feed disabled by a permanent failure
    Reactivate { feed_id: i64 },
    /// Delete entries past their category's retention period
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let db_path = config.database_path.to_string_lossy().into_owned();
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database {db_path}"))?;

    match args.command {
        Command::Run => {
            let scheduler = build_scheduler(&config, db)?;
            scheduler
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for ctrl-c");
                    }
                })
                .await;
        }
        Command::PollOnce => {
            let (tx, mut rx) = mpsc::channel(64);
            let scheduler = build_scheduler(&config, db)?.with_events(tx);
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    println!("{}", describe(&event));
                }
            });
            let events = scheduler.run_cycle().await;
            drop(scheduler);
            printer.await.context("Event printer task failed")?;
            println!("{} feed(s) polled", events.len());
        }
        Command::AddUser { username } => {
            let id = db.create_user(&username).await?;
            println!("{id}");
        }
        Command::AddCategory {
            user,
            name,
            retention,
        } => {
            let retention: RetentionPeriod = retention
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            let id = db.create_category(user, &name, retention).await?;
            println!("{id}");
        }
        Command::Add {
            user,
            url,
            name,
            category,
            interval,
            media_safe,
        } => {
            let poll_interval = match interval {
                // Range-checked by clap.
                Some(minutes) => chrono::Duration::minutes(minutes as i64),
                None => config.scheduler.base_interval(),
            };
            let feed = NewFeed {
                user_id: user,
                name: name.unwrap_or_default(),
                url,
                category_id: category,
                poll_interval,
                media_safe,
            };
            let id = db
                .insert_feed(&feed, config.fetch.allow_private_addresses)
                .await?;
            println!("{id}");
        }
        Command::Reactivate { feed_id } => {
            if !db.reactivate_feed(feed_id).await? {
                bail!("No feed with id {feed_id}");
            }
        }
        Command::Purge => {
            let deleted = db.purge_expired_entries(Utc::now()).await?;
            println!("{deleted} entries deleted");
        }
    }

    Ok(())
}

fn build_scheduler(config: &Config, db: Database) -> Result<Scheduler<Database>> {
    let fetcher = Fetcher::new(config.fetch.clone()).context("Failed to build HTTP client")?;
    let sanitizer = Sanitizer::new(&config.sanitizer);
    Ok(Scheduler::new(db, fetcher, sanitizer, config.scheduler.clone()))
}

fn describe(event: &PollEvent) -> String {
    let outcome = match event.outcome {
        PollOutcome::Unchanged => "unchanged".to_string(),
        PollOutcome::NewEntries(n) => format!("{n} new"),
        PollOutcome::Error(kind) => format!("error: {kind}"),
    };
    let mut line = format!(
        "feed {} {}: {} (next poll {})",
        event.feed_id,
        event.url,
        outcome,
        event.next_poll_at.format("%Y-%m-%d %H:%M UTC")
    );
    if event.disabled {
        line.push_str(" [disabled]");
    } else if event.unhealthy {
        line.push_str(&format!(" [unhealthy, {} errors]", event.error_count));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_interval(value: &str) -> Result<Option<u64>, clap::Error> {
        let args = Args::try_parse_from([
            "feedhq",
            "add",
            "--user",
            "1",
            "https://example.org/feed",
            "--interval",
            value,
        ])?;
        match args.command {
            Command::Add { interval, .. } => Ok(interval),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_add_interval_bounds() {
        assert_eq!(add_interval("45").unwrap(), Some(45));
        assert_eq!(
            add_interval(&MAX_INTERVAL_MINUTES.to_string()).unwrap(),
            Some(MAX_INTERVAL_MINUTES)
        );
        assert!(add_interval("0").is_err());
        assert!(add_interval("-5").is_err());
        assert!(add_interval(&(MAX_INTERVAL_MINUTES + 1).to_string()).is_err());
        assert!(add_interval("9223372036854775807").is_err());
    }
}
