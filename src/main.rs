//! StrataCache Admin CLI
//!
//! Maintenance commands for a Bulk-tier root directory. The Fast tier dies
//! with its process and the Durable tier enforces TTLs on read, but Bulk-tier
//! files for keys nobody reads again survive until something walks the
//! directory. This binary is that something, run from cron or by hand:
//!
//! ```text
//! stratacache --bulk-root /var/cache/app sweep
//! stratacache --bulk-root /var/cache/app stats
//! stratacache --bulk-root /var/cache/app purge
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stratacache::cache::Tier;
use stratacache::cache::BulkTier;
use stratacache::Result;

// =============================================================================
// CLI Arguments
// =============================================================================

/// StrataCache admin - maintenance for a Bulk-tier cache directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bulk-tier root directory
    #[arg(long, env = "STRATACACHE_BULK_ROOT")]
    bulk_root: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Remove expired and undecodable entry files plus abandoned temp files
    Sweep,
    /// Print tier statistics as JSON
    Stats,
    /// Remove every entry file under the root
    Purge,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!(version = stratacache::version(), root = %args.bulk_root.display(), "stratacache admin");

    let bulk = BulkTier::open(&args.bulk_root).await?;

    match args.command {
        Command::Sweep => {
            let before = bulk.stats();
            let purged = bulk.purge_expired().await?;
            let after = bulk.stats();
            info!(
                purged,
                remaining = after.entries,
                freed_bytes = before.total_bytes.saturating_sub(after.total_bytes),
                "sweep complete"
            );
            println!("purged {} entries, {} remaining", purged, after.entries);
        }
        Command::Stats => {
            let stats = bulk.stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Purge => {
            let before = bulk.stats();
            bulk.clear().await?;
            info!(removed = before.entries, "purge complete");
            println!("removed {} entries", before.entries);
        }
    }

    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
