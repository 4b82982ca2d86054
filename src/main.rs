//! Gleaner main entry point
//!
//! This is the command-line interface for the Gleaner crawl engine.

use anyhow::Context as _;
use clap::Parser;
use gleaner::config::{load_config_with_hash, Config};
use gleaner::storage::{open_storage, SqliteStorage};
use gleaner::CollectorBuilder;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Gleaner: a callback-driven crawler
///
/// Gleaner visits the configured seed URLs, follows links within the
/// configured scope, and honours depth and request budgets, robots.txt,
/// per-host limits and fingerprint deduplication.
#[derive(Parser, Debug)]
#[command(name = "gleaner")]
#[command(version)]
#[command(about = "A callback-driven crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show the number of visited fingerprints in the database and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config, &hash);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_crawl(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("gleaner=info,warn"),
            1 => EnvFilter::new("gleaner=debug,info"),
            2 => EnvFilter::new("gleaner=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: shows the effective configuration
fn handle_dry_run(config: &Config, hash: &str) {
    let collector = &config.collector;

    println!("=== Gleaner Dry Run ===\n");
    println!("Config hash: {}\n", hash);

    println!("Collector:");
    println!("  User agent: {}", collector.user_agent);
    println!("  Max depth: {}", limit_text(collector.max_depth));
    println!("  Max requests: {}", limit_text(collector.max_requests));
    println!("  Async: {}", collector.async_mode);
    println!("  Robots.txt: {}", if collector.ignore_robots_txt { "ignored" } else { "honoured" });
    println!("  Revisits allowed: {}", collector.allow_url_revisit);
    if let Some(dir) = &collector.cache_dir {
        println!("  Cache: {}", dir);
    }

    println!("\nAllowed domains ({}):", collector.allowed_domains.len());
    for domain in &collector.allowed_domains {
        println!("  - {}", domain);
    }
    println!("\nDisallowed domains ({}):", collector.disallowed_domains.len());
    for domain in &collector.disallowed_domains {
        println!("  - {}", domain);
    }

    println!("\nLimits ({}):", config.limits.len());
    for rule in &config.limits {
        println!(
            "  - {} (parallelism {}, delay {}ms)",
            rule.domain_glob, rule.parallelism, rule.delay_ms
        );
    }

    println!("\nStorage: {}", config.storage.database_path.as_deref().unwrap_or("in-memory"));

    println!("\nSeeds ({}):", config.crawl.seeds.len());
    for seed in &config.crawl.seeds {
        println!("  * {}", seed);
    }

    println!("\n✓ Configuration is valid");
}

fn limit_text(limit: u32) -> String {
    if limit == 0 {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}

/// Handles the --stats mode: counts visited fingerprints in the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    let path = config
        .storage
        .database_path
        .as_deref()
        .context("--stats needs [storage] database-path")?;

    let storage = SqliteStorage::new(Path::new(path))?;
    println!("Database: {}", path);
    println!("Visited fingerprints: {}", storage.visited_count()?);
    Ok(())
}

/// Handles the main crawl operation
async fn handle_crawl(config: Config) -> anyhow::Result<()> {
    let store = open_storage(config.storage.database_path.as_deref().map(Path::new))?;

    let mut builder = CollectorBuilder::from_config(config.collector.clone()).storage(store);
    for rule in &config.limits {
        builder = builder.limit(rule.clone());
    }
    let collector = builder.build()?;

    if config.crawl.follow_links {
        collector.on_html(&config.crawl.link_selector, |element| {
            element.request.spawn_visit(&element.attr("href"));
        })?;
    }

    collector.on_response(|response| {
        tracing::info!(
            "{} {} ({} bytes, depth {})",
            response.status,
            response.request.url,
            response.body.len(),
            response.request.depth
        );
    });

    collector.on_error(|response, err| {
        tracing::warn!("{}: {}", response.request.url, err);
    });

    tracing::info!("Visiting {} seed URLs", config.crawl.seeds.len());
    for seed in &config.crawl.seeds {
        if let Err(e) = collector.visit(seed).await {
            tracing::warn!("Seed {} not crawled: {}", seed, e);
        }
    }

    collector.wait().await;

    tracing::info!("Crawl completed");
    println!("{}", collector);
    Ok(())
}
