//! BoardDocs archiver CLI
//!
//! Usage:
//!   boarddocs                                  Launch a browser and archive every meeting
//!   boarddocs --browser-ws-endpoint <URL>      Drive an already running browser
//!   boarddocs --query minutes --download       Only items named like "minutes", with attachments
//!   boarddocs --since 2024-01-01 --until 2024-06-30

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use boarddocs_browser::{find_or_open_tab, BrowserConnection, ConnectionMode, PageHandle};
use boarddocs_core::slug::parse_ymd;
use boarddocs_core::{DateRange, ScraperConfig};
use boarddocs_crawl::{CrawlOptions, CrawlSummary, Crawler};
use boarddocs_store::ManifestStore;
use chrono::NaiveDate;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "boarddocs")]
#[command(author, version, about = "Archive BoardDocs meetings, agenda items and attachments")]
struct Cli {
    /// DevTools address of a running browser (ws://... as printed by
    /// `chrome --remote-debugging-port=9222`, or http://host:port); a new
    /// browser is launched when omitted
    #[arg(long, alias = "browserWSEndpoint", value_name = "URL")]
    browser_ws_endpoint: Option<String>,

    /// Substring of the agenda item name to filter on, e.g. minutes
    #[arg(long)]
    query: Option<String>,

    /// Download attachments
    #[arg(long)]
    download: bool,

    /// Earliest meeting date to archive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    since: Option<NaiveDate>,

    /// Latest meeting date to archive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    until: Option<NaiveDate>,

    /// Archive directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// BoardDocs entry page
    #[arg(long, value_name = "URL")]
    site_url: Option<String>,

    /// Configuration file (defaults to ./boarddocs.toml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    parse_ymd(s).map_err(|e| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Failed to set up logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(summary) => {
            info!("Done: {}", summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            // Whatever was written so far stays on disk for the next run
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ScraperConfig> {
    let mut config = match &cli.config {
        Some(path) => ScraperConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ScraperConfig::load_or_default(Path::new("."))?,
    };

    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Some(site_url) = &cli.site_url {
        config.site_url = site_url.clone();
    }
    Ok(config)
}

fn crawl_options(cli: &Cli) -> CrawlOptions {
    CrawlOptions {
        query: cli.query.clone(),
        download: cli.download,
        dates: DateRange::new(cli.since, cli.until),
    }
}

async fn run(cli: Cli) -> Result<CrawlSummary> {
    let config = load_config(&cli)?;
    let options = crawl_options(&cli);

    let connection = match &cli.browser_ws_endpoint {
        Some(endpoint) => BrowserConnection::attach(endpoint, config.browser.idle_timeout())
            .await
            .with_context(|| format!("Failed to attach to browser at {}", endpoint))?,
        None => BrowserConnection::launch(&config.browser).context("Failed to launch browser")?,
    };
    if connection.mode() == ConnectionMode::Attached {
        info!("Attached to running browser; it stays open afterwards");
    }

    let crawled = crawl(&connection, &config, options).await;
    let released = connection.close().await;

    match (crawled, released) {
        (Ok(summary), released) => {
            released.context("Failed to release browser")?;
            Ok(summary)
        }
        (Err(e), released) => {
            if let Err(close_err) = released {
                warn!("Failed to release browser: {}", close_err);
            }
            Err(e)
        }
    }
}

async fn crawl(
    connection: &BrowserConnection,
    config: &ScraperConfig,
    options: CrawlOptions,
) -> Result<CrawlSummary> {
    let handle = PageHandle::from(find_or_open_tab(connection.browser(), &config.site_url).await?);
    let store = ManifestStore::new(&config.output_dir);
    info!("Archiving into {}", store.root().display());

    let crawled = match Crawler::new(handle.page().clone(), store, config, options) {
        Ok(mut crawler) => crawler.run().await,
        Err(e) => Err(e),
    };
    let closed = handle.close().await;

    let summary = crawled.context("Crawl failed")?;
    closed.context("Failed to close page")?;
    Ok(summary)
}
