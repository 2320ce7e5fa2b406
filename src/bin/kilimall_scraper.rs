use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use log::info;
use url::Url;

use kilimall_scraper::output::{persist, summary_lines, DEFAULT_OUTPUT};
use kilimall_scraper::{BrowserSession, Paginator, ProductExtractor, ScraperConfig, Target};

/// Scrape Kilimall product listings with a real browser
#[derive(Parser, Debug)]
#[command(name = "kilimall-scraper")]
#[command(about = "Scrape Kilimall search results or category listings", long_about = None)]
#[command(group(ArgGroup::new("target").required(true).multiple(true).args(["search", "category"])))]
struct Args {
    /// Search query
    #[arg(long)]
    search: Option<String>,

    /// Category listing URL (takes precedence over --search)
    #[arg(long)]
    category: Option<Url>,

    /// Number of result pages to scrape
    #[arg(long, default_value_t = 2)]
    pages: u32,

    /// Output JSON file
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Run Chrome without a visible window
    #[arg(long)]
    headless: bool,

    /// JSON file overriding scraper defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// The category wins when both are given. A blank query counts as missing.
    fn target(&self) -> Option<Target> {
        let search = self.search.as_ref().filter(|q| !q.trim().is_empty());
        match (&self.category, search) {
            (Some(url), _) => Some(Target::Category(url.clone())),
            (None, Some(query)) => Some(Target::Search(query.clone())),
            (None, None) => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = match &args.config {
        Some(path) => ScraperConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ScraperConfig::default(),
    };
    if args.headless {
        config.headless = true;
    }

    let target = args
        .target()
        .context("Please provide either --search or --category argument")?;
    match &target {
        Target::Category(url) => println!("Scraping category: {}", url),
        Target::Search(query) => println!("Searching for: {}", query),
    }

    let extractor = ProductExtractor::new(&config)?;
    let mut session = BrowserSession::launch(&config)
        .await
        .context("could not start the browser")?;

    let mut progress = |percent: f64, message: &str| {
        println!("Progress: {:.1}% - {}", percent, message);
    };
    let products = Paginator::new(&mut session, &extractor, &config)
        .run(&target, args.pages, &mut progress)
        .await;
    session.close().await;

    let written = persist(&products, &args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    if !written {
        println!("No products found!");
        return Ok(());
    }
    info!("Results written to {}", args.output.display());

    println!();
    for line in summary_lines(&products) {
        println!("{}", line);
    }
    println!("\nResults saved to: {}", args.output.display());
    Ok(())
}
