// Module organization for the Kilimall scraper

pub mod browser;
pub mod chromedriver;
pub mod config;
pub mod error;
pub mod extractor;
pub mod models;
pub mod output;
pub mod platforms;
pub mod scraper;
pub mod supervisor;

// Re-export commonly used types for convenience
pub use browser::BrowserSession;
pub use config::ScraperConfig;
pub use error::{ScrapeError, SupervisorError};
pub use extractor::ProductExtractor;
pub use models::{Product, SENTINEL};
pub use self::scraper::{PageFetcher, Paginator, ProgressReporter, Target};
