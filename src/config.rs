use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ScrapeError;
use crate::platforms::{kilimall_brands, SelectorTable, KILIMALL_BASE_URL, KILIMALL_CATEGORY};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Options for one scraper run. Every field has a default, so a JSON
/// override file only needs the keys it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub base_url: String,
    pub category: String,
    pub selectors: SelectorTable,
    pub known_brands: Vec<String>,
    pub headless: bool,
    pub user_agent: String,
    pub window_size: (u32, u32),
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
    pub page_load_timeout_secs: u64,
    pub content_wait_secs: u64,
    pub settle_secs: f64,
    pub scroll_pause_secs: f64,
    pub max_scrolls: u32,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_url: KILIMALL_BASE_URL.into(),
            category: KILIMALL_CATEGORY.into(),
            selectors: SelectorTable::default(),
            known_brands: kilimall_brands(),
            headless: false,
            user_agent: DEFAULT_USER_AGENT.into(),
            window_size: (1920, 1080),
            delay_min_secs: 2.0,
            delay_max_secs: 4.0,
            page_load_timeout_secs: 30,
            content_wait_secs: 15,
            settle_secs: 2.0,
            scroll_pause_secs: 2.0,
            max_scrolls: 5,
        }
    }
}

impl ScraperConfig {
    pub fn from_file(path: &Path) -> Result<Self, ScrapeError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Inter-page delay bounds, normalised so that `min <= max`.
    pub fn delay_range(&self) -> (f64, f64) {
        let lo = self.delay_min_secs.max(0.0);
        let hi = self.delay_max_secs.max(0.0);
        if lo <= hi {
            (lo, hi)
        } else {
            (hi, lo)
        }
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn content_wait(&self) -> Duration {
        Duration::from_secs(self.content_wait_secs)
    }

    pub fn settle_pause(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs.max(0.0))
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_secs_f64(self.scroll_pause_secs.max(0.0))
    }
}

// Helper function to get Chrome profile path from config
pub fn chrome_profile_path() -> Option<String> {
    let config_file = dirs::config_dir()?
        .join("kilimall-scraper")
        .join("chrome_profile.txt");

    let profile = fs::read_to_string(config_file).ok()?;
    let profile = profile.trim();
    if profile.is_empty() {
        None
    } else {
        Some(profile.to_string())
    }
}
