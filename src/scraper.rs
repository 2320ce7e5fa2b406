use async_trait::async_trait;
use log::{error, info, warn};
use rand::Rng;
use tokio::time::{sleep, Duration};
use url::Url;

use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::extractor::ProductExtractor;
use crate::models::Product;

/// What the pagination loop needs from a browser: load a page, coax lazy
/// content into the DOM, then hand back each product container's HTML.
#[async_trait]
pub trait PageFetcher: Send {
    async fn open(&mut self, url: &str) -> Result<(), ScrapeError>;

    async fn trigger_lazy_load(&mut self) -> Result<(), ScrapeError>;

    /// Outer HTML of every node matching `selector`. The outer error fails
    /// the page; an inner error only drops that container.
    async fn container_fragments(
        &mut self,
        selector: &str,
    ) -> Result<Vec<Result<String, ScrapeError>>, ScrapeError>;
}

pub trait ProgressReporter {
    fn report(&mut self, percent: f64, message: &str);
}

impl<F: FnMut(f64, &str)> ProgressReporter for F {
    fn report(&mut self, percent: f64, message: &str) {
        self(percent, message)
    }
}

/// Reporter that discards everything.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&mut self, _percent: f64, _message: &str) {}
}

#[derive(Debug, Clone)]
pub enum Target {
    Search(String),
    Category(Url),
}

impl Target {
    pub fn page_url(&self, base_url: &str, page: u32) -> Result<Url, ScrapeError> {
        match self {
            Target::Search(query) => {
                let base = base_url.trim_end_matches('/');
                Ok(Url::parse(&format!(
                    "{}/search?q={}&page={}",
                    base,
                    urlencoding::encode(query),
                    page
                ))?)
            }
            Target::Category(url) => Ok(with_page(url, page)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Target::Search(query) => format!("search '{}'", query),
            Target::Category(url) => format!("category '{}'", url),
        }
    }
}

/// Replace any `page=<digits>` query segment with the given page index.
/// Every other segment is kept byte-for-byte and in order.
pub fn with_page(url: &Url, page: u32) -> Url {
    let mut query: Vec<&str> = url
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|segment| !segment.is_empty() && !is_page_segment(segment))
        .collect();
    let page_segment = format!("page={}", page);
    query.push(&page_segment);

    let mut out = url.clone();
    out.set_query(Some(&query.join("&")));
    out
}

fn is_page_segment(segment: &str) -> bool {
    segment
        .strip_prefix("page=")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

pub struct Paginator<'a, F: PageFetcher> {
    fetcher: &'a mut F,
    extractor: &'a ProductExtractor,
    config: &'a ScraperConfig,
}

impl<'a, F: PageFetcher> Paginator<'a, F> {
    pub fn new(fetcher: &'a mut F, extractor: &'a ProductExtractor, config: &'a ScraperConfig) -> Self {
        Self {
            fetcher,
            extractor,
            config,
        }
    }

    /// Scrape pages `1..=max_pages` of `target`. A failing page is logged
    /// and skipped without the inter-page delay; the run itself never fails.
    pub async fn run(
        &mut self,
        target: &Target,
        max_pages: u32,
        progress: &mut dyn ProgressReporter,
    ) -> Vec<Product> {
        info!(
            "Starting {} scrape across {} pages.",
            target.describe(),
            max_pages
        );
        let mut all_products = Vec::new();

        for page in 1..=max_pages {
            let percent = f64::from(page - 1) / f64::from(max_pages) * 90.0;
            progress.report(percent, &format!("Scraping page {}/{}...", page, max_pages));

            match self.scrape_page(target, page).await {
                Ok(products) => {
                    info!("Extracted {} products from page {}", products.len(), page);
                    all_products.extend(products);
                }
                Err(ScrapeError::Timeout(secs)) => {
                    warn!("Timeout on page {} after {}s, skipping...", page, secs);
                    continue;
                }
                Err(e) => {
                    error!("Error on page {}: {}", page, e);
                    continue;
                }
            }

            if page < max_pages {
                self.pause_between_pages().await;
            }
        }

        progress.report(
            100.0,
            &format!("Scraping completed! Found {} products", all_products.len()),
        );
        info!(
            "Scrape of {} complete. Total products found: {}",
            target.describe(),
            all_products.len()
        );
        all_products
    }

    async fn scrape_page(&mut self, target: &Target, page: u32) -> Result<Vec<Product>, ScrapeError> {
        let url = target.page_url(&self.config.base_url, page)?;
        info!("Navigating to page {}: {}", page, url);

        self.fetcher.open(url.as_str()).await?;
        self.fetcher.trigger_lazy_load().await?;

        let fragments = self
            .fetcher
            .container_fragments(&self.config.selectors.product_containers)
            .await?;
        info!("Found {} product containers on page {}", fragments.len(), page);

        let mut products = Vec::with_capacity(fragments.len());
        for (idx, fragment) in fragments.into_iter().enumerate() {
            match fragment {
                Ok(html) => products.extend(self.extractor.try_extract(&html)),
                Err(e) => warn!("Skipping container {} on page {}: {}", idx, page, e),
            }
        }
        Ok(products)
    }

    async fn pause_between_pages(&self) {
        let (lo, hi) = self.config.delay_range();
        let delay = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            lo
        };
        if delay > 0.0 {
            info!("Waiting {:.1} seconds before next page...", delay);
            sleep(Duration::from_secs_f64(delay)).await;
        }
    }
}

pub async fn search_products<F: PageFetcher>(
    fetcher: &mut F,
    extractor: &ProductExtractor,
    config: &ScraperConfig,
    query: &str,
    max_pages: u32,
    progress: &mut dyn ProgressReporter,
) -> Vec<Product> {
    Paginator::new(fetcher, extractor, config)
        .run(&Target::Search(query.to_string()), max_pages, progress)
        .await
}

pub async fn scrape_category<F: PageFetcher>(
    fetcher: &mut F,
    extractor: &ProductExtractor,
    config: &ScraperConfig,
    category_url: &Url,
    max_pages: u32,
    progress: &mut dyn ProgressReporter,
) -> Vec<Product> {
    Paginator::new(fetcher, extractor, config)
        .run(&Target::Category(category_url.clone()), max_pages, progress)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_encodes_query() {
        let url = Target::Search("tv stand & mount".into())
            .page_url("https://www.kilimall.co.ke/", 3)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.kilimall.co.ke/search?q=tv%20stand%20%26%20mount&page=3"
        );
    }

    #[test]
    fn category_url_replaces_existing_page() {
        let base = Url::parse("https://www.kilimall.co.ke/category/phones?page=7&sort=price").unwrap();
        let url = Target::Category(base).page_url("unused", 2).unwrap();
        assert_eq!(
            url.as_str(),
            "https://www.kilimall.co.ke/category/phones?sort=price&page=2"
        );
    }

    #[test]
    fn category_url_without_query_gains_one() {
        let base = Url::parse("https://www.kilimall.co.ke/category/tvs").unwrap();
        assert_eq!(
            with_page(&base, 1).as_str(),
            "https://www.kilimall.co.ke/category/tvs?page=1"
        );
    }

    #[test]
    fn category_url_keeps_other_segments_verbatim() {
        let base = Url::parse(
            "https://www.kilimall.co.ke/category/tv?q=tv%20stand&page=4&brand=Samsung,Tecno&flash&page=abc",
        )
        .unwrap();
        assert_eq!(
            with_page(&base, 1).as_str(),
            "https://www.kilimall.co.ke/category/tv?q=tv%20stand&brand=Samsung,Tecno&flash&page=abc&page=1"
        );
    }
}
