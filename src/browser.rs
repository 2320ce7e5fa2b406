use async_trait::async_trait;
use log::{error, info, warn};
use rand::Rng;
use serde_json::json;
use std::future::Future;
use std::process::{Child, Stdio};
use std::time::Instant;
use thirtyfour::prelude::*;
use thirtyfour::ChromeCapabilities;
use tokio::time::{sleep, timeout, Duration};

use crate::chromedriver::{ensure_chromedriver, kill_stray_browsers};
use crate::config::{chrome_profile_path, ScraperConfig};
use crate::error::ScrapeError;
use crate::scraper::PageFetcher;

const MASK_WEBDRIVER: &str =
    "Object.defineProperty(navigator, 'webdriver', {get: () => undefined})";
const DOCUMENT_HEIGHT: &str = "return document.body.scrollHeight";
const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";

// Launch-time flags: stability in containers, no background throttling or
// telemetry, and no automation fingerprint.
const CHROME_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-web-security",
    "--disable-features=VizDisplayCompositor,TranslateUI",
    "--disable-logging",
    "--disable-extensions",
    "--disable-default-apps",
    "--disable-blink-features=AutomationControlled",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-component-update",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-sync",
    "--metrics-recording-only",
    "--no-first-run",
    "--safebrowsing-disable-auto-update",
    "--password-store=basic",
    "--use-mock-keychain",
];

/// Scroll-height probe used by the lazy-load loop.
#[async_trait]
pub trait Scrollable: Send + Sync {
    async fn document_height(&self) -> Result<i64, ScrapeError>;

    async fn scroll_to_bottom(&self) -> Result<(), ScrapeError>;
}

/// Scrolls to the bottom until the document height stops changing or
/// `max_scrolls` growing scrolls have happened. Returns that count.
pub async fn scroll_until_stable<S: Scrollable + ?Sized>(
    page: &S,
    pause: Duration,
    max_scrolls: u32,
) -> Result<u32, ScrapeError> {
    let mut last_height = page.document_height().await?;
    let mut attempts = 0;

    while attempts < max_scrolls {
        page.scroll_to_bottom().await?;
        sleep(pause).await;
        let new_height = page.document_height().await?;

        if new_height == last_height {
            break;
        }
        last_height = new_height;
        attempts += 1;
    }

    info!("Completed scrolling after {} attempts", attempts);
    Ok(attempts)
}

fn chrome_capabilities(config: &ScraperConfig) -> Result<ChromeCapabilities, ScrapeError> {
    let mut caps = DesiredCapabilities::chrome();

    if config.headless {
        caps.add_chrome_arg("--headless=new")?;
    }
    for arg in CHROME_ARGS {
        caps.add_chrome_arg(arg)?;
    }
    let (width, height) = config.window_size;
    caps.add_chrome_arg(&format!("--window-size={},{}", width, height))?;
    caps.add_chrome_arg(&format!("--user-agent={}", config.user_agent))?;

    if let Some(profile_path) = chrome_profile_path() {
        info!("Using Chrome profile at {}", profile_path);
        caps.add_chrome_arg(&format!("--user-data-dir={}", profile_path))?;
    }

    caps.add_chrome_option("excludeSwitches", ["enable-automation", "enable-logging"])?;
    caps.add_chrome_option("useAutomationExtension", false)?;
    caps.add_chrome_option(
        "prefs",
        json!({
            "profile.default_content_setting_values": {
                "notifications": 2,
                "media_stream": 2,
                "media_stream_mic": 2,
                "media_stream_camera": 2
            }
        }),
    )?;
    Ok(caps)
}

/// Run `attempt`; if it fails, run `cleanup`, wait `pause` and try exactly
/// once more. The second error is returned as-is.
pub async fn launch_with_retry<T, A, Fut, C>(
    mut attempt: A,
    cleanup: C,
    pause: Duration,
) -> Result<T, ScrapeError>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScrapeError>>,
    C: FnOnce(),
{
    match attempt().await {
        Ok(value) => Ok(value),
        Err(e) => {
            error!("Failed to create Chrome driver: {}", e);
            cleanup();
            info!("Cleaned up stray browser processes, retrying...");
            sleep(pause).await;

            attempt().await.map_err(|retry_error| {
                error!("Retry also failed: {}", retry_error);
                retry_error
            })
        }
    }
}

/// A chromedriver child plus the WebDriver session connected to it.
///
/// Owned by exactly one worker for its lifetime. [`close`](Self::close)
/// quits the session; `Drop` still kills the chromedriver child if `close`
/// was never reached.
pub struct BrowserSession {
    driver: Option<WebDriver>,
    chromedriver: Option<Child>,
    product_list: String,
    page_load_timeout: Duration,
    content_wait: Duration,
    settle_pause: Duration,
    scroll_pause: Duration,
    max_scrolls: u32,
}

impl BrowserSession {
    /// Start chromedriver and a Chrome session. One retry is made after
    /// killing stray browser processes.
    pub async fn launch(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        launch_with_retry(
            || Self::try_launch(config),
            kill_stray_browsers,
            Duration::from_secs(2),
        )
        .await
    }

    async fn try_launch(config: &ScraperConfig) -> Result<Self, ScrapeError> {
        let driver_path = ensure_chromedriver().await?;
        let driver_dir = driver_path
            .parent()
            .ok_or_else(|| ScrapeError::Setup("invalid driver path".into()))?;

        let port: u16 = rand::thread_rng().gen_range(5000..9000);

        let child = std::process::Command::new(&driver_path)
            .arg(format!("--port={}", port))
            .current_dir(driver_dir)
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| ScrapeError::Setup(format!("failed to spawn chromedriver: {}", e)))?;

        // From here on Drop reaps the child on every early return.
        let mut session = Self {
            driver: None,
            chromedriver: Some(child),
            product_list: config.selectors.product_list.clone(),
            page_load_timeout: config.page_load_timeout(),
            content_wait: config.content_wait(),
            settle_pause: config.settle_pause(),
            scroll_pause: config.scroll_pause(),
            max_scrolls: config.max_scrolls,
        };

        // Wait a bit for chromedriver to start
        sleep(Duration::from_secs(2)).await;

        info!("Initializing Chrome driver...");
        let caps = chrome_capabilities(config)?;
        let driver = WebDriver::new(&format!("http://localhost:{}", port), caps)
            .await
            .map_err(|e| ScrapeError::Setup(format!("failed to connect to chromedriver: {}", e)))?;
        session.driver = Some(driver);
        info!("Chrome driver created successfully");

        if let Err(e) = session.configure().await {
            session.close().await;
            return Err(e);
        }

        info!("Chrome driver initialized successfully");
        Ok(session)
    }

    async fn configure(&self) -> Result<(), ScrapeError> {
        let driver = self.driver()?;
        driver.execute(MASK_WEBDRIVER, Vec::new()).await?;
        driver.set_page_load_timeout(self.page_load_timeout).await?;
        Ok(())
    }

    fn driver(&self) -> Result<&WebDriver, ScrapeError> {
        self.driver
            .as_ref()
            .ok_or_else(|| ScrapeError::Setup("browser session already closed".into()))
    }

    /// Wait for the product list marker. A timeout is only a warning:
    /// extraction proceeds against whatever the DOM holds.
    async fn wait_for_content(&self) -> Result<(), ScrapeError> {
        let driver = self.driver()?;
        let start = Instant::now();
        loop {
            if driver.find(By::Css(self.product_list.as_str())).await.is_ok() {
                // Extra wait for dynamic content to settle
                sleep(self.settle_pause).await;
                info!("Page loaded successfully");
                return Ok(());
            }

            if start.elapsed() >= self.content_wait {
                warn!("Timeout waiting for page to load completely.");
                return Ok(());
            }

            sleep(Duration::from_millis(500)).await;
        }
    }

    pub async fn close(mut self) {
        info!("Closing browser...");
        if let Some(driver) = self.driver.take() {
            if let Err(e) = driver.quit().await {
                warn!("Error during driver quit: {}", e);
            }
        }
        self.reap_chromedriver();
        info!("Browser closed successfully");
    }

    fn reap_chromedriver(&mut self) {
        if let Some(mut child) = self.chromedriver.take() {
            if let Err(e) = child.kill() {
                warn!("Failed to kill chromedriver: {}", e);
            }
            let _ = child.wait();
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.reap_chromedriver();
    }
}

#[async_trait]
impl Scrollable for BrowserSession {
    async fn document_height(&self) -> Result<i64, ScrapeError> {
        let ret = self.driver()?.execute(DOCUMENT_HEIGHT, Vec::new()).await?;
        Ok(ret.json().as_f64().map(|h| h as i64).unwrap_or(0))
    }

    async fn scroll_to_bottom(&self) -> Result<(), ScrapeError> {
        self.driver()?.execute(SCROLL_TO_BOTTOM, Vec::new()).await?;
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for BrowserSession {
    async fn open(&mut self, url: &str) -> Result<(), ScrapeError> {
        let driver = self.driver()?;
        // chromedriver enforces the page-load timeout itself; this outer
        // bound covers a hung driver connection.
        let guard = self.page_load_timeout + Duration::from_secs(5);
        match timeout(guard, driver.goto(url)).await {
            Ok(result) => result
                .map_err(|e| ScrapeError::from_navigation(e, self.page_load_timeout.as_secs()))?,
            Err(_) => return Err(ScrapeError::Timeout(self.page_load_timeout.as_secs())),
        }
        self.wait_for_content().await
    }

    async fn trigger_lazy_load(&mut self) -> Result<(), ScrapeError> {
        if let Err(e) = scroll_until_stable(&*self, self.scroll_pause, self.max_scrolls).await {
            warn!("Error during scrolling: {}", e);
        }
        Ok(())
    }

    async fn container_fragments(
        &mut self,
        selector: &str,
    ) -> Result<Vec<Result<String, ScrapeError>>, ScrapeError> {
        let containers = self.driver()?.find_all(By::Css(selector)).await?;

        let mut fragments = Vec::with_capacity(containers.len());
        for container in containers {
            fragments.push(container.outer_html().await.map_err(ScrapeError::from));
        }
        Ok(fragments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Mutex;

    /// Page whose height grows through a fixed sequence, then stays put.
    struct GrowingPage {
        heights: Mutex<Vec<i64>>,
        scrolls: Mutex<u32>,
    }

    impl GrowingPage {
        fn new(heights: &[i64]) -> Self {
            Self {
                heights: Mutex::new(heights.iter().rev().copied().collect()),
                scrolls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Scrollable for GrowingPage {
        async fn document_height(&self) -> Result<i64, ScrapeError> {
            let mut heights = self.heights.lock().unwrap();
            let next = if heights.len() > 1 {
                heights.pop().unwrap()
            } else {
                heights[0]
            };
            Ok(next)
        }

        async fn scroll_to_bottom(&self) -> Result<(), ScrapeError> {
            *self.scrolls.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn stops_once_height_is_stable() {
        let page = GrowingPage::new(&[1000, 2000, 3000, 3000]);
        let attempts = scroll_until_stable(&page, Duration::ZERO, 5).await.unwrap();

        assert_eq!(attempts, 2);
        assert_eq!(*page.scrolls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn stops_at_max_scrolls_on_endless_page() {
        let page = GrowingPage::new(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let attempts = scroll_until_stable(&page, Duration::ZERO, 5).await.unwrap();

        assert_eq!(attempts, 5);
        assert_eq!(*page.scrolls.lock().unwrap(), 5);
    }

    fn flaky(failures: u32, calls: &Cell<u32>) -> impl Future<Output = Result<u32, ScrapeError>> {
        calls.set(calls.get() + 1);
        let call = calls.get();
        async move {
            if call <= failures {
                Err(ScrapeError::Setup(format!("attempt {call} refused")))
            } else {
                Ok(call)
            }
        }
    }

    #[tokio::test]
    async fn first_attempt_success_skips_cleanup() {
        let (calls, cleanups) = (Cell::new(0), Cell::new(0));
        let result = launch_with_retry(
            || flaky(0, &calls),
            || cleanups.set(cleanups.get() + 1),
            Duration::ZERO,
        )
        .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(cleanups.get(), 0);
    }

    #[tokio::test]
    async fn retries_once_after_cleanup() {
        let (calls, cleanups) = (Cell::new(0), Cell::new(0));
        let result = launch_with_retry(
            || flaky(1, &calls),
            || cleanups.set(cleanups.get() + 1),
            Duration::ZERO,
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(cleanups.get(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_second_failure() {
        let (calls, cleanups) = (Cell::new(0), Cell::new(0));
        let result = launch_with_retry(
            || flaky(5, &calls),
            || cleanups.set(cleanups.get() + 1),
            Duration::ZERO,
        )
        .await;

        match result {
            Err(ScrapeError::Setup(msg)) => assert_eq!(msg, "attempt 2 refused"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.get(), 2);
        assert_eq!(cleanups.get(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn dropping_an_unconnected_session_reaps_chromedriver() {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        let config = ScraperConfig::default();
        let session = BrowserSession {
            driver: None,
            chromedriver: Some(child),
            product_list: config.selectors.product_list.clone(),
            page_load_timeout: config.page_load_timeout(),
            content_wait: config.content_wait(),
            settle_pause: config.settle_pause(),
            scroll_pause: config.scroll_pause(),
            max_scrolls: config.max_scrolls,
        };

        drop(session);

        assert!(kill(pid, None).is_err());
    }

    #[test]
    fn capability_table_builds_for_both_modes() {
        for headless in [true, false] {
            let config = ScraperConfig {
                headless,
                ..Default::default()
            };
            assert!(chrome_capabilities(&config).is_ok());
        }
        assert!(CHROME_ARGS.contains(&"--disable-blink-features=AutomationControlled"));
    }
}
