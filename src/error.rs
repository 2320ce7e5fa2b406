use std::path::PathBuf;

use thirtyfour::error::WebDriverError;
use thirtyfour::fantoccini::error::CmdError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("browser setup failed: {0}")]
    Setup(String),

    #[error("webdriver error: {0}")]
    WebDriver(#[from] WebDriverError),

    #[error("page load timed out after {0} seconds")]
    Timeout(u64),

    #[error("invalid CSS selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("container fragment has no root element")]
    EmptyContainer,

    #[error("chromedriver provisioning failed: {0}")]
    Driver(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScrapeError {
    /// Classify a navigation failure. Timeouts reported by chromedriver
    /// become [`ScrapeError::Timeout`] so the page loop can skip them quietly.
    pub fn from_navigation(err: WebDriverError, timeout_secs: u64) -> Self {
        let timed_out = match &err {
            WebDriverError::Timeout(_) => true,
            WebDriverError::CmdError(CmdError::WaitTimeout) => true,
            WebDriverError::CmdError(CmdError::Standard(wd)) => wd.error() == "timeout",
            _ => false,
        };
        if timed_out {
            ScrapeError::Timeout(timeout_secs)
        } else {
            ScrapeError::WebDriver(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("missing required files: {}", format_paths(.0))]
    MissingFiles(Vec<PathBuf>),

    #[error("{0} failed to start (exited immediately)")]
    ExitedImmediately(String),

    #[error("failed to launch {name}: {source}")]
    Launch {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid service manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_timeouts_are_classified() {
        let err = ScrapeError::from_navigation(WebDriverError::Timeout("page load".into()), 30);
        assert!(matches!(err, ScrapeError::Timeout(30)));

        let err = ScrapeError::from_navigation(WebDriverError::CmdError(CmdError::WaitTimeout), 30);
        assert!(matches!(err, ScrapeError::Timeout(30)));

        let err = ScrapeError::from_navigation(WebDriverError::CustomError("net::ERR_NAME_NOT_RESOLVED".into()), 30);
        assert!(matches!(err, ScrapeError::WebDriver(_)));
    }
}
