use log::{info, warn};
use std::env;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use zip::ZipArchive;

use crate::error::ScrapeError;

/// Environment variable that points at a chromedriver to use as-is.
pub const CHROMEDRIVER_ENV: &str = "CHROMEDRIVER";

fn driver_err(msg: impl Into<String>) -> ScrapeError {
    ScrapeError::Driver(msg.into())
}

fn driver_filename() -> &'static str {
    if cfg!(windows) {
        "chromedriver.exe"
    } else {
        "chromedriver"
    }
}

fn driver_dir() -> Result<PathBuf, ScrapeError> {
    Ok(dirs::data_local_dir()
        .ok_or_else(|| driver_err("Could not determine local data directory"))?
        .join("kilimall-scraper")
        .join("chromedriver"))
}

/// Returns a chromedriver whose major version matches the installed Chrome,
/// downloading one from Chrome for Testing when needed.
pub async fn ensure_chromedriver() -> Result<PathBuf, ScrapeError> {
    if let Ok(path) = env::var(CHROMEDRIVER_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using chromedriver from ${}: {:?}", CHROMEDRIVER_ENV, path);
            return Ok(path);
        }
        warn!("${} points at a missing file: {:?}", CHROMEDRIVER_ENV, path);
    }

    let dir = driver_dir()?;
    fs::create_dir_all(&dir)
        .map_err(|e| driver_err(format!("Failed to create driver directory: {}", e)))?;

    let chrome_version = get_chrome_version()?;
    let major = major_version(&chrome_version).to_string();
    info!("Detected Chrome version: {}", chrome_version);

    let driver_path = dir.join(driver_filename());

    if driver_path.exists() {
        match get_existing_driver_version(&driver_path) {
            Ok(existing) if driver_matches(&existing, &major) => {
                info!("Compatible chromedriver already exists");
                return Ok(driver_path);
            }
            Ok(existing) => info!(
                "Existing chromedriver version {} is incompatible with Chrome {}",
                existing, chrome_version
            ),
            Err(e) => warn!("Could not read existing chromedriver version: {}", e),
        }
    }

    info!("Downloading compatible chromedriver...");
    download_chromedriver(&driver_path, &major).await?;

    Ok(driver_path)
}

/// True when a chromedriver version string shares Chrome's major version.
fn driver_matches(driver_version: &str, chrome_major: &str) -> bool {
    major_version(driver_version) == chrome_major
}

pub fn major_version(version: &str) -> &str {
    version.split('.').next().unwrap_or("")
}

fn get_existing_driver_version(driver_path: &Path) -> Result<String, ScrapeError> {
    let output = Command::new(driver_path)
        .arg("--version")
        .output()
        .map_err(|e| driver_err(format!("Failed to execute chromedriver: {}", e)))?;

    // "ChromeDriver 120.0.6099.109 (...)"
    String::from_utf8_lossy(&output.stdout)
        .split_whitespace()
        .nth(1)
        .map(str::to_string)
        .ok_or_else(|| driver_err("Could not parse chromedriver version"))
}

fn download_platform() -> Result<&'static str, ScrapeError> {
    match (env::consts::OS, env::consts::ARCH) {
        ("linux", _) => Ok("linux64"),
        ("macos", "aarch64") => Ok("mac-arm64"),
        ("macos", _) => Ok("mac-x64"),
        ("windows", _) => Ok("win64"),
        _ => Err(driver_err("Unsupported OS!")),
    }
}

async fn download_chromedriver(driver_path: &Path, major_version: &str) -> Result<(), ScrapeError> {
    let client = reqwest::Client::new();

    let version_url = format!(
        "https://googlechromelabs.github.io/chrome-for-testing/LATEST_RELEASE_{}",
        major_version
    );
    let driver_version = client
        .get(&version_url)
        .send()
        .await
        .map_err(|e| driver_err(format!("Failed to fetch chromedriver version: {}", e)))?
        .text()
        .await
        .map_err(|e| driver_err(format!("Failed to read response: {}", e)))?
        .trim()
        .to_string();

    info!("Downloading chromedriver version: {}", driver_version);

    let platform = download_platform()?;
    let download_url = format!(
        "https://storage.googleapis.com/chrome-for-testing-public/{}/{}/chromedriver-{}.zip",
        driver_version, platform, platform
    );

    let bytes = client
        .get(&download_url)
        .send()
        .await
        .map_err(|e| driver_err(format!("Failed to download chromedriver: {}", e)))?
        .bytes()
        .await
        .map_err(|e| driver_err(format!("Failed to read download: {}", e)))?;

    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| driver_err(format!("Failed to open zip archive: {}", e)))?;

    // The binary sits inside a chromedriver-<platform>/ folder.
    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| driver_err(format!("Failed to read zip entry: {}", e)))?;
        let is_driver = Path::new(file.name())
            .file_name()
            .is_some_and(|name| name == driver_filename());
        if !is_driver {
            continue;
        }

        let mut out_file = fs::File::create(driver_path)
            .map_err(|e| driver_err(format!("Failed to write chromedriver: {}", e)))?;
        std::io::copy(&mut file, &mut out_file)
            .map_err(|e| driver_err(format!("Failed to extract chromedriver: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(driver_path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(driver_path, perms)?;
        }

        info!("Chromedriver downloaded successfully to: {:?}", driver_path);
        return Ok(());
    }

    Err(driver_err(format!("{} not found in archive", driver_filename())))
}

pub fn find_chrome_executable() -> Result<PathBuf, ScrapeError> {
    let candidates: Vec<PathBuf> = match env::consts::OS {
        "windows" => {
            let mut paths = vec![
                PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
                PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
            ];
            if let Some(local) = dirs::data_local_dir() {
                paths.push(local.join(r"Google\Chrome\Application\chrome.exe"));
            }
            paths
        }
        "macos" => vec![PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        )],
        "linux" => [
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ]
        .iter()
        .map(PathBuf::from)
        .collect(),
        _ => return Err(driver_err("Unsupported OS!")),
    };

    if let Some(path) = candidates.into_iter().find(|p| p.exists()) {
        return Ok(path);
    }

    let (finder, name) = if cfg!(windows) {
        ("where", "chrome.exe")
    } else {
        ("which", "google-chrome")
    };
    if let Ok(output) = Command::new(finder).arg(name).output() {
        let path_str = String::from_utf8_lossy(&output.stdout);
        if let Some(first) = path_str.lines().next().map(str::trim) {
            if !first.is_empty() {
                return Ok(PathBuf::from(first));
            }
        }
    }

    Err(driver_err("Chrome executable not found"))
}

pub fn get_chrome_version() -> Result<String, ScrapeError> {
    let chrome_path = find_chrome_executable()?;
    info!("Found Chrome at: {:?}", chrome_path);

    let output = Command::new(&chrome_path)
        .arg("--version")
        .output()
        .map_err(|e| driver_err(format!("Failed to execute Chrome: {}", e)))?;

    parse_chrome_version(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| driver_err("Could not parse Chrome version"))
}

/// "Google Chrome 120.0.6099.109" -> "120.0.6099.109"
pub fn parse_chrome_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|v| v.contains('.') && v.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
}

pub fn is_command_available(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Force-kills leftover chromedriver/Chrome processes from a previous run.
/// Best effort: failures are logged and otherwise ignored.
pub fn kill_stray_browsers() {
    let commands: Vec<(&str, Vec<&str>)> = if cfg!(windows) {
        vec![
            ("taskkill", vec!["/F", "/IM", "chrome.exe", "/T"]),
            ("taskkill", vec!["/F", "/IM", "chromedriver.exe", "/T"]),
        ]
    } else if is_command_available("pkill") {
        vec![
            ("pkill", vec!["-f", "chromedriver"]),
            ("pkill", vec!["-f", "chrome --headless"]),
        ]
    } else {
        warn!("pkill not available, skipping stray browser cleanup");
        return;
    };

    for (program, args) in commands {
        if let Err(e) = Command::new(program).args(&args).output() {
            warn!("Failed to run {} {:?}: {}", program, args, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_version_strings() {
        assert_eq!(
            parse_chrome_version("Google Chrome 120.0.6099.109\n").as_deref(),
            Some("120.0.6099.109")
        );
        assert_eq!(
            parse_chrome_version("Chromium 119.0.6045.159 built on Debian").as_deref(),
            Some("119.0.6045.159")
        );
        assert_eq!(parse_chrome_version(""), None);
        assert_eq!(major_version("120.0.6099.109"), "120");
    }

    #[test]
    fn existing_driver_must_share_chrome_major() {
        let chrome_major = major_version("120.0.6099.109");
        assert!(driver_matches("120.0.6099.71", chrome_major));
        assert!(!driver_matches("119.0.6045.105", chrome_major));
        assert!(!driver_matches("1200.0.1", chrome_major));
    }
}
