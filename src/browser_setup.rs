//! Browser executable discovery and launch (used by the [`crate::browser_worker`]
//! actor). Finds a local Chrome/Chromium install, falling back to
//! `chromiumoxide`'s managed downloader, then launches it headless with a
//! unique profile directory per instance.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{info, trace, warn};

use crate::USER_AGENT;

/// Find a Chrome/Chromium executable, checking `CHROME_PATH` first, then a
/// platform-specific list of common install locations, then `which`.
pub async fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("Using browser from CHROME_PATH: {}", path.display());
            return Ok(path);
        }
        warn!("CHROME_PATH points to a non-existent file: {}", path.display());
    }

    let paths: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    };

    for path_str in paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path_str.is_empty() {
                    let path = PathBuf::from(path_str);
                    info!("Found browser via `which`: {}", path.display());
                    return Ok(path);
                }
            }
        }
    }

    warn!("No Chrome/Chromium executable found; will download a managed build");
    Err(anyhow::anyhow!("Chrome/Chromium executable not found"))
}

/// Download a managed Chromium build into a temp-dir cache when no local
/// install is found.
pub async fn download_managed_browser() -> Result<PathBuf> {
    info!("Downloading managed Chromium browser...");
    let cache_dir = std::env::temp_dir().join("marathon_crawler_chromium");
    std::fs::create_dir_all(&cache_dir).context("failed to create chromium cache dir")?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .context("failed to build fetcher options")?,
    );
    let revision_info = fetcher.fetch().await.context("failed to fetch browser")?;
    info!("Downloaded Chromium to: {}", revision_info.folder_path.display());
    Ok(revision_info.executable_path)
}

/// Launch a headless browser with a unique per-instance profile directory,
/// returning the browser handle, its CDP event-handler task, and the
/// profile directory (for later cleanup).
pub async fn launch_browser(headless: bool, chrome_path: Option<PathBuf>) -> Result<(Browser, JoinHandle<()>, PathBuf)> {
    let chrome_path = match chrome_path {
        Some(p) if p.exists() => p,
        _ => match find_browser_executable().await {
            Ok(path) => path,
            Err(_) => download_managed_browser().await?,
        },
    };

    let user_data_dir = std::env::temp_dir().join(format!("marathon_crawler_chrome_{}", std::process::id()));
    std::fs::create_dir_all(&user_data_dir).context("failed to create browser profile dir")?;

    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(1920, 1080)
        .user_data_dir(user_data_dir.clone())
        .chrome_executable(chrome_path)
        .arg(format!("--user-agent={USER_AGENT}"))
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-gpu")
        .arg("--mute-audio");

    config_builder = if headless {
        config_builder.headless_mode(HeadlessMode::default())
    } else {
        config_builder.with_head()
    };

    let browser_config = config_builder
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("failed to launch browser")?;

    let handler_task = task::spawn(async move {
        while let Some(h) = handler.next().await {
            if let Err(e) = h {
                trace!(error = %e, "browser handler event error");
            }
        }
        info!("browser handler task completed");
    });

    Ok((browser, handler_task, user_data_dir))
}
