//! chromedriver process management and the WebDriver command client.
//!
//! One `DriverManager` owns the driver subprocess for the whole process. All
//! browser access (monitors, batch sync) goes through it. Every command is a
//! JSON request against `http://<host>:<port>` whose response carries the
//! payload in a `value` envelope.

use keepsync_core::config::DriverConfig;
use keepsync_core::{Error, Result};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::{debug, info, warn};

use crate::profile::ProfileCatalog;

/// A browser cookie as reported by `GET /session/{id}/cookie`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct DriverManager {
    config: DriverConfig,
    base_url: String,
    user_data_dir: PathBuf,
    http: Client,
    /// Driver child process spawned by us. Held across start/stop so those never interleave.
    process: Mutex<Option<Child>>,
    /// Held by whole batch syncs.
    automation: Mutex<()>,
    browser_version: OnceCell<Option<String>>,
}

impl DriverManager {
    pub fn new(config: DriverConfig, user_data_dir: PathBuf) -> Self {
        let base_url = config.base_url();
        Self {
            config,
            base_url,
            user_data_dir,
            http: Client::new(),
            process: Mutex::new(None),
            automation: Mutex::new(()),
            browser_version: OnceCell::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn user_data_dir(&self) -> &Path {
        &self.user_data_dir
    }

    pub fn profiles(&self) -> ProfileCatalog {
        ProfileCatalog::new(self.user_data_dir.clone())
    }

    /// Exclusive use of the driver for a multi-session operation.
    pub async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.automation.lock().await
    }

    pub fn driver_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config.driver_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(Error::DriverUnavailable(format!(
                "chromedriver not found at {}",
                path.display()
            )));
        }
        find_binary(&driver_candidates()).ok_or_else(|| {
            Error::DriverUnavailable("chromedriver not found. Please install it.".to_string())
        })
    }

    pub fn browser_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.config.browser_path {
            if path.exists() {
                return Ok(path.clone());
            }
            return Err(Error::BrowserNotFound(format!(
                "browser not found at {}",
                path.display()
            )));
        }
        find_binary(&browser_candidates()).ok_or_else(|| {
            Error::BrowserNotFound("Chrome for Testing not found. Please install it.".to_string())
        })
    }

    /// Make sure a driver answers on the configured port, spawning one if needed.
    pub async fn start_driver(&self) -> Result<()> {
        let mut process = self.process.lock().await;

        if let Some(child) = process.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => {
                    debug!(status = %status, "Previous driver process exited");
                    *process = None;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to poll driver process");
                    *process = None;
                }
            }
        }

        if self.status_ok().await {
            debug!(url = %self.base_url, "Driver already reachable");
            return Ok(());
        }

        let driver = self.driver_binary()?;
        info!(path = %driver.display(), port = self.config.port, "Spawning chromedriver");

        let child = Command::new(&driver)
            .arg(format!("--port={}", self.config.port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::DriverUnavailable(format!("Failed to launch {}: {}", driver.display(), e))
            })?;
        *process = Some(child);

        let interval = Duration::from_millis(self.config.startup_interval_ms);
        for _ in 0..self.config.startup_attempts {
            if self.status_ok().await {
                info!(url = %self.base_url, "chromedriver ready");
                return Ok(());
            }
            tokio::time::sleep(interval).await;
        }

        if let Some(mut child) = process.take() {
            let _ = child.kill().await;
        }
        Err(Error::DriverUnavailable(format!(
            "chromedriver not ready after {} attempts on port {}",
            self.config.startup_attempts, self.config.port
        )))
    }

    async fn status_ok(&self) -> bool {
        match self.http.get(format!("{}/status", self.base_url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Open a browser window bound to `profile_directory` and return its session id.
    pub async fn launch_browser(
        &self,
        url: &str,
        headless: bool,
        profile_directory: &str,
    ) -> Result<String> {
        self.start_driver().await?;

        let browser = self.browser_binary()?;
        std::fs::create_dir_all(&self.user_data_dir)?;

        let version = if headless {
            self.browser_version(&browser).await
        } else {
            None
        };
        let args = build_browser_args(
            headless,
            version.as_deref(),
            &self.user_data_dir,
            profile_directory,
        );

        let body = json!({
            "capabilities": {
                "alwaysMatch": {
                    "goog:chromeOptions": {
                        "binary": browser.display().to_string(),
                        "args": args,
                        "excludeSwitches": ["enable-automation"],
                    }
                }
            }
        });

        let value = self
            .command(Method::POST, "/session", Some(body))
            .await
            .map_err(|e| match e {
                Error::Protocol(msg) => Error::SessionCreationFailed(msg),
                other => other,
            })?;

        let session_id = value
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::SessionCreationFailed("driver response has no sessionId".to_string())
            })?
            .to_string();

        info!(
            session = %session_id,
            profile = profile_directory,
            headless = headless,
            "Browser session created"
        );

        if !url.is_empty() {
            if let Err(e) = self.navigate(&session_id, url).await {
                self.delete_session(&session_id).await;
                return Err(e);
            }
        }

        Ok(session_id)
    }

    async fn browser_version(&self, browser: &Path) -> Option<String> {
        self.browser_version
            .get_or_init(|| detect_browser_version(browser.to_path_buf()))
            .await
            .clone()
    }

    pub async fn navigate(&self, session_id: &str, url: &str) -> Result<()> {
        self.command(
            Method::POST,
            &format!("/session/{}/url", session_id),
            Some(json!({ "url": url })),
        )
        .await?;
        debug!(session = %session_id, url = %url, "Navigated");
        Ok(())
    }

    pub async fn page_source(&self, session_id: &str) -> Result<String> {
        let value = self
            .command(Method::GET, &format!("/session/{}/source", session_id), None)
            .await?;
        value
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Protocol("page source is not a string".to_string()))
    }

    pub async fn cookies(&self, session_id: &str) -> Result<Vec<Cookie>> {
        let value = self
            .command(Method::GET, &format!("/session/{}/cookie", session_id), None)
            .await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("Invalid cookie list: {}", e)))
    }

    /// Run a synchronous script. Null, non-string and empty results read as `None`.
    pub async fn execute_script(&self, session_id: &str, script: &str) -> Result<Option<String>> {
        let value = self
            .command(
                Method::POST,
                &format!("/session/{}/execute/sync", session_id),
                Some(json!({ "script": script, "args": [] })),
            )
            .await?;
        Ok(value
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()))
    }

    /// Probe the session with a title request. Any failure means not alive.
    pub async fn session_alive(&self, session_id: &str) -> bool {
        let url = format!("{}/session/{}/title", self.base_url, session_id);
        match self.http.get(&url).send().await {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(_) => false,
        }
    }

    pub async fn delete_session(&self, session_id: &str) {
        match self
            .command(Method::DELETE, &format!("/session/{}", session_id), None)
            .await
        {
            Ok(_) => debug!(session = %session_id, "Session deleted"),
            Err(e) => debug!(session = %session_id, error = %e, "Session delete failed"),
        }
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        let value = match self.command(Method::GET, "/sessions", None).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Listing sessions failed");
                return Vec::new();
            }
        };
        value
            .as_array()
            .map(|sessions| {
                sessions
                    .iter()
                    .filter_map(|s| s.get("id").and_then(|v| v.as_str()))
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn delete_all_sessions(&self) {
        for session_id in self.list_sessions().await {
            self.delete_session(&session_id).await;
        }
    }

    /// Tear everything down: sessions, our driver, and any stray driver or
    /// browser processes left behind by crashed runs. Never fails.
    pub async fn cleanup(&self) {
        self.delete_all_sessions().await;
        self.stop_driver().await;
        for name in &self.config.stray_processes {
            kill_process_by_name(name).await;
        }
        info!("Driver cleanup finished");
    }

    async fn stop_driver(&self) {
        let mut process = self.process.lock().await;
        if let Some(mut child) = process.take() {
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to terminate chromedriver");
            }
        }
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {} failed: {}", method, path, e)))?;
        let status = response.status();
        let envelope: Value = response.json().await.map_err(|e| {
            Error::Protocol(format!(
                "{} {} returned an undecodable body (HTTP {}): {}",
                method, path, status, e
            ))
        })?;

        let value = envelope.get("value");
        if let Some(error) = value.and_then(|v| v.get("error")).and_then(|v| v.as_str()) {
            let message = value
                .and_then(|v| v.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            return Err(Error::Protocol(format!(
                "{} {}: {} {}",
                method, path, error, message
            )));
        }
        if !status.is_success() {
            return Err(Error::Protocol(format!(
                "{} {} returned HTTP {}",
                method, path, status
            )));
        }

        value
            .cloned()
            .ok_or_else(|| Error::Protocol(format!("{} {} response has no value", method, path)))
    }
}

/// Browser command line for a session. Deterministic for a given input.
pub fn build_browser_args(
    headless: bool,
    version: Option<&str>,
    user_data_dir: &Path,
    profile_directory: &str,
) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-infobars".to_string(),
        "--no-first-run".to_string(),
        "--test-type".to_string(),
    ];

    if headless {
        args.push("--headless=new".to_string());
        // The default headless UA contains "HeadlessChrome", which gets flagged.
        if let Some(version) = version {
            args.push(format!("--user-agent=Chrome/{}", version));
        }
    }

    args.push(format!("--user-data-dir={}", user_data_dir.display()));
    args.push(format!("--profile-directory={}", profile_directory));
    args
}

/// `"Google Chrome for Testing 131.0.6778.85"` -> `"131.0.0.0"`.
pub fn parse_major_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|token| token.contains('.') && token.starts_with(|c: char| c.is_ascii_digit()))
        .and_then(|token| token.split('.').next())
        .filter(|major| major.chars().all(|c| c.is_ascii_digit()))
        .map(|major| format!("{}.0.0.0", major))
}

async fn detect_browser_version(browser: PathBuf) -> Option<String> {
    let output = match Command::new(&browser)
        .arg("--version")
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "Could not read browser version");
            return None;
        }
    };
    let version = parse_major_version(&String::from_utf8_lossy(&output.stdout));
    debug!(version = ?version, "Detected browser version");
    version
}

fn browser_candidates() -> Vec<&'static str> {
    if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "chrome",
            "google-chrome-for-testing",
            "chromium",
            "chromium-browser",
            "/opt/google/chrome-for-testing/chrome",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome for Testing\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    }
}

fn driver_candidates() -> Vec<&'static str> {
    if cfg!(target_os = "windows") {
        vec!["chromedriver.exe", "chromedriver"]
    } else {
        vec!["chromedriver", "/usr/local/bin/chromedriver", "/usr/bin/chromedriver"]
    }
}

fn find_binary(candidates: &[&str]) -> Option<PathBuf> {
    for candidate in candidates {
        let path = Path::new(candidate);
        if path.is_absolute() && path.exists() {
            return Some(path.to_path_buf());
        }
        if !candidate.contains('/') && !candidate.contains('\\') {
            if let Ok(found) = which::which(candidate) {
                return Some(found);
            }
        }
    }
    None
}

async fn kill_process_by_name(name: &str) {
    #[cfg(windows)]
    let mut cmd = {
        let image = format!("{}.exe", name);
        let mut c = Command::new("taskkill");
        c.args(["/F", "/T", "/IM", image.as_str()]);
        c
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut c = Command::new("killall");
        c.args(["-9", name]);
        c
    };

    match cmd.stdout(Stdio::null()).stderr(Stdio::null()).status().await {
        Ok(status) => debug!(process = name, code = ?status.code(), "Force-kill finished"),
        Err(e) => debug!(process = name, error = %e, "Force-kill could not run"),
    }
}
