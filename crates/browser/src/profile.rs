//! Browser profiles on disk and the monitor that links a freshly signed-in one.

use keepsync_core::config::LinksConfig;
use keepsync_core::{Account, Error, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::DriverManager;
use crate::monitor::{MonitorSlot, Pending};

const PREFERENCES_FILE: &str = "Preferences";
const LOCAL_STATE_FILE: &str = "Local State";
const LINK_PROFILE_DIRECTORY: &str = "Default";

/// Read-only view (plus deletion) of the profile directories under a
/// browser user-data dir.
#[derive(Debug, Clone)]
pub struct ProfileCatalog {
    data_dir: PathBuf,
}

impl ProfileCatalog {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `Default` and `Profile <n>` directories that have a `Preferences` file.
    pub fn current_profiles(&self) -> BTreeSet<String> {
        let entries = match std::fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.data_dir.display(), error = %e, "No profile directory");
                return BTreeSet::new();
            }
        };

        entries
            .flatten()
            .filter(|entry| entry.path().join(PREFERENCES_FILE).is_file())
            .filter_map(|entry| entry.file_name().to_str().map(|s| s.to_string()))
            .filter(|name| is_profile_dir_name(name))
            .collect()
    }

    fn preferences(&self, profile: &str) -> Option<Value> {
        let path = self.data_dir.join(profile).join(PREFERENCES_FILE);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(profile = profile, error = %e, "Unreadable profile preferences");
                None
            }
        }
    }

    pub fn is_explicit_sign_in(&self, profile: &str) -> bool {
        self.preferences(profile)
            .map(|prefs| {
                let signin = &prefs["signin"];
                signin["explicit_browser_signin"].as_bool() == Some(true)
                    && signin["signin_with_explicit_browser_signin_on"].as_bool() == Some(true)
            })
            .unwrap_or(false)
    }

    /// Email of the first cached account in the profile, if any.
    pub fn parse_profile_account(&self, profile: &str) -> Option<String> {
        let prefs = self.preferences(profile)?;
        prefs["account_info"]
            .as_array()?
            .first()?
            .get("email")?
            .as_str()
            .filter(|email| !email.is_empty())
            .map(|email| email.to_string())
    }

    /// Profiles that already have an explicitly signed-in account.
    pub fn signed_in_profiles(&self) -> BTreeSet<String> {
        self.current_profiles()
            .into_iter()
            .filter(|name| self.is_explicit_sign_in(name))
            .filter(|name| self.parse_profile_account(name).is_some())
            .collect()
    }

    pub fn load_chrome_profiles(&self) -> Vec<Account> {
        self.current_profiles()
            .into_iter()
            .filter_map(|name| {
                self.parse_profile_account(&name)
                    .map(|email| Account::with_profile(email, name))
            })
            .collect()
    }

    /// Unregister the profile from `Local State`, then remove its directory.
    pub fn delete_profile(&self, profile: &str) -> Result<()> {
        if !is_profile_dir_name(profile) {
            return Err(Error::NotFound(format!("Not a browser profile: {}", profile)));
        }

        let local_state = self.data_dir.join(LOCAL_STATE_FILE);
        if local_state.is_file() {
            let content = std::fs::read_to_string(&local_state)?;
            let mut state: Value = serde_json::from_str(&content)?;
            let removed = state
                .get_mut("profile")
                .and_then(|p| p.get_mut("info_cache"))
                .and_then(|c| c.as_object_mut())
                .and_then(|cache| cache.remove(profile))
                .is_some();
            if removed {
                std::fs::write(&local_state, serde_json::to_string_pretty(&state)?)?;
                debug!(profile = profile, "Removed profile from Local State");
            }
        }

        let dir = self.data_dir.join(profile);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        info!(profile = profile, "Deleted browser profile");
        Ok(())
    }

    fn find_new_account(&self, baseline: &BTreeSet<String>) -> Option<Account> {
        self.current_profiles()
            .into_iter()
            .filter(|name| !baseline.contains(name))
            .filter(|name| self.is_explicit_sign_in(name))
            .find_map(|name| {
                self.parse_profile_account(&name)
                    .map(|email| Account::with_profile(email, name))
            })
    }
}

fn is_profile_dir_name(name: &str) -> bool {
    if name == "Default" {
        return true;
    }
    match name.strip_prefix("Profile ") {
        Some(n) => !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

/// Opens a visible browser and waits for the user to sign a new profile in.
pub struct ProfileLinkMonitor {
    driver: Arc<DriverManager>,
    help_url: String,
    poll_interval: Duration,
    slot: MonitorSlot,
}

impl ProfileLinkMonitor {
    pub fn new(driver: Arc<DriverManager>, links: &LinksConfig) -> Self {
        Self {
            driver,
            help_url: links.help_url.clone(),
            poll_interval: Duration::from_millis(links.poll_interval_ms),
            slot: MonitorSlot::default(),
        }
    }

    pub async fn start(&self) -> Result<Pending<Account>> {
        let mut slot = self.slot.lock().await;
        slot.stop().await;

        self.driver.delete_all_sessions().await;
        let session_id = self
            .driver
            .launch_browser(&self.help_url, false, LINK_PROFILE_DIRECTORY)
            .await?;

        let catalog = self.driver.profiles();
        let baseline = catalog.signed_in_profiles();
        debug!(baseline = ?baseline, "Profile link monitor started");

        let (tx, pending) = Pending::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_profiles(
            self.driver.clone(),
            catalog,
            session_id,
            baseline,
            self.poll_interval,
            cancel.clone(),
            tx,
        ));
        slot.set(cancel, task);
        Ok(pending)
    }

    pub async fn stop(&self) {
        self.slot.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.slot.is_running().await
    }
}

async fn watch_profiles(
    driver: Arc<DriverManager>,
    catalog: ProfileCatalog,
    session_id: String,
    baseline: BTreeSet<String>,
    interval: Duration,
    cancel: CancellationToken,
    tx: oneshot::Sender<Account>,
) {
    let found = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            _ = tokio::time::sleep(interval) => {}
        }

        if !driver.session_alive(&session_id).await {
            info!("Profile link window closed");
            break None;
        }
        if cancel.is_cancelled() {
            break None;
        }

        if let Some(account) = catalog.find_new_account(&baseline) {
            break Some(account);
        }
    };

    driver.delete_session(&session_id).await;

    if let Some(account) = found {
        info!(email = %account.email, profile = %account.profile_name, "Browser profile linked");
        if tx.send(account).is_err() {
            warn!("Profile link result dropped, nobody waiting");
        }
    }
}
