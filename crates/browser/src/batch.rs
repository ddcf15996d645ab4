//! Headless note sync for profile-linked accounts.

use keepsync_core::{Account, Error, Note, Result, Store};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::driver::DriverManager;
use crate::scrape::{extract_load_chunk_json, unescape_js};

pub struct ProfileSync {
    driver: Arc<DriverManager>,
    store: Arc<dyn Store>,
    notes_url: String,
}

impl ProfileSync {
    pub fn new(driver: Arc<DriverManager>, store: Arc<dyn Store>, notes_url: impl Into<String>) -> Self {
        Self {
            driver,
            store,
            notes_url: notes_url.into(),
        }
    }

    /// Scrape and store notes for each account in turn. Returns the failures
    /// keyed by email; accounts absent from the map succeeded.
    pub async fn sync_many(&self, accounts: &[Account]) -> BTreeMap<String, Error> {
        let mut failures = BTreeMap::new();
        if accounts.is_empty() {
            return failures;
        }

        let _guard = self.driver.exclusive().await;

        if let Err(e) = self.driver.start_driver().await {
            warn!(error = %e, "Driver failed to start, skipping profile sync");
            for account in accounts {
                failures.insert(account.email.clone(), replicate(&e));
            }
            self.driver.cleanup().await;
            return failures;
        }

        for account in accounts {
            match self.sync_account(account).await {
                Ok(count) => info!(email = %account.email, notes = count, "Profile sync complete"),
                Err(e) => {
                    warn!(email = %account.email, error = %e, "Profile sync failed");
                    failures.insert(account.email.clone(), e);
                }
            }
        }

        self.driver.cleanup().await;
        failures
    }

    async fn sync_account(&self, account: &Account) -> Result<usize> {
        let session_id = self
            .driver
            .launch_browser(&self.notes_url, true, &account.profile_name)
            .await?;
        let result = self.scrape_notes(&session_id, account).await;
        self.driver.delete_session(&session_id).await;

        let notes = result?;
        self.store.replace_notes(&account.email, &notes)?;
        Ok(notes.len())
    }

    async fn scrape_notes(&self, session_id: &str, account: &Account) -> Result<Vec<Note>> {
        let html = self.driver.page_source(session_id).await?;
        let escaped = extract_load_chunk_json(&html).ok_or_else(|| {
            Error::NoteParsing(format!("no note payload in page for {}", account.email))
        })?;

        let raw: Vec<Value> = serde_json::from_str(&unescape_js(escaped))
            .map_err(|e| Error::NoteParsing(format!("invalid note payload: {}", e)))?;
        debug!(email = %account.email, records = raw.len(), "Decoded note payload");

        raw.iter().map(|r| Note::parse(r, &account.email)).collect()
    }
}

/// The same start-up failure, recorded once per account.
fn replicate(error: &Error) -> Error {
    match error {
        Error::DriverUnavailable(msg) => Error::DriverUnavailable(msg.clone()),
        Error::BrowserNotFound(msg) => Error::BrowserNotFound(msg.clone()),
        other => Error::Other(other.to_string()),
    }
}
