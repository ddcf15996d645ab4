use futures::future::join_all;
use keepsync_browser::{DriverManager, OAuthCaptureMonitor, ProfileLinkMonitor, ProfileSync};
use keepsync_core::{root_notes, Account, Config, Error, NoteView, Notifier, Result, Store};
use keepsync_google::GoogleClient;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one sync round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub succeeded: Vec<String>,
    /// Email -> error message. These accounts kept their previous notes.
    pub failed: BTreeMap<String, String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

pub struct AccountService {
    store: Arc<dyn Store>,
    driver: Arc<DriverManager>,
    google: GoogleClient,
    oauth: OAuthCaptureMonitor,
    profiles: ProfileLinkMonitor,
    profile_sync: ProfileSync,
    notifier: Arc<dyn Notifier>,
}

impl AccountService {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        driver: Arc<DriverManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            google: GoogleClient::new(config.google.clone(), &config.network),
            oauth: OAuthCaptureMonitor::new(driver.clone(), &config.links),
            profiles: ProfileLinkMonitor::new(driver.clone(), &config.links),
            profile_sync: ProfileSync::new(driver.clone(), store.clone(), &config.links.notes_app_url),
            store,
            driver,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn driver(&self) -> &Arc<DriverManager> {
        &self.driver
    }

    pub fn accounts(&self) -> Result<Vec<Account>> {
        self.store.accounts()
    }

    /// Insert the account or merge into the stored one. Empty inputs leave
    /// the stored fields alone.
    pub fn add_or_update_account(
        &self,
        email: &str,
        profile_name: &str,
        master_token: &str,
    ) -> Result<Account> {
        let mut account = self
            .store
            .account(email)?
            .unwrap_or_else(|| Account::new(email));
        if !profile_name.is_empty() {
            account.profile_name = profile_name.to_string();
        }
        if !master_token.is_empty() {
            account.master_token = master_token.to_string();
            account.access_token.clear();
            account.access_token_expiry = None;
        }
        self.store.upsert_account(&account)?;
        debug!(email = %email, profile = %account.profile_name, "Account saved");
        Ok(account)
    }

    /// Bring stored profile links in line with the profiles on disk.
    pub fn reconcile_profiles(&self) -> Result<()> {
        let current: HashMap<String, String> = self
            .driver
            .profiles()
            .load_chrome_profiles()
            .into_iter()
            .map(|a| (a.email, a.profile_name))
            .collect();

        for (email, profile) in &current {
            self.add_or_update_account(email, profile, "")?;
        }

        for mut account in self.store.accounts()? {
            if !account.has_profile() || current.contains_key(&account.email) {
                continue;
            }
            if account.has_master_token() {
                info!(email = %account.email, "Profile gone, keeping token link");
                account.profile_name.clear();
                self.store.upsert_account(&account)?;
            } else {
                info!(email = %account.email, "Profile gone, removing account");
                self.store.delete_notes(&account.email)?;
                self.store.delete_account(&account.email)?;
            }
        }
        Ok(())
    }

    /// Interactive sign-in through the embedded setup page. `None` when the
    /// user closed the window first.
    pub async fn link_google_account(&self) -> Result<Option<Account>> {
        let pending = self.oauth.start().await?;
        let Some(capture) = pending.wait().await else {
            return Ok(None);
        };

        let master_token = self
            .google
            .fetch_master_token(&capture.email, &capture.oauth_token)
            .await?;
        let account = self.add_or_update_account(&capture.email, "", &master_token)?;
        self.notifier.notify("Account Added", &account.email);
        Ok(Some(account))
    }

    /// Interactive sign-in of a new browser profile.
    pub async fn link_profile_account(&self) -> Result<Option<Account>> {
        let pending = self.profiles.start().await?;
        let Some(found) = pending.wait().await else {
            return Ok(None);
        };

        let account = self.add_or_update_account(&found.email, &found.profile_name, "")?;
        self.notifier.notify("Account Added", &account.email);
        Ok(Some(account))
    }

    pub fn remove_account(&self, email: &str) -> Result<()> {
        let account = self
            .store
            .account(email)?
            .ok_or_else(|| Error::NotFound(format!("No account {}", email)))?;

        if account.has_profile() {
            if let Err(e) = self.driver.profiles().delete_profile(&account.profile_name) {
                warn!(email = %email, profile = %account.profile_name, error = %e, "Failed to delete browser profile");
            }
        }
        self.store.delete_notes(email)?;
        self.store.delete_account(email)?;
        self.notifier.notify("Account Deleted", email);
        Ok(())
    }

    /// Sync every active account. Token-linked accounts go through the API
    /// concurrently, profile-only accounts through one headless batch.
    pub async fn sync_all(&self, notify: bool) -> Result<SyncReport> {
        let accounts: Vec<Account> = self
            .store
            .accounts()?
            .into_iter()
            .filter(Account::is_active)
            .collect();
        let (token_linked, profile_only): (Vec<Account>, Vec<Account>) =
            accounts.into_iter().partition(Account::has_master_token);

        let mut report = SyncReport::default();
        if token_linked.is_empty() && profile_only.is_empty() {
            return Ok(report);
        }
        if notify {
            self.notifier.notify("Sync Started", "Syncing notes");
        }

        let google = &self.google;
        let store = self.store.as_ref();
        let api_syncs = token_linked.into_iter().map(|mut account| async move {
            let result = google.sync_notes(store, &mut account).await;
            (account.email, result)
        });

        let (api_results, batch_failures) = tokio::join!(
            join_all(api_syncs),
            self.profile_sync.sync_many(&profile_only)
        );

        for (email, result) in api_results {
            match result {
                Ok(_) => report.succeeded.push(email),
                Err(e) => {
                    warn!(email = %email, error = %e, "API sync failed");
                    report.failed.insert(email, e.to_string());
                }
            }
        }
        for account in &profile_only {
            match batch_failures.get(&account.email) {
                Some(e) => {
                    report.failed.insert(account.email.clone(), e.to_string());
                }
                None => report.succeeded.push(account.email.clone()),
            }
        }
        report.succeeded.sort();

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Sync finished"
        );
        if notify {
            if report.is_success() {
                self.notifier.notify(
                    "Sync Successful",
                    &format!("Synced {} account(s)", report.succeeded.len()),
                );
            } else {
                let failed: Vec<&str> = report.failed.keys().map(String::as_str).collect();
                self.notifier
                    .notify("Sync Failed", &format!("Failed: {}", failed.join(", ")));
            }
        }
        Ok(report)
    }

    /// Visible root notes rendered for display, per account.
    pub fn note_views(&self, email: Option<&str>) -> Result<Vec<NoteView>> {
        let all = self.store.all_notes()?;
        let mut views = Vec::new();
        for account in self.store.accounts()? {
            if email.is_some_and(|e| e != account.email) {
                continue;
            }
            views.extend(
                root_notes(&all, &account.email)
                    .into_iter()
                    .map(|root| NoteView::build(root, &all)),
            );
        }
        Ok(views)
    }

    /// Stop both monitors and tear down every browser resource.
    pub async fn shutdown(&self) {
        self.oauth.stop().await;
        self.profiles.stop().await;
        self.driver.cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_core::config::DriverConfig;
    use keepsync_core::Note;
    use keepsync_storage::SqliteStore;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingNotifier {
        titles: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, _body: &str) {
            self.titles.lock().unwrap().push(title.to_string());
        }
    }

    struct Fixture {
        service: AccountService,
        store: Arc<SqliteStore>,
        notifier: Arc<RecordingNotifier>,
        dirs: TempDir,
    }

    /// Service whose driver can never start and whose Google endpoints live on `server`.
    fn fixture(server: &MockServer) -> Fixture {
        let dirs = TempDir::new().unwrap();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut config = Config::default();
        config.driver = DriverConfig {
            host: "127.0.0.1".to_string(),
            port,
            driver_path: Some(dirs.path().join("missing-driver")),
            stray_processes: Vec::new(),
            ..Default::default()
        };
        config.google.auth_url = format!("{}/auth", server.uri());
        config.google.notes_url = format!("{}/notes/v1/changes", server.uri());
        config.network.proxy = Some(String::new());

        let data_dir = dirs.path().join("chrome");
        std::fs::create_dir_all(&data_dir).unwrap();
        let driver = Arc::new(DriverManager::new(config.driver.clone(), data_dir));
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = AccountService::new(&config, store.clone(), driver, notifier.clone());
        Fixture {
            service,
            store,
            notifier,
            dirs,
        }
    }

    fn write_profile(data_dir: &Path, name: &str, email: &str) {
        let dir = data_dir.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let prefs = json!({ "account_info": [{ "email": email }] });
        std::fs::write(dir.join("Preferences"), prefs.to_string()).unwrap();
    }

    fn note(email: &str, id: &str) -> Note {
        Note {
            email: email.to_string(),
            id: id.to_string(),
            parent_id: "root".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_add_or_update_merges_fields() {
        let server = MockServer::start().await;
        let f = fixture(&server);

        f.service.add_or_update_account("a@example.com", "Profile 1", "").unwrap();
        let merged = f.service.add_or_update_account("a@example.com", "", "aas_et/m").unwrap();
        assert_eq!(merged.profile_name, "Profile 1");
        assert_eq!(merged.master_token, "aas_et/m");
        assert_eq!(f.store.accounts().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reconcile_profiles() {
        let server = MockServer::start().await;
        let f = fixture(&server);
        let data_dir = f.dirs.path().join("chrome");
        write_profile(&data_dir, "Default", "a@example.com");

        f.service.add_or_update_account("b@example.com", "Profile 1", "").unwrap();
        f.service.add_or_update_account("c@example.com", "Profile 2", "aas_et/c").unwrap();
        f.store.replace_notes("b@example.com", &[note("b@example.com", "b1")]).unwrap();

        f.service.reconcile_profiles().unwrap();

        let a = f.store.account("a@example.com").unwrap().unwrap();
        assert_eq!(a.profile_name, "Default");
        assert!(f.store.account("b@example.com").unwrap().is_none());
        assert!(f.store.notes("b@example.com").unwrap().is_empty());
        let c = f.store.account("c@example.com").unwrap().unwrap();
        assert!(!c.has_profile());
        assert_eq!(c.master_token, "aas_et/c");
    }

    #[tokio::test]
    async fn test_remove_account_deletes_profile_and_notes() {
        let server = MockServer::start().await;
        let f = fixture(&server);
        let data_dir = f.dirs.path().join("chrome");
        write_profile(&data_dir, "Profile 3", "a@example.com");
        f.service.add_or_update_account("a@example.com", "Profile 3", "").unwrap();
        f.store.replace_notes("a@example.com", &[note("a@example.com", "n")]).unwrap();

        f.service.remove_account("a@example.com").unwrap();

        assert!(!data_dir.join("Profile 3").exists());
        assert!(f.store.account("a@example.com").unwrap().is_none());
        assert!(f.store.notes("a@example.com").unwrap().is_empty());
        assert_eq!(*f.notifier.titles.lock().unwrap(), vec!["Account Deleted"]);
        assert!(matches!(
            f.service.remove_account("a@example.com"),
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_all_reports_per_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_string_contains("Email=ok%40example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Auth=ya29.ok\nExpiresInDurationSec=3599\n"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_string_contains("Email=bad%40example.com"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Error=BadAuthentication\n"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/notes/v1/changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [ { "id": "n1", "parentId": "root", "title": "hello" } ]
            })))
            .mount(&server)
            .await;
        let f = fixture(&server);
        f.service.add_or_update_account("ok@example.com", "", "aas_et/ok").unwrap();
        f.service.add_or_update_account("bad@example.com", "", "aas_et/bad").unwrap();
        f.service.add_or_update_account("profile@example.com", "Profile 1", "").unwrap();
        f.store
            .replace_notes("bad@example.com", &[note("bad@example.com", "kept")])
            .unwrap();

        let report = f.service.sync_all(true).await.unwrap();

        assert_eq!(report.succeeded, vec!["ok@example.com"]);
        assert_eq!(report.total(), 3);
        assert!(report.failed["bad@example.com"].contains("BadAuthentication"));
        assert!(report.failed["profile@example.com"].contains("Driver unavailable"));
        assert_eq!(f.store.notes("ok@example.com").unwrap()[0].title, "hello");
        assert_eq!(f.store.notes("bad@example.com").unwrap()[0].id, "kept");
        assert_eq!(
            *f.notifier.titles.lock().unwrap(),
            vec!["Sync Started", "Sync Failed"]
        );

        let views = f.service.note_views(Some("ok@example.com")).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].title, "hello");
    }

    #[tokio::test]
    async fn test_sync_all_without_accounts_is_quiet() {
        let server = MockServer::start().await;
        let f = fixture(&server);
        let report = f.service.sync_all(true).await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(f.notifier.titles.lock().unwrap().is_empty());
    }
}
