use keepsync_accounts::AccountService;
use keepsync_browser::DriverManager;
use keepsync_core::{Config, LogNotifier, Paths, Result, Store};
use keepsync_storage::SqliteStore;
use std::future::Future;
use std::sync::Arc;

pub struct App {
    pub paths: Paths,
    pub config: Config,
    pub service: AccountService,
}

impl App {
    pub fn open() -> anyhow::Result<Self> {
        let paths = Paths::new();
        paths.ensure_dirs()?;
        let config = Config::load_or_default(&paths)?;

        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&paths.database_file())?);
        let driver = Arc::new(DriverManager::new(
            config.driver.clone(),
            config.driver.resolve_user_data_dir(&paths),
        ));
        let service = AccountService::new(&config, store, driver, Arc::new(LogNotifier));

        Ok(Self {
            paths,
            config,
            service,
        })
    }

    /// Run a browser-touching operation. Ctrl-C aborts it; driver cleanup
    /// runs either way. `None` means interrupted.
    pub async fn with_browser<F, T>(&self, operation: F) -> Result<Option<T>>
    where
        F: Future<Output = Result<T>>,
    {
        let result = tokio::select! {
            r = operation => r.map(Some),
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Interrupted.");
                Ok(None)
            }
        };
        self.service.shutdown().await;
        result
    }
}
