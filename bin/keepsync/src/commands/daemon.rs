use keepsync_core::Result;
use std::time::Duration;
use tracing::{error, info};

use super::app::App;
use super::sync::print_report;

async fn sync_forever(app: &App, period: Duration) -> Result<()> {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        if let Err(e) = app.service.reconcile_profiles() {
            error!(error = %e, "Profile reconcile failed");
        }
        match app.service.sync_all(true).await {
            Ok(report) => print_report(&report),
            Err(e) => error!(error = %e, "Sync round failed"),
        }
    }
}

pub async fn run(interval: Option<u64>) -> anyhow::Result<()> {
    let app = App::open()?;
    let period = Duration::from_secs(interval.unwrap_or(app.config.sync.interval_secs).max(1));
    info!(interval_secs = period.as_secs(), "Sync daemon started");

    app.with_browser(sync_forever(&app, period)).await?;

    info!("Sync daemon stopped");
    Ok(())
}
