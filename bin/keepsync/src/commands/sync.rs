use keepsync_accounts::SyncReport;

use super::app::App;

pub(super) fn print_report(report: &SyncReport) {
    for email in &report.succeeded {
        println!("✓ {}", email);
    }
    for (email, error) in &report.failed {
        println!("✗ {}: {}", email, error);
    }
    if report.total() == 0 {
        println!("No linked accounts to sync.");
    }
}

pub async fn run() -> anyhow::Result<()> {
    let app = App::open()?;
    app.service.reconcile_profiles()?;

    if let Some(report) = app
        .with_browser(app.service.sync_all(false))
        .await?
    {
        print_report(&report);
    }
    Ok(())
}
