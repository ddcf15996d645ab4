use keepsync_core::Account;

use super::app::App;

fn report(linked: Option<Option<Account>>) {
    match linked {
        Some(Some(account)) => println!("✓ Linked {}", account.email),
        Some(None) => println!("Sign-in window closed before an account was linked."),
        None => {}
    }
}

pub async fn google() -> anyhow::Result<()> {
    let app = App::open()?;
    println!("Sign in with the Google account to link in the opened browser window.");
    let linked = app
        .with_browser(app.service.link_google_account())
        .await?;
    report(linked);
    Ok(())
}

pub async fn profile() -> anyhow::Result<()> {
    let app = App::open()?;
    app.service.reconcile_profiles()?;
    println!("Add a profile in the opened browser window and sign in to it.");
    let linked = app
        .with_browser(app.service.link_profile_account())
        .await?;
    report(linked);
    Ok(())
}
