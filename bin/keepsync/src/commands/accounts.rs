use keepsync_core::{Account, Store};

use super::app::App;

fn link_kind(account: &Account) -> &'static str {
    match (account.has_profile(), account.has_master_token()) {
        (true, true) => "profile + token",
        (true, false) => "profile",
        (false, true) => "token",
        (false, false) => "inactive",
    }
}

pub async fn run() -> anyhow::Result<()> {
    let app = App::open()?;
    app.service.reconcile_profiles()?;

    let accounts = app.service.accounts()?;
    if accounts.is_empty() {
        println!("No linked accounts.");
        return Ok(());
    }

    println!("{:<40} {:<16} {:<12} NOTES", "EMAIL", "LINK", "PROFILE");
    for account in &accounts {
        let notes = app.service.store().notes(&account.email)?.len();
        println!(
            "{:<40} {:<16} {:<12} {}",
            account.email,
            link_kind(account),
            if account.profile_name.is_empty() { "-" } else { account.profile_name.as_str() },
            notes
        );
    }
    Ok(())
}
