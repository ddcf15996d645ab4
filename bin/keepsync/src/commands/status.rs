use keepsync_core::Store;

use super::app::App;

fn mark(ok: bool) -> &'static str {
    if ok {
        "✓"
    } else {
        "✗ (not found)"
    }
}

pub async fn run() -> anyhow::Result<()> {
    let app = App::open()?;
    let config_path = app.paths.config_file();

    println!("keepsync status");
    println!("===============");
    println!();

    println!(
        "Config:     {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "(defaults)" }
    );
    println!("Database:   {}", app.paths.database_file().display());

    let driver = app.service.driver();
    println!("Profiles:   {}", driver.user_data_dir().display());
    match driver.driver_binary() {
        Ok(path) => println!("Driver:     {} {}", path.display(), mark(true)),
        Err(e) => println!("Driver:     {} {}", e, mark(false)),
    }
    match driver.browser_binary() {
        Ok(path) => println!("Browser:    {} {}", path.display(), mark(true)),
        Err(e) => println!("Browser:    {} {}", e, mark(false)),
    }
    println!("WebDriver:  {}", app.config.driver.base_url());
    println!();

    let store = app.service.store();
    let accounts = store.accounts()?;
    let notes = store.all_notes()?;
    println!("Accounts:   {}", accounts.len());
    println!("Notes:      {}", notes.len());
    if accounts.is_empty() {
        println!();
        println!("Run `keepsync link google` or `keepsync link profile` to add one.");
    }

    Ok(())
}
