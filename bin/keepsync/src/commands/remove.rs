use super::app::App;

pub async fn run(email: &str) -> anyhow::Result<()> {
    let app = App::open()?;
    app.service.remove_account(email)?;
    println!("✓ Removed {}", email);
    Ok(())
}
