use super::app::App;

pub async fn run() -> anyhow::Result<()> {
    let app = App::open()?;
    app.service.shutdown().await;
    println!("✓ Driver sessions and processes cleaned up");
    Ok(())
}
