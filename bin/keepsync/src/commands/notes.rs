use super::app::App;

pub async fn run(email: Option<String>) -> anyhow::Result<()> {
    let app = App::open()?;
    let views = app.service.note_views(email.as_deref())?;

    if views.is_empty() {
        println!("No notes. Run `keepsync sync` first.");
        return Ok(());
    }

    let mut current_email = "";
    for view in &views {
        if view.email != current_email {
            current_email = &view.email;
            println!("== {} ==", current_email);
            println!();
        }

        if view.title.is_empty() {
            println!("(untitled)");
        } else {
            println!("{}", view.title);
        }
        if !view.text.is_empty() {
            for line in view.text.lines() {
                println!("  {}", line);
            }
        }
        for item in &view.unchecked_items {
            println!("  [ ] {}", item);
        }
        for item in &view.checked_items {
            println!("  [x] {}", item);
        }
        println!();
    }
    Ok(())
}
