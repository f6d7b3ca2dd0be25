use anyhow::Result;
use console::style;

use crate::configuration::Settings;

pub async fn execute(settings: Settings) -> Result<()> {
    let app = super::session::start_app(settings, false).await?;
    let Some(registry) = app.registry() else {
        return Ok(());
    };

    if registry.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    for tool in registry.registered() {
        println!(
            "{} {}",
            style(&tool.name).bold().green(),
            style(format!("({})", tool.server_id())).dim()
        );
        println!("    {}", tool.description);
    }
    Ok(())
}
