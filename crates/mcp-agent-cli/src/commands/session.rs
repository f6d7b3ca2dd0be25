use anyhow::Result;
use cliclack::spinner;
use console::style;

use crate::app::App;
use crate::configuration::Settings;
use crate::prompt::cliclack::CliclackPrompt;
use crate::session::session_file::session_path;
use crate::session::Session;

/// Connect to the configured servers, printing progress when `announce` is set
pub async fn start_app(settings: Settings, announce: bool) -> Result<App> {
    let mut app = App::new(settings);

    if !announce {
        app.initialize().await?;
        return Ok(app);
    }

    println!("{}", style("mcp-agent").bold().green());
    for line in app.settings().summary() {
        println!("  {}", style(line).dim());
    }
    println!();

    let mut spin = spinner();
    spin.start("loading tools");
    match app.initialize().await {
        Ok(registry) => spin.stop(format!("loaded {} tools", registry.len())),
        Err(e) => {
            spin.stop(style("failed to load tools").red());
            return Err(e.into());
        }
    }

    Ok(app)
}

pub async fn execute(
    settings: Settings,
    session_name: Option<String>,
    stream: bool,
) -> Result<()> {
    let app = start_app(settings, true).await?;
    let mut session = build_session(&app, session_name)?.with_streaming(stream);
    session.start().await
}

pub fn build_session(app: &App, session_name: Option<String>) -> Result<Session<'_>> {
    let session_file = session_name.as_deref().map(session_path).transpose()?;
    Session::new(app.agent()?, Box::new(CliclackPrompt::new()), session_file)
}
