use anyhow::Result;

use crate::configuration::Settings;

pub async fn execute(settings: Settings, text: String, session_name: Option<String>) -> Result<()> {
    let app = super::session::start_app(settings, false).await?;

    // Without a session there is no history to continue
    match session_name {
        Some(_) => {
            let mut session = super::session::build_session(&app, session_name)?;
            session.headless_start(text).await
        }
        None => {
            let answer = app.run_query(&text).await?;
            println!("{}", answer);
            Ok(())
        }
    }
}
