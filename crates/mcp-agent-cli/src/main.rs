use anyhow::Result;
use clap::{Parser, Subcommand};

mod app;
mod commands {
    pub mod run;
    pub mod session;
    pub mod tools;
}
mod configuration;
mod logging;
mod prompt;
mod session;

use configuration::Settings;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Name of the session to record to, resuming it if it exists
    #[arg(short, long, global = true)]
    session: Option<String>,

    /// Maximum model calls per query (overrides AGENT_MAX_STEPS)
    #[arg(long, global = true)]
    max_steps: Option<usize>,

    /// Only print the final answer of each query
    #[arg(long, global = true)]
    no_stream: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with the agent interactively
    Chat,

    /// Answer a single query and exit
    Run {
        /// The query to answer
        #[arg(short, long)]
        text: String,
    },

    /// List the tools exposed by the configured MCP servers
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = Settings::new()?;
    logging::init_logging(&settings)?;

    if let Some(max_steps) = cli.max_steps {
        if max_steps == 0 {
            anyhow::bail!("--max-steps must be at least 1");
        }
        settings.max_steps = max_steps;
    }

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => commands::session::execute(settings, cli.session, !cli.no_stream).await,
        Command::Run { text } => commands::run::execute(settings, text, cli.session).await,
        Command::Tools => commands::tools::execute(settings).await,
    }
}
