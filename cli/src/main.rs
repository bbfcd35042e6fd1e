use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod util;

use commands::chat::ChatArgs;
use commands::feedback::FeedbackArgs;
use commands::knowledge::KnowledgeCommands;
use util::require_key;

#[derive(Parser)]
#[command(name = "mio", version, about = "Operator CLI for the MIO feedback API")]
struct Cli {
    /// API base URL
    #[arg(long, env = "MIO_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Service key sent as a bearer token on /v1 routes
    #[arg(long, env = "MIO_SERVICE_KEY", hide_env_values = true)]
    service_key: Option<String>,

    /// Print compact JSON instead of pretty output
    #[arg(long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Generate (or fetch) section feedback for a completed practice
    Feedback(FeedbackArgs),
    /// Send a message to a coach
    Chat(ChatArgs),
    /// Knowledge base operations
    Knowledge {
        #[command(subcommand)]
        command: KnowledgeCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mio_cli=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let api_url = cli.api_url.as_str();
    let raw = cli.raw;

    let code = match cli.command {
        Commands::Health => commands::health::run(api_url, raw).await,
        Commands::Feedback(args) => {
            let key = require_key(cli.service_key.as_deref());
            commands::feedback::run(api_url, key, args, raw).await
        }
        Commands::Chat(args) => {
            let key = require_key(cli.service_key.as_deref());
            commands::chat::run(api_url, key, args, raw).await
        }
        Commands::Knowledge { command } => {
            let key = require_key(cli.service_key.as_deref());
            commands::knowledge::run(api_url, key, command, raw).await
        }
    };

    std::process::exit(code);
}
