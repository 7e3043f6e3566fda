use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use classplan_core::api::{self, AppState};
use classplan_core::auth::StaticTokenVerifier;
use classplan_core::client::StreamChatClient;
use classplan_core::config::Config;
use classplan_core::generate::source_from_config;
use classplan_core::http_client::HttpClient;
use classplan_core::store::MemoryStore;

#[derive(Parser)]
#[command(author, version, about = "classplan API server and smoke tool", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve {
        /// Override the configured bind address
        #[arg(long)]
        bind: Option<String>,
    },
    /// Stream a chat request against a running server (prints chunks live)
    Chat {
        #[arg(long, default_value = "http://127.0.0.1:5000")]
        url: String,
        #[arg(long, help = "Bearer token")]
        token: String,
        #[arg(long, help = "User id the token belongs to")]
        user: String,
        #[arg(short, long, help = "Message to the planner")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "classplan=info,classplan_core=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Serve { bind } => {
            let mut cfg = cfg;
            if let Some(bind) = bind {
                cfg.server.bind_addr = bind;
            }
            let http = HttpClient::from_cfg(&cfg.http)?;
            let source = source_from_config(&cfg, http)?;
            tracing::info!(source = source.name(), "generation source ready");

            let state = AppState {
                store: Arc::new(MemoryStore::new()),
                source,
                verifier: Arc::new(StaticTokenVerifier::new(cfg.auth.tokens.clone())),
                cfg,
            };
            api::serve(state).await?;
        }
        Commands::Chat {
            url,
            token,
            user,
            message,
        } => {
            let client = StreamChatClient::new(HttpClient::from_cfg(&cfg.http)?, url)
                .with_bearer_token(token);
            let mut printed = false;
            let mut on_chunk = |chunk: &str| {
                printed = true;
                print!("{chunk}");
                io::stdout().flush().ok();
            };
            let outcome = client.stream_chat(&message, &user, &mut on_chunk).await;
            if printed {
                println!();
            }
            outcome?;
        }
    }

    Ok(())
}
