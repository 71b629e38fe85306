mod render;

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use quarry_client::{BasenameResolver, ClientConfig, IdentityProvider, QueryClient, QueryOutcome, QueryRequest};
use quarry_core::errors::ClientError;
use quarry_core::ids::CollectionId;
use quarry_telemetry::{init_telemetry, TelemetryConfig};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

use crate::render::{render_message, ProgressPrinter};

#[derive(Parser)]
#[command(author, version, about = "Ask questions about a document collection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Collection to query
    #[arg(short, long)]
    collection: String,

    /// Environment variable holding the identity token
    #[arg(long, default_value = "QUARRY_TOKEN")]
    token_env: String,

    /// Settings file (defaults to ~/.quarry/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Restrict retrieval to these file keys
    #[arg(short, long = "file")]
    files: Vec<String>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one question and print the answer
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Interactive conversation (/retry, /new, /quit)
    Chat,
}

/// Reads the identity token from an environment variable on every connect.
struct EnvTokenProvider {
    var: String,
}

#[async_trait]
impl IdentityProvider for EnvTokenProvider {
    async fn identity_token(&self) -> Result<String, ClientError> {
        std::env::var(&self.var)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::TokenUnavailable(format!("{} is not set", self.var)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => quarry_settings::load_settings_from_path(path),
        None => quarry_settings::load_settings(),
    }
    .context("loading settings")?;

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::from_str(&settings.logging.level).unwrap_or(Level::WARN)
    };
    let telemetry = init_telemetry(TelemetryConfig {
        log_level,
        module_levels: Vec::new(),
        json: settings.logging.json,
    });

    let config = ClientConfig::from_settings(&settings)?;
    let mut client = QueryClient::new(
        config,
        Arc::new(EnvTokenProvider { var: cli.token_env }),
        Arc::new(BasenameResolver),
        Arc::new(ProgressPrinter::default()),
        telemetry.metrics(),
    );
    let collection = CollectionId::from_raw(cli.collection);

    let result = match cli.command {
        Commands::Ask { query } => {
            let request = QueryRequest::new(collection, query.join(" ")).with_file_keys(cli.files);
            let (text, error) = split_outcome(client.submit(request).await?);
            print!("{text}");
            error.map_or(Ok(()), |e| Err(e.into()))
        }
        Commands::Chat => chat(&mut client, collection, cli.files).await,
    };

    client.close().await;
    tracing::debug!(metrics = ?telemetry.metrics().snapshot(), "session metrics");
    result
}

async fn chat(client: &mut QueryClient, collection: CollectionId, files: Vec<String>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("collection {collection}: /retry, /new, /quit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let outcome = match line {
            "" => continue,
            "/quit" => break,
            "/new" => {
                client.new_chat();
                eprintln!("(new chat)");
                continue;
            }
            "/retry" => match client.retry().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    eprintln!("{e}");
                    continue;
                }
            },
            query => {
                let request = QueryRequest::new(collection.clone(), query).with_file_keys(files.clone());
                client.submit(request).await?
            }
        };
        let (text, error) = split_outcome(outcome);
        print!("{text}");
        if let Some(e) = error {
            eprintln!("error: {e}");
        }
        if client.session().can_retry() {
            eprintln!("(type /retry to try again)");
        }
    }
    Ok(())
}

/// Rendered answer for stdout, and the error for the caller to report once.
fn split_outcome(outcome: QueryOutcome) -> (String, Option<ClientError>) {
    let text = outcome
        .answer
        .as_ref()
        .map(|answer| render_message(answer, &BasenameResolver))
        .unwrap_or_default();
    (text, outcome.error)
}
