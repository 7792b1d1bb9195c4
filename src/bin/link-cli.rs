use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tokio::sync::watch;

use freight_link::api::{ApiRequest, ApiResponse};
use freight_link::config::{load_config, ClientConfig};
use freight_link::observability::logging;
use freight_link::push::{ConnectionState, EventKind};
use freight_link::{ClientResult, FreightClient};

#[derive(Parser)]
#[command(name = "link-cli")]
#[command(about = "Talk to the freight marketplace API through the resilient client", long_about = None)]
struct Cli {
    /// Client configuration file (TOML)
    #[arg(short, long, env = "FREIGHT_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(short, long)]
    url: Option<String>,

    /// Bearer token
    #[arg(short, long, env = "FREIGHT_LINK_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// GET a path and print the JSON body
    Get { path: String },
    /// POST a JSON body to a path
    Post {
        path: String,
        /// JSON document, e.g. '{"origin":"Austin"}'
        body: String,
    },
    /// Print push events as they arrive
    Watch {
        /// Override the push URL
        #[arg(long)]
        push_url: Option<String>,
        /// Only print these event types (default: all)
        #[arg(short, long)]
        event: Vec<EventKind>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = cli.url {
        config.api.base_url = url;
    }
    if let Commands::Watch { push_url: Some(url), .. } = &cli.command {
        config.push.url = url.clone();
    }
    config.push.enabled = matches!(cli.command, Commands::Watch { .. });
    logging::init_logging(&config.observability)?;

    let client = FreightClient::new(config)?;
    if let Some(token) = &cli.token {
        client.session().begin(token.clone(), None);
    }

    match cli.command {
        Commands::Get { path } => {
            print_result(client.request(&ApiRequest::get(path)).await)?;
        }
        Commands::Post { path, body } => {
            let body: Value = serde_json::from_str(&body)?;
            print_result(client.request(&ApiRequest::post(path, body)).await)?;
        }
        Commands::Watch { event, .. } => {
            let Some(token) = cli.token else {
                eprintln!("Error: watch needs a token (--token or FREIGHT_LINK_TOKEN)");
                return Ok(());
            };
            let kinds = if event.is_empty() { EventKind::ALL.to_vec() } else { event };
            let _subscriptions: Vec<_> = kinds
                .into_iter()
                .map(|kind| {
                    client.subscribe(kind, move |payload| {
                        println!("{} {}", kind, payload);
                    })
                })
                .collect();
            client.connection().on_state_change(|state| {
                eprintln!("[{}]", state.indicator().unwrap_or(state.as_str()));
            });
            let state = client.connection().watch_state();
            client.login(token, None);

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = until_closed(state) => {
                    eprintln!("Error: push channel closed");
                }
            }
            client.connection().shutdown().await;
        }
    }

    Ok(())
}

/// Resolves when the channel falls back to Closed after having started.
async fn until_closed(mut state: watch::Receiver<ConnectionState>) {
    let _ = state.wait_for(|s| *s != ConnectionState::Closed).await;
    let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
}

fn print_result(result: ClientResult<ApiResponse>) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response.body)?);
        }
        Err(error) => {
            eprintln!("Error: {}", error.user_message());
            eprintln!("Cause: {}", error);
        }
    }
    Ok(())
}
