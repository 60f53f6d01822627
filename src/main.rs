use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand, error::ErrorKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ragserve::config::Settings;
use ragserve::dispatch::{self, ActionRequest, AppContext};
use ragserve::response::RunResponse;

#[derive(Parser)]
#[command(name = "ragserve", version, about = "Private document Q&A over a local vector store")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

/// One-shot action mode.
#[derive(Args)]
struct RunArgs {
    /// Action to perform: ingest, query or status
    #[arg(long)]
    action: Option<String>,

    /// Query to ask (required for `query`)
    #[arg(short, long)]
    query: Option<String>,

    /// Source folder to ingest (defaults to SOURCE_DIRECTORY)
    #[arg(short, long)]
    source: Option<String>,

    /// Path to the task list file
    #[arg(long)]
    tasklist: Option<PathBuf>,

    /// Task id to look up (required for `status`)
    #[arg(long)]
    taskid: Option<String>,

    /// Leave source documents out of the answer
    #[arg(long)]
    hide_source: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Path to the task list file
        #[arg(long)]
        tasklist: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Serve {
            host,
            port,
            tasklist,
        }) => {
            let mut settings = Settings::from_env().context("Error reading configuration")?;
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            if let Some(tasklist) = tasklist {
                settings.tasklist_path = tasklist;
            }
            serve(settings).await
        }
        None => run_action(cli.run).await,
    }
}

async fn serve(settings: Settings) -> Result<()> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let ctx = AppContext::from_settings(settings).await?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {e}"),
        }
        signal.cancel();
    });

    ragserve::server::serve(ctx, &addr, shutdown).await
}

/// Run one action and print its response. Failures are reported in the
/// response, so the exit code is 0 once arguments parse.
async fn run_action(args: RunArgs) -> Result<()> {
    let Some(action) = args.action else {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "--action is required unless running `serve`",
            )
            .exit();
    };

    let res = match Settings::from_env() {
        Ok(mut settings) => {
            if let Some(tasklist) = args.tasklist {
                settings.tasklist_path = tasklist;
            }
            let req = ActionRequest {
                action,
                source: args.source,
                query: args.query,
                taskid: args.taskid,
                hide_source: args.hide_source,
            };
            dispatch::run_once(settings, req).await
        }
        Err(e) => RunResponse::error(format!("Error reading configuration: {e}")),
    };

    println!("{}", serde_json::to_string(&res)?);
    Ok(())
}
