use anyhow::Result;
use checklist_backend::cli;
use checklist_backend::config::ChecklistConfig;
use checklist_backend::node::ChecklistNode;
use checklist_backend::telemetry;
use checklist_backend::utils;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Checklist state backend and CLI")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (Axum) for the checklist endpoints
    Serve,
    /// Start the interactive CLI for inspecting and toggling checklist state
    Cli,
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::print_banner();
    telemetry::init_tracing();

    let args = Args::parse();

    let config = ChecklistConfig::from_env()?;
    let node = ChecklistNode::start(config)?;
    tracing::info!(blog_id = node.config().blog_id, "bootstrap complete");

    match args.command.unwrap_or(Command::Cli) {
        Command::Serve => node.run_http_server().await,
        Command::Cli => cli::run_cli(node.config().clone(), node.database()).await,
    }
}
