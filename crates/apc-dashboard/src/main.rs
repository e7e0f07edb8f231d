mod cli;
mod render;
mod watch;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use apc_client::{AgentApi, AgentClient, SessionController, StatusStream, Synchronizer};
use apc_core::log_window;

use crate::cli::{Cli, Command, LockState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.client_config()?;
    tracing::debug!(origin = %config.agent_origin, "Using agent");

    let client = AgentClient::new(config).context("failed to build HTTP client")?;
    run(client, cli.command.clone().unwrap_or(Command::Watch)).await
}

async fn run(client: AgentClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Watch => {
            let stream = StatusStream::new(&client);
            watch::run(Synchronizer::new(Arc::new(client), stream)).await?;
        },
        Command::Status => {
            let status = client.get_status().await?;
            print!("{}", render::status_lines(status.label(), Some(&status)));
        },
        Command::Logs { limit } => {
            let logs = log_window(client.get_logs().await?.entries);
            if logs.is_empty() {
                println!("No log entries");
            } else {
                print!("{}", render::log_lines(&logs, limit));
            }
        },
        Command::Start { .. } => {
            let overrides = command.overrides();
            let ack = SessionController::new(Arc::new(client))
                .start(overrides)
                .await?;
            println!("{}", ack.status);
        },
        Command::Stop => {
            let ack = SessionController::new(Arc::new(client)).stop().await?;
            println!("{}", ack.status);
        },
        Command::Lock { state } => {
            let ack = client.set_policy_lock(state == LockState::On).await?;
            println!("{}", ack.status);
        },
        Command::Health => {
            let ack = client
                .health()
                .await
                .context("agent is not reachable")?;
            println!("{}", ack.status);
        },
    }
    Ok(())
}
