//! Forecourt CLI - operator console for the optimistic update sync engine
//!
//! Talks to a running forecourt-api over HTTP.

mod cli;
mod client;
mod commands;
mod error;

use std::env;

use clap::Parser;

use crate::cli::{Cli, Commands, SchedulerCommands, UpdateCommands};
use crate::client::{resolve_api_url, ApiClient, API_URL_ENV};
use crate::commands::completions::run_completions;
use crate::commands::scheduler::{run_set, run_start, run_status, run_stop, SchedulerConfigBody};
use crate::commands::sync::{run_metrics, run_sync};
use crate::commands::updates::{
    run_clear, run_create, run_list, run_retry, run_rollback, run_show, CreateUpdateBody,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("forecourt_cli=info".parse().expect("valid directive")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell, output } = &cli.command {
        return run_completions(*shell, output.as_deref());
    }

    let api_url = resolve_api_url(cli.api_url, env::var(API_URL_ENV).ok());
    let client = ApiClient::new(&api_url)?;
    tracing::debug!(api_url = client.base_url(), "Resolved forecourt-api URL");

    match cli.command {
        Commands::Updates { command } => run_update_command(&client, command).await?,
        Commands::Metrics { json } => run_metrics(&client, json).await?,
        Commands::Sync { json } => run_sync(&client, json).await?,
        Commands::Scheduler { command } => match command {
            SchedulerCommands::Status { json } => run_status(&client, json).await?,
            SchedulerCommands::Start => run_start(&client).await?,
            SchedulerCommands::Stop => run_stop(&client).await?,
            SchedulerCommands::Set {
                interval_ms,
                max_retries,
            } => {
                let body = SchedulerConfigBody::from_args(interval_ms, max_retries)?;
                run_set(&client, &body).await?;
            }
        },
        Commands::Completions { .. } => {}
    }

    Ok(())
}

async fn run_update_command(client: &ApiClient, command: UpdateCommands) -> Result<(), CliError> {
    match command {
        UpdateCommands::List { state, json } => run_list(client, state.map(Into::into), json).await,
        UpdateCommands::Show { id, json } => run_show(client, &id, json).await,
        UpdateCommands::Create {
            resource,
            kind,
            payload,
            prior,
        } => {
            let body =
                CreateUpdateBody::from_args(&resource, kind.into(), &payload, prior.as_deref())?;
            run_create(client, &body).await
        }
        UpdateCommands::Retry { id } => run_retry(client, &id).await,
        UpdateCommands::Rollback { id } => run_rollback(client, &id).await,
        UpdateCommands::Clear => run_clear(client).await,
    }
}
