use anyhow::{Context, Result};
use dialoguer::MultiSelect;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use savvy_bridge::api::ApiHandle;
use savvy_bridge::auth::{SqliteTokenStore, TerminalLogin, TokenAcquisition, TokenStore};
use savvy_bridge::config::{Command, Config};
use savvy_bridge::history::{self, CompanionClient, HistoryItem, HistorySelection};
use savvy_bridge::http_client::AuthenticatedClient;

#[tokio::main]
async fn main() -> Result<()> {
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Savvy Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    tracing::debug!(base_url = %config.base_url, "API configured");

    let store: Arc<dyn TokenStore> = Arc::new(SqliteTokenStore::open(
        &config.token_db_file,
        config.token_key.clone(),
    )?);

    if let Some(token) = &config.initial_token {
        store.set(token).await.context("Failed to seed token store")?;
        tracing::info!("Token store seeded from configuration");
    }

    match command {
        Command::Logout => {
            store.clear().await?;
            println!("Logged out.");
            Ok(())
        }
        Command::History { file, hours, all } => {
            submit_history(&config, &file, hours, all).await
        }
        Command::Whoami => {
            let handle = connect(&config, store).await?;
            let me = match handle.identity() {
                Some(me) => me,
                None if handle.is_ready() => handle.client().get(&config.whoami_path).await?,
                None if handle.validate().await => handle.identity().unwrap_or_default(),
                None => anyhow::bail!("Not logged in to {}", config.base_url),
            };
            println!("{}", serde_json::to_string_pretty(&me)?);
            Ok(())
        }
        Command::Get { path } => {
            let handle = connect(&config, store).await?;
            let body: Value = handle.client().get(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
    }
}

/// Build the authenticated client with terminal login and establish readiness
async fn connect(config: &Config, store: Arc<dyn TokenStore>) -> Result<ApiHandle> {
    let acquisition = Arc::new(TokenAcquisition::new(store.clone()));
    let login = Arc::new(TerminalLogin::new(store));

    let client = AuthenticatedClient::new(
        config.base_url.clone(),
        &config.login_path,
        acquisition,
        login,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;
    tracing::info!("✅ HTTP client initialized");

    let handle = ApiHandle::connect(client, config.validation()).await;
    if handle.is_ready() {
        tracing::info!("✅ Logged in");
    } else {
        tracing::warn!("Not logged in yet");
    }

    Ok(handle)
}

/// Filter an exported history file and send the chosen entries to the companion
async fn submit_history(config: &Config, file: &Path, hours: f64, all: bool) -> Result<()> {
    if history::time_range(hours).is_none() {
        tracing::warn!(hours, "Look-back window is not one of the standard ranges");
    }

    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read history file: {}", file.display()))?;
    let items: Vec<HistoryItem> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse history file: {}", file.display()))?;

    let start = history::since(chrono::Utc::now(), hours)
        .with_context(|| format!("Look-back window of {} hours is out of range", hours))?;
    let mut selection = HistorySelection::new(history::filter_history(
        items,
        start,
        history::ALLOWED_DOMAINS,
    ));

    if selection.is_empty() {
        println!("No history found for the selected domains");
        return Ok(());
    }

    if all {
        selection.select_all(true);
    } else {
        let labels: Vec<String> = selection
            .items()
            .iter()
            .map(|item| {
                let visited = item
                    .last_visit()
                    .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                format!(
                    "{} ({}) {}",
                    item.display_title(),
                    item.url.as_deref().unwrap_or_default(),
                    visited
                )
            })
            .collect();

        let chosen = tokio::task::spawn_blocking(move || {
            MultiSelect::new()
                .with_prompt("Select history to save")
                .items(&labels)
                .interact()
        })
        .await
        .context("Selection prompt task failed")?
        .context("Failed to read selection")?;

        for index in chosen {
            selection.toggle(index);
        }
    }

    if !selection.any_selected() {
        println!("Nothing selected.");
        return Ok(());
    }

    let companion = CompanionClient::new(&config.companion_url, config.http_request_timeout)?;
    companion.submit(&selection.selected()).await?;
    println!("History saved ({} items).", selection.selected().len());
    Ok(())
}
