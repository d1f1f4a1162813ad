// Reauthentication prompt
// Out-of-band login that makes a fresh token available to acquisition

use anyhow::{Context, Result};
use async_trait::async_trait;
use dialoguer::Password;
use reqwest::Url;
use std::sync::Arc;

use super::acquire::TabBridge;
use super::store::TokenStore;
use super::types::{non_empty, token_from_user_record, USER_RECORD_KEY};

/// Ask the user to (re-)authenticate
#[async_trait]
pub trait LoginPrompt: Send + Sync {
    async fn prompt_login(&self, login_url: &Url) -> Result<()>;
}

/// Opens the login page in a new browser tab
pub struct TabLoginPrompt {
    bridge: Arc<dyn TabBridge>,
}

impl TabLoginPrompt {
    pub fn new(bridge: Arc<dyn TabBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl LoginPrompt for TabLoginPrompt {
    async fn prompt_login(&self, login_url: &Url) -> Result<()> {
        tracing::info!(url = %login_url, "Opening login page");
        self.bridge
            .create_tab(login_url)
            .await
            .context("Failed to open login tab")
    }
}

/// Terminal login: show the login URL and read the token the user pastes
pub struct TerminalLogin {
    store: Arc<dyn TokenStore>,
}

impl TerminalLogin {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }
}

/// Accept a raw token or the whole `savvy_user` record
pub fn parse_pasted_token(input: &str) -> Option<String> {
    let input = input.trim();
    if input.starts_with('{') {
        token_from_user_record(input)
    } else {
        non_empty(Some(input.to_string()))
    }
}

#[async_trait]
impl LoginPrompt for TerminalLogin {
    async fn prompt_login(&self, login_url: &Url) -> Result<()> {
        println!();
        println!("Sign in to Savvy: {}", login_url);
        println!(
            "Then paste your token (or the `{}` local storage value).",
            USER_RECORD_KEY
        );
        println!();

        let input = tokio::task::spawn_blocking(|| {
            Password::new()
                .with_prompt("Token")
                .allow_empty_password(true)
                .interact()
        })
        .await
        .context("Login prompt task failed")?
        .context("Failed to read token")?;

        match parse_pasted_token(&input) {
            Some(token) => {
                self.store.set(&token).await?;
                tracing::info!("Token saved");
            }
            None => tracing::warn!("No token entered"),
        }

        Ok(())
    }
}
