// Token acquisition
// Resolves the bearer token from the store first, then from an open app tab

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;

use super::store::TokenStore;
use super::types::{token_from_reply, ExtensionMessage, TabId};

/// Anything that can produce a token on demand
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn acquire(&self) -> Option<String>;
}

/// Browser tab capabilities the extension relies on
#[async_trait]
pub trait TabBridge: Send + Sync {
    /// Tabs whose URL matches the pattern, in browser order
    async fn query_tabs(&self, url_pattern: &str) -> Result<Vec<TabId>>;

    /// Send a message to a tab's content script and wait for its reply
    async fn send_message(&self, tab: TabId, message: &ExtensionMessage) -> Result<Option<Value>>;

    /// Open a new tab
    async fn create_tab(&self, url: &Url) -> Result<()>;
}

/// Asks the newest open application tab for its token
pub struct TabTokenSource {
    bridge: Arc<dyn TabBridge>,
    url_pattern: String,
}

impl TabTokenSource {
    pub fn new(bridge: Arc<dyn TabBridge>, base_url: &Url) -> Self {
        Self {
            bridge,
            url_pattern: format!("{}/*", base_url.as_str().trim_end_matches('/')),
        }
    }

    pub fn url_pattern(&self) -> &str {
        &self.url_pattern
    }
}

#[async_trait]
impl TokenSource for TabTokenSource {
    async fn acquire(&self) -> Option<String> {
        let tabs = match self.bridge.query_tabs(&self.url_pattern).await {
            Ok(tabs) => tabs,
            Err(e) => {
                tracing::warn!(error = %e, "Tab query failed");
                return None;
            }
        };

        let Some(&tab) = tabs.last() else {
            tracing::debug!(pattern = %self.url_pattern, "No matching tabs");
            return None;
        };

        match self
            .bridge
            .send_message(tab, &ExtensionMessage::GetAuthToken)
            .await
        {
            Ok(reply) => {
                let token = token_from_reply(reply);
                tracing::debug!(tab, found = token.is_some(), "Tab answered token request");
                token
            }
            Err(e) => {
                tracing::warn!(tab, error = %e, "Token request to tab failed");
                None
            }
        }
    }
}

/// Store-first token acquisition with an optional page fallback
pub struct TokenAcquisition {
    store: Arc<dyn TokenStore>,
    page: Option<Arc<dyn TokenSource>>,
}

impl TokenAcquisition {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store, page: None }
    }

    pub fn with_page_source(mut self, page: Arc<dyn TokenSource>) -> Self {
        self.page = Some(page);
        self
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    /// Make `token` the default credential for future requests
    pub async fn remember(&self, token: &str) {
        if let Err(e) = self.store.set(token).await {
            tracing::warn!(error = %e, "Failed to persist token");
        }
    }

    /// Fetch the token issued by a fresh login
    ///
    /// Goes straight to the page when there is one: the store may have been
    /// refilled with the rejected token while the login prompt was open.
    /// Without a page source the login prompt writes the store directly.
    pub async fn reacquire(&self) -> Option<String> {
        let Some(page) = self.page.as_ref() else {
            return match self.store.get().await {
                Ok(token) => token.filter(|t| !t.is_empty()),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read stored token");
                    None
                }
            };
        };

        let token = page.acquire().await?;
        self.remember(&token).await;
        Some(token)
    }

    /// Drop the stored token after the server rejected it
    pub async fn invalidate(&self) {
        if let Err(e) = self.store.clear().await {
            tracing::warn!(error = %e, "Failed to clear rejected token");
        }
    }
}

#[async_trait]
impl TokenSource for TokenAcquisition {
    async fn acquire(&self) -> Option<String> {
        match self.store.get().await {
            Ok(Some(token)) if !token.is_empty() => return Some(token),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read stored token"),
        }

        let page = self.page.as_ref()?;
        let token = page.acquire().await?;
        self.remember(&token).await;
        Some(token)
    }
}
