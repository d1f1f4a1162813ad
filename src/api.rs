// API handle
// Client instance plus the readiness flag UI surfaces render from

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use crate::auth::TokenSource;
use crate::http_client::AuthenticatedClient;

/// Default identity endpoint used to validate a token
pub const WHOAMI_PATH: &str = "/api/v1/whoami";

/// How readiness is established when the handle is created
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Ready as soon as the client exists
    Skip,
    /// Ready once the identity endpoint accepts the token
    Eager { whoami_path: String },
}

impl Default for Validation {
    fn default() -> Self {
        Validation::Eager {
            whoami_path: WHOAMI_PATH.to_string(),
        }
    }
}

/// `{client, ready}` pair handed to UI surfaces
pub struct ApiHandle {
    client: Arc<AuthenticatedClient>,
    validation: Validation,
    ready: watch::Sender<bool>,
    identity: Mutex<Option<Value>>,
}

impl ApiHandle {
    /// Wrap a client and establish initial readiness
    pub async fn connect(client: AuthenticatedClient, validation: Validation) -> Self {
        let (ready, _) = watch::channel(false);
        let handle = Self {
            client: Arc::new(client),
            validation,
            ready,
            identity: Mutex::new(None),
        };

        match &handle.validation {
            Validation::Skip => {
                handle.ready.send_replace(true);
            }
            Validation::Eager { .. } => {
                if handle.client.acquisition().acquire().await.is_some() {
                    handle.validate().await;
                } else {
                    tracing::info!("No token found, requesting login");
                    if let Err(e) = handle
                        .client
                        .login_prompt()
                        .prompt_login(handle.client.login_url())
                        .await
                    {
                        tracing::warn!(error = %e, "Login prompt failed");
                    }
                }
            }
        }

        handle
    }

    pub fn client(&self) -> &Arc<AuthenticatedClient> {
        &self.client
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Body of the last successful identity check
    pub fn identity(&self) -> Option<Value> {
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Observe readiness changes
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Re-run the identity check and publish the result
    ///
    /// With `Validation::Skip` this only reports that a client exists.
    pub async fn validate(&self) -> bool {
        let ready = match &self.validation {
            Validation::Skip => true,
            Validation::Eager { whoami_path } => {
                let result = self.client.get::<Value>(whoami_path).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "Token validation failed");
                }
                let ready = result.is_ok();
                *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = result.ok();
                ready
            }
        };

        self.ready.send_replace(ready);
        ready
    }
}
