// Authentication types

use serde::{Deserialize, Serialize};

/// Local storage key under which the web app keeps the signed-in user
pub const USER_RECORD_KEY: &str = "savvy_user";

/// Extension storage key holding the relayed token
pub const DEFAULT_TOKEN_KEY: &str = "savvy_user_key";

/// Browser tab identifier
pub type TabId = i64;

/// Messages exchanged between extension contexts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionMessage {
    /// Ask a page for the token it holds in local storage
    GetAuthToken,
}

/// Page reply to `GET_AUTH_TOKEN`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenReply {
    pub token: Option<String>,
}

/// The `savvy_user` record written by the web app
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRecord {
    pub token: Option<String>,
}

/// Drop empty tokens so callers only ever see a usable value or nothing
pub fn non_empty(token: Option<String>) -> Option<String> {
    token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extract the token from a raw `savvy_user` record
pub fn token_from_user_record(raw: &str) -> Option<String> {
    match serde_json::from_str::<UserRecord>(raw) {
        Ok(record) => non_empty(record.token),
        Err(e) => {
            tracing::debug!(error = %e, "Stored user record is not valid JSON");
            None
        }
    }
}

/// Extract the token from a `GET_AUTH_TOKEN` reply
pub fn token_from_reply(reply: Option<serde_json::Value>) -> Option<String> {
    let reply: TokenReply = reply
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default();
    non_empty(reply.token)
}
