// Authentication module
// Token storage, acquisition and the reauthentication prompt

mod acquire;
mod login;
mod store;
mod types;

pub use acquire::{TabBridge, TabTokenSource, TokenAcquisition, TokenSource};
pub use login::{parse_pasted_token, LoginPrompt, TabLoginPrompt, TerminalLogin};
pub use store::{MemoryTokenStore, SqliteTokenStore, TokenStore};
pub use types::{
    token_from_user_record, ExtensionMessage, TabId, DEFAULT_TOKEN_KEY, USER_RECORD_KEY,
};
