use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;

use crate::api::{Validation, WHOAMI_PATH};
use crate::auth::DEFAULT_TOKEN_KEY;
use crate::history::{parse_hours, DEFAULT_COMPANION_URL, DEFAULT_HOURS};

/// Production web app
pub const PRODUCTION_BASE_URL: &str = "https://app.getsavvy.so";

/// Local dev server
pub const DEVELOPMENT_BASE_URL: &str = "http://localhost:5173";

/// Savvy Bridge - authenticated Savvy API client and history relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Talk to the local development server
    #[arg(long, env = "SAVVY_DEV", default_value = "false")]
    pub dev: bool,

    /// Override the API base URL
    #[arg(short = 'u', long, env = "SAVVY_BASE_URL")]
    pub base_url: Option<String>,

    /// Seed the token store with this token
    #[arg(short = 't', long, env = "SAVVY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Path to the token database
    #[arg(short = 'd', long, env = "SAVVY_TOKEN_DB")]
    pub token_db: Option<String>,

    /// Local companion service receiving history
    #[arg(long, env = "SAVVY_COMPANION_URL", default_value = DEFAULT_COMPANION_URL)]
    pub companion_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Do not call the identity endpoint on startup
    #[arg(long, env = "SAVVY_SKIP_VALIDATION", default_value = "false")]
    pub skip_validation: bool,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Validate the token and print who it belongs to
    Whoami,
    /// Authenticated GET against an API path
    Get {
        /// Path relative to the base URL
        path: String,
    },
    /// Filter exported browser history and send it to the companion service
    History {
        /// JSON file with an array of history items
        #[arg(short, long)]
        file: PathBuf,
        /// Look-back window in hours
        #[arg(long, default_value_t = DEFAULT_HOURS, value_parser = parse_hours)]
        hours: f64,
        /// Submit every matching item without asking
        #[arg(long)]
        all: bool,
    },
    /// Forget the stored token
    Logout,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Savvy API
    pub base_url: Url,
    pub login_path: String,
    pub whoami_path: String,
    pub validate_on_start: bool,

    // Token storage
    pub token_db_file: PathBuf,
    pub token_key: String,
    pub initial_token: Option<String>,

    // Companion service
    pub companion_url: Url,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<(Self, Command)> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        let config = Self::from_args(&args)?;
        Ok((config, args.command))
    }

    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let base_url = resolve_base_url(args.dev, args.base_url.as_deref());

        let config = Config {
            base_url: Url::parse(&base_url)
                .with_context(|| format!("Invalid SAVVY_BASE_URL: {}", base_url))?,

            login_path: std::env::var("SAVVY_LOGIN_PATH").unwrap_or_else(|_| "/login".to_string()),

            whoami_path: std::env::var("SAVVY_WHOAMI_PATH")
                .unwrap_or_else(|_| WHOAMI_PATH.to_string()),

            validate_on_start: !args.skip_validation,

            token_db_file: args
                .token_db
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_token_db),

            token_key: std::env::var("SAVVY_TOKEN_KEY")
                .unwrap_or_else(|_| DEFAULT_TOKEN_KEY.to_string()),

            initial_token: args.token.clone().filter(|t| !t.trim().is_empty()),

            companion_url: Url::parse(&args.companion_url).with_context(|| {
                format!("Invalid SAVVY_COMPANION_URL: {}", args.companion_url)
            })?,

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("base URL", &self.base_url), ("companion URL", &self.companion_url)] {
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("The {} must use http or https: {}", name, url);
            }
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    pub fn validation(&self) -> Validation {
        if self.validate_on_start {
            Validation::Eager {
                whoami_path: self.whoami_path.clone(),
            }
        } else {
            Validation::Skip
        }
    }
}

/// Explicit URL wins, then the dev switch, then production
fn resolve_base_url(dev: bool, explicit: Option<&str>) -> String {
    match explicit {
        Some(url) if !url.trim().is_empty() => url.trim().trim_end_matches('/').to_string(),
        _ if dev => DEVELOPMENT_BASE_URL.to_string(),
        _ => PRODUCTION_BASE_URL.to_string(),
    }
}

/// Default token database under the user's data directory
fn default_token_db() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("savvy-bridge")
        .join("tokens.sqlite3")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("savvy-bridge").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_expand_tilde() {
        let path = expand_tilde("~/test/file.txt");
        assert!(path.to_string_lossy().contains("test/file.txt"));
        assert!(!path.to_string_lossy().starts_with('~'));

        let path = expand_tilde("/absolute/path");
        assert_eq!(path, PathBuf::from("/absolute/path"));
    }

    #[test]
    fn test_expand_tilde_just_tilde() {
        // Just "~" without slash should not expand
        assert_eq!(expand_tilde("~"), PathBuf::from("~"));
    }

    #[test]
    fn test_resolve_base_url() {
        assert_eq!(resolve_base_url(false, None), PRODUCTION_BASE_URL);
        assert_eq!(resolve_base_url(true, None), DEVELOPMENT_BASE_URL);
        assert_eq!(
            resolve_base_url(true, Some("https://staging.getsavvy.so/")),
            "https://staging.getsavvy.so"
        );
        assert_eq!(resolve_base_url(false, Some("  ")), PRODUCTION_BASE_URL);
    }

    #[test]
    fn test_default_token_db_location() {
        let path = default_token_db();
        assert!(path.ends_with("savvy-bridge/tokens.sqlite3"));
    }

    #[test]
    fn test_parse_history_command() {
        let args = parse(&["--base-url", "http://localhost:9000", "history", "-f", "h.json", "--hours", "0.5", "--all"]);
        assert_eq!(
            args.command,
            Command::History {
                file: PathBuf::from("h.json"),
                hours: 0.5,
                all: true,
            }
        );

        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.base_url.as_str(), "http://localhost:9000/");
        config.validate().unwrap();
    }

    #[test]
    fn test_history_rejects_unusable_hours() {
        for hours in ["--hours=-1", "--hours=NaN", "--hours=1e12", "--hours=0"] {
            let result = CliArgs::try_parse_from(["savvy-bridge", "history", "-f", "h.json", hours]);
            assert!(result.is_err(), "{} should be rejected", hours);
        }
    }

    #[test]
    fn test_skip_validation_flag() {
        let args = parse(&["--skip-validation", "whoami"]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.validation(), Validation::Skip);

        let args = parse(&["whoami"]);
        let config = Config::from_args(&args).unwrap();
        assert!(matches!(config.validation(), Validation::Eager { .. }));
    }

    #[test]
    fn test_validate_rejects_non_http_urls() {
        let args = parse(&["--base-url", "ftp://files.example.com", "whoami"]);
        let config = Config::from_args(&args).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let args = parse(&["--token", "  ", "logout"]);
        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.initial_token, None);
    }
}
