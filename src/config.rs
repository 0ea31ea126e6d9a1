//! Runtime configuration, read from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::completion::gemini::DEFAULT_BASE_URL;
use crate::error::ConfigError;

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
/// Default local database path.
pub const DEFAULT_DB_PATH: &str = "./data/mail-assist.db";
/// Default per-call completion timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default completion attempt budget.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key.
    pub api_key: SecretString,
    /// Gemini model name.
    pub model: String,
    /// Gemini API base URL.
    pub base_url: String,
    /// Path to the local database file.
    pub db_path: PathBuf,
    /// Per-call timeout for completion requests.
    pub request_timeout: Duration,
    /// Maximum completion attempts per request, including the first.
    pub max_attempts: u32,
    /// Optional mock inbox JSON file, loaded once into an empty store.
    pub mock_inbox: Option<PathBuf>,
    /// Whether the batch run also generates reply drafts.
    pub draft_replies: bool,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// `GEMINI_API_KEY` is required; everything else has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("GEMINI_API_KEY".into()))?;

        let model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url =
            std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let db_path = std::env::var("MAIL_ASSIST_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));

        let request_timeout = parse_secs(
            "MAIL_ASSIST_TIMEOUT_SECS",
            std::env::var("MAIL_ASSIST_TIMEOUT_SECS").ok(),
            DEFAULT_TIMEOUT_SECS,
        )?;
        let max_attempts = parse_attempts(
            "MAIL_ASSIST_MAX_ATTEMPTS",
            std::env::var("MAIL_ASSIST_MAX_ATTEMPTS").ok(),
            DEFAULT_MAX_ATTEMPTS,
        )?;

        let mock_inbox = std::env::var("MAIL_ASSIST_MOCK_INBOX").ok().map(PathBuf::from);
        let draft_replies = parse_flag(std::env::var("MAIL_ASSIST_DRAFT_REPLIES").ok());

        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
            base_url,
            db_path,
            request_timeout,
            max_attempts,
            mock_inbox,
            draft_replies,
        })
    }
}

fn parse_secs(key: &str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    match raw {
        None => Ok(Duration::from_secs(default)),
        Some(value) => {
            let secs: u64 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                message: format!("expected a number of seconds, got '{value}'"),
            })?;
            if secs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "timeout must be at least 1 second".into(),
                });
            }
            Ok(Duration::from_secs(secs))
        }
    }
}

fn parse_attempts(key: &str, raw: Option<String>, default: u32) -> Result<u32, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => {
            let attempts: u32 = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.into(),
                message: format!("expected a positive integer, got '{value}'"),
            })?;
            if attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    message: "attempt budget must be at least 1".into(),
                });
            }
            Ok(attempts)
        }
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    raw.is_some_and(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_secs_defaults_when_unset() {
        let timeout = parse_secs("K", None, 30).unwrap();
        assert_eq!(timeout, Duration::from_secs(30));
    }

    #[test]
    fn parse_secs_accepts_valid_values() {
        let timeout = parse_secs("K", Some("45".into()), 30).unwrap();
        assert_eq!(timeout, Duration::from_secs(45));
    }

    #[test]
    fn parse_secs_rejects_garbage_and_zero() {
        assert!(parse_secs("K", Some("abc".into()), 30).is_err());
        assert!(parse_secs("K", Some("0".into()), 30).is_err());
    }

    #[test]
    fn parse_attempts_rejects_zero() {
        assert!(parse_attempts("K", Some("0".into()), 3).is_err());
        assert_eq!(parse_attempts("K", Some("5".into()), 3).unwrap(), 5);
        assert_eq!(parse_attempts("K", None, 3).unwrap(), 3);
    }

    #[test]
    fn parse_flag_recognizes_truthy_values() {
        assert!(parse_flag(Some("1".into())));
        assert!(parse_flag(Some("true".into())));
        assert!(parse_flag(Some("YES".into())));
        assert!(!parse_flag(Some("0".into())));
        assert!(!parse_flag(Some("off".into())));
        assert!(!parse_flag(None));
    }
}
