//! Configuration
//!
//! Settings are read from environment variables (with `.env` support
//! via `dotenvy`) into a plain [`AppConfig`] value that is passed by
//! reference to the components that need it. There is no global
//! settings object; tests construct their own config.

use std::path::PathBuf;

/// Get an environment variable with a default value
///
/// # Example
/// ```
/// use ferry::config::env;
///
/// let timeout: u64 = env("FERRY_CONNECT_TIMEOUT", 30);
/// ```
pub fn env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get an optional environment variable
pub fn env_optional<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Load environment variables from a `.env` file in the working
/// directory, if present. Existing process variables win.
pub fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Application configuration
///
/// # Environment Variables
///
/// - `FERRY_DATABASE_URL` - internal database url (default: `sqlite://~/.ferry.sqlite3`)
/// - `FERRY_LOG_DIR` - directory for per-job log files (default: `~/.ferry/logs`)
/// - `FERRY_INLINE_TASKS` - run queued tasks inline instead of spawning (default: false)
/// - `FERRY_DEBUG` - verbose runner output and debug logging (default: false)
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Connection url of the internal record database
    pub database_url: String,
    /// Directory where per-job log files are written
    pub log_dir: PathBuf,
    /// Execute queued tasks inline (used in tests)
    pub inline_tasks: bool,
    /// Verbose runner output and debug logging
    pub debug: bool,
}

impl AppConfig {
    /// Build config from environment variables
    pub fn from_env() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let default_url = format!("sqlite://{}", home.join(".ferry.sqlite3").display());
        let default_log_dir = home.join(".ferry").join("logs");

        Self {
            database_url: env("FERRY_DATABASE_URL", default_url),
            log_dir: env_optional::<PathBuf>("FERRY_LOG_DIR").unwrap_or(default_log_dir),
            inline_tasks: env("FERRY_INLINE_TASKS", false),
            debug: env("FERRY_DEBUG", false),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_default() {
        let value: u64 = env("FERRY_TEST_MISSING_VAR", 42);
        assert_eq!(value, 42);
    }

    #[test]
    fn test_env_parse() {
        std::env::set_var("FERRY_TEST_PORT", "8080");
        let value: u16 = env("FERRY_TEST_PORT", 0);
        assert_eq!(value, 8080);
        std::env::remove_var("FERRY_TEST_PORT");
    }

    #[test]
    fn test_env_optional_missing() {
        let value: Option<bool> = env_optional("FERRY_TEST_MISSING_FLAG");
        assert_eq!(value, None);
    }
}
