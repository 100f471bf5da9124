// src/config.rs

//! Configuration loading utilities.
//!
//! The TOML file carries behaviour; secrets and deployment paths may come
//! from the environment instead so they never need to live in the file.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Classification service key.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Push service access token.
pub const ENV_EXPO_ACCESS_TOKEN: &str = "EXPO_ACCESS_TOKEN";
/// SQLite database path.
pub const ENV_DATABASE: &str = "BUHNEWS_DATABASE";
/// WebDriver endpoint.
pub const ENV_WEBDRIVER_URL: &str = "BUHNEWS_WEBDRIVER_URL";

/// Load configuration from a TOML file, apply environment overrides and validate.
///
/// A missing or unreadable file falls back to defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        log::warn!("Config file {:?} not found. Using defaults.", path);
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Overlay values found by `lookup` onto `config`. Empty values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(key) = get(ENV_OPENAI_API_KEY) {
        config.classifier.api_key = Some(key);
    }
    if let Some(token) = get(ENV_EXPO_ACCESS_TOKEN) {
        config.push.access_token = Some(token);
    }
    if let Some(path) = get(ENV_DATABASE) {
        config.storage.database_path = path;
    }
    if let Some(url) = get(ENV_WEBDRIVER_URL) {
        config.browser.webdriver_url = url;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            (ENV_OPENAI_API_KEY, "sk-test"),
            (ENV_DATABASE, "/var/lib/buhnews.db"),
            (ENV_EXPO_ACCESS_TOKEN, "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.classifier.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.storage.database_path, "/var/lib/buhnews.db");
        assert!(config.push.access_token.is_none());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [storage]
            database_path = "custom.db"

            [schedule]
            crawl = "30 7 * * *"
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.schedule.crawl, "30 7 * * *");
    }

    #[test]
    fn test_load_config_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\ntimeout_secs = 0").unwrap();
        assert!(load_config(file.path()).is_err());
    }
}
