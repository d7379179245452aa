//! Daemon configuration.
//!
//! Loaded from a JSON file with camelCase keys; app credentials may be
//! overridden from the environment. Paths may start with `~`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment overrides for the app credentials.
pub const ENV_APP_ID: &str = "FEISHU_APP_ID";
pub const ENV_APP_SECRET: &str = "FEISHU_APP_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found at {0}")]
    Missing(PathBuf),

    #[error("config file {path} is not valid JSON: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("config is missing required key {0}")]
    MissingKey(&'static str),

    #[error("token file {0} is missing or empty; run the auth worker first")]
    MissingToken(PathBuf),
}

/// App credentials used by the auth worker and the event stream.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// `sync.pollIntervalSeconds`: a positive number of seconds, or `0`/`false`
/// to disable the poller.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
pub enum PollInterval {
    Seconds(f64),
    Enabled(bool),
}

impl Default for PollInterval {
    fn default() -> Self {
        PollInterval::Enabled(false)
    }
}

impl PollInterval {
    /// The polling period, or `None` when disabled.
    pub fn as_duration(&self) -> Option<std::time::Duration> {
        match self {
            PollInterval::Seconds(secs) if *secs > 0.0 => {
                Some(std::time::Duration::from_secs_f64(*secs))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Root directory of the paired Markdown tree.
    pub folder_path: String,
    #[serde(default)]
    pub poll_interval_seconds: PollInterval,
    #[serde(default = "default_true")]
    pub initial_sync: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path of the bearer-token file maintained by the auth worker.
    pub token_path: String,
    pub wiki_space_id: String,
    #[serde(default)]
    pub auth: AuthConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Load and validate the configuration at `path`, applying environment
    /// overrides for the app credentials.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::Missing(path.to_path_buf()))?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        if let Ok(id) = std::env::var(ENV_APP_ID) {
            config.auth.client_id = Some(id);
        }
        if let Ok(secret) = std::env::var(ENV_APP_SECRET) {
            config.auth.client_secret = Some(secret);
        }

        if config.wiki_space_id.is_empty() {
            return Err(ConfigError::MissingKey("wikiSpaceId"));
        }
        if config.sync.folder_path.is_empty() {
            return Err(ConfigError::MissingKey("sync.folderPath"));
        }
        if config.token_path.is_empty() {
            return Err(ConfigError::MissingKey("tokenPath"));
        }
        Ok(config)
    }

    /// The sync root with `~` expanded.
    pub fn root_dir(&self) -> PathBuf {
        expand_tilde(&self.sync.folder_path)
    }

    /// The token file path with `~` expanded.
    pub fn token_file(&self) -> PathBuf {
        expand_tilde(&self.token_path)
    }

    /// Read the bearer token; missing or empty is a startup failure.
    pub fn read_token(&self) -> Result<String, ConfigError> {
        let path = self.token_file();
        let token = std::fs::read_to_string(&path)
            .map_err(|_| ConfigError::MissingToken(path.clone()))?;
        let token = token.trim().to_string();
        if token.is_empty() {
            return Err(ConfigError::MissingToken(path));
        }
        Ok(token)
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, json: &str) -> PathBuf {
        let path = dir.path().join("config.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "tokenPath": "/tmp/token",
                "wikiSpaceId": "space-1",
                "auth": { "clientId": "cli", "clientSecret": "sec" },
                "sync": {
                    "folderPath": "/tmp/wiki",
                    "pollIntervalSeconds": 30,
                    "initialSync": false
                }
            }"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.wiki_space_id, "space-1");
        assert_eq!(
            config.sync.poll_interval_seconds.as_duration(),
            Some(std::time::Duration::from_secs(30))
        );
        assert!(!config.sync.initial_sync);
    }

    #[test]
    fn test_poll_interval_disabled_forms() {
        for raw in ["0", "false"] {
            let interval: PollInterval = serde_json::from_str(raw).unwrap();
            assert!(interval.as_duration().is_none(), "{raw} should disable");
        }
        let interval: PollInterval = serde_json::from_str("2.5").unwrap();
        assert_eq!(
            interval.as_duration(),
            Some(std::time::Duration::from_secs_f64(2.5))
        );
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "tokenPath": "/tmp/token",
                "wikiSpaceId": "space-1",
                "sync": { "folderPath": "/tmp/wiki" }
            }"#,
        );

        let config = Config::load(&path).unwrap();
        assert!(config.sync.initial_sync);
        assert!(config.sync.poll_interval_seconds.as_duration().is_none());
    }

    #[test]
    fn test_missing_keys_fail() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{ "tokenPath": "/tmp/token", "wikiSpaceId": "", "sync": { "folderPath": "/x" } }"#,
        );
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::MissingKey("wikiSpaceId"))
        ));
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(matches!(
            Config::load(Path::new("/nonexistent/config.json")),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_malformed_json_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "{not json");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_read_token() {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "  secret-token\n").unwrap();

        let config_path = write_config(
            &dir,
            &format!(
                r#"{{
                    "tokenPath": "{}",
                    "wikiSpaceId": "space-1",
                    "sync": {{ "folderPath": "/tmp/wiki" }}
                }}"#,
                token_path.display()
            ),
        );

        let config = Config::load(&config_path).unwrap();
        assert_eq!(config.read_token().unwrap(), "secret-token");

        std::fs::write(&token_path, "   \n").unwrap();
        assert!(matches!(
            config.read_token(),
            Err(ConfigError::MissingToken(_))
        ));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/wiki"), home.join("wiki"));
            assert_eq!(expand_tilde("~"), home);
        }
    }
}
