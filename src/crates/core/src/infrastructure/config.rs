//! Client configuration
//!
//! Defaults, then an optional TOML file, then environment overrides.

use crate::util::errors::{TurnwiseError, TurnwiseResult};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_SERVER_URL: &str = "TURNWISE_SERVER_URL";
pub const ENV_TOKEN: &str = "TURNWISE_TOKEN";

const CONFIG_DIR_NAME: &str = "turnwise";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub chat_path: String,
    /// `{call_id}` is replaced with the url-encoded call id.
    pub approval_path: String,
    pub stop_path: String,
    /// `{conversation_id}` is replaced with the url-encoded conversation id.
    pub conversation_path: String,
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub usage_throttle_ms: u64,
    pub bearer_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            chat_path: "/agent/chat".to_string(),
            approval_path: "/agent/approvals/{call_id}".to_string(),
            stop_path: "/agent/stop".to_string(),
            conversation_path: "/conversations/{conversation_id}".to_string(),
            idle_timeout_secs: 600,
            connect_timeout_secs: 30,
            usage_throttle_ms: 200,
            bearer_token: None,
        }
    }
}

// The bearer token must never reach the logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_url", &self.server_url)
            .field("chat_path", &self.chat_path)
            .field("approval_path", &self.approval_path)
            .field("stop_path", &self.stop_path)
            .field("conversation_path", &self.conversation_path)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("usage_throttle_ms", &self.usage_throttle_ms)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ClientConfig {
    /// Load from `path`, or from the user config dir when `path` is `None`.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> TurnwiseResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> TurnwiseResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TurnwiseError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&raw)?;
        debug!("Loaded config: path={}", path.display());
        Ok(config)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.trim().is_empty()) {
            self.server_url = url.trim().to_string();
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.trim().is_empty()) {
            self.bearer_token = Some(token.trim().to_string());
        }
    }

    pub fn validate(&self) -> TurnwiseResult<()> {
        if self.server_url.trim().is_empty() {
            return Err(TurnwiseError::Config("server_url must not be empty".to_string()));
        }
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(TurnwiseError::Config(format!(
                "server_url must be http(s): {}",
                self.server_url
            )));
        }
        for (name, path) in [
            ("chat_path", &self.chat_path),
            ("approval_path", &self.approval_path),
            ("stop_path", &self.stop_path),
            ("conversation_path", &self.conversation_path),
        ] {
            if !path.starts_with('/') {
                return Err(TurnwiseError::Config(format!(
                    "{} must start with '/': {}",
                    name, path
                )));
            }
        }
        if !self.approval_path.contains("{call_id}") {
            warn!("approval_path has no {{call_id}} placeholder: {}", self.approval_path);
        }
        if self.idle_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(TurnwiseError::Config("timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn usage_throttle(&self) -> Duration {
        Duration::from_millis(self.usage_throttle_ms)
    }

    pub fn chat_url(&self) -> String {
        self.join(&self.chat_path)
    }

    pub fn approval_url(&self, call_id: &str) -> String {
        self.join(
            &self
                .approval_path
                .replace("{call_id}", &urlencoding::encode(call_id)),
        )
    }

    pub fn stop_url(&self) -> String {
        self.join(&self.stop_path)
    }

    pub fn conversation_url(&self, conversation_id: &str) -> String {
        self.join(
            &self
                .conversation_path
                .replace("{conversation_id}", &urlencoding::encode(conversation_id)),
        )
    }

    fn join(&self, path: &str) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), path)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
