//! Client configuration.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::{
    api::DEFAULT_API_URL,
    domain::{CurrentUser, RoomVariant},
    transport::DEFAULT_WS_URL,
};

/// Errors raised while assembling the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read user file {path}: {source}")]
    ReadUserFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse user file {path}: {source}")]
    ParseUserFile {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid URL '{0}': expected {1}")]
    InvalidUrl(String, &'static str),
}

/// Everything the terminal client needs to start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub ws_url: String,
    pub variant: RoomVariant,
    pub current_user: Option<CurrentUser>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            variant: RoomVariant::Global,
            current_user: None,
        }
    }
}

impl ClientConfig {
    /// Build a configuration, checking the URL schemes
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidUrl` when the API URL is not http(s) or the
    /// broker URL is not ws(s).
    pub fn new(
        api_url: impl Into<String>,
        ws_url: impl Into<String>,
        variant: RoomVariant,
        current_user: Option<CurrentUser>,
    ) -> Result<Self, ConfigError> {
        let api_url = api_url.into();
        let ws_url = ws_url.into();
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(api_url, "http:// or https://"));
        }
        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(ws_url, "ws:// or wss://"));
        }
        Ok(Self {
            api_url,
            ws_url,
            variant,
            current_user,
        })
    }
}

/// Resolve the logged-in user from a stored JSON blob or a bare name
///
/// The file wins when both are given. A blank name counts as logged out.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or is not a user object.
pub fn resolve_current_user(
    user_file: Option<&Path>,
    user_name: Option<&str>,
) -> Result<Option<CurrentUser>, ConfigError> {
    let user = match (user_file, user_name) {
        (Some(path), _) => Some(load_user_file(path)?),
        (None, Some(name)) => Some(CurrentUser::new(name)),
        (None, None) => None,
    };
    Ok(user.filter(|u| !u.display_name().trim().is_empty()))
}

fn load_user_file(path: &Path) -> Result<CurrentUser, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadUserFile {
        path: path.to_path_buf(),
        source,
    })?;
    let user = serde_json::from_str(&text).map_err(|source| ConfigError::ParseUserFile {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!("Loaded current user from {}", path.display());
    Ok(user)
}
