//! CLI utilities for binaries
//!
//! Handles configuration loading and environment variables
//! for all binary executables.

use anyhow::{bail, Context, Result};
use chatsocket::{resolve, ConnectionSettings, SettingsLayer};
use std::path::{Path, PathBuf};
use tracing::info;

/// Type of configuration to load
#[derive(Debug, Clone)]
pub enum ConfigType {
    /// Client connection configuration (chat_client.yaml)
    Client,
    /// Custom path
    Custom(String),
}

impl ConfigType {
    /// Get the default path for this config type
    pub fn default_path(&self) -> &str {
        match self {
            ConfigType::Client => "config/chat_client.yaml",
            ConfigType::Custom(path) => path,
        }
    }

    /// Get the environment variable name for this config type
    pub fn env_var_name(&self) -> &str {
        "CHAT_CONFIG_PATH"
    }
}

/// Load configuration path from environment or use default
///
/// # Examples
/// ```
/// use chat_relay::bin_common::{load_config_from_env, ConfigType};
///
/// let path = load_config_from_env(ConfigType::Client);
/// ```
pub fn load_config_from_env(config_type: ConfigType) -> PathBuf {
    std::env::var(config_type.env_var_name())
        .unwrap_or_else(|_| config_type.default_path().to_string())
        .into()
}

/// Resolve connection settings: YAML file first, then `CHAT_WS_*` variables
///
/// A missing file is not an error; the environment and defaults apply.
pub fn load_settings(path: &Path) -> Result<ConnectionSettings> {
    let runtime = if path.exists() {
        info!("Loading client config from {}", path.display());
        SettingsLayer::from_yaml_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        info!("No config at {}, using environment and defaults", path.display());
        SettingsLayer::default()
    };
    Ok(resolve(&runtime, &SettingsLayer::from_env()))
}

/// Parse command line arguments for a binary
///
/// Returns a vector of arguments (excluding the program name)
pub fn parse_args() -> Vec<String> {
    std::env::args().skip(1).collect()
}

/// Arguments of the `chat-probe` binary
///
/// `chat-probe [--stomp <send-destination>] [--token <token>] [topic ...]`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeArgs {
    pub topics: Vec<String>,
    pub stomp_destination: Option<String>,
    pub token: Option<String>,
}

impl ProbeArgs {
    pub fn parse(args: &[String]) -> Result<Self> {
        let mut parsed = ProbeArgs::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--stomp" => match iter.next() {
                    Some(dest) => parsed.stomp_destination = Some(dest.clone()),
                    None => bail!("--stomp needs a send destination"),
                },
                "--token" => match iter.next() {
                    Some(token) => parsed.token = Some(token.clone()),
                    None => bail!("--token needs a value"),
                },
                flag if flag.starts_with("--") => bail!("Unknown flag {flag}"),
                topic => parsed.topics.push(topic.to_string()),
            }
        }
        Ok(parsed)
    }
}
