//! Connection settings resolution
//!
//! Every field is resolved independently, first match wins:
//!
//! ```text
//! runtime layer ──> environment layer ──> derived value ──> default
//! ```
//!
//! The only derived value is the socket base URL, which can be computed from
//! an `http(s)://` API base by swapping the scheme and clearing the path.
//! Resolution never fails: a value that does not parse is skipped with a
//! warning and the next source is consulted.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::traits::{Result, SocketError};

pub const DEFAULT_BASE_URL: &str = "ws://localhost:8080";
pub const DEFAULT_PATH: &str = "/ws";
pub const DEFAULT_RETRY_MIN_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_MS: u64 = 30_000;
pub const DEFAULT_RETRY_FACTOR: f64 = 2.0;
pub const DEFAULT_RETRY_JITTER: f64 = 0.2;
pub const DEFAULT_HEARTBEAT_MS: u64 = 25_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TOKEN_PARAM: &str = "token";

/// A scalar as found in a config file or environment variable
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    fn as_string(&self) -> String {
        match self {
            RawValue::Bool(b) => b.to_string(),
            RawValue::Int(i) => i.to_string(),
            RawValue::Float(f) => f.to_string(),
            RawValue::Text(s) => s.trim().to_string(),
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self {
            RawValue::Int(i) => u64::try_from(*i).ok(),
            RawValue::Float(f) if f.is_finite() && *f >= 0.0 => Some(*f as u64),
            RawValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        let value = match self {
            RawValue::Int(i) => Some(*i as f64),
            RawValue::Float(f) => Some(*f),
            RawValue::Text(s) => s.trim().parse().ok(),
            RawValue::Bool(_) => None,
        };
        value.filter(|v: &f64| v.is_finite())
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Bool(b) => Some(*b),
            RawValue::Int(0) => Some(false),
            RawValue::Int(1) => Some(true),
            RawValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

/// One configuration source; every field optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SettingsLayer {
    pub base_url: Option<RawValue>,
    pub api_base_url: Option<RawValue>,
    pub path: Option<RawValue>,
    pub retry_min_ms: Option<RawValue>,
    pub retry_max_ms: Option<RawValue>,
    pub retry_factor: Option<RawValue>,
    pub retry_jitter: Option<RawValue>,
    pub max_retries: Option<RawValue>,
    pub heartbeat_ms: Option<RawValue>,
    pub request_timeout_ms: Option<RawValue>,
    pub connect_timeout_ms: Option<RawValue>,
    pub token_in_query: Option<RawValue>,
    pub token_param: Option<RawValue>,
}

/// Environment variable names read by [`SettingsLayer::from_env`]
pub const ENV_VARS: &[(&str, &str)] = &[
    ("CHAT_WS_BASE_URL", "base_url"),
    ("CHAT_API_BASE_URL", "api_base_url"),
    ("CHAT_WS_PATH", "path"),
    ("CHAT_WS_RETRY_MIN_MS", "retry_min_ms"),
    ("CHAT_WS_RETRY_MAX_MS", "retry_max_ms"),
    ("CHAT_WS_RETRY_FACTOR", "retry_factor"),
    ("CHAT_WS_RETRY_JITTER", "retry_jitter"),
    ("CHAT_WS_MAX_RETRIES", "max_retries"),
    ("CHAT_WS_HEARTBEAT_MS", "heartbeat_ms"),
    ("CHAT_WS_REQUEST_TIMEOUT_MS", "request_timeout_ms"),
    ("CHAT_WS_CONNECT_TIMEOUT_MS", "connect_timeout_ms"),
    ("CHAT_WS_TOKEN_IN_QUERY", "token_in_query"),
    ("CHAT_WS_TOKEN_PARAM", "token_param"),
];

impl SettingsLayer {
    /// Build a layer from `(variable, value)` pairs using the [`ENV_VARS`] names
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut layer = SettingsLayer::default();
        for (key, value) in vars {
            let Some((_, field)) = ENV_VARS.iter().find(|(name, _)| *name == key.as_ref()) else {
                continue;
            };
            let value = Some(RawValue::from(value.as_ref()));
            match *field {
                "base_url" => layer.base_url = value,
                "api_base_url" => layer.api_base_url = value,
                "path" => layer.path = value,
                "retry_min_ms" => layer.retry_min_ms = value,
                "retry_max_ms" => layer.retry_max_ms = value,
                "retry_factor" => layer.retry_factor = value,
                "retry_jitter" => layer.retry_jitter = value,
                "max_retries" => layer.max_retries = value,
                "heartbeat_ms" => layer.heartbeat_ms = value,
                "request_timeout_ms" => layer.request_timeout_ms = value,
                "connect_timeout_ms" => layer.connect_timeout_ms = value,
                "token_in_query" => layer.token_in_query = value,
                "token_param" => layer.token_param = value,
                _ => {}
            }
        }
        layer
    }

    /// Read the `CHAT_WS_*` variables from the process environment
    pub fn from_env() -> Self {
        Self::from_vars(
            ENV_VARS
                .iter()
                .filter_map(|(name, _)| std::env::var(name).ok().map(|v| (*name, v))),
        )
    }

    /// Load a runtime layer from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SocketError::Configuration(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| SocketError::Configuration(e.to_string()))
    }
}

/// Fully resolved connection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub base_url: String,
    pub path: String,
    pub retry_min: Duration,
    pub retry_max: Duration,
    pub retry_factor: f64,
    pub retry_jitter: f64,
    /// `None` = retry forever
    pub max_retries: Option<u32>,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub token_in_query: bool,
    pub token_param: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        resolve(&SettingsLayer::default(), &SettingsLayer::default())
    }
}

impl ConnectionSettings {
    /// Settings pointing at an explicit endpoint, everything else default
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            base_url: url.into(),
            path: String::new(),
            ..Self::default()
        }
    }

    /// Base URL joined with the path
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.path.trim();
        if path.is_empty() || path == "/" {
            return base.to_string();
        }
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    /// Endpoint with the auth token appended as a query parameter when
    /// configured and a token is available
    pub fn connect_url(&self, token: Option<&str>) -> String {
        let endpoint = self.endpoint();
        let token = match token {
            Some(t) if self.token_in_query && !t.is_empty() => t,
            _ => return endpoint,
        };
        match Url::parse(&endpoint) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair(&self.token_param, token);
                url.to_string()
            }
            Err(e) => {
                warn!(error = %e, endpoint = %endpoint, "Endpoint is not a valid URL, token not appended");
                endpoint
            }
        }
    }
}

/// Derive a socket base from an HTTP API base: scheme swapped, path cleared
pub fn derive_socket_base(api_base: &str) -> Option<String> {
    let mut url = Url::parse(api_base.trim()).ok()?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => url.scheme(),
        _ => return None,
    }
    .to_string();
    url.set_scheme(&scheme).ok()?;
    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Some(url.as_str().trim_end_matches('/').to_string())
}

fn pick<T>(
    field: &str,
    runtime: &Option<RawValue>,
    env: &Option<RawValue>,
    parse: impl Fn(&RawValue) -> Option<T>,
) -> Option<T> {
    for (source, raw) in [("runtime", runtime), ("environment", env)] {
        let Some(raw) = raw else { continue };
        match parse(raw) {
            Some(value) => return Some(value),
            None => warn!(field, source, value = ?raw, "Ignoring malformed setting"),
        }
    }
    None
}

fn non_empty(raw: &RawValue) -> Option<String> {
    let s = raw.as_string();
    (!s.is_empty()).then_some(s)
}

/// Resolve settings from a runtime layer and an environment layer
pub fn resolve(runtime: &SettingsLayer, env: &SettingsLayer) -> ConnectionSettings {
    let base_url = pick("base_url", &runtime.base_url, &env.base_url, non_empty)
        .or_else(|| {
            pick("api_base_url", &runtime.api_base_url, &env.api_base_url, |raw| {
                derive_socket_base(&raw.as_string())
            })
        })
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let path = pick("path", &runtime.path, &env.path, |raw| Some(raw.as_string()))
        .unwrap_or_else(|| DEFAULT_PATH.to_string());

    let retry_min_ms = pick("retry_min_ms", &runtime.retry_min_ms, &env.retry_min_ms, RawValue::as_u64)
        .unwrap_or(DEFAULT_RETRY_MIN_MS);
    let retry_max_ms = pick("retry_max_ms", &runtime.retry_max_ms, &env.retry_max_ms, RawValue::as_u64)
        .unwrap_or(DEFAULT_RETRY_MAX_MS)
        .max(retry_min_ms);
    let retry_factor = pick("retry_factor", &runtime.retry_factor, &env.retry_factor, |raw| {
        raw.as_f64().filter(|f| *f >= 1.0)
    })
    .unwrap_or(DEFAULT_RETRY_FACTOR);
    let retry_jitter = pick("retry_jitter", &runtime.retry_jitter, &env.retry_jitter, |raw| {
        raw.as_f64().filter(|f| (0.0..=1.0).contains(f))
    })
    .unwrap_or(DEFAULT_RETRY_JITTER);
    let max_retries = pick("max_retries", &runtime.max_retries, &env.max_retries, |raw| {
        raw.as_u64().map(|n| u32::try_from(n).unwrap_or(u32::MAX))
    });

    let heartbeat_ms = pick("heartbeat_ms", &runtime.heartbeat_ms, &env.heartbeat_ms, |raw| {
        raw.as_u64().filter(|n| *n > 0)
    })
    .unwrap_or(DEFAULT_HEARTBEAT_MS);
    let request_timeout_ms = pick(
        "request_timeout_ms",
        &runtime.request_timeout_ms,
        &env.request_timeout_ms,
        |raw| raw.as_u64().filter(|n| *n > 0),
    )
    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
    let connect_timeout_ms = pick(
        "connect_timeout_ms",
        &runtime.connect_timeout_ms,
        &env.connect_timeout_ms,
        |raw| raw.as_u64().filter(|n| *n > 0),
    )
    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

    let token_in_query = pick("token_in_query", &runtime.token_in_query, &env.token_in_query, RawValue::as_bool)
        .unwrap_or(false);
    let token_param = pick("token_param", &runtime.token_param, &env.token_param, non_empty)
        .unwrap_or_else(|| DEFAULT_TOKEN_PARAM.to_string());

    let settings = ConnectionSettings {
        base_url,
        path,
        retry_min: Duration::from_millis(retry_min_ms),
        retry_max: Duration::from_millis(retry_max_ms),
        retry_factor,
        retry_jitter,
        max_retries,
        heartbeat_interval: Duration::from_millis(heartbeat_ms),
        request_timeout: Duration::from_millis(request_timeout_ms),
        connect_timeout: Duration::from_millis(connect_timeout_ms),
        token_in_query,
        token_param,
    };
    debug!(endpoint = %settings.endpoint(), "Resolved connection settings");
    settings
}
