//! Native / fallback transport selection

use crate::traits::{Result, SocketError, TransportConnector, TransportKind};
use std::sync::Arc;
use tracing::warn;

/// Which transports a client may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Native WebSocket only
    Native,
    /// HTTP fallback only
    Fallback,
    /// Native when supported; switch to the fallback once if it fails
    #[default]
    Auto,
}

/// Picks the connector for each connection attempt
pub struct TransportSelector {
    mode: TransportMode,
    native: Option<Arc<dyn TransportConnector>>,
    fallback: Option<Arc<dyn TransportConnector>>,
    use_fallback: bool,
    fallback_tried: bool,
}

impl TransportSelector {
    pub fn new(
        mode: TransportMode,
        native: Option<Arc<dyn TransportConnector>>,
        fallback: Option<Arc<dyn TransportConnector>>,
    ) -> Result<Self> {
        let native_usable = native.as_ref().is_some_and(|c| c.is_supported());
        let use_fallback = match mode {
            TransportMode::Native if native.is_none() => {
                return Err(SocketError::Configuration(
                    "native transport mode needs a native connector".into(),
                ))
            }
            TransportMode::Fallback if fallback.is_none() => {
                return Err(SocketError::Configuration(
                    "fallback transport mode needs a fallback connector".into(),
                ))
            }
            TransportMode::Auto if !native_usable && fallback.is_none() => {
                return Err(SocketError::Configuration(
                    "no usable transport configured".into(),
                ))
            }
            TransportMode::Native => false,
            TransportMode::Fallback => true,
            TransportMode::Auto => !native_usable,
        };

        Ok(Self {
            mode,
            native,
            fallback,
            use_fallback,
            fallback_tried: use_fallback,
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    /// Connector for the next attempt
    pub fn current(&self) -> Option<Arc<dyn TransportConnector>> {
        if self.use_fallback {
            self.fallback.clone()
        } else {
            self.native.clone()
        }
    }

    pub fn current_kind(&self) -> TransportKind {
        if self.use_fallback {
            TransportKind::Fallback
        } else {
            TransportKind::Native
        }
    }

    /// A connect attempt failed
    ///
    /// Returns true when this switched to the fallback, in which case the
    /// caller should retry at once. Happens at most once per selector.
    pub fn on_connect_failure(&mut self) -> bool {
        if self.mode != TransportMode::Auto
            || self.use_fallback
            || self.fallback_tried
            || self.fallback.is_none()
        {
            return false;
        }
        warn!("Native transport failed, switching to fallback");
        self.use_fallback = true;
        self.fallback_tried = true;
        true
    }
}
