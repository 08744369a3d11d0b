use crate::core::heartbeat::HeartbeatPolicy;
use crate::core::settings::ConnectionSettings;
use crate::traits::*;
use crate::transport::TransportSelector;
use std::sync::Arc;

/// Close code sent by `disconnect()` when none is given
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Forced close after the network went offline
pub const OFFLINE_CLOSE_CODE: u16 = 4000;

/// Forced close after too many missed heartbeats
pub const HEARTBEAT_TIMEOUT_CLOSE_CODE: u16 = 4001;

/// Server close codes that mean "your credentials were rejected"
pub const DEFAULT_AUTH_CLOSE_CODES: [u16; 5] = [1008, 4001, 4003, 4401, 4403];

/// Configuration for a ChatSocket client
///
/// Built by `ChatSocketBuilder` and consumed by the connection task.
pub struct ClientConfig {
    /// Resolved endpoint, timeouts and retry bounds
    pub(crate) settings: ConnectionSettings,

    /// Server dialect
    pub(crate) framing: Arc<dyn Framing>,

    /// Native / fallback connectors
    pub(crate) selector: TransportSelector,

    /// Auth token lookup, asked before every attempt
    pub(crate) tokens: Arc<dyn TokenProvider>,

    /// Optional extra request headers
    pub(crate) headers: Option<Arc<dyn HeaderProvider>>,

    /// Delay between reconnection attempts
    pub(crate) reconnect_strategy: Box<dyn ReconnectionStrategy>,

    /// Heartbeat interval, idle threshold and tolerated misses
    pub(crate) heartbeat: HeartbeatPolicy,

    /// Re-send subscribe frames for every registered topic after each open
    pub(crate) auto_resubscribe: bool,

    /// Outbound queue capacity while disconnected
    pub(crate) queue_capacity: usize,

    /// Server close codes that force a token refresh before the next attempt
    pub(crate) auth_close_codes: Vec<u16>,
}

impl ClientConfig {
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn framing_name(&self) -> &'static str {
        self.framing.name()
    }

    pub fn auto_resubscribe(&self) -> bool {
        self.auto_resubscribe
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn heartbeat(&self) -> &HeartbeatPolicy {
        &self.heartbeat
    }

    pub fn is_auth_close(&self, code: u16) -> bool {
        self.auth_close_codes.contains(&code)
    }
}
