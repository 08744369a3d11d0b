pub mod states;

use crate::core::client::ChatSocket;
use crate::core::config::{ClientConfig, DEFAULT_AUTH_CLOSE_CODES};
use crate::core::heartbeat::HeartbeatPolicy;
use crate::core::outbound::DEFAULT_QUEUE_CAPACITY;
use crate::core::settings::ConnectionSettings;
use crate::traits::*;
use crate::transport::{SockJsConnector, TransportMode, TransportSelector, TungsteniteConnector};
use states::*;
use std::sync::Arc;

/// Type-state builder for ChatSocket
///
/// The endpoint (via [`settings`](Self::settings) or [`url`](Self::url)) and
/// the framing must be set before `build()` becomes available. Everything
/// else has a default derived from the connection settings.
pub struct ChatSocketBuilder<E, F>
where
    E: EndpointState,
    F: FramingState,
{
    _state: TypeState<E, F>,
    settings: Option<ConnectionSettings>,
    framing: Option<Arc<dyn Framing>>,
    tokens: Option<Arc<dyn TokenProvider>>,
    headers: Option<Arc<dyn HeaderProvider>>,
    reconnect_strategy: Option<Box<dyn ReconnectionStrategy>>,
    heartbeat: Option<HeartbeatPolicy>,
    max_missed_heartbeats: Option<u32>,
    auto_resubscribe: bool,
    queue_capacity: usize,
    auth_close_codes: Vec<u16>,
    transport_mode: TransportMode,
    native: Option<Arc<dyn TransportConnector>>,
    fallback: Option<Arc<dyn TransportConnector>>,
}

impl ChatSocketBuilder<NoEndpoint, NoFraming> {
    /// Create a new builder instance
    pub fn new() -> Self {
        Self {
            _state: TypeState::new(),
            settings: None,
            framing: None,
            tokens: None,
            headers: None,
            reconnect_strategy: None,
            heartbeat: None,
            max_missed_heartbeats: None,
            auto_resubscribe: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auth_close_codes: DEFAULT_AUTH_CLOSE_CODES.to_vec(),
            transport_mode: TransportMode::Auto,
            native: None,
            fallback: None,
        }
    }
}

impl Default for ChatSocketBuilder<NoEndpoint, NoFraming> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E, F> ChatSocketBuilder<E, F>
where
    E: EndpointState,
    F: FramingState,
{
    fn into_state<E2, F2>(self) -> ChatSocketBuilder<E2, F2>
    where
        E2: EndpointState,
        F2: FramingState,
    {
        ChatSocketBuilder {
            _state: TypeState::new(),
            settings: self.settings,
            framing: self.framing,
            tokens: self.tokens,
            headers: self.headers,
            reconnect_strategy: self.reconnect_strategy,
            heartbeat: self.heartbeat,
            max_missed_heartbeats: self.max_missed_heartbeats,
            auto_resubscribe: self.auto_resubscribe,
            queue_capacity: self.queue_capacity,
            auth_close_codes: self.auth_close_codes,
            transport_mode: self.transport_mode,
            native: self.native,
            fallback: self.fallback,
        }
    }

    pub fn token_provider(mut self, provider: impl TokenProvider + 'static) -> Self {
        self.tokens = Some(Arc::new(provider));
        self
    }

    pub fn headers(mut self, provider: impl HeaderProvider + 'static) -> Self {
        self.headers = Some(Arc::new(provider));
        self
    }

    /// Override the backoff built from the connection settings
    pub fn reconnect_strategy(mut self, strategy: impl ReconnectionStrategy + 'static) -> Self {
        self.reconnect_strategy = Some(Box::new(strategy));
        self
    }

    /// Override the heartbeat built from `heartbeat_interval`
    pub fn heartbeat(mut self, policy: HeartbeatPolicy) -> Self {
        self.heartbeat = Some(policy);
        self
    }

    pub fn max_missed_heartbeats(mut self, max_missed: u32) -> Self {
        self.max_missed_heartbeats = Some(max_missed);
        self
    }

    /// Re-send subscribe frames for all registered topics after every open
    /// (default: true)
    pub fn auto_resubscribe(mut self, enabled: bool) -> Self {
        self.auto_resubscribe = enabled;
        self
    }

    /// Messages kept while disconnected before the oldest are dropped
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Server close codes that force a token refresh on the next attempt
    pub fn auth_close_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.auth_close_codes = codes.into_iter().collect();
        self
    }

    pub fn transport_mode(mut self, mode: TransportMode) -> Self {
        self.transport_mode = mode;
        self
    }

    /// Replace the default `tokio-tungstenite` connector
    pub fn native_connector(mut self, connector: impl TransportConnector + 'static) -> Self {
        self.native = Some(Arc::new(connector));
        self
    }

    /// Replace the default SockJS connector
    pub fn fallback_connector(mut self, connector: impl TransportConnector + 'static) -> Self {
        self.fallback = Some(Arc::new(connector));
        self
    }
}

// Endpoint setting
impl<F> ChatSocketBuilder<NoEndpoint, F>
where
    F: FramingState,
{
    /// Use fully resolved settings (see [`crate::core::settings::resolve`])
    pub fn settings(mut self, settings: ConnectionSettings) -> ChatSocketBuilder<HasEndpoint, F> {
        self.settings = Some(settings);
        self.into_state()
    }

    /// Connect to an explicit URL with default settings
    pub fn url(self, url: impl Into<String>) -> ChatSocketBuilder<HasEndpoint, F> {
        self.settings(ConnectionSettings::for_url(url))
    }
}

// Framing setting
impl<E> ChatSocketBuilder<E, NoFraming>
where
    E: EndpointState,
{
    pub fn framing(mut self, framing: impl Framing) -> ChatSocketBuilder<E, HasFraming> {
        self.framing = Some(Arc::new(framing));
        self.into_state()
    }
}

// Build method - only available when all required fields are set
impl ChatSocketBuilder<HasEndpoint, HasFraming> {
    pub async fn build(self) -> Result<ChatSocket> {
        let settings = self
            .settings
            .ok_or_else(|| SocketError::Configuration("endpoint must be set".into()))?;
        let framing = self
            .framing
            .ok_or_else(|| SocketError::Configuration("framing must be set".into()))?;

        let native = match (self.native, self.transport_mode) {
            (Some(native), _) => Some(native),
            (None, TransportMode::Fallback) => None,
            (None, _) => Some(Arc::new(TungsteniteConnector::new()) as Arc<dyn TransportConnector>),
        };
        let fallback = match (self.fallback, self.transport_mode) {
            (Some(fallback), _) => Some(fallback),
            (None, TransportMode::Native) => None,
            (None, _) => Some(Arc::new(SockJsConnector::new()) as Arc<dyn TransportConnector>),
        };
        let selector = TransportSelector::new(self.transport_mode, native, fallback)?;

        let reconnect_strategy = self.reconnect_strategy.unwrap_or_else(|| {
            Box::new(
                ExponentialBackoff::new(settings.retry_min, settings.retry_max, settings.max_retries)
                    .with_factor(settings.retry_factor)
                    .with_jitter(settings.retry_jitter),
            )
        });

        let mut heartbeat = self
            .heartbeat
            .unwrap_or_else(|| HeartbeatPolicy::new(settings.heartbeat_interval));
        if let Some(max_missed) = self.max_missed_heartbeats {
            heartbeat = heartbeat.with_max_missed(max_missed);
        }

        let config = ClientConfig {
            settings,
            framing,
            selector,
            tokens: self.tokens.unwrap_or_else(|| Arc::new(NoToken)),
            headers: self.headers,
            reconnect_strategy,
            heartbeat,
            auto_resubscribe: self.auto_resubscribe,
            queue_capacity: self.queue_capacity,
            auth_close_codes: self.auth_close_codes,
        };

        tracing::debug!(
            endpoint = %config.settings().endpoint(),
            framing = config.framing_name(),
            transport = ?config.selector.current_kind(),
            "Building chat client"
        );

        Ok(ChatSocket::spawn(config))
    }
}
