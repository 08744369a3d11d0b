use crate::core::activity::ActivityTracker;
use crate::core::builder::{states, ChatSocketBuilder};
use crate::core::config::{
    ClientConfig, HEARTBEAT_TIMEOUT_CLOSE_CODE, NORMAL_CLOSE_CODE, OFFLINE_CLOSE_CODE,
};
use crate::core::connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
use crate::core::events::{ClientEvent, EventBus, EventKind, ListenerHandle};
use crate::core::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use crate::core::outbound::OutboundQueue;
use crate::core::pending::{PendingRequests, ReplyWaiter, SharedPending};
use crate::core::registry::{MessageHandler, Removal, SubscriptionHandle, SubscriptionRegistry};
use crate::core::settings::ConnectionSettings;
use crate::traits::*;
use crate::transport::tungstenite::ABNORMAL_CLOSURE;
use crate::transport::TransportSelector;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Internal command messages for the connection task
enum Command {
    Connect(oneshot::Sender<Result<()>>),
    Disconnect {
        code: u16,
        reason: String,
        done: oneshot::Sender<()>,
    },
    Send(WsMessage),
    Subscribe(String),
    Unsubscribe(String),
    SetOnline(bool),
    SetVisible(bool),
}

/// Client metrics snapshot
#[derive(Debug, Clone)]
pub struct Metrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_queued: u64,
    pub messages_evicted: u64,
    pub reconnect_count: u64,
    pub connection_state: ConnectionState,
    pub pending_requests: usize,
    pub subscribed_topics: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

/// State shared between the handles and the connection task
struct Shared {
    state: AtomicConnectionState,
    metrics: AtomicMetrics,
    activity: ActivityTracker,
    registry: Mutex<SubscriptionRegistry>,
    pending: SharedPending,
    events: EventBus,
    framing: Arc<dyn Framing>,
    request_timeout: Duration,
}

/// Resilient messaging client
///
/// One logical connection multiplexing many topics. Sends made while the
/// connection is down are queued and flushed in call order on the next open;
/// subscriptions survive reconnects; requests are correlated with replies.
///
/// The handle is cheap to clone. Create one per process and hand clones to
/// every consumer:
///
/// ```ignore
/// let client = ChatSocket::builder()
///     .settings(ConnectionSettings::default())
///     .framing(JsonFraming::new())
///     .build()
///     .await?;
///
/// client.connect().await?;
/// let room = client.subscribe("room.1", |msg| println!("{msg:?}"));
/// client.publish("room.1", json!({"text": "hello"}));
/// let reply = client.request(json!({"op": "history"}), None, None).await?;
/// room.unsubscribe();
/// ```
///
/// All wire traffic goes through a single connection task, which owns the
/// transport, the outbound queue, the backoff and the heartbeat. Transport
/// failures never surface from `send`/`subscribe`; they arrive as
/// [`ClientEvent::Error`] events or as the error of the affected request.
#[derive(Clone)]
pub struct ChatSocket {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ChatSocket {
    /// Create a new client builder
    pub fn builder() -> ChatSocketBuilder<states::NoEndpoint, states::NoFraming> {
        ChatSocketBuilder::new()
    }

    /// Spawn the connection task
    ///
    /// Called by the builder's `build()`; the client starts idle.
    pub(crate) fn spawn(config: ClientConfig) -> Self {
        let shared = Arc::new(Shared {
            state: AtomicConnectionState::new(ConnectionState::Idle),
            metrics: AtomicMetrics::new(),
            activity: ActivityTracker::new(),
            registry: Mutex::new(SubscriptionRegistry::new()),
            pending: PendingRequests::shared(),
            events: EventBus::new(),
            framing: Arc::clone(&config.framing),
            request_timeout: config.settings.request_timeout,
        });
        let (commands, command_rx) = mpsc::unbounded_channel();

        let task = ConnectionTask::new(config, Arc::clone(&shared), command_rx);
        tokio::spawn(task.run());

        Self { shared, commands }
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| SocketError::ChannelSend("connection task stopped".into()))
    }

    /// Open the connection
    ///
    /// No-op if already connecting or open. Resolves on the first open or the
    /// first failed attempt; reconnection continues in the background either
    /// way.
    pub async fn connect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Connect(tx))?;
        rx.await
            .map_err(|_| SocketError::ChannelSend("connection task stopped".into()))?
    }

    /// Close the connection and stop reconnecting
    ///
    /// Pending requests fail with [`SocketError::Disconnected`]. Queued sends
    /// stay queued for a later `connect()`.
    pub async fn disconnect(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Disconnect {
            code: code.unwrap_or(NORMAL_CLOSE_CODE),
            reason: reason.unwrap_or("client disconnect").to_string(),
            done,
        })?;
        rx.await
            .map_err(|_| SocketError::ChannelSend("connection task stopped".into()))
    }

    /// Send a message
    ///
    /// Returns true if the connection was open at call time. Otherwise the
    /// message is queued and sent after the next open.
    pub fn send(&self, payload: impl Into<Payload>) -> bool {
        let open = self.shared.state.is_open();
        let frame = self.shared.framing.encode_send(&payload.into());
        self.command(Command::Send(frame)).is_ok() && open
    }

    /// Publish a message on a topic (same queueing as [`send`](Self::send))
    pub fn publish(&self, topic: &str, payload: impl Into<Payload>) -> bool {
        let open = self.shared.state.is_open();
        let frame = self.shared.framing.encode_publish(topic, &payload.into());
        self.command(Command::Send(frame)).is_ok() && open
    }

    /// Send a request and wait for the reply carrying its correlation id
    ///
    /// Settles exactly once: with the reply, [`SocketError::RequestTimeout`]
    /// (default: the configured request timeout),
    /// [`SocketError::Cancelled`] when `cancel` fires, or
    /// [`SocketError::Disconnected`]. Dropping the future also abandons the
    /// request. A request made while disconnected is queued like any send.
    pub async fn request(
        &self,
        payload: impl Into<Payload>,
        timeout: Option<Duration>,
        cancel: Option<CancellationToken>,
    ) -> Result<Payload> {
        let waiter = ReplyWaiter::register(&self.shared.pending);
        if cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(SocketError::Cancelled {
                id: waiter.id().to_string(),
            });
        }

        let frame = self
            .shared
            .framing
            .encode_request(&payload.into(), waiter.id());
        self.command(Command::Send(frame))?;
        debug!(id = %waiter.id(), "Request sent");

        waiter
            .wait(timeout.unwrap_or(self.shared.request_timeout), cancel)
            .await
    }

    /// Subscribe a handler to a topic, with server-side subscribe frames
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionHandle
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.subscribe_with(topic, Arc::new(handler), true)
    }

    /// Subscribe a shared handler
    ///
    /// Subscribing the same `Arc` twice to one topic is reference counted:
    /// it is called once per message and stays registered until both handles
    /// are released. `send_frame = false` registers a local-only handler.
    pub fn subscribe_with(
        &self,
        topic: impl Into<String>,
        handler: MessageHandler,
        send_frame: bool,
    ) -> SubscriptionHandle {
        let topic = topic.into();
        let needs_frame = self
            .shared
            .registry
            .lock()
            .add(&topic, Arc::clone(&handler), send_frame);
        if needs_frame {
            let _ = self.command(Command::Subscribe(topic.clone()));
        }

        let shared = Arc::clone(&self.shared);
        let commands = self.commands.clone();
        let released = topic.clone();
        SubscriptionHandle::new(topic, move || {
            let removal = shared.registry.lock().remove(&released, &handler);
            if removal == (Removal::TopicReleased { server_side: true }) {
                let _ = commands.send(Command::Unsubscribe(released));
            }
        })
    }

    /// Current connection state
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.shared.state.is_open()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.shared.registry.lock().contains(topic)
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Register a listener for one kind of lifecycle event
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, listener)
    }

    /// Receiver of every event emitted from now on
    pub fn event_stream(&self) -> crossbeam_channel::Receiver<ClientEvent> {
        self.shared.events.stream()
    }

    /// Network connectivity signal
    ///
    /// Going offline closes the connection with code 4000 and withholds
    /// reconnection; coming back online reconnects immediately.
    pub fn set_online(&self, online: bool) {
        let _ = self.command(Command::SetOnline(online));
    }

    /// Application visibility signal; the heartbeat slows down while hidden
    pub fn set_visible(&self, visible: bool) {
        let _ = self.command(Command::SetVisible(visible));
    }

    /// Get current metrics
    pub fn metrics(&self) -> Metrics {
        let metrics = &self.shared.metrics;
        Metrics {
            messages_sent: metrics.messages_sent(),
            messages_received: metrics.messages_received(),
            messages_queued: metrics.messages_queued(),
            messages_evicted: metrics.messages_evicted(),
            reconnect_count: metrics.reconnect_count(),
            connection_state: self.shared.state.get(),
            pending_requests: self.pending_requests(),
            subscribed_topics: self.shared.registry.lock().len(),
            last_activity: self.shared.activity.last_activity_at(),
        }
    }
}

/// Result of a connection attempt task
struct Attempt {
    link: TransportLink,
    token: Option<String>,
}

/// What woke the connection task
enum Wake {
    Command(Command),
    Shutdown,
    Transport(Option<TransportEvent>),
    Attempt(std::result::Result<Result<Attempt>, JoinError>),
    HandshakeTimeout,
    Heartbeat,
    Reconnect,
}

async fn next_event(
    events: Option<&mut mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn join_attempt(
    attempt: Option<&mut JoinHandle<Result<Attempt>>>,
) -> std::result::Result<Result<Attempt>, JoinError> {
    match attempt {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolve the token and headers, then open the transport
async fn open_link(
    connector: Arc<dyn TransportConnector>,
    settings: ConnectionSettings,
    framing: Arc<dyn Framing>,
    tokens: Arc<dyn TokenProvider>,
    headers: Option<Arc<dyn HeaderProvider>>,
    force_refresh: bool,
) -> Result<Attempt> {
    let token = tokens.token(force_refresh).await;

    let mut request_headers = match &headers {
        Some(provider) => provider.get_headers().await,
        None => Headers::new(),
    };
    if let Some(token) = &token {
        if !settings.token_in_query && !framing.carries_token_in_handshake() {
            request_headers.insert("Authorization".to_string(), format!("Bearer {token}"));
        }
    }

    let url = settings.connect_url(token.as_deref());
    let link = tokio::time::timeout(
        settings.connect_timeout,
        connector.connect(&url, &request_headers),
    )
    .await
    .map_err(|_| {
        SocketError::Transport(format!(
            "Connect timed out after {:?}",
            settings.connect_timeout
        ))
    })??;

    Ok(Attempt { link, token })
}

/// The connection state machine
///
/// Every transition happens inside [`ConnectionTask::run`], one wake-up at a
/// time, so none of the fields below need locking.
struct ConnectionTask {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,

    settings: ConnectionSettings,
    framing: Arc<dyn Framing>,
    selector: TransportSelector,
    tokens: Arc<dyn TokenProvider>,
    headers: Option<Arc<dyn HeaderProvider>>,
    strategy: Box<dyn ReconnectionStrategy>,
    auto_resubscribe: bool,
    auth_close_codes: Vec<u16>,

    link: Option<TransportLink>,
    link_kind: TransportKind,
    attempt: Option<JoinHandle<Result<Attempt>>>,
    queue: OutboundQueue,
    heartbeat: HeartbeatMonitor,
    /// Topics subscribed server-side on the current connection
    live_topics: HashSet<String>,
    connect_waiters: Vec<oneshot::Sender<Result<()>>>,

    next_heartbeat: Option<Instant>,
    reconnect_at: Option<Instant>,
    handshake_deadline: Option<Instant>,

    reconnect_attempt: u32,
    want_connected: bool,
    online: bool,
    force_token_refresh: bool,
}

impl ConnectionTask {
    fn new(
        config: ClientConfig,
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let link_kind = config.selector.current_kind();
        Self {
            shared,
            commands,
            settings: config.settings,
            framing: config.framing,
            selector: config.selector,
            tokens: config.tokens,
            headers: config.headers,
            strategy: config.reconnect_strategy,
            auto_resubscribe: config.auto_resubscribe,
            auth_close_codes: config.auth_close_codes,
            link: None,
            link_kind,
            attempt: None,
            queue: OutboundQueue::new(config.queue_capacity),
            heartbeat: HeartbeatMonitor::new(config.heartbeat),
            live_topics: HashSet::new(),
            connect_waiters: Vec::new(),
            next_heartbeat: None,
            reconnect_at: None,
            handshake_deadline: None,
            reconnect_attempt: 0,
            want_connected: false,
            online: true,
            force_token_refresh: false,
        }
    }

    async fn run(mut self) {
        loop {
            let wake = {
                let events = self.link.as_mut().map(|link| &mut link.events);
                let attempt = self.attempt.as_mut();
                tokio::select! {
                    biased;
                    command = self.commands.recv() => command.map_or(Wake::Shutdown, Wake::Command),
                    event = next_event(events) => Wake::Transport(event),
                    result = join_attempt(attempt) => Wake::Attempt(result),
                    _ = wait_until(self.handshake_deadline) => Wake::HandshakeTimeout,
                    _ = wait_until(self.next_heartbeat) => Wake::Heartbeat,
                    _ = wait_until(self.reconnect_at) => Wake::Reconnect,
                }
            };

            match wake {
                Wake::Command(command) => self.on_command(command).await,
                Wake::Shutdown => {
                    debug!("All client handles dropped, stopping connection task");
                    self.disconnect(NORMAL_CLOSE_CODE, "client dropped".to_string())
                        .await;
                    break;
                }
                Wake::Transport(event) => self.on_transport_event(event).await,
                Wake::Attempt(result) => {
                    self.attempt = None;
                    self.on_attempt(result).await;
                }
                Wake::HandshakeTimeout => self.on_handshake_timeout().await,
                Wake::Heartbeat => self.on_heartbeat_tick().await,
                Wake::Reconnect => {
                    self.reconnect_at = None;
                    self.begin_attempt();
                }
            }
        }

        info!("Connection task exiting");
    }

    fn set_state(&self, state: ConnectionState) {
        self.shared.state.set(state);
    }

    fn emit(&self, event: ClientEvent) {
        self.shared.events.emit(event);
    }

    fn is_open(&self) -> bool {
        self.link.is_some() && self.shared.state.is_open()
    }

    fn settle_connect_waiters(&mut self, result: Result<()>) {
        for waiter in self.connect_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    // ---- commands ----

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect(waiter) => self.on_connect(waiter),
            Command::Disconnect { code, reason, done } => {
                self.disconnect(code, reason).await;
                let _ = done.send(());
            }
            Command::Send(message) => self.send_or_queue(message).await,
            Command::Subscribe(topic) => self.on_subscribe(topic).await,
            Command::Unsubscribe(topic) => self.on_unsubscribe(topic).await,
            Command::SetOnline(online) => self.on_online_changed(online).await,
            Command::SetVisible(visible) => {
                self.heartbeat.set_hidden(!visible);
                if self.next_heartbeat.is_some() {
                    self.next_heartbeat = Some(Instant::now() + self.heartbeat.interval());
                }
                debug!(visible, interval = ?self.heartbeat.interval(), "Visibility changed");
            }
        }
    }

    fn on_connect(&mut self, waiter: oneshot::Sender<Result<()>>) {
        match self.shared.state.get() {
            ConnectionState::Open => {
                let _ = waiter.send(Ok(()));
            }
            ConnectionState::Connecting => self.connect_waiters.push(waiter),
            _ => {
                self.connect_waiters.push(waiter);
                self.want_connected = true;
                self.reconnect_attempt = 0;
                self.begin_attempt();
            }
        }
    }

    async fn disconnect(&mut self, code: u16, reason: String) {
        info!(code, reason = %reason, "Disconnecting");
        self.want_connected = false;
        self.reconnect_at = None;
        self.next_heartbeat = None;
        self.handshake_deadline = None;
        if let Some(attempt) = self.attempt.take() {
            attempt.abort();
        }

        let had_link = self.link.is_some();
        if let Some(mut link) = self.link.take() {
            self.set_state(ConnectionState::Closing);
            if let Some(goodbye) = self.framing.goodbye() {
                let _ = link.sink.send(goodbye).await;
            }
            if let Err(e) = link.sink.close(code, &reason).await {
                debug!(error = %e, "Close frame not delivered");
            }
        }
        self.live_topics.clear();

        let rejected = self
            .shared
            .pending
            .lock()
            .reject_all(SocketError::Disconnected);
        if rejected > 0 {
            debug!(rejected, "Rejected pending requests");
        }
        self.settle_connect_waiters(Err(SocketError::Disconnected));
        self.set_state(ConnectionState::Closed);
        if had_link {
            self.emit(ClientEvent::Close { code, reason });
        }
    }

    async fn on_subscribe(&mut self, topic: String) {
        // Released again before this command was processed
        if !self.shared.registry.lock().contains(&topic) {
            return;
        }
        if !self.auto_resubscribe {
            if let Some(frame) = self.framing.subscribe_frame(&topic) {
                self.send_or_queue(frame).await;
            }
            return;
        }
        // Closed: the next open resubscribes every registered topic
        if !self.is_open() || self.live_topics.contains(&topic) {
            return;
        }
        if let Some(frame) = self.framing.subscribe_frame(&topic) {
            self.live_topics.insert(topic);
            self.send_or_queue(frame).await;
        }
    }

    async fn on_unsubscribe(&mut self, topic: String) {
        // Subscribed again before this command was processed
        if self.shared.registry.lock().contains(&topic) {
            return;
        }
        if !self.auto_resubscribe {
            if let Some(frame) = self.framing.unsubscribe_frame(&topic) {
                self.send_or_queue(frame).await;
            }
            return;
        }
        let was_live = self.live_topics.remove(&topic);
        let frame = self.framing.unsubscribe_frame(&topic);
        if let Some(frame) = frame.filter(|_| was_live && self.is_open()) {
            self.send_or_queue(frame).await;
        }
    }

    async fn on_online_changed(&mut self, online: bool) {
        if online == self.online {
            return;
        }
        self.online = online;

        if !online {
            warn!("Network offline, closing connection");
            self.reconnect_at = None;
            if let Some(attempt) = self.attempt.take() {
                attempt.abort();
                self.set_state(ConnectionState::Closed);
                self.settle_connect_waiters(Err(SocketError::Transport("network offline".into())));
            }
            if self.link.is_some() {
                self.close_link(OFFLINE_CLOSE_CODE, "offline".to_string(), false)
                    .await;
            }
            return;
        }

        info!("Network online");
        if self.want_connected && self.link.is_none() && self.attempt.is_none() {
            self.reconnect_attempt += 1;
            self.shared.metrics.increment_reconnects();
            self.reconnect_at = Some(Instant::now());
            self.emit(ClientEvent::Reconnecting {
                attempt: self.reconnect_attempt,
                delay: Duration::ZERO,
            });
        }
    }

    // ---- outbound ----

    async fn transmit(&mut self, message: WsMessage) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(SocketError::Transport("not connected".into()));
        };
        link.sink.send(message).await?;
        self.shared.metrics.increment_sent();
        Ok(())
    }

    fn enqueue(&mut self, message: WsMessage) {
        self.shared.metrics.increment_queued();
        if self.queue.enqueue(message).is_some() {
            self.shared.metrics.increment_evicted();
        }
        debug!(queued = self.queue.len(), "Queued outbound message");
    }

    async fn send_or_queue(&mut self, message: WsMessage) {
        if !self.is_open() {
            self.enqueue(message);
            return;
        }
        if let Err(e) = self.transmit(message.clone()).await {
            self.queue.requeue(message);
            self.on_link_lost(e).await;
        }
    }

    async fn flush_queue(&mut self) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Ok(());
        };
        let sent = self.queue.flush(link.sink.as_mut()).await?;
        for _ in 0..sent {
            self.shared.metrics.increment_sent();
        }
        Ok(())
    }

    // ---- connection lifecycle ----

    fn begin_attempt(&mut self) {
        self.reconnect_at = None;
        let Some(connector) = self.selector.current() else {
            self.on_connect_failure(SocketError::Configuration(
                "no transport connector available".into(),
            ));
            return;
        };
        self.link_kind = self.selector.current_kind();
        self.set_state(ConnectionState::Connecting);
        self.emit(ClientEvent::Connecting {
            attempt: self.reconnect_attempt,
        });
        debug!(
            attempt = self.reconnect_attempt,
            transport = ?self.link_kind,
            "Opening connection"
        );

        let force_refresh = std::mem::take(&mut self.force_token_refresh);
        self.attempt = Some(tokio::spawn(open_link(
            connector,
            self.settings.clone(),
            Arc::clone(&self.framing),
            Arc::clone(&self.tokens),
            self.headers.clone(),
            force_refresh,
        )));
    }

    async fn on_attempt(&mut self, result: std::result::Result<Result<Attempt>, JoinError>) {
        let Attempt { mut link, token } = match result {
            Ok(Ok(attempt)) => attempt,
            Ok(Err(e)) => return self.on_connect_failure(e),
            Err(e) => {
                return self.on_connect_failure(SocketError::Transport(format!(
                    "Connect task failed: {e}"
                )))
            }
        };

        for frame in self.framing.handshake(token.as_deref()) {
            if let Err(e) = link.sink.send(frame).await {
                return self.on_connect_failure(e);
            }
            self.shared.metrics.increment_sent();
        }
        self.link = Some(link);

        if self.framing.requires_handshake_ack() {
            debug!(framing = self.framing.name(), "Waiting for handshake acknowledgement");
            self.handshake_deadline = Some(Instant::now() + self.settings.connect_timeout);
        } else {
            self.on_open().await;
        }
    }

    async fn on_handshake_timeout(&mut self) {
        self.handshake_deadline = None;
        if let Some(mut link) = self.link.take() {
            let _ = link.sink.close(NORMAL_CLOSE_CODE, "handshake timeout").await;
        }
        self.on_connect_failure(SocketError::Transport(format!(
            "Handshake not acknowledged within {:?}",
            self.settings.connect_timeout
        )));
    }

    async fn on_open(&mut self) {
        self.handshake_deadline = None;
        let previous_attempts = std::mem::take(&mut self.reconnect_attempt);
        self.strategy.reset();
        self.set_state(ConnectionState::Open);
        self.shared.activity.record();
        self.heartbeat.reset();
        self.next_heartbeat = Some(Instant::now() + self.heartbeat.interval());
        self.live_topics.clear();
        info!(
            transport = ?self.link_kind,
            framing = self.framing.name(),
            "Connection open"
        );

        if let Err(e) = self.flush_queue().await {
            return self.abort_open(e).await;
        }

        if self.auto_resubscribe {
            let topics = self.shared.registry.lock().server_topics();
            for topic in topics {
                if let Some(frame) = self.framing.subscribe_frame(&topic) {
                    if let Err(e) = self.transmit(frame).await {
                        return self.abort_open(e).await;
                    }
                }
                self.live_topics.insert(topic);
            }
            if !self.live_topics.is_empty() {
                debug!(topics = self.live_topics.len(), "Resubscribed topics");
            }
        }

        self.emit(ClientEvent::Open {
            transport: self.link_kind,
        });
        if previous_attempts > 0 {
            info!(attempts = previous_attempts, "Reconnected");
            self.emit(ClientEvent::Reconnected {
                attempts: previous_attempts,
            });
        }
        self.settle_connect_waiters(Ok(()));
    }

    /// The link died while the open was being set up
    async fn abort_open(&mut self, error: SocketError) {
        self.settle_connect_waiters(Err(error.clone()));
        self.on_link_lost(error).await;
    }

    fn on_connect_failure(&mut self, error: SocketError) {
        self.link = None;
        self.handshake_deadline = None;
        warn!(error = %error, transport = ?self.link_kind, "Connection attempt failed");
        self.emit(ClientEvent::Error(error.clone()));
        if let SocketError::ConnectionClosed { code, .. } = &error {
            self.note_rejection(*code);
        }

        if self.want_connected && self.online && self.selector.on_connect_failure() {
            self.begin_attempt();
            return;
        }

        self.set_state(ConnectionState::Closed);
        self.settle_connect_waiters(Err(error));
        self.schedule_reconnect();
    }

    /// A server close with an auth code forces a token refresh next attempt
    fn note_rejection(&mut self, code: u16) {
        if self.auth_close_codes.contains(&code) {
            info!(code, "Credentials rejected, refreshing token before next attempt");
            self.force_token_refresh = true;
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.want_connected {
            return;
        }
        if !self.online {
            debug!("Offline, reconnection withheld");
            return;
        }

        match self.strategy.next_delay(self.reconnect_attempt) {
            Some(delay) => {
                self.reconnect_attempt += 1;
                self.shared.metrics.increment_reconnects();
                self.reconnect_at = Some(Instant::now() + delay);
                info!(
                    "Reconnecting in {:?} (attempt {})",
                    delay, self.reconnect_attempt
                );
                self.emit(ClientEvent::Reconnecting {
                    attempt: self.reconnect_attempt,
                    delay,
                });
            }
            None => {
                error!(
                    attempts = self.reconnect_attempt,
                    "Reconnection strategy exhausted, stopping"
                );
                self.want_connected = false;
                self.emit(ClientEvent::Error(SocketError::RetriesExhausted {
                    attempts: self.reconnect_attempt,
                }));
            }
        }
    }

    /// Close the current link ourselves, then run the close path
    async fn close_link(&mut self, code: u16, reason: String, remote: bool) {
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.sink.close(code, &reason).await {
                debug!(error = %e, "Close frame not delivered");
            }
        }
        self.on_closed(code, reason, remote);
    }

    /// A send failed on an open link: drop it and reconnect
    async fn on_link_lost(&mut self, error: SocketError) {
        warn!(error = %error, "Send failed, dropping connection");
        self.emit(ClientEvent::Error(error.clone()));
        self.link = None;
        self.on_closed(ABNORMAL_CLOSURE, error.to_string(), false);
    }

    fn on_closed(&mut self, code: u16, reason: String, remote: bool) {
        self.link = None;
        let handshaking = self.handshake_deadline.take().is_some();
        self.next_heartbeat = None;
        self.live_topics.clear();
        self.set_state(ConnectionState::Closed);
        info!(code, reason = %reason, "Connection closed");
        self.emit(ClientEvent::Close {
            code,
            reason: reason.clone(),
        });

        if remote {
            self.note_rejection(code);
        }
        if handshaking {
            self.settle_connect_waiters(Err(SocketError::ConnectionClosed { code, reason }));
        }
        self.schedule_reconnect();
    }

    // ---- inbound ----

    async fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(message)) => {
                self.note_activity();
                self.shared.metrics.increment_received();
                self.on_frame(message).await;
            }
            Some(TransportEvent::Activity) => self.note_activity(),
            Some(TransportEvent::Error(e)) => {
                warn!(error = %e, "Transport error");
                self.emit(ClientEvent::Error(SocketError::Transport(e)));
            }
            Some(TransportEvent::Closed { code, reason }) => self.on_closed(code, reason, true),
            None => self.on_closed(ABNORMAL_CLOSURE, "transport ended".to_string(), true),
        }
    }

    fn note_activity(&mut self) {
        self.shared.activity.record();
        self.heartbeat.on_activity();
    }

    async fn on_frame(&mut self, message: WsMessage) {
        match self.framing.decode(message) {
            InboundFrame::Keepalive => debug!("Keepalive received"),
            InboundFrame::Connected => {
                if self.handshake_deadline.is_some() {
                    self.on_open().await;
                } else {
                    debug!("Ignoring unexpected handshake acknowledgement");
                }
            }
            InboundFrame::ProtocolError(e) => {
                warn!(error = %e, "Protocol error from server");
                self.emit(ClientEvent::Error(SocketError::Protocol(e)));
            }
            InboundFrame::Data(envelope) => self.route(envelope),
        }
    }

    /// Registered topic -> handlers; pending correlation id -> request;
    /// anything else -> `Message` event
    fn route(&self, envelope: Envelope) {
        let Envelope {
            topic,
            correlation_id,
            body,
        } = envelope;

        if let Some(name) = topic.as_deref() {
            let handlers = self.shared.registry.lock().handlers(name);
            if let Some(handlers) = handlers {
                for handler in handlers {
                    handler(&body);
                }
                return;
            }
        }

        if let Some(id) = correlation_id.as_deref() {
            let mut pending = self.shared.pending.lock();
            if pending.is_pending(id) {
                pending.resolve(id, body);
                return;
            }
        }

        self.emit(ClientEvent::Message(Envelope {
            topic,
            correlation_id,
            body,
        }));
    }

    // ---- heartbeat ----

    async fn on_heartbeat_tick(&mut self) {
        if !self.is_open() {
            self.next_heartbeat = None;
            return;
        }
        self.next_heartbeat = Some(Instant::now() + self.heartbeat.interval());

        let idle = self.shared.activity.idle_for().unwrap_or_default();
        match self.heartbeat.on_tick(idle) {
            HeartbeatAction::Skip => {}
            HeartbeatAction::Ping { missed } => {
                debug!(missed, idle = ?idle, "Connection idle, sending heartbeat");
                if let Some(ping) = self.framing.ping_frame() {
                    if let Err(e) = self.transmit(ping).await {
                        return self.on_link_lost(e).await;
                    }
                }
                self.emit(ClientEvent::Heartbeat { missed });
            }
            HeartbeatAction::Expire { missed } => {
                warn!(missed, "Heartbeat timeout, forcing reconnect");
                self.close_link(
                    HEARTBEAT_TIMEOUT_CLOSE_CODE,
                    "heartbeat timeout".to_string(),
                    false,
                )
                .await;
            }
        }
    }
}
