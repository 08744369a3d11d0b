//! Chat probe
//!
//! Connects with the resolved settings, subscribes to the topics given on
//! the command line and logs every client event until Ctrl+C.
//!
//! ```text
//! chat-probe [--stomp <send-destination>] [--token <token>] [topic ...]
//! ```

use anyhow::Result;
use chat_relay::bin_common::{
    init_tracing, load_config_from_env, load_settings, parse_args, BinaryRunner, ConfigType,
    ProbeArgs, RunConfig,
};
use chat_relay::chatsocket::{
    ChatSocket, ClientEvent, EventKind, JsonFraming, ListenerHandle, StaticToken, StompFraming,
    SubscriptionHandle,
};
use std::time::Duration;
use tracing::{error, info, warn};

const EVENT_KINDS: [EventKind; 8] = [
    EventKind::Open,
    EventKind::Connecting,
    EventKind::Close,
    EventKind::Error,
    EventKind::Message,
    EventKind::Reconnecting,
    EventKind::Reconnected,
    EventKind::Heartbeat,
];

struct ProbeApp {
    config: RunConfig,
    client: ChatSocket,
    topics: Vec<String>,
    subscriptions: Vec<SubscriptionHandle>,
    listeners: Vec<ListenerHandle>,
}

impl ProbeApp {
    async fn new(args: ProbeArgs) -> Result<Self> {
        let settings = load_settings(&load_config_from_env(ConfigType::Client))?;
        info!("Endpoint: {}", settings.endpoint());

        let builder = ChatSocket::builder().settings(settings);
        let builder = match &args.stomp_destination {
            Some(dest) => builder.framing(StompFraming::new(dest.clone())),
            None => builder.framing(JsonFraming::new()),
        };
        let builder = match &args.token {
            Some(token) => builder.token_provider(StaticToken::new(token.clone())),
            None => builder,
        };
        let client = builder.build().await?;

        Ok(Self {
            config: RunConfig::new("Chat Probe").with_stats_interval(Duration::from_secs(30)),
            client,
            topics: args.topics,
            subscriptions: Vec::new(),
            listeners: Vec::new(),
        })
    }

    fn attach_listeners(&mut self) {
        for kind in EVENT_KINDS {
            let handle = self.client.on(kind, |event| match event {
                ClientEvent::Error(e) => error!("Client error: {}", e),
                ClientEvent::Close { code, reason } => warn!("Closed ({}): {}", code, reason),
                ClientEvent::Message(envelope) => info!(
                    "Message topic={:?} id={:?}: {:?}",
                    envelope.topic, envelope.correlation_id, envelope.body
                ),
                other => info!("{:?}", other),
            });
            self.listeners.push(handle);
        }

        for topic in &self.topics {
            let name = topic.clone();
            let handle = self
                .client
                .subscribe(topic.clone(), move |payload| info!("[{}] {:?}", name, payload));
            self.subscriptions.push(handle);
        }
    }
}

impl BinaryRunner for ProbeApp {
    async fn run(&mut self) -> Result<()> {
        self.attach_listeners();

        if let Err(e) = self.client.connect().await {
            warn!("Initial connect failed, reconnecting in background: {}", e);
        }

        let mut stats = tokio::time::interval(self.config.stats_interval);
        stats.tick().await;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown requested");
                    break;
                }
                _ = stats.tick() => {
                    let m = self.client.metrics();
                    info!(
                        "State: {} | sent: {} | received: {} | queued: {} | reconnects: {}",
                        m.connection_state, m.messages_sent, m.messages_received,
                        m.messages_queued, m.reconnect_count
                    );
                }
            }
        }

        for handle in self.subscriptions.drain(..) {
            handle.unsubscribe();
        }
        for handle in self.listeners.drain(..) {
            handle.off();
        }
        self.client.disconnect(None, None).await?;
        Ok(())
    }

    fn config(&self) -> &RunConfig {
        &self.config
    }

    fn stats(&self) -> Option<String> {
        let m = self.client.metrics();
        Some(format!(
            "Sent {} | received {} | evicted {} | reconnects {}",
            m.messages_sent, m.messages_received, m.messages_evicted, m.reconnect_count
        ))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args = ProbeArgs::parse(&parse_args())?;
    let mut app = ProbeApp::new(args).await?;
    app.execute().await
}
