//! Persistent WebSocket connection to the query backend.
//!
//! One reader/writer task owns the socket. Callers talk to it through a
//! command channel; inbound frames fan out through the [`HandlerRegistry`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use quarry_core::errors::ClientError;
use quarry_core::ids::CollectionId;
use quarry_core::protocol::{ErrorFrame, InboundFrame, OutboundFrame};
use quarry_settings::ServerSettings;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::collaborators::IdentityProvider;
use crate::router::{FrameSubscription, HandlerId, HandlerRegistry};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub url: Url,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl ConnectionConfig {
    pub fn from_settings(settings: &ServerSettings) -> Result<Self, ClientError> {
        let url = Url::parse(&settings.url)
            .map_err(|e| ClientError::InvalidConfig(format!("server url {:?}: {e}", settings.url)))?;
        Ok(Self {
            url,
            connect_timeout: settings.connect_timeout(),
            heartbeat_interval: settings.heartbeat_interval(),
        })
    }

    /// Endpoint for one collection, authenticated with `token`.
    pub fn connect_url(&self, token: &str, collection: &CollectionId) -> Url {
        let mut url = self.url.clone();
        let _ = url
            .query_pairs_mut()
            .append_pair("token", token)
            .append_pair("collection", collection.as_str());
        url
    }
}

enum Command {
    Send(String),
    Close,
}

struct LiveConnection {
    collection: CollectionId,
    cmd_tx: mpsc::Sender<Command>,
    alive: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Owns at most one live connection, scoped to a collection.
pub struct ConnectionManager {
    config: ConnectionConfig,
    identity: Arc<dyn IdentityProvider>,
    registry: Arc<HandlerRegistry>,
    live: Option<LiveConnection>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            config,
            identity,
            registry: HandlerRegistry::new(),
            live: None,
        }
    }

    /// Open a connection scoped to `collection`.
    ///
    /// A live connection to the same collection is reused. Any other
    /// connection is closed first. Token fetch and handshake together are
    /// bounded by the configured connect timeout.
    pub async fn connect(&mut self, collection: &CollectionId) -> Result<(), ClientError> {
        if self.is_connected_to(collection) {
            trace!(collection = %collection, "already connected");
            return Ok(());
        }
        self.close().await;

        let identity = Arc::clone(&self.identity);
        let config = self.config.clone();
        let open = async move {
            let token = identity.identity_token().await?;
            let url = config.connect_url(&token, collection);
            let (ws, _) = connect_async(url.as_str())
                .await
                .map_err(|e| ClientError::ConnectFailed(e.to_string()))?;
            Ok::<WsStream, ClientError>(ws)
        };
        let ws = tokio::time::timeout(self.config.connect_timeout, open)
            .await
            .map_err(|_| ClientError::ConnectTimeout(self.config.connect_timeout))??;

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let alive = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(connection_loop(
            ws,
            cmd_rx,
            Arc::clone(&self.registry),
            Arc::clone(&alive),
            self.config.heartbeat_interval,
            collection.clone(),
        ));
        info!(collection = %collection, "connected");

        self.live = Some(LiveConnection {
            collection: collection.clone(),
            cmd_tx,
            alive,
            handle,
        });
        Ok(())
    }

    pub fn is_connected_to(&self, collection: &CollectionId) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| live.collection == *collection && live.alive.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.live.as_ref().is_some_and(|live| live.alive.load(Ordering::Acquire))
    }

    /// Serialize and transmit one frame. Fails immediately when there is no
    /// live connection; nothing is queued for later.
    pub async fn send_message(&self, frame: &OutboundFrame) -> Result<(), ClientError> {
        let live = self
            .live
            .as_ref()
            .filter(|live| live.alive.load(Ordering::Acquire))
            .ok_or(ClientError::NotConnected)?;
        let text = frame.to_json()?;
        live.cmd_tx
            .send(Command::Send(text))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    pub fn add_message_handler(&self) -> FrameSubscription {
        self.registry.add()
    }

    pub fn remove_message_handler(&self, id: HandlerId) -> bool {
        self.registry.remove(id)
    }

    pub fn handler_count(&self) -> usize {
        self.registry.len()
    }

    /// Shut the connection down. Registered handlers are not notified.
    pub async fn close(&mut self) {
        let Some(mut live) = self.live.take() else { return };
        live.alive.store(false, Ordering::Release);
        let _ = live.cmd_tx.send(Command::Close).await;
        if tokio::time::timeout(CLOSE_GRACE, &mut live.handle).await.is_err() {
            debug!(collection = %live.collection, "connection task did not stop in time, aborting");
        }
        info!(collection = %live.collection, "connection closed");
    }
}

async fn connection_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<Command>,
    registry: Arc<HandlerRegistry>,
    alive: Arc<AtomicBool>,
    heartbeat_interval: Duration,
    collection: CollectionId,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let lost: Option<String> = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                        break Some(e.to_string());
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break None;
                }
            },
            _ = heartbeat.tick() => {
                match OutboundFrame::Ping.to_json() {
                    Ok(ping) => {
                        trace!(collection = %collection, "ping");
                        if let Err(e) = ws_tx.send(Message::Text(ping.into())).await {
                            break Some(e.to_string());
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode ping"),
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match InboundFrame::parse(text.as_str()) {
                    Ok(frame) => {
                        let _ = registry.dispatch(&frame);
                    }
                    Err(e) => debug!(collection = %collection, error = %e, "dropping undecodable frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "closed by server".to_string());
                    break Some(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break Some("connection closed".to_string()),
            },
        }
    };

    alive.store(false, Ordering::Release);
    if let Some(reason) = lost {
        warn!(collection = %collection, reason = %reason, "connection lost");
        let _ = registry.dispatch(&InboundFrame::Error(ErrorFrame::connection_lost(reason)));
    }
}
