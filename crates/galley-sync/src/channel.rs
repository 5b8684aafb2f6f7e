//! # Messaging Channel
//!
//! One long-lived WebSocket to the backend, with authentication, heartbeats
//! and automatic reconnection.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Messaging Channel States                             │
//! │                                                                         │
//! │  ┌────────────┐  connect (connect_timeout)  ┌────────────────┐         │
//! │  │ Connecting │ ──────────────────────────► │ Authenticating │         │
//! │  └────────────┘                             └───────┬────────┘         │
//! │        ▲                   auth_response ok         │  timeout /       │
//! │        │                 ┌──────────────────────────┘  success:false   │
//! │        │                 ▼                            │                 │
//! │        │          ┌────────────┐                      ▼                 │
//! │        │          │ Connected  │ ─── lost / ───► ┌─────────┐           │
//! │        │          └────────────┘   heartbeat     │ Backoff │           │
//! │        │           emits Connected  timeout      └────┬────┘           │
//! │        │           { fresh: true }                    │                 │
//! │        └──────────────────────────────────────────────┘                 │
//! │                                                                         │
//! │  BACKOFF: initial_backoff × 2ⁿ, capped at max_backoff                  │
//! │  max_retries consecutive failed attempts (0 = never) ──► Stopped       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery
//! Outgoing messages are queued. A frame whose write fails goes back to the
//! head of the queue and is sent again on the next connection, so frames may
//! be delivered more than once but are not silently lost while the channel
//! runs. Incoming messages are delivered in arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::events::{Severity, StatusNotifier};
use crate::protocol::{ChannelMessage, Decoded, Envelope};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

// =============================================================================
// Channel State & Events
// =============================================================================

/// Connection state of the messaging channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    /// Waiting before the next connection attempt.
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Authenticating => write!(f, "authenticating"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Backoff => write!(f, "backoff"),
        }
    }
}

/// What the channel reports to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// An authenticated connection is up. With `fresh`, anything learned
    /// before may be stale and the consumer should rebuild its state.
    Connected { fresh: bool },

    /// An order or kitchen message from the backend.
    Message(Envelope),

    /// The connection was lost. The channel keeps reconnecting.
    Disconnected,
}

// =============================================================================
// Channel Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket URL to connect to.
    pub url: String,

    pub device_id: String,

    /// Decrypted device token sent in the `auth` frame.
    pub token: String,

    /// Device role sent in the `auth` frame.
    pub role: String,

    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,

    /// Consecutive failed connection attempts before giving up (0 = infinite).
    pub max_retries: u32,
}

impl ChannelConfig {
    /// Builds channel settings from the client config and the decrypted
    /// device token.
    pub fn from_client(config: &ClientConfig, token: impl Into<String>) -> Self {
        let channel = &config.channel;
        ChannelConfig {
            url: config.backend.ws_url.clone(),
            device_id: config.device.id.clone(),
            token: token.into(),
            role: config.device.role.to_string(),
            connect_timeout: channel.connect_timeout(),
            auth_timeout: channel.auth_timeout(),
            heartbeat_interval: channel.heartbeat_interval(),
            heartbeat_timeout: channel.heartbeat_timeout(),
            initial_backoff: channel.initial_backoff(),
            max_backoff: channel.max_backoff(),
            max_retries: channel.max_retries,
        }
    }
}

// =============================================================================
// Channel Handle
// =============================================================================

/// Handle for sending through the channel from other components.
#[derive(Clone)]
pub struct ChannelHandle {
    outgoing_tx: mpsc::Sender<ChannelMessage>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown_tx: mpsc::Sender<()>,
}

impl ChannelHandle {
    /// Queues a message for delivery. Returns once queued, not once sent.
    pub async fn send(&self, message: ChannelMessage) -> SyncResult<()> {
        self.outgoing_tx
            .send(message)
            .await
            .map_err(|_| SyncError::ChannelError("Messaging channel stopped".into()))
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Closes the connection and stops reconnecting.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Messaging channel already stopped".into()))
    }
}

// =============================================================================
// Messaging Channel
// =============================================================================

/// An authenticated connection, plus messages that arrived before the
/// `auth_response`.
struct Session {
    write: WsSink,
    read: WsSource,
    held: Vec<Envelope>,
}

enum Exit {
    Shutdown,
    Lost(SyncError),
}

/// WebSocket messaging channel with authentication and reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let (channel, mut events) = MessagingChannel::spawn(
///     ChannelConfig::from_client(&config, token),
///     Arc::new(TracingNotifier),
/// );
///
/// channel.send(ChannelMessage::OrderNew(order)).await?;
///
/// while let Some(event) = events.recv().await {
///     match event {
///         ChannelEvent::Connected { fresh } => { /* full refresh */ }
///         ChannelEvent::Message(envelope) => { /* reconcile */ }
///         ChannelEvent::Disconnected => {}
///     }
/// }
/// ```
pub struct MessagingChannel {
    config: ChannelConfig,
    state: Arc<RwLock<ConnectionState>>,
    outgoing_rx: mpsc::Receiver<ChannelMessage>,
    events_tx: mpsc::Sender<ChannelEvent>,
    shutdown_rx: mpsc::Receiver<()>,
    notifier: Arc<dyn StatusNotifier>,
    queue: VecDeque<Envelope>,
}

impl MessagingChannel {
    /// Spawns the channel task. Returns a handle for sending and a receiver
    /// for events. The receiver closes when the channel stops.
    pub fn spawn(
        config: ChannelConfig,
        notifier: Arc<dyn StatusNotifier>,
    ) -> (ChannelHandle, mpsc::Receiver<ChannelEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<ChannelMessage>(100);
        let (events_tx, events_rx) = mpsc::channel::<ChannelEvent>(100);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

        let channel = MessagingChannel {
            config,
            state: state.clone(),
            outgoing_rx,
            events_tx,
            shutdown_rx,
            notifier,
            queue: VecDeque::new(),
        };

        tokio::spawn(channel.run());

        let handle = ChannelHandle {
            outgoing_tx,
            state,
            shutdown_tx,
        };

        (handle, events_rx)
    }

    /// Main reconnect loop.
    async fn run(mut self) {
        info!(url = %self.config.url, "Messaging channel starting");

        let mut backoff = self.create_backoff();
        let mut failures = 0u32;

        loop {
            *self.state.write().await = ConnectionState::Connecting;

            let attempt = tokio::select! {
                result = connect_and_authenticate(&self.config, &self.state) => result,
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown while connecting");
                    break;
                }
            };

            match attempt {
                Ok(session) => {
                    info!(device_id = %self.config.device_id, "Messaging channel connected");
                    *self.state.write().await = ConnectionState::Connected;
                    backoff.reset();
                    failures = 0;

                    match self.serve(session).await {
                        Exit::Shutdown => break,
                        Exit::Lost(e) if e.kind() == ErrorKind::Timeout => {
                            warn!(error = %e, "Connection went quiet, reconnecting");
                        }
                        Exit::Lost(e) => {
                            warn!(error = %e, "Connection lost, reconnecting");
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, attempt = failures, "Connection attempt failed");

                    if self.config.max_retries > 0 && failures >= self.config.max_retries {
                        let gave_up = SyncError::RetriesExhausted { attempts: failures };
                        error!(error = %gave_up, "Messaging channel giving up");
                        self.notifier
                            .notify(&format!("Kitchen connection lost: {}", gave_up), Severity::Error);
                        break;
                    }
                }
            }

            *self.state.write().await = ConnectionState::Backoff;

            let Some(delay) = backoff.next_backoff() else {
                error!("Backoff exhausted");
                break;
            };
            debug!(?delay, attempt = failures, "Waiting before reconnect");

            if !self.wait_backoff(delay).await {
                break;
            }
        }

        *self.state.write().await = ConnectionState::Disconnected;
        info!(queued = self.queue.len(), "Messaging channel stopped");
    }

    /// Sleeps for `delay` while still accepting outgoing messages. Returns
    /// false on shutdown.
    async fn wait_backoff(&mut self, delay: Duration) -> bool {
        let wake = sleep_until(Instant::now() + delay);
        tokio::pin!(wake);

        loop {
            tokio::select! {
                _ = &mut wake => return true,
                Some(message) = self.outgoing_rx.recv() => {
                    let envelope = Envelope::new(message, Some(self.config.device_id.clone()));
                    debug!(msg_type = %envelope.message_type(), "Queued while disconnected");
                    self.queue.push_back(envelope);
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown during backoff");
                    return false;
                }
            }
        }
    }

    /// Runs one authenticated connection until it ends.
    async fn serve(&mut self, session: Session) -> Exit {
        let Session {
            mut write,
            mut read,
            held,
        } = session;

        let mut exit = None;
        if self.events_tx.send(ChannelEvent::Connected { fresh: true }).await.is_err() {
            exit = Some(Exit::Shutdown);
        }
        for envelope in held {
            if exit.is_some() {
                break;
            }
            if self.events_tx.send(ChannelEvent::Message(envelope)).await.is_err() {
                exit = Some(Exit::Shutdown);
            }
        }

        let exit = match exit {
            Some(exit) => exit,
            None => self.session_loop(&mut write, &mut read).await,
        };

        if matches!(exit, Exit::Shutdown) {
            let _ = write.send(WsMessage::Close(None)).await;
        }
        let _ = self.events_tx.send(ChannelEvent::Disconnected).await;
        exit
    }

    async fn session_loop(&mut self, write: &mut WsSink, read: &mut WsSource) -> Exit {
        if let Err(e) = flush(&mut self.queue, write).await {
            return Exit::Lost(e);
        }

        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut deadline = Instant::now() + self.config.heartbeat_timeout;

        loop {
            tokio::select! {
                Some(message) = self.outgoing_rx.recv() => {
                    let envelope = Envelope::new(message, Some(self.config.device_id.clone()));
                    self.queue.push_back(envelope);
                    if let Err(e) = flush(&mut self.queue, write).await {
                        return Exit::Lost(e);
                    }
                }

                frame = read.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Ping(data))) => {
                            if let Err(e) = write.send(WsMessage::Pong(data)).await {
                                return Exit::Lost(e.into());
                            }
                            continue;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(?frame, "Backend closed the connection");
                            return Exit::Lost(SyncError::Disconnected);
                        }
                        Some(Ok(WsMessage::Binary(_))) => {
                            warn!("Received unexpected binary frame");
                            continue;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Exit::Lost(e.into()),
                        None => return Exit::Lost(SyncError::Disconnected),
                    };

                    match Envelope::decode(&text) {
                        Ok(Decoded::Message(envelope)) => match envelope.message {
                            ChannelMessage::Heartbeat => {
                                deadline = Instant::now() + self.config.heartbeat_timeout;
                            }
                            ChannelMessage::AuthResponse(_) | ChannelMessage::Auth(_) => {
                                debug!(msg_type = %envelope.message_type(), "Ignoring auth frame");
                            }
                            _ => {
                                debug!(
                                    msg_type = %envelope.message_type(),
                                    order_id = envelope.message.order_id().unwrap_or_default(),
                                    "Received message"
                                );
                                if self.events_tx.send(ChannelEvent::Message(envelope)).await.is_err() {
                                    warn!("Channel event receiver dropped");
                                    return Exit::Shutdown;
                                }
                            }
                        },
                        Ok(Decoded::Unknown(kind)) => {
                            debug!(%kind, "Ignoring unknown message type");
                        }
                        Err(e) => {
                            warn!(error = %e, "Dropping malformed frame");
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    let frame = match Envelope::heartbeat(&self.config.device_id).to_json() {
                        Ok(json) => json,
                        Err(e) => return Exit::Lost(e),
                    };
                    if let Err(e) = write.send(WsMessage::Text(frame.into())).await {
                        return Exit::Lost(e.into());
                    }
                }

                _ = sleep_until(deadline) => {
                    return Exit::Lost(SyncError::timeout("heartbeat", self.config.heartbeat_timeout));
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    return Exit::Shutdown;
                }
            }
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Writes queued frames in order. A frame that fails to write is put back at
/// the head of the queue.
async fn flush(queue: &mut VecDeque<Envelope>, write: &mut WsSink) -> SyncResult<()> {
    while let Some(envelope) = queue.pop_front() {
        let json = match envelope.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, msg_type = %envelope.message_type(), "Dropping unserializable frame");
                continue;
            }
        };

        if let Err(e) = write.send(WsMessage::Text(json.into())).await {
            queue.push_front(envelope);
            return Err(e.into());
        }
        debug!(msg_type = %envelope.message_type(), "Sent message");
    }
    Ok(())
}

/// Connects, sends `auth` and waits for a successful `auth_response`.
async fn connect_and_authenticate(
    config: &ChannelConfig,
    state: &RwLock<ConnectionState>,
) -> SyncResult<Session> {
    let (ws_stream, response) = match timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(SyncError::timeout("connect", config.connect_timeout)),
    };
    debug!(status = ?response.status(), "WebSocket handshake complete");

    *state.write().await = ConnectionState::Authenticating;
    let (mut write, mut read) = ws_stream.split();

    let auth = Envelope::auth(&config.token, &config.device_id, &config.role).to_json()?;
    write.send(WsMessage::Text(auth.into())).await?;

    let held = match timeout(config.auth_timeout, await_auth_response(&mut read)).await {
        Ok(result) => result?,
        Err(_) => return Err(SyncError::timeout("auth_response", config.auth_timeout)),
    };

    Ok(Session { write, read, held })
}

async fn await_auth_response(read: &mut WsSource) -> SyncResult<Vec<Envelope>> {
    let mut held = Vec::new();

    while let Some(frame) = read.next().await {
        let text = match frame? {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return Err(SyncError::Disconnected),
            _ => continue,
        };

        match Envelope::decode(&text) {
            Ok(Decoded::Message(envelope)) => match envelope.message {
                ChannelMessage::AuthResponse(response) if response.success => return Ok(held),
                ChannelMessage::AuthResponse(response) => {
                    return Err(SyncError::AuthRejected(
                        response.message.unwrap_or_else(|| "no reason given".into()),
                    ));
                }
                ChannelMessage::Heartbeat | ChannelMessage::Auth(_) => {}
                _ => held.push(envelope),
            },
            Ok(Decoded::Unknown(kind)) => debug!(%kind, "Ignoring unknown message type"),
            Err(e) => warn!(error = %e, "Dropping malformed frame"),
        }
    }

    Err(SyncError::Disconnected)
}
