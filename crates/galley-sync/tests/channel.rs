//! Messaging channel against an axum WebSocket mock backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::sync::mpsc;
use tokio::time::timeout;

use galley_core::{Order, OrderItem, OrderType};
use galley_sync::protocol::{AuthResponse, Decoded};
use galley_sync::{
    ChannelConfig, ChannelEvent, ChannelHandle, ChannelMessage, ConnectionState, Envelope,
    MessagingChannel, OrderSignal, Severity, StatusNotifier,
};

// =============================================================================
// Mock Backend
// =============================================================================

#[derive(Clone)]
struct MockBackend {
    accept: bool,
    /// Answer every client heartbeat with one of our own.
    answer_heartbeats: bool,
    /// Frames sent between the client's `auth` and our `auth_response`.
    before_auth: Arc<Vec<String>>,
    /// Frames sent right after a successful `auth_response`.
    after_auth: Arc<Vec<String>>,
    received: mpsc::UnboundedSender<Envelope>,
    connections: Arc<AtomicUsize>,
}

impl MockBackend {
    fn new() -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (received, rx) = mpsc::unbounded_channel();
        let mock = MockBackend {
            accept: true,
            answer_heartbeats: true,
            before_auth: Arc::new(Vec::new()),
            after_auth: Arc::new(Vec::new()),
            received,
            connections: Arc::new(AtomicUsize::new(0)),
        };
        (mock, rx)
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Decodes and records a client frame. Returns true for heartbeats.
    fn record(&self, text: &str) -> bool {
        match Envelope::decode(text) {
            Ok(Decoded::Message(envelope)) => {
                let heartbeat = matches!(envelope.message, ChannelMessage::Heartbeat);
                let _ = self.received.send(envelope);
                heartbeat
            }
            _ => false,
        }
    }
}

async fn serve(mock: MockBackend) -> String {
    let app = Router::new().route("/ws", get(upgrade)).with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{}/ws", addr)
}

async fn upgrade(ws: WebSocketUpgrade, State(mock): State<MockBackend>) -> Response {
    ws.on_upgrade(move |socket| session(socket, mock))
}

async fn session(mut socket: WebSocket, mock: MockBackend) {
    mock.connections.fetch_add(1, Ordering::SeqCst);

    let Some(Ok(Message::Text(auth))) = socket.recv().await else {
        return;
    };
    mock.record(auth.as_str());

    for frame in mock.before_auth.iter() {
        if socket.send(Message::Text(frame.clone().into())).await.is_err() {
            return;
        }
    }

    let response = Envelope::new(
        ChannelMessage::AuthResponse(AuthResponse {
            success: mock.accept,
            message: (!mock.accept).then(|| "unknown device".to_string()),
        }),
        None,
    )
    .to_json()
    .unwrap();
    if socket.send(Message::Text(response.into())).await.is_err() {
        return;
    }

    if !mock.accept {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    for frame in mock.after_auth.iter() {
        if socket.send(Message::Text(frame.clone().into())).await.is_err() {
            return;
        }
    }

    while let Some(Ok(message)) = socket.recv().await {
        if let Message::Text(text) = message {
            if mock.record(text.as_str()) && mock.answer_heartbeats {
                let heartbeat = Envelope::heartbeat("backend").to_json().unwrap();
                if socket.send(Message::Text(heartbeat.into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<(String, Severity)>>);

impl StatusNotifier for RecordingNotifier {
    fn notify(&self, status: &str, severity: Severity) {
        self.0.lock().unwrap().push((status.to_string(), severity));
    }
}

fn channel_config(url: String) -> ChannelConfig {
    ChannelConfig {
        url,
        device_id: "kds-1".into(),
        token: "device-token".into(),
        role: "kitchen".into(),
        connect_timeout: Duration::from_secs(2),
        auth_timeout: Duration::from_secs(2),
        heartbeat_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_secs(1),
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(200),
        max_retries: 0,
    }
}

fn order(id: &str) -> Order {
    Order::new(
        id,
        "7",
        OrderType::Takeout,
        vec![OrderItem::new("i1", "p-fries", "Fries", 400, 1)],
        0,
    )
}

fn frame(message: ChannelMessage) -> String {
    Envelope::new(message, Some("pos-1".into())).to_json().unwrap()
}

async fn next_event(events: &mut mpsc::Receiver<ChannelEvent>) -> Option<ChannelEvent> {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no channel event within 5s")
}

/// Next client frame that is not a heartbeat.
async fn next_frame(received: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    loop {
        let envelope = timeout(Duration::from_secs(5), received.recv())
            .await
            .expect("no client frame within 5s")
            .expect("mock backend stopped");
        if !matches!(envelope.message, ChannelMessage::Heartbeat) {
            return envelope;
        }
    }
}

fn spawn(config: ChannelConfig) -> (ChannelHandle, mpsc::Receiver<ChannelEvent>) {
    MessagingChannel::spawn(config, Arc::new(RecordingNotifier::default()))
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_authenticates_then_delivers_messages() {
    let (mut mock, mut received) = MockBackend::new();
    mock.after_auth = Arc::new(vec![
        r#"{"type":"table_merged","data":{"tables":[1,2]}}"#.to_string(),
        "not json".to_string(),
        frame(ChannelMessage::OrderNew(order("ord-1"))),
    ]);
    let url = serve(mock).await;

    let (handle, mut events) = spawn(channel_config(url));

    let auth = next_frame(&mut received).await;
    match auth.message {
        ChannelMessage::Auth(request) => {
            assert_eq!(request.token, "device-token");
            assert_eq!(request.device_id, "kds-1");
            assert_eq!(request.role, "kitchen");
        }
        other => panic!("expected auth frame, got {:?}", other),
    }

    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Connected { fresh: true }));
    assert!(handle.is_connected().await);

    // Unknown and malformed frames are skipped.
    match next_event(&mut events).await {
        Some(ChannelEvent::Message(envelope)) => {
            assert_eq!(envelope.message.order_id(), Some("ord-1"));
            assert_eq!(envelope.client_id.as_deref(), Some("pos-1"));
        }
        other => panic!("expected order_new, got {:?}", other),
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_messages_before_auth_response_are_held() {
    let (mut mock, _received) = MockBackend::new();
    mock.before_auth = Arc::new(vec![frame(ChannelMessage::KitchenOrder(order("ord-2")))]);
    let url = serve(mock).await;

    let (handle, mut events) = spawn(channel_config(url));

    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Connected { fresh: true }));
    match next_event(&mut events).await {
        Some(ChannelEvent::Message(envelope)) => {
            assert_eq!(envelope.message.order_id(), Some("ord-2"));
        }
        other => panic!("expected held kitchen_order, got {:?}", other),
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_send_reaches_backend() {
    let (mock, mut received) = MockBackend::new();
    let url = serve(mock).await;

    let (handle, mut events) = spawn(channel_config(url));

    // Queued before the connection is up.
    handle
        .send(ChannelMessage::OrderReady(OrderSignal {
            order_id: "ord-3".into(),
            order: None,
        }))
        .await
        .unwrap();

    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Connected { fresh: true }));

    let _auth = next_frame(&mut received).await;
    let sent = next_frame(&mut received).await;
    assert_eq!(sent.message.order_id(), Some("ord-3"));
    assert_eq!(sent.client_id.as_deref(), Some("kds-1"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_auth_gives_up_after_max_retries() {
    let (mut mock, _received) = MockBackend::new();
    mock.accept = false;
    let probe = mock.clone();
    let url = serve(mock).await;

    let notifier = Arc::new(RecordingNotifier::default());
    let config = ChannelConfig {
        max_retries: 2,
        ..channel_config(url)
    };
    let (handle, mut events) = MessagingChannel::spawn(config, notifier.clone());

    // Never connected; the event stream closes when the channel stops.
    assert_eq!(next_event(&mut events).await, None);
    assert_eq!(probe.connections(), 2);
    assert_eq!(handle.state().await, ConnectionState::Disconnected);

    let notes = notifier.0.lock().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].1, Severity::Error);
}

#[tokio::test]
async fn test_silent_backend_triggers_reconnect() {
    let (mut mock, _received) = MockBackend::new();
    mock.answer_heartbeats = false;
    let probe = mock.clone();
    let url = serve(mock).await;

    let config = ChannelConfig {
        heartbeat_timeout: Duration::from_millis(300),
        ..channel_config(url)
    };
    let (handle, mut events) = spawn(config);

    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Connected { fresh: true }));
    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Disconnected));
    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Connected { fresh: true }));
    assert!(probe.connections() >= 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_event_stream() {
    let (mock, _received) = MockBackend::new();
    let url = serve(mock).await;

    let (handle, mut events) = spawn(channel_config(url));
    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Connected { fresh: true }));

    handle.shutdown().await.unwrap();

    assert_eq!(next_event(&mut events).await, Some(ChannelEvent::Disconnected));
    assert_eq!(next_event(&mut events).await, None);
}
