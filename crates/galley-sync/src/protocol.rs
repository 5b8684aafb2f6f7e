//! # Channel Protocol Messages
//!
//! Frames exchanged over the messaging channel.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Channel Protocol Messages                          │
//! │                                                                         │
//! │  AUTHENTICATION                                                        │
//! │  ──────────────                                                        │
//! │  client  ───► auth { token, device_id, role }                          │
//! │  backend ◄─── auth_response { success, message }                       │
//! │                                                                         │
//! │  ORDER FLOW (POS → backend → kitchen)                                  │
//! │  ─────────────────────────────────────                                 │
//! │  order_new / kitchen_order       full revision of a new order          │
//! │  order_update / kitchen_update   full revision of an existing order    │
//! │  order_ready                     { order_id, order? }                  │
//! │  order_cancelled                 { order_id, order? }                  │
//! │                                                                         │
//! │  KEEPALIVE                                                             │
//! │  ─────────                                                             │
//! │  both    ◄──► heartbeat                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! ```json
//! { "type": "order_update", "client_id": "pos-1",
//!   "timestamp": "2024-05-01T12:00:00Z", "data": { ... } }
//! ```
//!
//! Frames with a `type` this client does not know are ignored so the backend
//! can add message types without breaking older clients.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};
use galley_core::Order;

// =============================================================================
// Message Types
// =============================================================================

/// The `type` field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    OrderNew,
    OrderUpdate,
    OrderReady,
    OrderCancelled,
    KitchenOrder,
    KitchenUpdate,
    Heartbeat,
    AuthResponse,
    /// Outgoing only.
    Auth,
    /// Any type this client does not handle.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(Value::String(name)) => f.write_str(&name),
            _ => write!(f, "{:?}", self),
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Payload of `order_ready` and `order_cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSignal {
    pub order_id: String,

    /// The revision that caused the signal, when the backend includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
}

/// Payload of `auth`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub token: String,
    pub device_id: String,
    #[serde(default)]
    pub role: String,
}

/// Payload of `auth_response`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// =============================================================================
// Channel Message
// =============================================================================

/// A frame body, adjacently tagged: `{ "type": "order_new", "data": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChannelMessage {
    OrderNew(Order),
    OrderUpdate(Order),
    OrderReady(OrderSignal),
    OrderCancelled(OrderSignal),
    KitchenOrder(Order),
    KitchenUpdate(Order),
    Heartbeat,
    AuthResponse(AuthResponse),
    Auth(AuthRequest),
}

impl ChannelMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            ChannelMessage::OrderNew(_) => MessageType::OrderNew,
            ChannelMessage::OrderUpdate(_) => MessageType::OrderUpdate,
            ChannelMessage::OrderReady(_) => MessageType::OrderReady,
            ChannelMessage::OrderCancelled(_) => MessageType::OrderCancelled,
            ChannelMessage::KitchenOrder(_) => MessageType::KitchenOrder,
            ChannelMessage::KitchenUpdate(_) => MessageType::KitchenUpdate,
            ChannelMessage::Heartbeat => MessageType::Heartbeat,
            ChannelMessage::AuthResponse(_) => MessageType::AuthResponse,
            ChannelMessage::Auth(_) => MessageType::Auth,
        }
    }

    /// The order id this message is about, if any.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            ChannelMessage::OrderNew(order)
            | ChannelMessage::OrderUpdate(order)
            | ChannelMessage::KitchenOrder(order)
            | ChannelMessage::KitchenUpdate(order) => Some(&order.id),
            ChannelMessage::OrderReady(signal) | ChannelMessage::OrderCancelled(signal) => {
                Some(&signal.order_id)
            }
            ChannelMessage::Heartbeat | ChannelMessage::AuthResponse(_) | ChannelMessage::Auth(_) => None,
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// A frame: a message plus its envelope fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: ChannelMessage,

    /// Originating client, when relayed by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

/// Result of decoding a text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(Envelope),

    /// A well-formed frame of a type this client does not handle.
    Unknown(String),
}

impl Envelope {
    /// Wraps `message` stamped with the current time.
    pub fn new(message: ChannelMessage, client_id: Option<String>) -> Self {
        Envelope {
            message,
            client_id,
            timestamp: Utc::now(),
        }
    }

    pub fn heartbeat(client_id: &str) -> Self {
        Self::new(ChannelMessage::Heartbeat, Some(client_id.to_string()))
    }

    pub fn auth(token: &str, device_id: &str, role: &str) -> Self {
        Self::new(
            ChannelMessage::Auth(AuthRequest {
                token: token.to_string(),
                device_id: device_id.to_string(),
                role: role.to_string(),
            }),
            Some(device_id.to_string()),
        )
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }

    pub fn to_json(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a text frame.
    ///
    /// The `type` is read first so unknown types decode to
    /// [`Decoded::Unknown`]. Invalid JSON, a missing `type`, or a body that
    /// does not match its type is an `InvalidMessage` error.
    pub fn decode(json: &str) -> SyncResult<Decoded> {
        let mut frame: Value = serde_json::from_str(json)
            .map_err(|e| SyncError::InvalidMessage(format!("envelope: {}", e)))?;

        let name = match frame.get("type") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(SyncError::InvalidMessage("envelope: missing type".into())),
        };

        let kind = MessageType::deserialize(Value::String(name.clone()))
            .map_err(|e| SyncError::InvalidMessage(format!("type {}: {}", name, e)))?;
        match kind {
            MessageType::Unknown => return Ok(Decoded::Unknown(name)),
            // Heartbeats carry no data; tolerate peers that send `{}`.
            MessageType::Heartbeat => {
                if let Some(fields) = frame.as_object_mut() {
                    fields.remove("data");
                }
            }
            _ => {}
        }

        let envelope: Envelope = serde_json::from_value(frame)
            .map_err(|e| SyncError::InvalidMessage(format!("{} data: {}", kind, e)))?;
        Ok(Decoded::Message(envelope))
    }
}
