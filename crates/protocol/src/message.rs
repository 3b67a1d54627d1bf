//! Wire format for parley messages
//!
//! Every message on the channel is one JSON record:
//!
//! ```text
//! { kind: "offer"|"offer-ack"|"invoke"|"event"|"value-request"|"value-reply",
//!   protocolTag: PROTOCOL_TAG,
//!   property?: string,
//!   payload?: any,
//!   correlationId?: integer,          (value-request / value-reply only)
//!   eventEnvelope?: { name, data },   (event only)
//!   sharedModel?: { name: any } }     (offer only)
//! ```
//!
//! The constructors on [`ProtocolMessage`] are the only way this crate
//! builds outbound messages, so `correlationId` is always present exactly
//! on value-request and value-reply.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed tag separating parley traffic from unrelated messages on the channel
pub const PROTOCOL_TAG: &str = "application/x-parley-v1+json";

/// Discriminates the six protocol message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    /// Host → child: handshake request carrying the host's shared model
    Offer,

    /// Child → host: handshake acknowledgment
    OfferAck,

    /// Host → child: fire-and-forget method call
    Invoke,

    /// Child → host: named event
    Event,

    /// Host → child: request for a model value
    ValueRequest,

    /// Child → host: reply to a value-request
    ValueReply,
}

impl MessageKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::OfferAck => "offer-ack",
            MessageKind::Invoke => "invoke",
            MessageKind::Event => "event",
            MessageKind::ValueRequest => "value-request",
            MessageKind::ValueReply => "value-reply",
        }
    }

    /// Parses a wire name, returning `None` for anything unrecognized
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "offer" => Some(MessageKind::Offer),
            "offer-ack" => Some(MessageKind::OfferAck),
            "invoke" => Some(MessageKind::Invoke),
            "event" => Some(MessageKind::Event),
            "value-request" => Some(MessageKind::ValueRequest),
            "value-reply" => Some(MessageKind::ValueReply),
            _ => None,
        }
    }

    /// Returns true for kinds that carry a correlation id
    #[inline]
    pub fn is_correlated(&self) -> bool {
        matches!(self, MessageKind::ValueRequest | MessageKind::ValueReply)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name and data of an event message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub name: String,
    pub data: Value,
}

/// One protocol message as exchanged on the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMessage {
    pub kind: MessageKind,

    pub protocol_tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_envelope: Option<EventEnvelope>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_model: Option<Map<String, Value>>,
}

impl ProtocolMessage {
    fn bare(kind: MessageKind) -> Self {
        Self {
            kind,
            protocol_tag: PROTOCOL_TAG.to_string(),
            property: None,
            payload: None,
            correlation_id: None,
            event_envelope: None,
            shared_model: None,
        }
    }

    /// Handshake offer carrying the host's shared model
    pub fn offer(shared_model: Map<String, Value>) -> Self {
        Self {
            shared_model: Some(shared_model),
            ..Self::bare(MessageKind::Offer)
        }
    }

    /// Handshake acknowledgment
    pub fn offer_ack() -> Self {
        Self::bare(MessageKind::OfferAck)
    }

    /// Fire-and-forget call of a named model method
    pub fn invoke(property: impl Into<String>, payload: Value) -> Self {
        Self {
            property: Some(property.into()),
            payload: Some(payload),
            ..Self::bare(MessageKind::Invoke)
        }
    }

    /// Named event with attached data
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Self {
            event_envelope: Some(EventEnvelope {
                name: name.into(),
                data,
            }),
            ..Self::bare(MessageKind::Event)
        }
    }

    /// Request for the value of a model entry
    pub fn value_request(property: impl Into<String>, correlation_id: u64) -> Self {
        Self {
            property: Some(property.into()),
            correlation_id: Some(correlation_id),
            ..Self::bare(MessageKind::ValueRequest)
        }
    }

    /// Reply to a value-request; `payload` is `None` when the entry is absent
    pub fn value_reply(
        property: impl Into<String>,
        payload: Option<Value>,
        correlation_id: u64,
    ) -> Self {
        Self {
            property: Some(property.into()),
            payload,
            correlation_id: Some(correlation_id),
            ..Self::bare(MessageKind::ValueReply)
        }
    }

    /// Serializes this message into the record posted on the channel
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Key used to collapse duplicate queued messages
    pub fn dedup_key(&self) -> (MessageKind, Option<String>, Option<u64>) {
        (self.kind, self.property.clone(), self.correlation_id)
    }
}
