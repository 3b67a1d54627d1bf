//! Wire validator: the gate every inbound delivery passes before anything
//! looks at its content
//!
//! Checks, in order:
//! 1. a record was posted at all
//! 2. it is a JSON object
//! 3. it names a recognized `kind`
//! 4. its `protocolTag` equals [`PROTOCOL_TAG`]
//! 5. the sender's origin equals the expected origin, when one is given
//!
//! Only then is the record decoded into a [`ProtocolMessage`].

use crate::channel::{Delivery, EndpointId};
use crate::error::Rejection;
use crate::message::{MessageKind, ProtocolMessage, PROTOCOL_TAG};

/// Origin constraint applied by [`validate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginFilter<'a> {
    /// Accept any sender origin; only used before the counterpart's origin
    /// is known (handshake replies and offers, pre-handshake queueing)
    Any,

    /// Accept only this exact origin
    Exact(&'a str),
}

/// Classifies a delivery as a well-formed protocol message or rejects it
pub fn validate(delivery: &Delivery, origin: OriginFilter<'_>) -> Result<ProtocolMessage, Rejection> {
    let data = delivery.data.as_ref().ok_or(Rejection::Absent)?;
    let record = data.as_object().ok_or(Rejection::NotRecord)?;

    record
        .get("kind")
        .and_then(|kind| kind.as_str())
        .and_then(MessageKind::parse)
        .ok_or(Rejection::UnknownKind)?;

    let tag = record.get("protocolTag").and_then(|tag| tag.as_str());
    if tag != Some(PROTOCOL_TAG) {
        return Err(Rejection::TagMismatch(tag.map(str::to_string)));
    }

    if let OriginFilter::Exact(expected) = origin {
        if delivery.origin != expected {
            return Err(Rejection::OriginMismatch {
                expected: expected.to_string(),
                actual: delivery.origin.clone(),
            });
        }
    }

    serde_json::from_value(data.clone()).map_err(|e| Rejection::Malformed(e.to_string()))
}

/// Filter for traffic of one established session
///
/// Accepts a delivery only if it passes [`validate`] against the verified
/// counterpart origin and was posted by the counterpart itself. Anything
/// else is an untrusted sender and is dropped without surfacing an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFilter {
    counterpart: EndpointId,
    origin: String,
}

impl SessionFilter {
    pub fn new(counterpart: EndpointId, origin: impl Into<String>) -> Self {
        Self {
            counterpart,
            origin: origin.into(),
        }
    }

    #[inline]
    pub fn counterpart(&self) -> EndpointId {
        self.counterpart
    }

    #[inline]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn accept(&self, delivery: &Delivery) -> Option<ProtocolMessage> {
        if delivery.source != self.counterpart {
            tracing::trace!(source = %delivery.source, "Dropping delivery from foreign context");
            return None;
        }

        match validate(delivery, OriginFilter::Exact(&self.origin)) {
            Ok(message) => Some(message),
            Err(rejection) => {
                tracing::trace!(%rejection, source = %delivery.source, "Dropping untrusted delivery");
                None
            }
        }
    }
}
