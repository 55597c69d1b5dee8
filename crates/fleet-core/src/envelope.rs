//! Immutable message envelope.
//!
//! A [`MessageEnvelope`] pairs one outbound message with at most one metadata
//! item per [`ItemKind`]. Every `with*` call builds a new envelope; the item
//! map is shared behind an `Arc` and only copied when a new item is added.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleet_state::TenantId;
use serde::{Deserialize, Serialize};

use crate::transport::Qos;

/// Discriminant used as the key of an envelope's item map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Delivery,
    Correlation,
    Source,
}

/// Where and how the transport should deliver the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub topic: String,
    pub qos: Qos,
    pub retain: bool,
}

/// Identifier tying together every message emitted by one operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        CorrelationId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        CorrelationId(id.to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The lifecycle operation that produced a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub operation: String,
    pub tenant_id: TenantId,
}

/// A metadata item attached to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeItem {
    Delivery(Delivery),
    Correlation(CorrelationId),
    Source(Source),
}

impl EnvelopeItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            EnvelopeItem::Delivery(_) => ItemKind::Delivery,
            EnvelopeItem::Correlation(_) => ItemKind::Correlation,
            EnvelopeItem::Source(_) => ItemKind::Source,
        }
    }
}

impl From<Delivery> for EnvelopeItem {
    fn from(delivery: Delivery) -> Self {
        EnvelopeItem::Delivery(delivery)
    }
}

impl From<CorrelationId> for EnvelopeItem {
    fn from(id: CorrelationId) -> Self {
        EnvelopeItem::Correlation(id)
    }
}

impl From<Source> for EnvelopeItem {
    fn from(source: Source) -> Self {
        EnvelopeItem::Source(source)
    }
}

/// Payload handed to the transport. `None` publishes an empty message,
/// which on a retained topic clears the retained value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub payload: Option<Vec<u8>>,
}

impl Notification {
    pub fn empty() -> Self {
        Self { payload: None }
    }

    pub fn bytes(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(payload.into()),
        }
    }

    /// Serialize `value` as the payload.
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Self::bytes(serde_json::to_vec(value)?))
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }
}

/// Immutable envelope around a message of type `M`.
#[derive(Debug)]
pub struct MessageEnvelope<M> {
    message: Arc<M>,
    items: Arc<BTreeMap<ItemKind, EnvelopeItem>>,
}

impl<M> Clone for MessageEnvelope<M> {
    fn clone(&self) -> Self {
        Self {
            message: Arc::clone(&self.message),
            items: Arc::clone(&self.items),
        }
    }
}

impl<M: PartialEq> PartialEq for MessageEnvelope<M> {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message && self.items == other.items
    }
}

impl<M: Eq> Eq for MessageEnvelope<M> {}

impl<M> MessageEnvelope<M> {
    fn bare(message: M) -> Self {
        Self {
            message: Arc::new(message),
            items: Arc::new(BTreeMap::new()),
        }
    }

    /// Wrap a message. An envelope is returned unchanged, so wrapping twice
    /// never nests.
    pub fn wrap(message: impl IntoEnvelope<M>) -> Self {
        message.into_envelope()
    }

    /// A new envelope carrying `item`, replacing any item of the same kind.
    pub fn with(&self, item: impl Into<EnvelopeItem>) -> Self {
        let item = item.into();
        let mut items = Arc::clone(&self.items);
        Arc::make_mut(&mut items).insert(item.kind(), item);
        Self {
            message: Arc::clone(&self.message),
            items,
        }
    }

    /// A new envelope carrying `message` and the current items.
    pub fn with_message(&self, message: M) -> Self {
        Self {
            message: Arc::new(message),
            items: Arc::clone(&self.items),
        }
    }

    pub fn get(&self, kind: ItemKind) -> Option<&EnvelopeItem> {
        self.items.get(&kind)
    }

    /// All items keyed by kind.
    pub fn all(&self) -> &BTreeMap<ItemKind, EnvelopeItem> {
        &self.items
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        match self.get(ItemKind::Delivery) {
            Some(EnvelopeItem::Delivery(d)) => Some(d),
            _ => None,
        }
    }

    pub fn correlation(&self) -> Option<&CorrelationId> {
        match self.get(ItemKind::Correlation) {
            Some(EnvelopeItem::Correlation(c)) => Some(c),
            _ => None,
        }
    }

    pub fn source(&self) -> Option<&Source> {
        match self.get(ItemKind::Source) {
            Some(EnvelopeItem::Source(s)) => Some(s),
            _ => None,
        }
    }
}

impl<M: Clone> MessageEnvelope<M> {
    /// Take the message out, cloning only if other envelopes share it.
    pub fn into_message(self) -> M {
        Arc::try_unwrap(self.message).unwrap_or_else(|shared| (*shared).clone())
    }
}

/// Conversion into an envelope; implemented by envelopes themselves and by
/// every message type the crate sends.
pub trait IntoEnvelope<M> {
    fn into_envelope(self) -> MessageEnvelope<M>;
}

impl<M> IntoEnvelope<M> for MessageEnvelope<M> {
    fn into_envelope(self) -> MessageEnvelope<M> {
        self
    }
}

macro_rules! message_type {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoEnvelope<$ty> for $ty {
                fn into_envelope(self) -> MessageEnvelope<$ty> {
                    MessageEnvelope::bare(self)
                }
            }
        )*
    };
}

message_type!(Notification, serde_json::Value, String, Vec<u8>);
