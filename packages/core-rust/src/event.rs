use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Message, Value};

/// Unique identity of a single event instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Unit of message state flowing through routes.
///
/// An event bundles a [`Message`], named flow variables, and free-form
/// metadata under an identity (`id`) and a correlation identity shared by
/// every event derived from the same inbound message.
///
/// Cloning is cheap: the message body sits behind an `Arc` and is only
/// copied when a clone replaces it. Variables and metadata are owned per
/// clone, so mutating a copy never aliases the caller's event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: EventId,
    correlation_id: String,
    message: Arc<Message>,
    variables: BTreeMap<String, Value>,
    metadata: BTreeMap<String, Value>,
}

impl Event {
    /// Creates a root event whose correlation id equals its own id.
    #[must_use]
    pub fn new(payload: impl Into<Value>) -> Self {
        Self::from_message(Message::of(payload))
    }

    #[must_use]
    pub fn from_message(message: Message) -> Self {
        let id = EventId::new();
        Self {
            id,
            correlation_id: id.to_string(),
            message: Arc::new(message),
            variables: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Returns a copy with a fresh id and the same correlation id.
    ///
    /// Used when one inbound event is fanned out to several routes: each copy
    /// can be tracked on its own while still correlating to the original.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            id: EventId::new(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.message.payload
    }

    /// Replaces the message, keeping identity, variables, and metadata.
    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Arc::new(message);
        self
    }

    /// Replaces the payload, keeping the message attributes.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        Arc::make_mut(&mut self.message).payload = payload.into();
        self
    }

    #[must_use]
    pub fn variables(&self) -> &BTreeMap<String, Value> {
        &self.variables
    }

    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Inserts every variable from `other`, overwriting existing names.
    pub fn merge_variables(&mut self, other: &BTreeMap<String, Value>) {
        self.variables
            .extend(other.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    #[must_use]
    pub fn metadata_entries(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Attaches a metadata entry, replacing any previous value under `key`.
    pub fn attach_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }
}
