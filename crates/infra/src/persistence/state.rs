//! Checkpoint messages and persisted connection state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifies one stream of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl std::fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateType {
    Legacy,
    Global,
    Stream,
}

/// A checkpoint emitted by a running sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateMessage {
    /// One opaque blob for the whole connection.
    Legacy { data: Value },
    /// Shared state plus per-stream state, always emitted as a whole.
    Global { data: Value },
    /// Cursor of a single stream.
    Stream { stream: StreamDescriptor, data: Value },
}

impl StateMessage {
    pub fn legacy(data: Value) -> Self {
        Self::Legacy { data }
    }

    pub fn global(data: Value) -> Self {
        Self::Global { data }
    }

    pub fn stream(stream: StreamDescriptor, data: Value) -> Self {
        Self::Stream { stream, data }
    }

    pub fn state_type(&self) -> StateType {
        match self {
            StateMessage::Legacy { .. } => StateType::Legacy,
            StateMessage::Global { .. } => StateType::Global,
            StateMessage::Stream { .. } => StateType::Stream,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub stream: StreamDescriptor,
    pub data: Value,
}

/// State stored for a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Legacy(Value),
    Global(Value),
    /// Ordered by stream descriptor.
    Stream(Vec<StreamState>),
}

impl ConnectionState {
    pub fn state_type(&self) -> StateType {
        match self {
            ConnectionState::Legacy(_) => StateType::Legacy,
            ConnectionState::Global(_) => StateType::Global,
            ConnectionState::Stream(_) => StateType::Stream,
        }
    }

    /// No usable checkpoint: null, an empty object or array, or no streams.
    pub fn is_empty(&self) -> bool {
        match self {
            ConnectionState::Legacy(v) | ConnectionState::Global(v) => is_empty_value(v),
            ConnectionState::Stream(streams) => streams.is_empty(),
        }
    }

    pub fn streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        let streams = match self {
            ConnectionState::Stream(s) => s.as_slice(),
            _ => &[],
        };
        streams.iter().map(|s| &s.stream)
    }

    pub fn stream_data(&self, stream: &StreamDescriptor) -> Option<&Value> {
        match self {
            ConnectionState::Stream(s) => s.iter().find(|s| &s.stream == stream).map(|s| &s.data),
            _ => None,
        }
    }
}

fn is_empty_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}
