use std::collections::BTreeMap;

use serde_json::Value;

use super::state::{ConnectionState, StateMessage, StreamDescriptor, StreamState};

#[derive(Debug, Clone, PartialEq)]
enum Buffered {
    Legacy(Value),
    Global(Value),
    Streams(BTreeMap<StreamDescriptor, Value>),
}

/// Accumulates the checkpoints of one connection.
///
/// Stream checkpoints are kept last-write-wins per stream; legacy and global
/// checkpoints replace whatever was buffered. A checkpoint of another family
/// than the buffered one replaces the buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateAggregator {
    buffered: Option<Buffered>,
}

impl StateAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, message: StateMessage) {
        match message {
            StateMessage::Legacy { data } => self.buffered = Some(Buffered::Legacy(data)),
            StateMessage::Global { data } => self.buffered = Some(Buffered::Global(data)),
            StateMessage::Stream { stream, data } => match &mut self.buffered {
                Some(Buffered::Streams(streams)) => {
                    streams.insert(stream, data);
                }
                _ => self.buffered = Some(Buffered::Streams(BTreeMap::from([(stream, data)]))),
            },
        }
    }

    /// Merge a newer aggregator into this one; `newer` wins on conflicts.
    pub fn ingest_all(&mut self, newer: StateAggregator) {
        match newer.buffered {
            None => {}
            Some(Buffered::Streams(newer_streams)) => match &mut self.buffered {
                Some(Buffered::Streams(streams)) => streams.extend(newer_streams),
                _ => self.buffered = Some(Buffered::Streams(newer_streams)),
            },
            Some(single) => self.buffered = Some(single),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_none()
    }

    /// Streams currently buffered (empty unless the buffer holds stream state).
    pub fn streams(&self) -> Vec<&StreamDescriptor> {
        match &self.buffered {
            Some(Buffered::Streams(s)) => s.keys().collect(),
            _ => Vec::new(),
        }
    }

    /// The state to persist, or `None` when nothing was ingested.
    pub fn aggregated(&self) -> Option<ConnectionState> {
        let state = match self.buffered.as_ref()? {
            Buffered::Legacy(v) => ConnectionState::Legacy(v.clone()),
            Buffered::Global(v) => ConnectionState::Global(v.clone()),
            Buffered::Streams(s) => ConnectionState::Stream(
                s.iter()
                    .map(|(stream, data)| StreamState {
                        stream: stream.clone(),
                        data: data.clone(),
                    })
                    .collect(),
            ),
        };
        Some(state)
    }
}
