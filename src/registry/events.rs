//! Registry lifecycle events
//!
//! The registry reports what happened to a session through an `EventSink`;
//! `EventBuffer` keeps the most recent events in memory for inspection.

use super::correction::CorrectionMethod;
use super::MultiplicityAlert;
use crate::engine::TestType;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum RegistryEvent {
    SessionOpened {
        session_id: Uuid,
        owner: String,
        timestamp: DateTime<Utc>,
    },
    HypothesisRecorded {
        session_id: Uuid,
        hypothesis_id: Uuid,
        test_type: TestType,
        raw_p_value: String,
        timestamp: DateTime<Utc>,
    },
    MultiplicityAlert {
        session_id: Uuid,
        level: MultiplicityAlert,
        uncorrected: usize,
        timestamp: DateTime<Utc>,
    },
    CorrectionApplied {
        session_id: Uuid,
        method: CorrectionMethod,
        hypotheses: usize,
        significant: usize,
        timestamp: DateTime<Utc>,
    },
    ExportBlocked {
        session_id: Uuid,
        uncorrected: usize,
        timestamp: DateTime<Utc>,
    },
    ExportForced {
        session_id: Uuid,
        exception_id: Uuid,
        uncorrected: usize,
        timestamp: DateTime<Utc>,
    },
    ExportCleared {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl RegistryEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::SessionOpened { session_id, .. }
            | Self::HypothesisRecorded { session_id, .. }
            | Self::MultiplicityAlert { session_id, .. }
            | Self::CorrectionApplied { session_id, .. }
            | Self::ExportBlocked { session_id, .. }
            | Self::ExportForced { session_id, .. }
            | Self::ExportCleared { session_id, .. } => *session_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionOpened { .. } => "session_opened",
            Self::HypothesisRecorded { .. } => "hypothesis_recorded",
            Self::MultiplicityAlert { .. } => "multiplicity_alert",
            Self::CorrectionApplied { .. } => "correction_applied",
            Self::ExportBlocked { .. } => "export_blocked",
            Self::ExportForced { .. } => "export_forced",
            Self::ExportCleared { .. } => "export_cleared",
        }
    }
}

/// Destination for registry events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RegistryEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: RegistryEvent) {}
}

/// Bounded in-memory sink; the oldest events are dropped first
#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    events: RwLock<VecDeque<RegistryEvent>>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Up to `limit` events, newest last
    pub fn recent(&self, limit: usize) -> Vec<RegistryEvent> {
        let events = self.events.read();
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn for_session(&self, session_id: Uuid) -> Vec<RegistryEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.session_id() == session_id)
            .cloned()
            .collect()
    }

    /// Take every buffered event
    pub fn drain(&self) -> Vec<RegistryEvent> {
        self.events.write().drain(..).collect()
    }
}

impl EventSink for EventBuffer {
    fn emit(&self, event: RegistryEvent) {
        let mut events = self.events.write();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(session_id: Uuid) -> RegistryEvent {
        RegistryEvent::ExportCleared {
            session_id,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_buffer_drops_oldest_beyond_capacity() {
        let buffer = EventBuffer::new(3);
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            buffer.emit(cleared(*id));
        }
        assert_eq!(buffer.len(), 3);
        let kept: Vec<Uuid> = buffer.recent(10).iter().map(|e| e.session_id()).collect();
        assert_eq!(kept, ids[2..].to_vec());
        assert_eq!(buffer.recent(1)[0].session_id(), ids[4]);
    }

    #[test]
    fn test_filter_and_drain() {
        let buffer = EventBuffer::new(10);
        let a = Uuid::new_v4();
        buffer.emit(cleared(a));
        buffer.emit(cleared(Uuid::new_v4()));
        assert_eq!(buffer.for_session(a).len(), 1);
        assert_eq!(buffer.drain().len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_events_serialize_with_tag() {
        let json = serde_json::to_value(cleared(Uuid::nil())).unwrap();
        assert_eq!(json["event_type"], "export_cleared");
    }
}
