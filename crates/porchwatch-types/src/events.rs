use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::telemetry::RelayState;

/// High-level bus message kinds moving through the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Lifecycle,
    Mode,
    Arming,
    Promotion,
    Relay,
    Fault,
}

/// Immutable event envelope published on the control-plane bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Lifecycle(LifecycleEvent),
    Mode(ModeEvent),
    Armed(ArmedEvent),
    Promoted(PromotionEvent),
    Relay(RelayEvent),
    Fault(FaultEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub phase: LifecyclePhase,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LifecyclePhase {
    Boot,
    Ready,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeEvent {
    pub out_of_home: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmedEvent {
    pub distance_cm: f64,
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionEvent {
    pub event_id: Uuid,
    pub label: String,
    pub clip_path: String,
    pub frame_count: usize,
    pub manual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEvent {
    pub state: RelayState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultEvent {
    pub source: String,
    pub kind: String,
    pub message: String,
}

impl SystemEvent {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn lifecycle(phase: LifecyclePhase, details: impl Into<Option<String>>) -> Self {
        Self::new(
            EventKind::Lifecycle,
            EventPayload::Lifecycle(LifecycleEvent {
                phase,
                details: details.into(),
            }),
        )
    }

    pub fn fault(source: &str, err: &crate::PorchwatchError) -> Self {
        Self::new(
            EventKind::Fault,
            EventPayload::Fault(FaultEvent {
                source: source.to_string(),
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        )
    }
}
