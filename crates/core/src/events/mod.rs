//! Engine lifecycle notifications
//!
//! Executors, circuit breakers and the delegation engine publish
//! [`EngineEvent`]s on an [`EventBus`]; telemetry collaborators subscribe to it.
//! Topics: executor.started, executor.completed, executor.failed,
//! breaker.state_changed, breaker.rejected, breaker.success, breaker.failure,
//! delegation.hop

use crate::domain::{CircuitState, ErrorCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod bus;

pub use bus::*;

/// Event topic names
pub struct Topics;

impl Topics {
    pub const EXECUTOR_STARTED: &'static str = "executor.started";
    pub const EXECUTOR_COMPLETED: &'static str = "executor.completed";
    pub const EXECUTOR_FAILED: &'static str = "executor.failed";
    pub const BREAKER_STATE_CHANGED: &'static str = "breaker.state_changed";
    pub const BREAKER_REJECTED: &'static str = "breaker.rejected";
    pub const BREAKER_SUCCESS: &'static str = "breaker.success";
    pub const BREAKER_FAILURE: &'static str = "breaker.failure";
    pub const DELEGATION_HOP: &'static str = "delegation.hop";

    pub fn all() -> Vec<&'static str> {
        vec![
            Self::EXECUTOR_STARTED,
            Self::EXECUTOR_COMPLETED,
            Self::EXECUTOR_FAILED,
            Self::BREAKER_STATE_CHANGED,
            Self::BREAKER_REJECTED,
            Self::BREAKER_SUCCESS,
            Self::BREAKER_FAILURE,
            Self::DELEGATION_HOP,
        ]
    }
}

/// Payload of an engine notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ExecuteStarted {
        librarian_id: String,
        trace_id: String,
    },
    ExecuteCompleted {
        librarian_id: String,
        trace_id: String,
        duration_ms: u64,
        cached: bool,
    },
    ExecuteFailed {
        librarian_id: String,
        trace_id: String,
        duration_ms: u64,
        code: ErrorCode,
    },
    BreakerStateChanged {
        breaker: String,
        from: CircuitState,
        to: CircuitState,
    },
    BreakerRejected {
        breaker: String,
        retry_after_ms: u64,
    },
    BreakerSuccess {
        breaker: String,
        state: CircuitState,
    },
    BreakerFailure {
        breaker: String,
        state: CircuitState,
    },
    DelegationHop {
        from: String,
        to: String,
        depth: usize,
    },
}

impl EngineEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            EngineEvent::ExecuteStarted { .. } => Topics::EXECUTOR_STARTED,
            EngineEvent::ExecuteCompleted { .. } => Topics::EXECUTOR_COMPLETED,
            EngineEvent::ExecuteFailed { .. } => Topics::EXECUTOR_FAILED,
            EngineEvent::BreakerStateChanged { .. } => Topics::BREAKER_STATE_CHANGED,
            EngineEvent::BreakerRejected { .. } => Topics::BREAKER_REJECTED,
            EngineEvent::BreakerSuccess { .. } => Topics::BREAKER_SUCCESS,
            EngineEvent::BreakerFailure { .. } => Topics::BREAKER_FAILURE,
            EngineEvent::DelegationHop { .. } => Topics::DELEGATION_HOP,
        }
    }
}

/// Envelope delivered to subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub topic: String,
    pub payload: EngineEvent,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EngineEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: payload.topic().to_string(),
            payload,
            timestamp: Utc::now(),
            source: source.into(),
        }
    }
}
