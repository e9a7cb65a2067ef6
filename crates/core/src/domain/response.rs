//! Response model returned by librarians and by the engine itself.
//!
//! Every failure crossing the engine boundary is carried as data in
//! [`Response::error`], never as a Rust error or a panic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Stable error-code vocabulary produced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Requested librarian id is not registered
    LibrarianNotFound,
    /// A single librarian call exceeded its timeout
    Timeout,
    /// Librarian output had none of answer, delegate or error
    InvalidResponse,
    /// Unexpected fault while executing one librarian
    ExecutorError,
    /// Chain budget was already spent before a hop started
    TimeoutExceeded,
    /// Delegation chain grew past the maximum depth
    MaxDelegationDepthExceeded,
    /// A librarian appeared twice in one delegation chain
    DelegationLoopDetected,
    /// Delegate request named an unregistered librarian
    DelegationTargetNotFound,
    /// A hop was in flight when the chain budget ran out
    LibrarianTimeout,
    /// Unexpected fault while driving the delegation chain
    ExecutionError,
    /// Circuit breaker rejected the call
    CircuitBreakerOpen,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::LibrarianNotFound => "LIBRARIAN_NOT_FOUND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InvalidResponse => "INVALID_RESPONSE",
            ErrorCode::ExecutorError => "EXECUTOR_ERROR",
            ErrorCode::TimeoutExceeded => "TIMEOUT_EXCEEDED",
            ErrorCode::MaxDelegationDepthExceeded => "MAX_DELEGATION_DEPTH_EXCEEDED",
            ErrorCode::DelegationLoopDetected => "DELEGATION_LOOP_DETECTED",
            ErrorCode::DelegationTargetNotFound => "DELEGATION_TARGET_NOT_FOUND",
            ErrorCode::LibrarianTimeout => "LIBRARIAN_TIMEOUT",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
        }
    }

    /// Whether a client may retry the same request (possibly with a fresh budget)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::TimeoutExceeded
                | ErrorCode::LibrarianTimeout
                | ErrorCode::CircuitBreakerOpen
        )
    }

    /// Default human-readable hint attached to errors of this kind
    pub fn default_suggestion(&self) -> Option<&'static str> {
        match self {
            ErrorCode::LibrarianNotFound => Some("Check the librarian id against the registry"),
            ErrorCode::Timeout | ErrorCode::TimeoutExceeded | ErrorCode::LibrarianTimeout => {
                Some("Retry with a larger time budget")
            }
            ErrorCode::MaxDelegationDepthExceeded | ErrorCode::DelegationLoopDetected => {
                Some("Review the delegation targets of the librarians in the chain")
            }
            ErrorCode::CircuitBreakerOpen => Some("Retry after the circuit breaker cooldown"),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error payload carried by a [`Response`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ResponseError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            recoverable: code.is_recoverable(),
            suggestion: code.default_suggestion().map(str::to_string),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Citation attached to an answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// A librarian's request to forward the query to another librarian
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegateRequest {
    /// Target librarian id
    pub to: String,
    /// Refined query; the original query is reused when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Extra data merged into the next hop's context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
    /// Alternate target used when `to` is not registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DelegateRequest {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            to: target.into(),
            query: None,
            context: None,
            fallback: None,
            reason: None,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Metadata stamped onto responses by the executor and the delegation engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    /// Time spent in the executor for the last hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_chain: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_reason: Option<String>,
    /// Wall time of the whole delegation chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<u64>,
    /// Librarian-defined fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Answer, delegation request or error produced by a librarian
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegate: Option<DelegateRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

impl Response {
    pub fn answer(answer: impl Into<String>) -> Self {
        Self {
            answer: Some(answer.into()),
            ..Self::default()
        }
    }

    pub fn delegate(request: DelegateRequest) -> Self {
        Self {
            delegate: Some(request),
            ..Self::default()
        }
    }

    pub fn error(error: ResponseError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    /// Shorthand for an error response with the code's default flags
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::error(ResponseError::new(code, message))
    }

    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = Some(sources);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// A response must carry at least one of answer, delegate or error
    pub fn is_valid(&self) -> bool {
        self.answer.is_some() || self.delegate.is_some() || self.error.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }

    pub fn metadata_mut(&mut self) -> &mut ResponseMetadata {
        self.metadata.get_or_insert_with(ResponseMetadata::default)
    }
}

impl From<ResponseError> for Response {
    fn from(error: ResponseError) -> Self {
        Response::error(error)
    }
}
