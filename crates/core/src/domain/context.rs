//! Request context and librarian registration metadata

use super::settings::{CacheSettings, CircuitBreakerConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::time::Instant;

/// Registration record of a librarian, produced once by the loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarianMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Hierarchical dot-delimited tags, e.g. `kubernetes.ops.deploy`
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSettings>,
}

impl LibrarianMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            capabilities,
            team: None,
            circuit_breaker: None,
            cache: None,
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = Some(team.into());
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn with_cache(mut self, cache: CacheSettings) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Case-insensitive substring match against any capability tag
    pub fn has_capability(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.capabilities
            .iter()
            .any(|capability| capability.to_lowercase().contains(&needle))
    }
}

/// Context handed to librarians on every hop.
///
/// Hops never mutate a previous hop's context: every override goes through a
/// consuming or cloning `with_*`/`for_*` method so `delegation_chain` stays an
/// accurate audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Total time budget for the whole delegation chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub delegation_chain: Vec<String>,
    /// Metadata of the librarian currently being executed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub librarian: Option<LibrarianMetadata>,
    /// Free-form data, including context forwarded by a delegating librarian
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// Absolute chain deadline propagated by the delegation engine
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_teams(mut self, teams: Vec<String>) -> Self {
        self.teams = teams;
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.timeout_ms = Some(budget.as_millis() as u64);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Merge a delegate's extra data over the existing extras
    pub fn merged_with(mut self, extra: Option<Map<String, Value>>) -> Self {
        if let Some(extra) = extra {
            self.extra.extend(extra);
        }
        self
    }

    /// Total time budget, if one was given
    pub fn budget(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Time left before the propagated chain deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn librarian_id(&self) -> Option<&str> {
        self.librarian.as_ref().map(|meta| meta.id.as_str())
    }

    /// Copy of this context with the executing librarian's metadata merged in
    pub fn for_librarian(&self, metadata: &LibrarianMetadata) -> Self {
        Self {
            librarian: Some(metadata.clone()),
            ..self.clone()
        }
    }

    /// Copy of this context for the next delegation hop
    pub fn for_hop(&self, chain: &[String], deadline: Option<Instant>) -> Self {
        Self {
            delegation_chain: chain.to_vec(),
            deadline,
            ..self.clone()
        }
    }
}
