//! Delegation engine
//!
//! Follows librarian-to-librarian delegate requests as an explicit loop. The
//! loop carries a [`DelegationState`] (visited ids, depth and the absolute
//! chain deadline) so that every hop spends from one shared time budget and a
//! chain can neither revisit a librarian nor grow past the depth limit.

use crate::executor::panic_message;
use athenaeum_core::{
    DelegateRequest, EngineEvent, ErrorCode, EventBus, LibrarianDispatcher, RequestContext,
    Response, ResponseError,
};
use common::EngineConfig;
use futures::FutureExt;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Hops allowed in one chain unless configured otherwise
pub const DEFAULT_MAX_DELEGATION_DEPTH: usize = 5;

const EVENT_SOURCE: &str = "delegation";

/// Per-request bookkeeping threaded through every hop
#[derive(Debug, Clone)]
pub struct DelegationState {
    visited: Vec<String>,
    depth: usize,
    deadline: Option<Instant>,
    started: Instant,
}

impl DelegationState {
    pub fn new(budget: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            visited: Vec::new(),
            depth: 0,
            deadline: budget.map(|budget| started + budget),
            started,
        }
    }

    /// State for a request entering the engine.
    ///
    /// A context that already carries a chain (a librarian calling back into
    /// the engine) continues that chain and its deadline.
    pub fn for_context(context: &RequestContext) -> Self {
        let mut state = Self::new(context.budget());
        if context.deadline.is_some() {
            state.deadline = context.deadline;
        }
        state.visited = context.delegation_chain.clone();
        state.depth = state.visited.len();
        state
    }

    /// Checks run before entering `librarian_id`: deadline, then depth, then loop
    pub fn check(&self, librarian_id: &str, max_depth: usize) -> Result<(), ResponseError> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ResponseError::new(
                    ErrorCode::TimeoutExceeded,
                    format!("Time budget exhausted before reaching '{librarian_id}'"),
                )
                .with_details(json!({
                    "librarianId": librarian_id,
                    "elapsedMs": self.elapsed().as_millis() as u64,
                    "delegationChain": self.visited,
                })));
            }
        }

        if self.depth >= max_depth {
            return Err(ResponseError::new(
                ErrorCode::MaxDelegationDepthExceeded,
                format!("Delegation to '{librarian_id}' would exceed the maximum depth of {max_depth}"),
            )
            .with_details(json!({
                "librarianId": librarian_id,
                "maxDepth": max_depth,
                "delegationChain": self.visited,
            })));
        }

        if self.visited.iter().any(|visited| visited == librarian_id) {
            return Err(ResponseError::new(
                ErrorCode::DelegationLoopDetected,
                format!("Librarian '{librarian_id}' already appears in the delegation chain"),
            )
            .with_details(json!({
                "librarianId": librarian_id,
                "delegationChain": self.visited,
            })));
        }

        Ok(())
    }

    pub fn enter(&mut self, librarian_id: &str) {
        self.visited.push(librarian_id.to_string());
        self.depth += 1;
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn chain(&self) -> &[String] {
        &self.visited
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Drives a query through a chain of delegating librarians
pub struct DelegationExecutor {
    dispatcher: Arc<dyn LibrarianDispatcher>,
    max_depth: usize,
    events: Option<Arc<EventBus>>,
}

impl DelegationExecutor {
    pub fn new(dispatcher: Arc<dyn LibrarianDispatcher>) -> Self {
        Self {
            dispatcher,
            max_depth: DEFAULT_MAX_DELEGATION_DEPTH,
            events: None,
        }
    }

    pub fn from_config(dispatcher: Arc<dyn LibrarianDispatcher>, config: &EngineConfig) -> Self {
        Self::new(dispatcher).with_max_depth(config.max_delegation_depth)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Answer `query` starting at `librarian_id`, following delegations.
    ///
    /// Never fails; every problem comes back as a [`Response`] with `error`
    /// set and `metadata.delegationChain` describing how far the chain got.
    pub async fn execute(
        &self,
        query: &str,
        librarian_id: &str,
        context: RequestContext,
    ) -> Response {
        let mut state = DelegationState::for_context(&context);
        let mut hop_context = context;
        let mut query = query.to_string();
        let mut target = librarian_id.to_string();
        let mut reason: Option<String> = None;

        if !self.dispatcher.contains(&target) {
            warn!(librarian_id = %target, "Entry librarian not found");
            let error = self.entry_not_found(&target);
            return self.finish(Response::error(error), &state, reason);
        }

        loop {
            if let Err(error) = state.check(&target, self.max_depth) {
                warn!(librarian_id = %target, code = %error.code, "Delegation stopped");
                return self.finish(Response::error(error), &state, reason);
            }

            let previous = state.chain().last().cloned();
            state.enter(&target);
            debug!(
                librarian_id = %target,
                depth = state.depth(),
                remaining_ms = state.remaining().map(|r| r.as_millis() as u64),
                "Dispatching hop"
            );
            if let Some(from) = previous {
                self.publish(EngineEvent::DelegationHop {
                    from,
                    to: target.clone(),
                    depth: state.depth(),
                });
            }

            let next_context = hop_context.for_hop(state.chain(), state.deadline());
            let response = match self.dispatch(&query, &target, next_context, &state).await {
                Ok(response) => response,
                Err(error) => return self.finish(Response::error(error), &state, reason),
            };

            let delegate = match response.delegate.clone() {
                Some(delegate) if response.error.is_none() => delegate,
                _ => return self.finish(response, &state, reason),
            };

            let next = match self.resolve_target(&delegate, &target) {
                Ok(next) => next,
                Err(error) => return self.finish(Response::error(error), &state, reason),
            };

            info!(from = %target, to = %next, depth = state.depth(), "Delegating");
            if reason.is_none() {
                reason = Some(
                    delegate
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("delegated from {target} to {next}")),
                );
            }

            if let Some(refined) = delegate.query {
                query = refined;
            }
            hop_context = hop_context.merged_with(delegate.context);
            target = next;
        }
    }

    /// Route one hop, racing the chain deadline when there is one
    async fn dispatch(
        &self,
        query: &str,
        target: &str,
        context: RequestContext,
        state: &DelegationState,
    ) -> Result<Response, ResponseError> {
        let call = AssertUnwindSafe(self.dispatcher.route(query, target, context)).catch_unwind();

        let outcome = match state.deadline() {
            Some(deadline) => match tokio::time::timeout_at(deadline, call).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(Self::librarian_timeout(target, state)),
            },
            None => call.await,
        };

        let response = outcome.map_err(|payload| {
            let cause = panic_message(&*payload);
            warn!(librarian_id = %target, cause = %cause, "Delegation hop panicked");
            ResponseError::new(
                ErrorCode::ExecutionError,
                format!("Delegation failed at '{target}': {cause}"),
            )
            .with_details(json!({
                "librarianId": target,
                "cause": cause,
                "delegationChain": state.chain(),
            }))
        })?;

        // The executor races the same deadline, so its timeout is the hop's
        let deadline_passed = state.deadline().is_some_and(|d| Instant::now() >= d);
        if deadline_passed && response.error_code() == Some(ErrorCode::Timeout) {
            return Err(Self::librarian_timeout(target, state));
        }
        Ok(response)
    }

    fn librarian_timeout(target: &str, state: &DelegationState) -> ResponseError {
        warn!(librarian_id = %target, "Librarian exceeded the chain deadline");
        ResponseError::new(
            ErrorCode::LibrarianTimeout,
            format!("Librarian '{target}' did not answer within the remaining time budget"),
        )
        .with_details(json!({
            "librarianId": target,
            "elapsedMs": state.elapsed().as_millis() as u64,
            "delegationChain": state.chain(),
        }))
    }

    /// The entry librarian must exist before it joins the chain
    fn entry_not_found(&self, librarian_id: &str) -> ResponseError {
        let mut available = self.dispatcher.librarian_ids();
        available.sort();
        ResponseError::new(
            ErrorCode::LibrarianNotFound,
            format!("Librarian '{librarian_id}' is not registered"),
        )
        .with_details(json!({
            "librarianId": librarian_id,
            "availableLibrarians": available,
        }))
    }

    /// `to` when registered, else `fallback` when registered
    fn resolve_target(&self, delegate: &DelegateRequest, from: &str) -> Result<String, ResponseError> {
        if self.dispatcher.contains(&delegate.to) {
            return Ok(delegate.to.clone());
        }

        if let Some(fallback) = &delegate.fallback {
            if self.dispatcher.contains(fallback) {
                info!(from, target = %delegate.to, fallback = %fallback, "Delegation target missing, using fallback");
                return Ok(fallback.clone());
            }
        }

        let mut available = self.dispatcher.librarian_ids();
        available.sort();
        Err(ResponseError::new(
            ErrorCode::DelegationTargetNotFound,
            format!("Librarian '{from}' delegated to unknown librarian '{}'", delegate.to),
        )
        .with_details(json!({
            "target": delegate.to,
            "fallback": delegate.fallback,
            "availableLibrarians": available,
        })))
    }

    fn finish(
        &self,
        mut response: Response,
        state: &DelegationState,
        reason: Option<String>,
    ) -> Response {
        let metadata = response.metadata_mut();
        metadata.delegation_chain = Some(state.chain().to_vec());
        metadata.execution_time = Some(state.elapsed().as_millis() as u64);
        if let Some(reason) = reason {
            metadata.delegated = Some(true);
            metadata.delegation_reason = Some(reason);
        }
        response
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(EVENT_SOURCE, event);
        }
    }
}
