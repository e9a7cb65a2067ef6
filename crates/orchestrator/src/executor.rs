//! Single-librarian execution
//!
//! [`Executor::execute`] runs one librarian invocation through the response
//! cache, the librarian's circuit breaker, a timeout and response validation.
//! It never fails: every problem comes back as a [`Response`] with `error` set.

use crate::cache::cache_key;
use crate::reliability::{BreakerError, BreakerManager};
use athenaeum_core::{
    CacheSetOptions, EngineEvent, ErrorCode, EventBus, Librarian, RequestContext, Response,
    ResponseCache, ResponseError,
};
use common::{EngineConfig, OperationTimer};
use futures::FutureExt;
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

const EVENT_SOURCE: &str = "executor";
const ANONYMOUS_LIBRARIAN: &str = "anonymous";

/// Why a librarian invocation counts as a breaker failure
#[derive(Debug, Error)]
enum InvocationFailure {
    #[error("Librarian timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("Librarian failed: {0:#}")]
    Handler(anyhow::Error),

    #[error("Librarian panicked: {0}")]
    Panicked(String),

    #[error("Librarian returned none of answer, delegate or error")]
    Invalid,
}

impl InvocationFailure {
    fn into_response(self, librarian_id: &str) -> Response {
        let message = self.to_string();
        let error = match self {
            InvocationFailure::TimedOut(limit) => ResponseError::new(ErrorCode::Timeout, message)
                .with_details(json!({
                    "librarianId": librarian_id,
                    "timeoutMs": limit.as_millis() as u64,
                })),
            InvocationFailure::Handler(err) => {
                ResponseError::new(ErrorCode::ExecutorError, message).with_details(json!({
                    "librarianId": librarian_id,
                    "cause": format!("{err:#}"),
                }))
            }
            InvocationFailure::Panicked(cause) => {
                ResponseError::new(ErrorCode::ExecutorError, message).with_details(json!({
                    "librarianId": librarian_id,
                    "cause": cause,
                }))
            }
            InvocationFailure::Invalid => ResponseError::new(ErrorCode::InvalidResponse, message)
                .with_details(json!({ "librarianId": librarian_id })),
        };
        Response::error(error)
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs librarians under cache, circuit breaker and timeout protection
pub struct Executor {
    breakers: Arc<BreakerManager>,
    cache: Option<Arc<dyn ResponseCache>>,
    events: Option<Arc<EventBus>>,
    default_timeout: Duration,
    cache_enabled: bool,
    cache_ttl: Duration,
}

impl Executor {
    pub fn new(config: &EngineConfig, breakers: Arc<BreakerManager>) -> Self {
        Self {
            breakers,
            cache: None,
            events: None,
            default_timeout: config.default_timeout(),
            cache_enabled: config.cache_enabled,
            cache_ttl: config.cache_ttl(),
        }
    }

    /// Executor with its own breaker store built from `config`
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(BreakerManager::new(config.circuit_breaker.clone())),
        )
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn breakers(&self) -> &Arc<BreakerManager> {
        &self.breakers
    }

    /// Execute one librarian; the librarian id is taken from `context.librarian`
    pub async fn execute(
        &self,
        librarian: &dyn Librarian,
        query: &str,
        context: &RequestContext,
    ) -> Response {
        let started = Instant::now();
        let librarian_id = context
            .librarian_id()
            .unwrap_or(ANONYMOUS_LIBRARIAN)
            .to_string();
        let trace_id = context
            .trace_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.publish(EngineEvent::ExecuteStarted {
            librarian_id: librarian_id.clone(),
            trace_id: trace_id.clone(),
        });

        let mut timer = OperationTimer::new("librarian.execute");
        timer.add_field("librarian_id", &librarian_id);
        timer.add_field("trace_id", &trace_id);

        let span = info_span!("execute", librarian_id = %librarian_id, trace_id = %trace_id);
        let outcome = AssertUnwindSafe(self.run(librarian, query, context, &librarian_id))
            .catch_unwind()
            .instrument(span)
            .await;

        let (mut response, cached) = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let cause = panic_message(&*payload);
                let response = Response::error(
                    ResponseError::new(ErrorCode::ExecutorError, format!("Executor fault: {cause}"))
                        .with_details(json!({ "librarianId": librarian_id, "cause": cause })),
                );
                (response, false)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let metadata = response.metadata_mut();
        metadata.cached = Some(cached);
        metadata.execution_time_ms = Some(duration_ms);
        metadata.trace_id = Some(trace_id.clone());

        match response.error_code() {
            Some(code) => {
                timer.finish_with_result(Err::<(), _>(code));
                self.publish(EngineEvent::ExecuteFailed {
                    librarian_id,
                    trace_id,
                    duration_ms,
                    code,
                });
            }
            None => {
                timer.finish();
                self.publish(EngineEvent::ExecuteCompleted {
                    librarian_id,
                    trace_id,
                    duration_ms,
                    cached,
                });
            }
        }

        response
    }

    async fn run(
        &self,
        librarian: &dyn Librarian,
        query: &str,
        context: &RequestContext,
        librarian_id: &str,
    ) -> (Response, bool) {
        let metadata = context.librarian.as_ref();
        let cache_settings = metadata.and_then(|meta| meta.cache.as_ref());
        let cache = self
            .cache
            .as_ref()
            .filter(|_| self.cache_enabled && cache_settings.map_or(true, |s| s.enabled));
        let key = cache_key(librarian_id, query, context);

        if let Some(cache) = cache {
            match cache.get(&key).await {
                Ok(Some(hit)) => {
                    debug!(librarian_id, "Cache hit");
                    return (hit, true);
                }
                Ok(None) => {}
                Err(err) => warn!(librarian_id, error = %err, "Cache read failed, treating as miss"),
            }
        }

        let breaker = self
            .breakers
            .get_breaker(librarian_id, metadata.and_then(|meta| meta.circuit_breaker.as_ref()));
        let deadline = self.deadline_for(context);

        let response = match breaker
            .execute(|| Self::invoke(librarian, query, context, deadline))
            .await
        {
            Ok(response) => response,
            Err(BreakerError::Open(rejection)) => rejection.into_response(),
            Err(BreakerError::Inner(failure)) => {
                debug!(librarian_id, error = %failure, "Librarian invocation failed");
                failure.into_response(librarian_id)
            }
        };

        if let Some(cache) = cache {
            if response.error.is_none() {
                let options = CacheSetOptions {
                    ttl: Some(
                        cache_settings
                            .and_then(|s| s.ttl())
                            .unwrap_or(self.cache_ttl),
                    ),
                    tags: match cache_settings {
                        Some(settings) if !settings.tags.is_empty() => settings.tags.clone(),
                        _ => vec![format!("librarian:{librarian_id}")],
                    },
                };
                if let Err(err) = cache.set(&key, response.clone(), options).await {
                    warn!(librarian_id, error = %err, "Cache write failed");
                }
            }
        }

        (response, false)
    }

    /// The chain deadline when the call is part of a delegation chain,
    /// otherwise now plus the context budget or the default timeout
    fn deadline_for(&self, context: &RequestContext) -> Instant {
        context
            .deadline
            .unwrap_or_else(|| Instant::now() + context.budget().unwrap_or(self.default_timeout))
    }

    async fn invoke(
        librarian: &dyn Librarian,
        query: &str,
        context: &RequestContext,
        deadline: Instant,
    ) -> Result<Response, InvocationFailure> {
        let started = Instant::now();
        let call = AssertUnwindSafe(librarian.answer(query, context)).catch_unwind();

        let outcome = tokio::time::timeout_at(deadline, call)
            .await
            .map_err(|_| InvocationFailure::TimedOut(deadline.saturating_duration_since(started)))?;

        match outcome {
            Err(payload) => Err(InvocationFailure::Panicked(panic_message(&*payload))),
            Ok(Err(err)) => Err(InvocationFailure::Handler(err)),
            Ok(Ok(response)) if !response.is_valid() => Err(InvocationFailure::Invalid),
            Ok(Ok(response)) => Ok(response),
        }
    }

    fn publish(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.publish(EVENT_SOURCE, event);
        }
    }
}
