//! Contracts between the engine and its collaborators

use crate::domain::{RequestContext, Response};
use anyhow::Result;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A pluggable handler answering queries ("knowledge agent").
///
/// Implementations should report their own failures as a [`Response`] with
/// `error` set; an `Err` is treated by the executor as an unexpected fault.
#[async_trait]
pub trait Librarian: Send + Sync {
    async fn answer(&self, query: &str, context: &RequestContext) -> Result<Response>;
}

/// Librarian backed by an async closure
pub struct FnLibrarian<F> {
    handler: F,
}

impl<F> FnLibrarian<F> {
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> Librarian for FnLibrarian<F>
where
    F: Fn(String, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    async fn answer(&self, query: &str, context: &RequestContext) -> Result<Response> {
        (self.handler)(query.to_string(), context.clone()).await
    }
}

/// Wrap an async closure as a shared librarian
pub fn librarian_fn<F, Fut>(handler: F) -> Arc<dyn Librarian>
where
    F: Fn(String, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(FnLibrarian::new(handler))
}

/// Options for storing a cache entry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheSetOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

/// Response cache collaborator.
///
/// Must provide atomic get/set without external locking. Callers treat a
/// failing `get` as a miss and log-and-swallow a failing `set`.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Response>>;

    async fn set(&self, key: &str, value: Response, options: CacheSetOptions) -> Result<()>;
}

/// Dispatch surface the delegation engine drives
#[async_trait]
pub trait LibrarianDispatcher: Send + Sync {
    /// Route one query to one librarian; failures come back as error responses
    async fn route(&self, query: &str, librarian_id: &str, context: RequestContext) -> Response;

    fn contains(&self, librarian_id: &str) -> bool;

    fn librarian_ids(&self) -> Vec<String>;
}
