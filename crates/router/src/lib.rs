//! Librarian registry and dispatch
//!
//! The [`Router`] maps librarian ids to their handler and registration
//! metadata and hands each routed query to the shared [`Executor`]. It is
//! filled once at startup and only read afterwards, and it is the
//! [`LibrarianDispatcher`] the delegation engine drives.

use async_trait::async_trait;
use athenaeum_core::{
    ErrorCode, Librarian, LibrarianDispatcher, LibrarianMetadata, RequestContext, Response,
    ResponseError,
};
use common::EngineConfig;
use orchestrator::Executor;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Librarian '{id}' is already registered")]
    DuplicateId { id: String },

    #[error("Invalid metadata for librarian '{id}': {reason}")]
    InvalidMetadata { id: String, reason: String },
}

struct RegisteredLibrarian {
    metadata: LibrarianMetadata,
    librarian: Arc<dyn Librarian>,
}

pub struct Router {
    librarians: HashMap<String, RegisteredLibrarian>,
    executor: Arc<Executor>,
}

impl Router {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self {
            librarians: HashMap::new(),
            executor,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Arc::new(Executor::from_config(config)))
    }

    pub fn register(
        &mut self,
        metadata: LibrarianMetadata,
        librarian: Arc<dyn Librarian>,
    ) -> Result<(), RegistryError> {
        validate_metadata(&metadata)?;

        if self.librarians.contains_key(&metadata.id) {
            return Err(RegistryError::DuplicateId {
                id: metadata.id.clone(),
            });
        }

        info!(
            librarian_id = %metadata.id,
            capabilities = ?metadata.capabilities,
            "Registered librarian"
        );
        self.librarians.insert(
            metadata.id.clone(),
            RegisteredLibrarian {
                metadata,
                librarian,
            },
        );
        Ok(())
    }

    /// Run one librarian; unknown ids come back as `LIBRARIAN_NOT_FOUND`
    pub async fn route(
        &self,
        query: &str,
        librarian_id: &str,
        context: RequestContext,
    ) -> Response {
        let Some(registered) = self.librarians.get(librarian_id) else {
            let available = self.ids();
            warn!(librarian_id, "Librarian not found");
            return Response::error(
                ResponseError::new(
                    ErrorCode::LibrarianNotFound,
                    format!("Librarian '{librarian_id}' is not registered"),
                )
                .with_details(json!({
                    "librarianId": librarian_id,
                    "availableLibrarians": available,
                })),
            );
        };

        debug!(librarian_id, "Routing query");
        let context = context.for_librarian(&registered.metadata);
        self.executor
            .execute(registered.librarian.as_ref(), query, &context)
            .await
    }

    /// All registrations, sorted by id
    pub fn get_all_librarians(&self) -> Vec<&LibrarianMetadata> {
        let mut all: Vec<_> = self.librarians.values().map(|r| &r.metadata).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn get_metadata(&self, librarian_id: &str) -> Option<&LibrarianMetadata> {
        self.librarians.get(librarian_id).map(|r| &r.metadata)
    }

    /// Librarians with a capability tag containing `needle`, case-insensitively
    pub fn find_by_capability(&self, needle: &str) -> Vec<&LibrarianMetadata> {
        self.get_all_librarians()
            .into_iter()
            .filter(|metadata| metadata.has_capability(needle))
            .collect()
    }

    pub fn contains(&self, librarian_id: &str) -> bool {
        self.librarians.contains_key(librarian_id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.librarians.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.librarians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.librarians.is_empty()
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }
}

#[async_trait]
impl LibrarianDispatcher for Router {
    async fn route(&self, query: &str, librarian_id: &str, context: RequestContext) -> Response {
        Router::route(self, query, librarian_id, context).await
    }

    fn contains(&self, librarian_id: &str) -> bool {
        Router::contains(self, librarian_id)
    }

    fn librarian_ids(&self) -> Vec<String> {
        self.ids()
    }
}

fn validate_metadata(metadata: &LibrarianMetadata) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidMetadata {
        id: metadata.id.clone(),
        reason: reason.to_string(),
    };

    if metadata.id.trim().is_empty() {
        return Err(invalid("id is empty"));
    }
    if metadata.name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if metadata.description.trim().is_empty() {
        return Err(invalid("description is empty"));
    }
    if metadata.capabilities.is_empty() {
        return Err(invalid("at least one capability is required"));
    }
    if metadata.capabilities.iter().any(|c| c.trim().is_empty()) {
        return Err(invalid("capabilities must not be empty strings"));
    }
    if let Some(reason) = metadata
        .circuit_breaker
        .as_ref()
        .and_then(|config| config.validation_error())
    {
        return Err(invalid(&format!("circuit breaker: {reason}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use athenaeum_core::{librarian_fn, CircuitBreakerConfig};
    use rstest::rstest;

    fn echo() -> Arc<dyn Librarian> {
        librarian_fn(|query, _ctx| async move { Ok(Response::answer(format!("Echo: {query}"))) })
    }

    fn metadata(id: &str, capabilities: &[&str]) -> LibrarianMetadata {
        LibrarianMetadata::new(
            id,
            format!("{id} librarian"),
            format!("Answers {id} questions"),
            capabilities.iter().map(|c| c.to_string()).collect(),
        )
    }

    fn router() -> Router {
        Router::from_config(&EngineConfig::default())
    }

    #[test]
    fn test_duplicate_id_is_rejected() {
        let mut router = router();
        router.register(metadata("echo", &["test.echo"]), echo()).unwrap();

        let err = router
            .register(metadata("echo", &["test.other"]), echo())
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId { id: "echo".into() });
        assert_eq!(router.len(), 1);
    }

    #[rstest]
    #[case::empty_id(metadata("", &["a"]))]
    #[case::no_capabilities(metadata("echo", &[]))]
    #[case::blank_capability(metadata("echo", &[" "]))]
    #[case::empty_name(LibrarianMetadata::new("echo", "", "desc", vec!["a".into()]))]
    #[case::bad_breaker(metadata("echo", &["a"]).with_circuit_breaker(CircuitBreakerConfig {
        failure_threshold: 2.0,
        ..Default::default()
    }))]
    fn test_invalid_metadata_is_rejected(#[case] metadata: LibrarianMetadata) {
        let mut router = router();
        assert!(matches!(
            router.register(metadata, echo()),
            Err(RegistryError::InvalidMetadata { .. })
        ));
        assert!(router.is_empty());
    }

    #[test]
    fn test_find_by_capability() {
        let mut router = router();
        router
            .register(metadata("k8s", &["kubernetes.ops.deploy", "cloud.infra"]), echo())
            .unwrap();
        router
            .register(metadata("billing", &["finance.invoices"]), echo())
            .unwrap();
        router
            .register(metadata("aws", &["cloud.aws.ec2"]), echo())
            .unwrap();

        let ids = |found: Vec<&LibrarianMetadata>| {
            found.into_iter().map(|m| m.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(router.find_by_capability("CLOUD")), vec!["aws", "k8s"]);
        assert_eq!(ids(router.find_by_capability("ops.deploy")), vec!["k8s"]);
        assert!(router.find_by_capability("weather").is_empty());
    }

    #[test]
    fn test_unknown_librarian_lists_available_ids() {
        let mut router = router();
        router.register(metadata("zeta", &["z"]), echo()).unwrap();
        router.register(metadata("alpha", &["a"]), echo()).unwrap();

        let response = tokio_test::block_on(router.route("q", "missing", RequestContext::new()));

        let error = response.error.unwrap();
        assert_eq!(error.code, ErrorCode::LibrarianNotFound);
        assert!(!error.recoverable);
        assert_eq!(
            error.details.unwrap()["availableLibrarians"],
            json!(["alpha", "zeta"])
        );
    }

    #[tokio::test]
    async fn test_route_merges_metadata_into_context() {
        let mut router = router();
        router
            .register(
                metadata("whoami", &["test.identity"]).with_team("platform"),
                librarian_fn(|_query, ctx: RequestContext| async move {
                    let team = ctx.librarian.and_then(|m| m.team).unwrap_or_default();
                    Ok(Response::answer(team))
                }),
            )
            .unwrap();

        let response = router.route("q", "whoami", RequestContext::new()).await;

        assert_eq!(response.answer.as_deref(), Some("platform"));
        assert_eq!(router.get_metadata("whoami").unwrap().team.as_deref(), Some("platform"));
    }
}
