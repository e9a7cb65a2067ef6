//! Execution & delegation engine
//!
//! Runs librarians safely and drives handler-to-handler delegation:
//!
//! - **CircuitBreaker**: windowed failure-rate breaker per librarian
//! - **BreakerManager**: owner of the librarian id → breaker store
//! - **InMemoryResponseCache**: TTL + tag cache behind the `ResponseCache` contract
//! - **Executor**: one librarian invocation through cache, breaker, timeout and validation
//! - **DelegationExecutor**: follows delegate requests under a shared deadline,
//!   a hop limit and loop detection
//!
//! # Usage
//!
//! ```no_run
//! use athenaeum_core::{LibrarianDispatcher, RequestContext};
//! use orchestrator::DelegationExecutor;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! async fn ask(dispatcher: Arc<dyn LibrarianDispatcher>) {
//!     let delegation = DelegationExecutor::new(dispatcher);
//!     let context = RequestContext::new()
//!         .with_user("ada")
//!         .with_timeout(Duration::from_secs(5));
//!     let response = delegation.execute("how do I roll back?", "kubernetes", context).await;
//!     println!("{:?}", response.answer);
//! }
//! ```

pub mod cache;
pub mod delegation;
pub mod executor;
pub mod reliability;

pub use cache::{cache_key, user_fingerprint, InMemoryResponseCache};
pub use delegation::{DelegationExecutor, DelegationState};
pub use executor::Executor;
pub use reliability::{
    BreakerError, BreakerManager, CircuitBreaker, CircuitBreakerStats, CircuitOpen,
};
