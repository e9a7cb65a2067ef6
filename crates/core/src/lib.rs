//! Core domain models and contracts for Athenaeum
//!
//! This crate contains the layer shared by every other crate in the workspace:
//! - Domain: Response, ResponseError, ErrorCode, DelegateRequest, RequestContext,
//!   LibrarianMetadata, circuit breaker and cache settings
//! - Contracts: Librarian, ResponseCache, LibrarianDispatcher
//! - Events: EngineEvent and the broadcast EventBus used for telemetry

pub mod contracts;
pub mod domain;
pub mod events;

pub use contracts::*;
pub use domain::*;
pub use events::*;

/// Re-export common types
pub use anyhow::{Error, Result};
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use uuid::Uuid;
