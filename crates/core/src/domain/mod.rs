//! Domain models for the execution and delegation engine

pub mod context;
pub mod response;
pub mod settings;

pub use context::*;
pub use response::*;
pub use settings::*;
