pub mod config;
pub mod errors;
pub mod structured_logging;

pub use config::{EngineConfig, ENV_PREFIX};

pub use errors::{ConfigError, ConfigResult};

pub use structured_logging::{
    init_structured_logging,
    LoggingConfig,
    LogFormat,
    StructuredLogEntry,
    HostContext,
    OperationTimer,
};
