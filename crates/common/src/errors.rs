use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config parsing failed: {format} - {reason}")]
    ParsingFailed { format: String, reason: String },

    #[error("Invalid config value: {config_key} = '{value}' - {reason}")]
    InvalidValue {
        config_key: String,
        value: String,
        reason: String,
    },

    #[error("Config validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Logging initialization failed: {reason}")]
    LoggingInit { reason: String },
}

impl ConfigError {
    pub fn invalid_value(
        config_key: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            config_key: config_key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::ParsingFailed {
            format: "yaml".to_string(),
            reason: err.to_string(),
        }
    }
}
