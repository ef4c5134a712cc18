use thiserror::Error;

/// Errors raised while reading and validating service settings.
///
/// All of them are fatal: the service refuses to start.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("{var} '{value}' is outside the allowed range {range}")]
    OutOfRange {
        var: String,
        value: String,
        range: String,
    },
}
