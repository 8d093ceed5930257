//! Error types for logger setup.
//!
//! Nothing on the request path returns an error; these only surface while
//! building a logger or installing the global subscriber.

/// Error type for configuration and subscriber setup
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),
    #[error("failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

#[cfg(test)]
mod tests {
    use super::ConfigError;

    #[test]
    fn test_error_messages() {
        let err = ConfigError::InvalidLogLevel("loud".into());
        assert_eq!(err.to_string(), "invalid log level \"loud\"");

        let err = ConfigError::SubscriberInit("already set".into());
        assert_eq!(
            err.to_string(),
            "failed to install tracing subscriber: already set"
        );
    }
}
