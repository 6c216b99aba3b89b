//! Crate-level error type for the adapter binary and embedding applications

use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Top-level error wrapping every layer of the adapter
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },
}

impl AdapterError {
    pub fn logging<S: Into<String>>(message: S) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    /// Process exit code used by the binary
    pub fn exit_code(&self) -> i32 {
        match self {
            AdapterError::Config(_) => 2,
            AdapterError::Mqtt(_) => 3,
            AdapterError::Io(_) | AdapterError::Logging { .. } => 1,
        }
    }
}

pub type AdapterResult<T> = Result<T, AdapterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mqtt::ConnectionState;

    #[test]
    fn test_error_conversions() {
        let config: AdapterError = ConfigError::InvalidConfig("bad port".to_string()).into();
        assert!(config.to_string().contains("bad port"));
        assert_eq!(config.exit_code(), 2);

        let mqtt: AdapterError = MqttError::NotConnected {
            state: ConnectionState::Disabled,
        }
        .into();
        assert!(mqtt.to_string().contains("disabled"));
        assert_eq!(mqtt.exit_code(), 3);

        let io: AdapterError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert_eq!(io.exit_code(), 1);
        assert_eq!(AdapterError::logging("x").exit_code(), 1);
    }
}
