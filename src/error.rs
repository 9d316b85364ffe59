use thiserror::Error;

#[derive(Error, Debug)]
pub enum HookworkError {
    #[error("Delivery not found: {id}")]
    DeliveryNotFound { id: String },

    #[error("Source not found: {id}")]
    SourceNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source error: {message}")]
    Source { message: String },

    #[error("Delivery error: {message}")]
    Delivery { message: String },

    #[error("Rate limit error: {message}")]
    RateLimit { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Signature error: {message}")]
    Signature { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

// Add From implementations for toml errors
impl From<toml::de::Error> for HookworkError {
    fn from(err: toml::de::Error) -> Self {
        HookworkError::Config(format!("TOML deserialization error: {}", err))
    }
}

impl From<toml::ser::Error> for HookworkError {
    fn from(err: toml::ser::Error) -> Self {
        HookworkError::Config(format!("TOML serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let source_error = HookworkError::Source {
            message: "Test source error".to_string(),
        };
        assert_eq!(source_error.to_string(), "Source error: Test source error");

        let delivery_error = HookworkError::Delivery {
            message: "Test delivery error".to_string(),
        };
        assert_eq!(
            delivery_error.to_string(),
            "Delivery error: Test delivery error"
        );

        let not_found = HookworkError::DeliveryNotFound {
            id: "test-id".to_string(),
        };
        assert_eq!(not_found.to_string(), "Delivery not found: test-id");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_error.is_err());

        let hookwork_error: HookworkError = json_error.unwrap_err().into();
        assert!(matches!(hookwork_error, HookworkError::Serialization(_)));
    }

    #[test]
    fn test_error_debug() {
        let error = HookworkError::Source {
            message: "Debug test".to_string(),
        };

        let debug_str = format!("{:?}", error);
        assert!(debug_str.contains("Source"));
        assert!(debug_str.contains("Debug test"));
    }
}
