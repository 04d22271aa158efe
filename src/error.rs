//! Error types for the tamalebot core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Longest error text allowed to cross the process boundary.
const EXTERNAL_MESSAGE_CAP: usize = 200;

/// Main error type for the runtime
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem or pipe error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failure talking to the LLM provider; fatal for the current turn
    #[error("Provider error: {0}")]
    Provider(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Credential vault error
    #[error("Vault error: {0}")]
    Vault(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        Error::Provider(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new vault error
    pub fn vault(msg: impl Into<String>) -> Self {
        Error::Vault(msg.into())
    }

    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Error text safe to surface outside the process.
    ///
    /// Capped at 200 characters; never includes backtraces or source chains.
    pub fn external_message(&self) -> String {
        let full = self.to_string();
        if full.len() <= EXTERNAL_MESSAGE_CAP {
            return full;
        }
        let mut end = EXTERNAL_MESSAGE_CAP;
        while !full.is_char_boundary(end) {
            end -= 1;
        }
        full[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("missing API key");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: missing API key");
    }

    #[test]
    fn test_error_provider() {
        let err = Error::provider("429 Too Many Requests");
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(err.to_string(), "Provider error: 429 Too Many Requests");
    }

    #[test]
    fn test_error_vault() {
        let err = Error::vault("decryption failed");
        assert!(matches!(err, Error::Vault(_)));
        assert_eq!(err.to_string(), "Vault error: decryption failed");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("unknown tool 'frobnicate'");
        assert!(matches!(err, Error::Tool(_)));
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_external_message_cap() {
        let err = Error::other("x".repeat(500));
        let msg = err.external_message();
        assert_eq!(msg.len(), 200);
    }

    #[test]
    fn test_external_message_short_passthrough() {
        let err = Error::other("short");
        assert_eq!(err.external_message(), "Error: short");
    }

    #[test]
    fn test_external_message_char_boundary() {
        // Multi-byte content near the cap must not split a char.
        let err = Error::other("é".repeat(300));
        let msg = err.external_message();
        assert!(msg.len() <= 200);
        assert!(msg.is_char_boundary(msg.len()));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
