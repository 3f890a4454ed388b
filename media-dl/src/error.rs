//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Boundary operations on the queue return these synchronously. Failures that
/// happen after a job was accepted never surface here; they end up on the job
/// itself as a `Failed` state with a classified message.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Queue is full: {capacity} jobs already waiting")]
    QueueFull { capacity: usize },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Cannot clear the queue while {active} job(s) are running")]
    ActiveJobsExist { active: usize },

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn tool(msg: impl Into<String>) -> Self {
        Self::Tool(msg.into())
    }

    /// HTTP status an outer transport should answer with for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::ActiveJobsExist { .. } => 400,
            Error::NotFound { .. } => 404,
            Error::QueueFull { .. } => 429,
            Error::InvalidStateTransition { .. }
            | Error::Tool(_)
            | Error::Configuration(_)
            | Error::Serialization(_)
            | Error::Io(_)
            | Error::Other(_) => 500,
        }
    }

    /// Whether the caller caused this error (4xx class).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// Message safe to show at the boundary.
    ///
    /// Internal failures collapse to a generic message so that paths, OS
    /// errors and other diagnostics stay in the logs.
    pub fn public_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "Internal server error".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::validation("URL is required").http_status(), 400);
        assert_eq!(Error::not_found("Job", "abc").http_status(), 404);
        assert_eq!(Error::QueueFull { capacity: 5 }.http_status(), 429);
        assert_eq!(Error::ActiveJobsExist { active: 1 }.http_status(), 400);
        assert_eq!(Error::Other("boom".into()).http_status(), 500);
        assert_eq!(
            Error::Io(std::io::Error::other("disk")).http_status(),
            500
        );
    }

    #[test]
    fn test_public_message_hides_internal_detail() {
        let err = Error::Io(std::io::Error::other("/secret/path unreadable"));
        assert_eq!(err.public_message(), "Internal server error");

        let err = Error::validation("URL is required");
        assert!(err.public_message().contains("URL is required"));
    }
}
