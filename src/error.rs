use thiserror::Error;

/// Failures reported by a [`crate::store::MailStore`] or [`crate::store::Connector`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection error: {0}")]
    Network(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("server rejected request: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Timeouts and dropped connections may succeed on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Network(_) | StoreError::Timeout(_))
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error: {0}")]
    Protocol(String),

    #[error("{0}")]
    NotFound(String),

    #[error("unknown command '/{input}'{}", suggestion_hint(.suggestion))]
    UnknownCommand {
        input: String,
        suggestion: Option<String>,
    },

    #[error("{0}")]
    State(String),

    #[error("interrupted")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(", did you mean /{}?", s),
        None => String::new(),
    }
}

impl MailError {
    /// Short machine-readable name used by the JSON line mode.
    pub fn kind(&self) -> &'static str {
        match self {
            MailError::Auth(_) => "auth",
            MailError::Network(_) => "network",
            MailError::Protocol(_) => "protocol",
            MailError::NotFound(_) => "not_found",
            MailError::UnknownCommand { .. } => "unknown_command",
            MailError::State(_) => "state",
            MailError::Cancelled => "cancelled",
            MailError::Io(_) => "io",
        }
    }
}

impl From<StoreError> for MailError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Auth(e) => MailError::Auth(e),
            StoreError::Network(e) => MailError::Network(e),
            StoreError::Timeout(secs) => {
                MailError::Network(format!("request timed out after {}s", secs))
            }
            StoreError::Protocol(e) => MailError::Protocol(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, MailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Network("reset".into()).is_transient());
        assert!(StoreError::Timeout(30).is_transient());
        assert!(!StoreError::Auth("bad password".into()).is_transient());
        assert!(!StoreError::Protocol("NO".into()).is_transient());
    }

    #[test]
    fn test_unknown_command_message() {
        let err = MailError::UnknownCommand {
            input: "inbx".to_string(),
            suggestion: Some("inbox".to_string()),
        };
        assert_eq!(err.to_string(), "unknown command '/inbx', did you mean /inbox?");

        let err = MailError::UnknownCommand {
            input: "zzz".to_string(),
            suggestion: None,
        };
        assert_eq!(err.to_string(), "unknown command '/zzz'");
    }

    #[test]
    fn test_store_error_maps_to_taxonomy() {
        assert!(matches!(
            MailError::from(StoreError::Timeout(5)),
            MailError::Network(_)
        ));
        assert!(matches!(
            MailError::from(StoreError::Auth("x".into())),
            MailError::Auth(_)
        ));
        assert_eq!(MailError::from(StoreError::Protocol("x".into())).kind(), "protocol");
    }
}
