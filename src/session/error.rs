use std::time::Duration;

/// Errors surfaced by session operations.
///
/// Validation variants are raised before any connection attempt. Store
/// failures never appear here: they are reported as outcomes and only
/// degrade durability.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("invalid phone number '{0}': expected 10-11 national digits or the full international form")]
    InvalidPhone(String),

    #[error("wait {} seconds before trying again", .remaining.as_secs_f64().ceil() as u64)]
    Cooldown { remaining: Duration },

    #[error("session {0} is already connected")]
    AlreadyConnected(String),

    #[error("session {0} is not connected")]
    NotConnected(String),

    #[error("no QR code available for session {0}")]
    QrUnavailable(String),

    #[error("timed out waiting for pairing code")]
    PairingTimeout,

    #[error("connection closed before pairing completed")]
    PairingInterrupted,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("credential workspace error: {0}")]
    Workspace(#[from] crate::session::workspace::WorkspaceError),

    #[error("session {0} was cleared or replaced while connecting")]
    Superseded(String),

    #[error("session manager is shutting down")]
    ShuttingDown,
}

impl SessionError {
    pub fn protocol(err: impl std::fmt::Display) -> Self {
        Self::Protocol(err.to_string())
    }

    /// True for failures caused by caller input rather than runtime state.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidSessionId(_) | Self::InvalidPhone(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_message_rounds_up_to_whole_seconds() {
        let err = SessionError::Cooldown {
            remaining: Duration::from_millis(12_300),
        };
        assert_eq!(err.to_string(), "wait 13 seconds before trying again");
    }

    #[test]
    fn validation_classification() {
        assert!(SessionError::InvalidPhone("1".into()).is_validation());
        assert!(SessionError::InvalidSessionId(String::new()).is_validation());
        assert!(!SessionError::PairingTimeout.is_validation());
    }
}
