/// Recoverable errors raised while handling client input.
///
/// None of these terminate a connection: the connection manager turns each
/// one into an ERROR envelope sent back to the offending client.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("session {0} is closed")]
    SessionClosed(String),
}

impl BrokerError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope(reason.into())
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedEnvelope(_) => "malformed_envelope",
            Self::UnknownCommand(_) => "unknown_command",
            Self::SessionClosed(_) => "session_closed",
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
