use thiserror::Error;

/// Transport-boundary failures. None of these are fatal: the offending
/// operation is abandoned and logged.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind UDP socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),
    #[error("hostname did not resolve to any address: {0}")]
    UnresolvedHost(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
