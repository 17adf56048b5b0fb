use thiserror::Error;

/// Decode failures are never fatal: the caller logs and drops the
/// datagram.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed bencode: {0}")]
    Bencode(#[from] serde_bencode::Error),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode message: {0}")]
    Bencode(#[from] serde_bencode::Error),
}
