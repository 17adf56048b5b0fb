//! The bencoded KRPC query/response/error codec. This crate knows nothing
//! about routing tries or sockets: it only turns `Envelope` values into
//! bytes and back, and hands out transaction ids.

mod error;
mod message;
mod txid;

pub use error::{DecodeError, EncodeError};
pub use message::{Body, Envelope, PortValue, Query, Response};
pub use txid::TxIdGenerator;

pub fn encode(msg: &Envelope) -> Result<Vec<u8>, EncodeError> {
    serde_bencode::to_bytes(msg).map_err(EncodeError::from)
}

pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    serde_bencode::from_bytes(bytes).map_err(DecodeError::from)
}
