//! Binary encoding of wire values
//!
//! Argument and return payloads are postcard-encoded [`Value`]s, one payload
//! per positional argument. Decoding is all-or-nothing: a payload that does
//! not parse fails the whole call before anything is invoked.

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed value payload: {0}")]
    Malformed(postcard::Error),
    #[error("failed to encode value: {0}")]
    Encode(postcard::Error),
}

pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(CodecError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    postcard::from_bytes(bytes).map_err(CodecError::Malformed)
}
