//! MessagePack wire codec.
//!
//! Records are written as maps keyed by field name, so decoders match fields
//! by name and ignore keys they do not know about.

use crate::opcode::{Opcode, UnknownOpcode};
use crate::packets::{OpcodeHeader, Record};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty payload")]
    Empty,

    #[error("failed to encode record: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode record: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error(transparent)]
    UnknownOpcode(#[from] UnknownOpcode),
}

/// Serializes a record with named fields.
pub fn encode<R: Record>(record: &R) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(record)?)
}

/// Deserializes a full record.
pub fn decode<R: Record>(bytes: &[u8]) -> Result<R, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Decodes only the `Opcode` field and returns its raw value, known or not.
pub fn peek_opcode(bytes: &[u8]) -> Result<u8, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::Empty);
    }
    let header: OpcodeHeader = rmp_serde::from_slice(bytes)?;
    Ok(header.opcode)
}

/// Like [`peek_opcode`] but also maps the value onto [`Opcode`].
pub fn peek_known_opcode(bytes: &[u8]) -> Result<Opcode, CodecError> {
    Ok(Opcode::try_from(peek_opcode(bytes)?)?)
}
