//! Self-describing values.
//!
//! A [`Value`] is a tagged, recursively structured datum (nil, bool,
//! integer, float, string, bytes, array, map) that interoperates with
//! MessagePack at the value level and round-trips byte-for-byte through
//! [`pack_value`]/[`unpack_value`].

use thiserror::Error;

pub use rmpv::Value;

/// Failure while packing or unpacking a [`Value`].
#[derive(Debug, Error)]
pub enum ValueError {
    /// The byte stream did not contain a well-formed value.
    #[error("malformed value: {0}")]
    Decode(#[from] rmpv::decode::Error),
    /// The value could not be written out.
    #[error("value serialization failed: {0}")]
    Encode(#[from] rmpv::encode::Error),
}

/// Serialize a value into a fresh byte buffer.
pub fn pack_value(value: &Value) -> Result<Vec<u8>, ValueError> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value)?;
    Ok(buf)
}

/// Deserialize a single value from `bytes`.
pub fn unpack_value(mut bytes: &[u8]) -> Result<Value, ValueError> {
    Ok(rmpv::decode::read_value(&mut bytes)?)
}
