use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use std::io;

pub type WireError = bincode::Error;

/// Public facade object, provides the serde interface with the proper
/// configuration applied: big-endian byte order, fixed-width integers.
/// All multi-byte fields of the protocol share this convention, so every
/// wire-facing type is serialized through here and nowhere else.
pub struct BinarySD;

impl BinarySD {
    fn options() -> impl Options {
        bincode::options()
            .with_big_endian()
            .with_fixint_encoding()
            .allow_trailing_bytes()
    }

    pub fn serialize<T: Serialize, W: io::Write>(w: W, value: &T) -> Result<(), WireError> {
        Self::options().serialize_into(w, value)
    }

    pub fn deserialize<T: DeserializeOwned, R: io::Read>(r: R) -> Result<T, WireError> {
        Self::options().deserialize_from(r)
    }
}
