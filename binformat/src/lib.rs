#![forbid(unsafe_code)]

mod serde_facade;
mod seq;

pub use self::serde_facade::{BinarySD, WireError};
pub use self::seq::{SerdeVec, MAX_SEQUENCE_LENGTH};
