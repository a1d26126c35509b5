#![forbid(unsafe_code)]

mod envelope;
mod error;
mod message;

pub use self::envelope::{Envelope, MIN_FRAME_LENGTH, PEER_ID_SIZE};
pub use self::error::{DecodeError, ValidationError};
pub use self::message::types::*;
pub use self::message::*;

pub use binformat::{SerdeVec, WireError};
