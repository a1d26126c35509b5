use binformat::WireError;

use thiserror::Error;

use crate::envelope::MIN_FRAME_LENGTH;
use crate::message::types::MAX_HTLC_NUMBER;
use crate::message::MAX_TEXT_LENGTH;

/// Failure to turn raw bytes into a message. Local to the offending frame:
/// nothing of channel state is touched. `UnknownCommand` is the one
/// recoverable case (logged and dropped for forward compatibility); the
/// rest close the logical session.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame of {length} bytes is below the {} byte minimum", MIN_FRAME_LENGTH)]
    ShortFrame { length: usize },

    #[error("unknown command {command:#04x}")]
    UnknownCommand { command: u8 },

    #[error("payload of {length} bytes exceeds the {limit} byte bound of command {command:#04x}")]
    OversizedPayload {
        command: u8,
        length: usize,
        limit: usize,
    },

    #[error("malformed payload: {0}")]
    Payload(#[from] WireError),
}

/// A well-formed message carrying a semantically impossible field. Checked
/// after decode, before any protocol-state reasoning.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    #[error("channel reference is all zeroes")]
    NullChannelPoint,

    #[error("htlc amount is zero")]
    ZeroAmount,

    #[error("htlc expiry height is zero")]
    ZeroExpiry,

    #[error("next revocation hash is all zeroes")]
    ZeroRevocationHash,

    #[error("{count} htlc signatures exceed the limit of {}", MAX_HTLC_NUMBER)]
    TooManyHtlcSignatures { count: usize },

    #[error("text body of {length} bytes exceeds the limit of {}", MAX_TEXT_LENGTH)]
    OversizedText { length: usize },
}
