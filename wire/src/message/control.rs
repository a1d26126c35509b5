use super::types::ChannelPoint;
use super::WireMessage;
use crate::error::ValidationError;

use binformat::SerdeVec;

use serde_derive::{Deserialize, Serialize};

/// Upper bound on a chat body; anything longer is a decode error before
/// allocation.
pub const MAX_TEXT_LENGTH: usize = 1024;

/// Free-form chat between the two peers. Carries no protocol meaning and
/// touches no channel state.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
pub struct Text {
    pub body: SerdeVec<u8>,
}

impl WireMessage for Text {
    const MAX_PAYLOAD_LENGTH: usize = 2 + MAX_TEXT_LENGTH;

    fn validate(&self) -> Result<(), ValidationError> {
        let SerdeVec(ref body) = self.body;
        if body.len() > MAX_TEXT_LENGTH {
            return Err(ValidationError::OversizedText { length: body.len() });
        }
        Ok(())
    }
}

/// Asks the counterparty to wind the channel down cooperatively. Once
/// acknowledged, no further updates are accepted; settlement happens
/// on-chain, outside this protocol.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
pub struct CloseRequest {
    pub channel: ChannelPoint,
}

impl WireMessage for CloseRequest {
    const MAX_PAYLOAD_LENGTH: usize = ChannelPoint::SIZE;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.channel.is_null() {
            return Err(ValidationError::NullChannelPoint);
        }
        Ok(())
    }
}

/// Accepts a `CloseRequest`; the channel is closed for updates on both
/// sides as soon as this message is exchanged.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
pub struct CloseResponse {
    pub channel: ChannelPoint,
}

impl WireMessage for CloseResponse {
    const MAX_PAYLOAD_LENGTH: usize = ChannelPoint::SIZE;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.channel.is_null() {
            return Err(ValidationError::NullChannelPoint);
        }
        Ok(())
    }
}
