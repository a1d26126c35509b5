use binformat::{BinarySD, WireError};

use crate::error::DecodeError;
use crate::message::types::PeerId;
use crate::message::Message;

pub const PEER_ID_SIZE: usize = PeerId::SIZE;

/// Smallest frame that can carry anything: the peer identifier plus the
/// command byte. Shorter input is a hard decode failure.
pub const MIN_FRAME_LENGTH: usize = PEER_ID_SIZE + 1;

/// One transport frame: `[16-byte peer id][1-byte command][payload]`.
/// The transport delivers and consumes raw frames; everything inside the
/// process works on the decoded form.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Envelope {
    pub peer: PeerId,
    pub message: Message,
}

impl Envelope {
    pub fn new(peer: PeerId, message: Message) -> Self {
        Envelope { peer, message }
    }

    /// Decodes a frame. The payload length is checked against the
    /// command's bound before the payload is parsed, so an oversized
    /// frame is rejected without allocating for it.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        if frame.len() < MIN_FRAME_LENGTH {
            return Err(DecodeError::ShortFrame { length: frame.len() });
        }

        let mut id = [0u8; PEER_ID_SIZE];
        id.copy_from_slice(&frame[..PEER_ID_SIZE]);

        let command = frame[PEER_ID_SIZE];
        let payload_length = frame.len() - MIN_FRAME_LENGTH;
        let limit = Message::max_payload_length(command)
            .ok_or(DecodeError::UnknownCommand { command })?;
        if payload_length > limit {
            return Err(DecodeError::OversizedPayload {
                command,
                length: payload_length,
                limit,
            });
        }

        let message = BinarySD::deserialize(&frame[PEER_ID_SIZE..])?;
        Ok(Envelope {
            peer: PeerId::from(id),
            message,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut frame = Vec::with_capacity(MIN_FRAME_LENGTH);
        frame.extend_from_slice(&self.peer.as_bytes()[..]);
        BinarySD::serialize(&mut frame, &self.message)?;
        Ok(frame)
    }
}
