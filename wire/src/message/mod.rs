pub mod types;

mod channel;
mod control;

pub use self::channel::*;
pub use self::control::*;

use crate::error::ValidationError;

use serde::de;
use serde::ser;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;

/// Contract every payload type fulfils, after the original message
/// interface: a stable one-byte command identifier (generated next to the
/// `Message` register below), a payload length bound checked before
/// decoding allocates anything, and field-level sanity independent of
/// protocol state.
pub trait WireMessage {
    const MAX_PAYLOAD_LENGTH: usize;

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

macro_rules! message {
    (pub enum $name:ident { $($variant:ident($command:literal)),* $(,)? }) => {
        /// Tagged union of every message of the protocol; the variant name
        /// equals the name of the payload type it contains. Decoded once at
        /// the boundary so downstream handlers match exhaustively and a new
        /// message kind is a compile-time-visible change.
        #[derive(Eq, PartialEq, Debug, Clone)]
        pub enum $name {
            $($variant($variant),)*
        }

        $(
            impl $variant {
                /// Stable numeric identifier of this message on the wire.
                pub const COMMAND: u8 = $command;
            }
        )*

        impl $name {
            pub fn command(&self) -> u8 {
                match self {
                    $(&$name::$variant(_) => $command,)*
                }
            }

            /// Payload length bound for a command byte, `None` when the
            /// command is unknown to this build.
            pub fn max_payload_length(command: u8) -> Option<usize> {
                match command {
                    $($command => Some(<$variant as WireMessage>::MAX_PAYLOAD_LENGTH),)*
                    _ => None,
                }
            }

            /// Field-level sanity of the contained payload.
            pub fn validate(&self) -> Result<(), ValidationError> {
                match self {
                    $(&$name::$variant(ref payload) => payload.validate(),)*
                }
            }

            fn read_from<'de, A>(payload: A) -> Result<Self, A::Error> where
                A: de::SeqAccess<'de>
            {
                let mut payload = payload;

                let nocommand_err = {
                    let temp = "cannot read the command byte of the message";
                    <A::Error as de::Error>::custom(temp)
                };

                let novalue_err = |s| {
                    let temp = format!("cannot interpret the value as an instance of: `{}`", s);
                    <A::Error as de::Error>::custom(temp)
                };

                let unknown_err = |c| {
                    let temp = format!("command: `{:#04x}` is unknown", c);
                    <A::Error as de::Error>::custom(temp)
                };

                let command: u8 = payload.next_element()?.ok_or(nocommand_err)?;

                use self::$name::*;
                match command {
                    $(
                        $command => {
                            let error = novalue_err(stringify!($variant));
                            payload.next_element()
                                .and_then(|i| {
                                    i.ok_or(error).map(|x| $variant(x))
                                })
                        },
                    )*
                    c => Err(unknown_err(c)),
                }
            }

            fn write_into<A>(&self, consumer: &mut A) -> Result<(), A::Error> where
                A: ser::SerializeStruct
            {
                use self::$name::*;
                match self {
                    $(
                        &$variant(ref payload) => {
                            consumer.serialize_field("command", &($command as u8))?;
                            consumer.serialize_field("payload", payload)
                        },
                    )*
                }
            }
        }
    }
}

// The register of every message of the protocol with its command byte.
message! {
    pub enum Message {
        Text(0x00),
        AddHtlc(0x10),
        SettleHtlc(0x11),
        FailHtlc(0x12),
        CommitSig(0x20),
        RevokeAndAck(0x21),
        CloseRequest(0x30),
        CloseResponse(0x31),
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use self::ser::SerializeStruct;

        // The names are provided only for documentation, the serializer drops them
        let mut s_struct = serializer.serialize_struct("Message", 2)?;
        self.write_into(&mut s_struct)?;
        s_struct.end()
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use std::fmt;

        struct Visitor;

        impl<'de> de::Visitor<'de> for Visitor {
            type Value = Message;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "pair: one-byte command, \
                     the binary representation of the message",
                )
            }

            fn visit_seq<A>(self, seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                Message::read_from(seq)
            }
        }

        deserializer.deserialize_tuple(2, Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::types::{ChannelPoint, FailureCode, Hash256, HtlcId, MilliSatoshi};
    use super::{AddHtlc, FailHtlc, Message};
    use binformat::BinarySD;

    fn channel_point() -> ChannelPoint {
        ChannelPoint::new(Hash256::from([0xab; 32]), 1)
    }

    #[test]
    fn command_byte_leads_the_encoding() {
        let message = Message::FailHtlc(FailHtlc {
            channel: channel_point(),
            id: HtlcId::from(5),
            reason: FailureCode::TEMPORARY_FAILURE,
        });

        let mut bytes = Vec::new();
        BinarySD::serialize(&mut bytes, &message).unwrap();
        assert_eq!(bytes[0], 0x12);
        // command + outpoint + id + reason
        assert_eq!(bytes.len(), 1 + 36 + 8 + 2);

        let restored: Message = BinarySD::deserialize(bytes.as_slice()).unwrap();
        assert_eq!(restored, message);
    }

    #[test]
    fn add_htlc_round_trip() {
        let message = Message::AddHtlc(AddHtlc {
            channel: channel_point(),
            id: HtlcId::new(),
            amount: MilliSatoshi::from(1000),
            payment_hash: Hash256::from([0xcd; 32]),
            expiry: 144,
        });

        let mut bytes = Vec::new();
        BinarySD::serialize(&mut bytes, &message).unwrap();

        let restored: Message = BinarySD::deserialize(bytes.as_slice()).unwrap();
        assert_eq!(restored, message);
    }

    #[test]
    fn unknown_command_fails() {
        let mut bytes = vec![0x7fu8];
        bytes.extend_from_slice(&[0; 64]);
        let restored: Result<Message, _> = BinarySD::deserialize(bytes.as_slice());
        assert!(restored.is_err());
    }
}
