use log::{info, warn};
use thiserror::Error;

use channel_machine::ChannelError;
use wire::{
    ChannelPoint, DecodeError, Envelope, Message, PeerId, SerdeVec, ValidationError, WireError,
};

use crate::registry::Registry;

/// Hard failures of one logical session. Decode and validation problems
/// never reach a state machine; the session that produced the bad frame
/// is closed, the process and every other channel keep running.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Decode(DecodeError),

    #[error("invalid field: {0}")]
    Validation(#[from] ValidationError),

    #[error("encoding an outbound message failed: {0}")]
    Encode(#[from] WireError),
}

/// A protocol or cryptographic breach, surfaced to the channel owner
/// (monitoring) rather than swallowed by the message loop. The affected
/// channel is already frozen when one of these is emitted.
#[derive(Debug)]
pub struct ChannelAlert {
    pub peer: PeerId,
    pub channel: ChannelPoint,
    pub error: ChannelError,
}

/// Outcome of one inbound frame: the encoded replies, plus an alert when
/// the frame breached its channel.
#[derive(Debug, Default)]
pub struct Dispatched {
    pub responses: Vec<Vec<u8>>,
    pub alert: Option<ChannelAlert>,
}

/// The channel a message belongs to. Exhaustive on purpose: a new message
/// kind will not compile until its routing is decided.
fn routing(message: &Message) -> Option<ChannelPoint> {
    match message {
        Message::Text(_) => None,
        Message::AddHtlc(m) => Some(m.channel),
        Message::SettleHtlc(m) => Some(m.channel),
        Message::FailHtlc(m) => Some(m.channel),
        Message::CommitSig(m) => Some(m.channel),
        Message::RevokeAndAck(m) => Some(m.channel),
        Message::CloseRequest(m) => Some(m.channel),
        Message::CloseResponse(m) => Some(m.channel),
    }
}

/// Decodes one inbound frame, routes it to the owning channel's state
/// machine under that channel's lock, and encodes the replies. Unknown
/// message types are logged and dropped so an old node survives a newer
/// counterparty; malformed frames are hard errors.
pub fn dispatch(registry: &Registry, frame: &[u8]) -> Result<Dispatched, DispatchError> {
    let envelope = match Envelope::decode(frame) {
        Ok(envelope) => envelope,
        Err(DecodeError::UnknownCommand { command }) => {
            warn!("unknown message type {:#04x}, dropping", command);
            return Ok(Dispatched::default());
        }
        Err(error) => return Err(DispatchError::Decode(error)),
    };
    let peer = envelope.peer;
    envelope.message.validate()?;

    let point = match routing(&envelope.message) {
        Some(point) => point,
        None => {
            if let Message::Text(text) = envelope.message {
                let SerdeVec(body) = text.body;
                info!("text from {:?}: {}", peer, String::from_utf8_lossy(&body));
            }
            return Ok(Dispatched::default());
        }
    };

    let outcome = match registry.with_channel(&point, |machine| machine.handle(envelope.message)) {
        Some(outcome) => outcome,
        None => {
            warn!("message for unknown channel {:?} from {:?}, dropping", point, peer);
            return Ok(Dispatched::default());
        }
    };

    match outcome {
        Ok(replies) => {
            let mut responses = Vec::with_capacity(replies.len());
            for message in replies {
                responses.push(Envelope::new(peer, message).encode()?);
            }
            Ok(Dispatched {
                responses,
                alert: None,
            })
        }
        Err(error) => {
            if error.is_fatal() {
                Ok(Dispatched {
                    responses: Vec::new(),
                    alert: Some(ChannelAlert {
                        peer,
                        channel: point,
                        error,
                    }),
                })
            } else {
                warn!("channel {:?}: message not applied: {}", point, error);
                Ok(Dispatched::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{dispatch, DispatchError};
    use crate::registry::Registry;

    use bitcoin_hashes::{sha256, Hash};
    use channel::{ChannelConfig, HtlcState, Party};
    use channel_machine::{ChannelKeys, ChannelMachine, Phase};
    use secp256k1::{Secp256k1, SecretKey};
    use wire::{ChannelPoint, Envelope, Hash256, Message, MilliSatoshi, PeerId};

    fn channel_point() -> ChannelPoint {
        ChannelPoint::new(Hash256::from([0xab; 32]), 0)
    }

    fn machine(sk_byte: u8, their_sk_byte: u8, seed_byte: u8, initiator: Party) -> ChannelMachine {
        let secp = Secp256k1::new();
        let commit_sk = SecretKey::from_slice(&[sk_byte; 32]).unwrap();
        let their_sk = SecretKey::from_slice(&[their_sk_byte; 32]).unwrap();
        let mut config = ChannelConfig::default();
        config.initiator = initiator;

        ChannelMachine::new(
            channel_point(),
            ChannelKeys {
                commit_sk,
                remote_commit_pk: secp256k1::PublicKey::from_secret_key(&secp, &their_sk),
            },
            config,
            [seed_byte; 32],
            MilliSatoshi::from(50_000),
            MilliSatoshi::from(50_000),
        )
    }

    /// Two registries, each holding one end of the same channel, wired
    /// through the dispatcher by encoding every message as a real frame.
    fn network() -> (Registry, Registry, PeerId, PeerId) {
        let alice_id = PeerId::from([0xa; 16]);
        let bob_id = PeerId::from([0xb; 16]);

        let alice = Registry::new();
        alice.connect_peer(bob_id);
        alice
            .register_channel(bob_id, machine(0x11, 0x22, 0xa1, Party::Local))
            .unwrap();

        let bob = Registry::new();
        bob.connect_peer(alice_id);
        bob.register_channel(alice_id, machine(0x22, 0x11, 0xb2, Party::Remote))
            .unwrap();

        (alice, bob, alice_id, bob_id)
    }

    fn deliver(to: &Registry, peer: PeerId, messages: Vec<Message>) -> Vec<Vec<u8>> {
        let mut responses = Vec::new();
        for message in messages {
            let frame = Envelope::new(peer, message).encode().unwrap();
            let dispatched = dispatch(to, &frame).unwrap();
            assert!(dispatched.alert.is_none());
            responses.extend(dispatched.responses);
        }
        responses
    }

    /// Keeps forwarding frames between the two registries until both
    /// sides go quiet.
    fn settle_traffic(
        alice: &Registry,
        bob: &Registry,
        alice_id: PeerId,
        bob_id: PeerId,
        mut to_bob: Vec<Vec<u8>>,
    ) {
        loop {
            let mut to_alice = Vec::new();
            for frame in to_bob.drain(..) {
                to_alice.extend(dispatch(bob, &frame).unwrap().responses);
            }
            if to_alice.is_empty() {
                break;
            }
            for frame in to_alice.drain(..) {
                to_bob.extend(dispatch(alice, &frame).unwrap().responses);
            }
            if to_bob.is_empty() {
                break;
            }
        }
        let _ = (alice_id, bob_id);
    }

    #[test]
    fn full_handshake_through_the_dispatcher() {
        let (alice, bob, alice_id, bob_id) = network();

        // both sides seed their revocation windows
        let seeds = alice
            .with_channel(&channel_point(), |m| m.seed_window().unwrap())
            .unwrap();
        deliver(&bob, alice_id, seeds);
        let seeds = bob
            .with_channel(&channel_point(), |m| m.seed_window().unwrap())
            .unwrap();
        deliver(&alice, bob_id, seeds);

        // local update on alice's side, then the wire does the rest
        let (id, add) = alice
            .with_channel(&channel_point(), |m| {
                m.add_htlc(
                    MilliSatoshi::from(1000),
                    sha256::Hash::hash(&[0x42; 32]).into_inner().into(),
                    144,
                )
                .unwrap()
            })
            .unwrap();
        let commit = alice
            .with_channel(&channel_point(), |m| m.sign_commit().unwrap())
            .unwrap();

        deliver(&bob, alice_id, vec![add]);
        let to_alice = deliver(&bob, alice_id, vec![commit]);

        let mut to_bob = Vec::new();
        for frame in to_alice {
            to_bob.extend(dispatch(&alice, &frame).unwrap().responses);
        }
        settle_traffic(&alice, &bob, alice_id, bob_id, to_bob);

        for (registry, offerer) in [(&alice, Party::Local), (&bob, Party::Remote)].iter() {
            registry
                .with_channel(&channel_point(), |m| {
                    assert!(matches!(m.phase(), Phase::Stable));
                    assert_eq!(m.local_height(), 1);
                    assert_eq!(
                        m.ledger().get(*offerer, id).unwrap().state,
                        HtlcState::Committed,
                    );
                })
                .unwrap();
        }
    }

    #[test]
    fn short_frame_closes_the_session() {
        let (alice, _, _, _) = network();
        match dispatch(&alice, &[0u8; 16]) {
            Err(DispatchError::Decode(_)) => (),
            other => panic!("expected a decode error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_command_is_dropped_not_fatal() {
        let (alice, _, _, _) = network();
        let mut frame = vec![0u8; 16];
        frame.push(0x7f);
        let dispatched = dispatch(&alice, &frame).unwrap();
        assert!(dispatched.responses.is_empty());
        assert!(dispatched.alert.is_none());
    }

    #[test]
    fn invalid_field_closes_the_session() {
        let (alice, _, _, bob_id) = network();
        // an all-zero channel reference is well-formed but invalid
        let message = Message::CloseRequest(wire::CloseRequest {
            channel: ChannelPoint::default(),
        });
        let frame = Envelope::new(bob_id, message).encode().unwrap();
        match dispatch(&alice, &frame) {
            Err(DispatchError::Validation(_)) => (),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_channel_is_dropped() {
        let (alice, _, _, bob_id) = network();
        let message = Message::CloseRequest(wire::CloseRequest {
            channel: ChannelPoint::new(Hash256::from([0xee; 32]), 3),
        });
        let frame = Envelope::new(bob_id, message).encode().unwrap();
        let dispatched = dispatch(&alice, &frame).unwrap();
        assert!(dispatched.responses.is_empty());
    }

    #[test]
    fn breach_surfaces_an_alert_and_freezes_one_channel() {
        let (alice, _, _, bob_id) = network();

        // a revocation out of nowhere is a protocol violation
        let seeds = alice
            .with_channel(&channel_point(), |m| m.seed_window().unwrap())
            .unwrap();
        drop(seeds);

        let forged = Message::CommitSig(wire::CommitSig {
            channel: channel_point(),
            commit_sig: {
                // any structurally valid signature
                let secp = Secp256k1::new();
                let sk = SecretKey::from_slice(&[9; 32]).unwrap();
                let digest = [1u8; 32];
                let msg = secp256k1::Message::from_slice(&digest).unwrap();
                secp.sign(&msg, &sk).into()
            },
            htlc_sigs: wire::SerdeVec(Vec::new()),
        });
        let frame = Envelope::new(bob_id, forged).encode().unwrap();

        let dispatched = dispatch(&alice, &frame).unwrap();
        assert!(dispatched.responses.is_empty());
        let alert = dispatched.alert.expect("a breach alert");
        assert_eq!(alert.channel, channel_point());
        assert!(alert.error.is_fatal());

        // the channel is frozen, the registry and process keep working
        alice
            .with_channel(&channel_point(), |m| {
                assert!(matches!(m.phase(), Phase::Breached));
            })
            .unwrap();
    }

    #[test]
    fn text_is_logged_and_produces_no_reply() {
        let (alice, _, _, bob_id) = network();
        let message = Message::Text(wire::Text {
            body: wire::SerdeVec(b"hello".to_vec()),
        });
        let frame = Envelope::new(bob_id, message).encode().unwrap();
        let dispatched = dispatch(&alice, &frame).unwrap();
        assert!(dispatched.responses.is_empty());
        assert!(dispatched.alert.is_none());
    }
}
