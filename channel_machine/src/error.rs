use thiserror::Error;

use channel::LedgerError;
use shachain::ShachainError;

/// Failures surfaced by the channel state machine. The fatal classes
/// (protocol, crypto, remote violation) also flip the channel into the
/// breached phase; resource-class errors are returned to the local caller
/// and leave the channel untouched.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// A message that is legal in isolation arrived in a phase where it
    /// cannot be honored: either a bug or an adversarial counterparty.
    #[error("message illegal in the current channel state: {0}")]
    Protocol(&'static str),

    /// The counterparty referenced HTLC state it cannot legally touch.
    #[error("counterparty violated the update protocol: {0}")]
    RemoteViolation(LedgerError),

    /// A signature or revocation check failed. Never retried: a forged
    /// proof cannot start verifying.
    #[error("cryptographic verification failed: {0}")]
    Crypto(&'static str),

    /// In-flight limits or balance would be exceeded. The caller may wait
    /// or reduce and try again.
    #[error("{0}")]
    Resource(LedgerError),

    /// A second local proposal while one handshake is still in flight.
    #[error("an update handshake is already in flight")]
    UpdateInFlight,

    /// An operation that needs setup not yet completed, e.g. signing
    /// before the revocation window is seeded.
    #[error("the channel is not ready: {0}")]
    NotReady(&'static str),

    /// The channel was frozen by an earlier fatal failure.
    #[error("the channel is breached and refuses further updates")]
    Breached,

    #[error("the channel is closed")]
    Closed,

    #[error("revocation derivation failed: {0}")]
    Revocation(#[from] ShachainError),

    #[error("signing failed: {0}")]
    Signing(#[from] secp256k1::Error),
}

impl ChannelError {
    /// True for the classes that freeze the channel and must reach the
    /// channel owner's monitoring rather than the message loop alone.
    pub fn is_fatal(&self) -> bool {
        match self {
            ChannelError::Protocol(_)
            | ChannelError::RemoteViolation(_)
            | ChannelError::Crypto(_) => true,
            _ => false,
        }
    }
}
