use super::types::{
    ChannelPoint, FailureCode, Hash256, HtlcId, MilliSatoshi, PublicKey, Signature,
    MAX_HTLC_NUMBER, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
use super::WireMessage;
use crate::error::ValidationError;

use binformat::SerdeVec;

use serde_derive::{Deserialize, Serialize};

/// Proposes a new conditional payment. The HTLC becomes part of a
/// commitment only once a subsequent `CommitSig` covers it.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
pub struct AddHtlc {
    pub channel: ChannelPoint,
    pub id: HtlcId,
    pub amount: MilliSatoshi,
    pub payment_hash: Hash256,
    pub expiry: u32,
}

impl WireMessage for AddHtlc {
    const MAX_PAYLOAD_LENGTH: usize = ChannelPoint::SIZE + 8 + 8 + Hash256::SIZE + 4;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.channel.is_null() {
            return Err(ValidationError::NullChannelPoint);
        }
        if self.amount.is_zero() {
            return Err(ValidationError::ZeroAmount);
        }
        if self.expiry == 0 {
            return Err(ValidationError::ZeroExpiry);
        }
        Ok(())
    }
}

/// Releases the payment preimage for a previously committed HTLC.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
pub struct SettleHtlc {
    pub channel: ChannelPoint,
    pub id: HtlcId,
    pub payment_preimage: [u8; 32],
}

impl WireMessage for SettleHtlc {
    const MAX_PAYLOAD_LENGTH: usize = ChannelPoint::SIZE + 8 + 32;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.channel.is_null() {
            return Err(ValidationError::NullChannelPoint);
        }
        Ok(())
    }
}

/// Gives up on a previously committed HTLC, returning its value to the
/// offerer once both sides have signed the removal.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
pub struct FailHtlc {
    pub channel: ChannelPoint,
    pub id: HtlcId,
    pub reason: FailureCode,
}

impl WireMessage for FailHtlc {
    const MAX_PAYLOAD_LENGTH: usize = ChannelPoint::SIZE + 8 + 2;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.channel.is_null() {
            return Err(ValidationError::NullChannelPoint);
        }
        Ok(())
    }
}

/// Signature over the counterparty's next commitment version, covering
/// every update sent since the last one, plus one auxiliary signature per
/// live HTLC output.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
pub struct CommitSig {
    pub channel: ChannelPoint,
    pub commit_sig: Signature,
    pub htlc_sigs: SerdeVec<Signature>,
}

impl WireMessage for CommitSig {
    const MAX_PAYLOAD_LENGTH: usize =
        ChannelPoint::SIZE + SIGNATURE_SIZE + 2 + SIGNATURE_SIZE * MAX_HTLC_NUMBER;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.channel.is_null() {
            return Err(ValidationError::NullChannelPoint);
        }
        let SerdeVec(ref sigs) = self.htlc_sigs;
        if sigs.len() > MAX_HTLC_NUMBER {
            return Err(ValidationError::TooManyHtlcSignatures { count: sigs.len() });
        }
        Ok(())
    }
}

/// A disclosed revocation secret, or the reserved all-zero pattern used
/// while a channel seeds the counterparty's initial revocation window.
/// The sentinel is modelled as its own variant so no code path can
/// mistake it for a real secret.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Revocation {
    WindowSeed,
    Secret([u8; 32]),
}

impl Revocation {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        if bytes == [0; 32] {
            Revocation::WindowSeed
        } else {
            Revocation::Secret(bytes)
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        match *self {
            Revocation::WindowSeed => [0; 32],
            Revocation::Secret(bytes) => bytes,
        }
    }
}

mod serde_m {
    use super::Revocation;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for Revocation {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            self.to_bytes().serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Revocation {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            <[u8; 32]>::deserialize(deserializer).map(Revocation::from_bytes)
        }
    }
}

/// Revokes the sender's prior commitment by disclosing its secret and, in
/// the same round trip, pre-commits the revocation point for the next one.
/// Fixed 133-byte payload: 36 + 32 + 33 + 32.
#[derive(Serialize, Deserialize, Eq, PartialEq, Debug, Clone)]
pub struct RevokeAndAck {
    pub channel: ChannelPoint,
    pub revocation: Revocation,
    pub next_revocation_key: PublicKey,
    pub next_revocation_hash: Hash256,
}

impl WireMessage for RevokeAndAck {
    const MAX_PAYLOAD_LENGTH: usize = ChannelPoint::SIZE + 32 + PUBLIC_KEY_SIZE + Hash256::SIZE;

    fn validate(&self) -> Result<(), ValidationError> {
        if self.channel.is_null() {
            return Err(ValidationError::NullChannelPoint);
        }
        if self.next_revocation_hash.is_zero() {
            return Err(ValidationError::ZeroRevocationHash);
        }
        Ok(())
    }
}
