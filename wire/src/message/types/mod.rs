mod crypto;

pub use self::crypto::{PublicKey, Signature, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

use serde_derive::{Deserialize, Serialize};

use std::fmt;

/// Hard cap on HTLCs a single commitment may carry, shared by the wire
/// bound of `CommitSig` and the default ledger limit.
pub const MAX_HTLC_NUMBER: usize = 483;

/// 32-byte hash value: payment condition hashes, revocation commitments,
/// transaction ids.
#[derive(Serialize, Deserialize, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Hash256 {
    data: [u8; 32],
}

impl Hash256 {
    pub const SIZE: usize = 32;

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.data
    }

    pub fn is_zero(&self) -> bool {
        self.data == [0; 32]
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(data: [u8; 32]) -> Self {
        Hash256 { data }
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash256({})", hex::encode(&self.data[..]))
    }
}

/// The 16-byte identifier a transport connection presents for its remote
/// end; every inbound frame is prefixed with it.
#[derive(Serialize, Deserialize, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PeerId {
    data: [u8; 16],
}

impl PeerId {
    pub const SIZE: usize = 16;

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.data
    }
}

impl From<[u8; 16]> for PeerId {
    fn from(data: [u8; 16]) -> Self {
        PeerId { data }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.data[..]))
    }
}

/// Reference to the on-chain funding output that anchors a channel:
/// transaction id plus output index, 36 bytes on the wire.
#[derive(Serialize, Deserialize, Default, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ChannelPoint {
    pub txid: Hash256,
    pub output_index: u32,
}

impl ChannelPoint {
    pub const SIZE: usize = Hash256::SIZE + 4;

    pub fn new(txid: Hash256, output_index: u32) -> Self {
        ChannelPoint { txid, output_index }
    }

    /// An all-zero reference never names a real funding output.
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.output_index == 0
    }
}

impl fmt::Debug for ChannelPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "ChannelPoint({}:{})",
            hex::encode(&self.txid.as_bytes()[..]),
            self.output_index
        )
    }
}

#[derive(
    Serialize, Deserialize, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug,
)]
pub struct MilliSatoshi {
    raw: u64,
}

impl MilliSatoshi {
    pub fn checked_add(self, other: MilliSatoshi) -> Option<MilliSatoshi> {
        self.raw.checked_add(other.raw).map(MilliSatoshi::from)
    }

    pub fn checked_sub(self, other: MilliSatoshi) -> Option<MilliSatoshi> {
        self.raw.checked_sub(other.raw).map(MilliSatoshi::from)
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }
}

impl From<u64> for MilliSatoshi {
    fn from(raw: u64) -> Self {
        MilliSatoshi { raw }
    }
}

impl From<MilliSatoshi> for u64 {
    fn from(m: MilliSatoshi) -> Self {
        m.raw
    }
}

/// Identifier of an HTLC within one channel, assigned sequentially by the
/// offering side.
#[derive(
    Serialize, Deserialize, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug,
)]
pub struct HtlcId {
    id: u64,
}

impl HtlcId {
    pub fn new() -> Self {
        HtlcId { id: 0 }
    }

    pub fn next(&self) -> Self {
        HtlcId { id: self.id + 1 }
    }
}

impl From<u64> for HtlcId {
    fn from(id: u64) -> Self {
        HtlcId { id }
    }
}

/// Numeric reason attached to a failed HTLC.
#[derive(Serialize, Deserialize, Default, Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FailureCode {
    raw: u16,
}

impl FailureCode {
    pub const EXPIRY_TOO_SOON: FailureCode = FailureCode { raw: 0x0001 };
    pub const UNKNOWN_PAYMENT_HASH: FailureCode = FailureCode { raw: 0x0002 };
    pub const TEMPORARY_FAILURE: FailureCode = FailureCode { raw: 0x0003 };
}

impl From<u16> for FailureCode {
    fn from(raw: u16) -> Self {
        FailureCode { raw }
    }
}
