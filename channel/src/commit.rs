use bitcoin_hashes::{sha256, Hash};
use serde_derive::{Deserialize, Serialize};

use binformat::BinarySD;
use wire::{ChannelPoint, Hash256, MilliSatoshi};

use crate::htlc::{HtlcDirection, LedgerView, Party};

/// Parameters fixed at channel negotiation that shape every commitment.
#[derive(Copy, Clone, Debug)]
pub struct CommitmentParams {
    pub dust_limit: MilliSatoshi,
    /// Flat fee per commitment, borne by the channel initiator.
    pub fee: MilliSatoshi,
    pub initiator: Party,
}

/// One HTLC output of a commitment, oriented from the commitment
/// holder's point of view.
#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Debug)]
pub struct HtlcOutput {
    pub amount: MilliSatoshi,
    pub payment_hash: Hash256,
    pub expiry: u32,
    pub direction: HtlcDirection,
}

/// Fully determined snapshot of a channel at one height, for one party's
/// view: the structure both sides independently construct and sign.
/// Oriented from its holder's perspective: `to_holder` is the balance of
/// the party that would broadcast it, and `revocation_hash` is the
/// holder's revocation commitment for this height, so the two views of
/// one height are distinct byte strings while both parties compute each
/// view identically.
#[derive(Serialize, Deserialize, Clone, Eq, PartialEq, Debug)]
pub struct Commitment {
    pub channel: ChannelPoint,
    pub height: u64,
    pub to_holder: MilliSatoshi,
    pub to_counterparty: MilliSatoshi,
    pub revocation_hash: Hash256,
    pub htlc_outputs: Vec<HtlcOutput>,
}

impl Commitment {
    /// The value a commitment signature covers.
    pub fn digest(&self) -> Hash256 {
        let mut bytes = Vec::new();
        BinarySD::serialize(&mut bytes, self).expect("in-memory serialization does not fail");
        sha256::Hash::hash(&bytes).into_inner().into()
    }

    /// One sub-digest per HTLC output, covered by the auxiliary
    /// signatures accompanying a commitment signature.
    pub fn htlc_digests(&self) -> Vec<Hash256> {
        self.htlc_outputs
            .iter()
            .enumerate()
            .map(|(index, output)| {
                let mut bytes = Vec::new();
                BinarySD::serialize(&mut bytes, &self.channel)
                    .expect("in-memory serialization does not fail");
                BinarySD::serialize(&mut bytes, &self.height)
                    .expect("in-memory serialization does not fail");
                BinarySD::serialize(&mut bytes, &(index as u16))
                    .expect("in-memory serialization does not fail");
                BinarySD::serialize(&mut bytes, output)
                    .expect("in-memory serialization does not fail");
                sha256::Hash::hash(&bytes).into_inner().into()
            })
            .collect()
    }
}

/// Builds the commitment of `party` at `height` from a ledger view. Pure:
/// identical inputs give byte-identical output, whatever was built
/// before. HTLC outputs are ordered ascending by (amount, payment hash)
/// so both sides assemble the same structure without exchanging ordering
/// metadata; outputs under the dust limit are trimmed.
pub fn build(
    channel: ChannelPoint,
    view: &LedgerView,
    height: u64,
    party: Party,
    revocation_hash: Hash256,
    params: &CommitmentParams,
) -> Commitment {
    let (mut to_holder, mut to_counterparty) = match party {
        Party::Local => (view.to_local, view.to_remote),
        Party::Remote => (view.to_remote, view.to_local),
    };
    if params.initiator == party {
        to_holder = to_holder.checked_sub(params.fee).unwrap_or(MilliSatoshi::from(0));
    } else {
        to_counterparty = to_counterparty
            .checked_sub(params.fee)
            .unwrap_or(MilliSatoshi::from(0));
    }

    let mut htlc_outputs: Vec<HtlcOutput> = view
        .htlcs
        .iter()
        .filter(|h| h.amount >= params.dust_limit)
        .map(|h| HtlcOutput {
            amount: h.amount,
            payment_hash: h.payment_hash,
            expiry: h.expiry,
            direction: match party {
                Party::Local => h.direction,
                Party::Remote => h.direction.flip(),
            },
        })
        .collect();
    htlc_outputs.sort_by_key(|output| (output.amount, output.payment_hash));

    Commitment {
        channel,
        height,
        to_holder,
        to_counterparty,
        revocation_hash,
        htlc_outputs,
    }
}
