use bitcoin_hashes::{sha256, Hash};
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use wire::{FailureCode, Hash256, HtlcId, MilliSatoshi, MAX_HTLC_NUMBER};

use std::collections::BTreeMap;

/// One of the two sides of a channel, as seen from this node.
#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum Party {
    Local,
    Remote,
}

impl Party {
    pub fn other(&self) -> Party {
        match *self {
            Party::Local => Party::Remote,
            Party::Remote => Party::Local,
        }
    }
}

/// Direction of an HTLC from the local point of view. An offered HTLC
/// escrows local funds; a received one escrows remote funds. The proposer
/// of an add is the offerer, the proposer of a settle or fail is always
/// the recipient (only the recipient learns the preimage, and only it can
/// give up on the payment).
#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Debug)]
pub enum HtlcDirection {
    Offered,
    Received,
}

impl HtlcDirection {
    /// The party that proposed adding this HTLC.
    fn offerer(&self) -> Party {
        match *self {
            HtlcDirection::Offered => Party::Local,
            HtlcDirection::Received => Party::Remote,
        }
    }

    /// The party entitled to settle or fail this HTLC.
    fn recipient(&self) -> Party {
        self.offerer().other()
    }

    pub fn flip(&self) -> HtlcDirection {
        match *self {
            HtlcDirection::Offered => HtlcDirection::Received,
            HtlcDirection::Received => HtlcDirection::Offered,
        }
    }
}

/// Lifecycle of one conditional payment.
///
/// PendingAdd -> Committed -> SettlePending | FailPending -> Removed
///
/// An entry advances only through `HtlcLedger` calls made by the channel
/// state machine; nothing outside it mutates entries.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum HtlcState {
    /// Proposed over the wire, not yet covered by a commitment signature.
    PendingAdd,
    /// Present in the latest signed commitments of both sides.
    Committed,
    /// Settlement proposed; the preimage is known but the removal is not
    /// yet irrevocable.
    SettlePending,
    /// Failure proposed; the removal is not yet irrevocable.
    FailPending,
    /// Terminal: removed from the commitments of both sides, balance
    /// transferred.
    Removed,
}

#[derive(Clone, Debug)]
pub struct Htlc {
    pub id: HtlcId,
    pub direction: HtlcDirection,
    pub amount: MilliSatoshi,
    pub payment_hash: Hash256,
    pub expiry: u32,
    pub state: HtlcState,
    pub payment_preimage: Option<[u8; 32]>,
    pub failure: Option<FailureCode>,
}

/// Negotiated parameters of the channel that bound what the ledger
/// accepts.
#[derive(Copy, Clone, Debug)]
pub struct ChannelConfig {
    pub max_htlc_number: usize,
    pub max_htlc_value_in_flight: MilliSatoshi,
    pub dust_limit: MilliSatoshi,
    pub commit_fee: MilliSatoshi,
    /// The party that opened the channel and bears the commitment fee.
    pub initiator: Party,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            max_htlc_number: MAX_HTLC_NUMBER,
            max_htlc_value_in_flight: MilliSatoshi::from(u64::max_value()),
            dust_limit: MilliSatoshi::from(0),
            commit_fee: MilliSatoshi::from(0),
            initiator: Party::Local,
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum LedgerError {
    #[error("htlc {0:?} is not part of this channel")]
    UnknownHtlc(HtlcId),

    #[error("htlc {0:?} already exists")]
    DuplicateHtlc(HtlcId),

    #[error("adding the htlc would exceed {limit} htlcs in flight")]
    TooManyHtlcs { limit: usize },

    #[error("adding the htlc would exceed the in-flight value limit")]
    TooMuchValueInFlight,

    #[error("the offerer cannot afford the htlc")]
    InsufficientBalance,

    #[error("htlc {0:?} is not irrevocably committed on both sides")]
    NotCommitted(HtlcId),

    #[error("htlc {0:?} can only be resolved by its recipient")]
    WrongDirection(HtlcId),

    #[error("preimage does not hash to the payment hash of htlc {0:?}")]
    PreimageMismatch(HtlcId),

    #[error("no pending updates to commit")]
    NothingToCommit,
}

/// Which prospective commitment a view describes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ViewScope {
    /// The latest fully signed state: committed entries only.
    Current,
    /// The next commitment height, additionally covering the pending
    /// updates proposed by the given party.
    NextFrom(Party),
}

#[derive(Serialize, Deserialize, Copy, Clone, Eq, PartialEq, Debug)]
pub struct ViewHtlc {
    pub amount: MilliSatoshi,
    pub payment_hash: Hash256,
    pub expiry: u32,
    pub direction: HtlcDirection,
}

/// Balances and live HTLC set of one prospective commitment, derived from
/// the ledger; the input of the commitment builder. Balances here are a
/// computed view, the ledger's base balances move only on terminal
/// resolution.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct LedgerView {
    pub to_local: MilliSatoshi,
    pub to_remote: MilliSatoshi,
    pub htlcs: Vec<ViewHtlc>,
}

/// HTLC identifiers are assigned independently by each offering side, so
/// entries are keyed by (offerer, id); both parties may use the same
/// numeric id for different payments.
type EntryKey = (Party, HtlcId);

/// Bookkeeping of every in-flight conditional payment of one channel.
/// Owned exclusively by the channel's state machine.
pub struct HtlcLedger {
    config: ChannelConfig,
    entries: BTreeMap<EntryKey, Htlc>,
    next_offered_id: HtlcId,
    /// Entries whose latest state change is covered by the commitment
    /// handshake currently in flight: signed, but the superseded height is
    /// not yet revoked. Cleared by `ack_remote_commit`.
    in_flight: Vec<EntryKey>,
    base_local: MilliSatoshi,
    base_remote: MilliSatoshi,
}

impl HtlcLedger {
    pub fn new(config: ChannelConfig, local: MilliSatoshi, remote: MilliSatoshi) -> Self {
        HtlcLedger {
            config,
            entries: BTreeMap::new(),
            next_offered_id: HtlcId::new(),
            in_flight: Vec::new(),
            base_local: local,
            base_remote: remote,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn get(&self, offerer: Party, id: HtlcId) -> Option<&Htlc> {
        self.entries.get(&(offerer, id))
    }

    /// Proposes a new locally offered HTLC and assigns its id.
    pub fn offer(
        &mut self,
        amount: MilliSatoshi,
        payment_hash: Hash256,
        expiry: u32,
    ) -> Result<HtlcId, LedgerError> {
        let id = self.next_offered_id;
        self.add(id, HtlcDirection::Offered, amount, payment_hash, expiry)?;
        self.next_offered_id = id.next();
        Ok(id)
    }

    /// Records an HTLC offered by the remote side under the id it chose.
    pub fn receive(
        &mut self,
        id: HtlcId,
        amount: MilliSatoshi,
        payment_hash: Hash256,
        expiry: u32,
    ) -> Result<(), LedgerError> {
        self.add(id, HtlcDirection::Received, amount, payment_hash, expiry)
    }

    fn add(
        &mut self,
        id: HtlcId,
        direction: HtlcDirection,
        amount: MilliSatoshi,
        payment_hash: Hash256,
        expiry: u32,
    ) -> Result<(), LedgerError> {
        let key = (direction.offerer(), id);
        if self.entries.contains_key(&key) {
            return Err(LedgerError::DuplicateHtlc(id));
        }

        // the prospective commitment this entry would first appear in
        let view = self.commitment_view(ViewScope::NextFrom(direction.offerer()));
        if view.htlcs.len() + 1 > self.config.max_htlc_number {
            return Err(LedgerError::TooManyHtlcs {
                limit: self.config.max_htlc_number,
            });
        }

        let in_flight_value = view
            .htlcs
            .iter()
            .try_fold(amount, |sum, h| sum.checked_add(h.amount))
            .ok_or(LedgerError::TooMuchValueInFlight)?;
        if in_flight_value > self.config.max_htlc_value_in_flight {
            return Err(LedgerError::TooMuchValueInFlight);
        }

        let offerer_balance = match direction.offerer() {
            Party::Local => view.to_local,
            Party::Remote => view.to_remote,
        };
        let mut required = amount;
        if direction.offerer() == self.config.initiator {
            required = required
                .checked_add(self.config.commit_fee)
                .ok_or(LedgerError::InsufficientBalance)?;
        }
        if offerer_balance < required {
            return Err(LedgerError::InsufficientBalance);
        }

        self.entries.insert(
            key,
            Htlc {
                id,
                direction,
                amount,
                payment_hash,
                expiry,
                state: HtlcState::PendingAdd,
                payment_preimage: None,
                failure: None,
            },
        );
        Ok(())
    }

    /// Proposes settlement of a committed HTLC by its recipient. Legal
    /// only once the add is irrevocable on both sides.
    pub fn settle(
        &mut self,
        id: HtlcId,
        preimage: [u8; 32],
        by: Party,
    ) -> Result<(), LedgerError> {
        // only the recipient resolves, so the entry was offered by the other side
        let key = (by.other(), id);
        let in_flight = self.in_flight.contains(&key);
        let entry = self.entries.get_mut(&key).ok_or(LedgerError::UnknownHtlc(id))?;
        if entry.state != HtlcState::Committed || in_flight {
            return Err(LedgerError::NotCommitted(id));
        }
        if entry.direction.recipient() != by {
            return Err(LedgerError::WrongDirection(id));
        }
        let hash: Hash256 = sha256::Hash::hash(&preimage).into_inner().into();
        if hash != entry.payment_hash {
            return Err(LedgerError::PreimageMismatch(id));
        }

        entry.state = HtlcState::SettlePending;
        entry.payment_preimage = Some(preimage);
        Ok(())
    }

    /// Proposes removal of a committed HTLC without payment, by its
    /// recipient. Same legality rule as `settle`.
    pub fn fail(&mut self, id: HtlcId, reason: FailureCode, by: Party) -> Result<(), LedgerError> {
        let key = (by.other(), id);
        let in_flight = self.in_flight.contains(&key);
        let entry = self.entries.get_mut(&key).ok_or(LedgerError::UnknownHtlc(id))?;
        if entry.state != HtlcState::Committed || in_flight {
            return Err(LedgerError::NotCommitted(id));
        }
        if entry.direction.recipient() != by {
            return Err(LedgerError::WrongDirection(id));
        }

        entry.state = HtlcState::FailPending;
        entry.failure = Some(reason);
        Ok(())
    }

    /// True when the party has updates a new commitment could cover.
    pub fn has_pending(&self, party: Party) -> bool {
        self.entries.values().any(|entry| self.is_pending(entry, party))
    }

    /// An entry counts as pending for a party until a commitment
    /// signature covers it; entries in flight are not pending again.
    fn is_pending(&self, entry: &Htlc, party: Party) -> bool {
        if self.in_flight.contains(&(entry.direction.offerer(), entry.id)) {
            return false;
        }
        match entry.state {
            HtlcState::PendingAdd => entry.direction.offerer() == party,
            HtlcState::SettlePending | HtlcState::FailPending => {
                entry.direction.recipient() == party
            }
            _ => false,
        }
    }

    /// Marks the pending updates of `party` as covered by the commitment
    /// handshake now in flight. Balances are untouched; they are a view
    /// derived by the commitment builder until resolution is irrevocable.
    pub fn commit_pending(&mut self, party: Party) -> Result<Vec<HtlcId>, LedgerError> {
        let covered: Vec<EntryKey> = self
            .entries
            .values()
            .filter(|entry| self.is_pending(entry, party))
            .map(|entry| (entry.direction.offerer(), entry.id))
            .collect();
        if covered.is_empty() {
            return Err(LedgerError::NothingToCommit);
        }

        for key in &covered {
            let entry = self.entries.get_mut(key).expect("just listed");
            if entry.state == HtlcState::PendingAdd {
                entry.state = HtlcState::Committed;
            }
        }
        self.in_flight.extend(covered.iter().cloned());
        Ok(covered.into_iter().map(|(_, id)| id).collect())
    }

    /// Completes the acknowledgment lag once the revocation handshake for
    /// the in-flight commitment has finished. Resolutions become terminal
    /// and only now move balance.
    pub fn ack_remote_commit(&mut self) {
        let in_flight: Vec<EntryKey> = self.in_flight.drain(..).collect();
        for key in in_flight {
            let entry = match self.entries.get_mut(&key) {
                Some(entry) => entry,
                None => continue,
            };
            match entry.state {
                HtlcState::SettlePending => {
                    entry.state = HtlcState::Removed;
                    match entry.direction {
                        // the recipient collects the escrowed amount
                        HtlcDirection::Received => {
                            self.base_local = self
                                .base_local
                                .checked_add(entry.amount)
                                .unwrap_or(self.base_local);
                            self.base_remote = self
                                .base_remote
                                .checked_sub(entry.amount)
                                .unwrap_or(self.base_remote);
                        }
                        HtlcDirection::Offered => {
                            self.base_remote = self
                                .base_remote
                                .checked_add(entry.amount)
                                .unwrap_or(self.base_remote);
                            self.base_local = self
                                .base_local
                                .checked_sub(entry.amount)
                                .unwrap_or(self.base_local);
                        }
                    }
                }
                HtlcState::FailPending => {
                    // value never left the offerer's side
                    entry.state = HtlcState::Removed;
                }
                _ => (),
            }
        }
    }

    /// Drops pending updates of `party` that no commitment signature has
    /// covered yet, reverting proposed resolutions. The caller enforces
    /// the point of no return.
    pub fn abandon_pending(&mut self, party: Party) {
        let pending: Vec<EntryKey> = self
            .entries
            .values()
            .filter(|entry| self.is_pending(entry, party))
            .map(|entry| (entry.direction.offerer(), entry.id))
            .collect();

        for key in pending {
            let remove = {
                let entry = self.entries.get_mut(&key).expect("just listed");
                match entry.state {
                    HtlcState::PendingAdd => true,
                    HtlcState::SettlePending | HtlcState::FailPending => {
                        entry.state = HtlcState::Committed;
                        entry.payment_preimage = None;
                        entry.failure = None;
                        false
                    }
                    _ => false,
                }
            };
            if remove {
                self.entries.remove(&key);
            }
        }
    }

    /// Derives the balances and live HTLC set of a prospective
    /// commitment. Pure with respect to the ledger: calling it never
    /// changes state.
    pub fn commitment_view(&self, scope: ViewScope) -> LedgerView {
        let mut to_local = self.base_local;
        let mut to_remote = self.base_remote;
        let mut htlcs = Vec::new();

        let in_scope = |entry: &Htlc| match scope {
            ViewScope::Current => false,
            ViewScope::NextFrom(party) => self.is_pending(entry, party),
        };

        for entry in self.entries.values() {
            let (escrow, output) = match entry.state {
                HtlcState::PendingAdd => {
                    if !in_scope(entry) {
                        continue;
                    }
                    (true, true)
                }
                HtlcState::Committed => (true, true),
                HtlcState::SettlePending => {
                    if in_scope(entry) {
                        // the output disappears and the recipient is paid
                        match entry.direction.recipient() {
                            Party::Local => {
                                to_local = to_local
                                    .checked_add(entry.amount)
                                    .unwrap_or(to_local);
                            }
                            Party::Remote => {
                                to_remote = to_remote
                                    .checked_add(entry.amount)
                                    .unwrap_or(to_remote);
                            }
                        }
                        (true, false)
                    } else {
                        (true, true)
                    }
                }
                HtlcState::FailPending => {
                    if in_scope(entry) {
                        // the output disappears and the escrow returns
                        (false, false)
                    } else {
                        (true, true)
                    }
                }
                HtlcState::Removed => continue,
            };

            if escrow {
                match entry.direction.offerer() {
                    Party::Local => {
                        to_local = to_local.checked_sub(entry.amount).unwrap_or(to_local);
                    }
                    Party::Remote => {
                        to_remote = to_remote.checked_sub(entry.amount).unwrap_or(to_remote);
                    }
                }
            }
            if output {
                htlcs.push(ViewHtlc {
                    amount: entry.amount,
                    payment_hash: entry.payment_hash,
                    expiry: entry.expiry,
                    direction: entry.direction,
                });
            }
        }

        LedgerView {
            to_local,
            to_remote,
            htlcs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChannelConfig, HtlcLedger, HtlcState, LedgerError, Party, ViewScope};

    use bitcoin_hashes::{sha256, Hash};
    use wire::{FailureCode, Hash256, HtlcId, MilliSatoshi};

    fn payment(preimage: [u8; 32]) -> Hash256 {
        sha256::Hash::hash(&preimage).into_inner().into()
    }

    fn ledger() -> HtlcLedger {
        HtlcLedger::new(
            ChannelConfig::default(),
            MilliSatoshi::from(100_000),
            MilliSatoshi::from(100_000),
        )
    }

    #[test]
    fn offer_then_commit_then_settle() {
        let mut ledger = ledger();
        let preimage = [0x11; 32];

        let id = ledger.offer(MilliSatoshi::from(1000), payment(preimage), 144).unwrap();
        assert_eq!(ledger.get(Party::Local, id).unwrap().state, HtlcState::PendingAdd);

        // settle before any commitment is illegal
        assert_eq!(
            ledger.settle(id, preimage, Party::Remote),
            Err(LedgerError::NotCommitted(id)),
        );

        ledger.commit_pending(Party::Local).unwrap();
        // signed but not yet revoked: still not resolvable
        assert_eq!(
            ledger.settle(id, preimage, Party::Remote),
            Err(LedgerError::NotCommitted(id)),
        );

        ledger.ack_remote_commit();
        ledger.settle(id, preimage, Party::Remote).unwrap();
        assert_eq!(ledger.get(Party::Local, id).unwrap().state, HtlcState::SettlePending);

        ledger.commit_pending(Party::Remote).unwrap();
        ledger.ack_remote_commit();
        assert_eq!(ledger.get(Party::Local, id).unwrap().state, HtlcState::Removed);

        let view = ledger.commitment_view(ViewScope::Current);
        assert_eq!(view.to_local, MilliSatoshi::from(99_000));
        assert_eq!(view.to_remote, MilliSatoshi::from(101_000));
        assert_eq!(view.htlcs.len(), 0);
    }

    #[test]
    fn fail_returns_value_to_offerer() {
        let mut ledger = ledger();
        let id = ledger.offer(MilliSatoshi::from(2500), payment([0x22; 32]), 100).unwrap();

        ledger.commit_pending(Party::Local).unwrap();
        ledger.ack_remote_commit();
        ledger.fail(id, FailureCode::TEMPORARY_FAILURE, Party::Remote).unwrap();
        ledger.commit_pending(Party::Remote).unwrap();
        ledger.ack_remote_commit();

        let view = ledger.commitment_view(ViewScope::Current);
        assert_eq!(view.to_local, MilliSatoshi::from(100_000));
        assert_eq!(view.to_remote, MilliSatoshi::from(100_000));
    }

    #[test]
    fn settle_requires_the_recipient() {
        let mut ledger = ledger();
        let preimage = [0x33; 32];
        let id = ledger.offer(MilliSatoshi::from(1000), payment(preimage), 100).unwrap();
        ledger.commit_pending(Party::Local).unwrap();
        ledger.ack_remote_commit();

        // a locally offered htlc is settled by the remote side only
        assert_eq!(
            ledger.settle(id, preimage, Party::Local),
            Err(LedgerError::WrongDirection(id)),
        );
    }

    #[test]
    fn wrong_preimage_is_rejected() {
        let mut ledger = ledger();
        let id = ledger.offer(MilliSatoshi::from(1000), payment([0x44; 32]), 100).unwrap();
        ledger.commit_pending(Party::Local).unwrap();
        ledger.ack_remote_commit();

        assert_eq!(
            ledger.settle(id, [0x55; 32], Party::Remote),
            Err(LedgerError::PreimageMismatch(id)),
        );
    }

    #[test]
    fn in_flight_count_limit() {
        let mut config = ChannelConfig::default();
        config.max_htlc_number = 2;
        let mut ledger = HtlcLedger::new(
            config,
            MilliSatoshi::from(100_000),
            MilliSatoshi::from(100_000),
        );

        ledger.offer(MilliSatoshi::from(100), payment([1; 32]), 100).unwrap();
        ledger.offer(MilliSatoshi::from(100), payment([2; 32]), 100).unwrap();
        assert_eq!(
            ledger.offer(MilliSatoshi::from(100), payment([3; 32]), 100),
            Err(LedgerError::TooManyHtlcs { limit: 2 }),
        );
    }

    #[test]
    fn offerer_balance_is_checked() {
        let mut ledger = HtlcLedger::new(
            ChannelConfig::default(),
            MilliSatoshi::from(500),
            MilliSatoshi::from(100_000),
        );

        assert_eq!(
            ledger.offer(MilliSatoshi::from(501), payment([6; 32]), 100),
            Err(LedgerError::InsufficientBalance),
        );
        // the remote side's balance does not help the local offerer
        ledger.offer(MilliSatoshi::from(500), payment([7; 32]), 100).unwrap();
    }

    #[test]
    fn abandon_drops_unsigned_adds_only() {
        let mut ledger = ledger();
        let kept = ledger.offer(MilliSatoshi::from(1000), payment([8; 32]), 100).unwrap();
        ledger.commit_pending(Party::Local).unwrap();
        ledger.ack_remote_commit();

        let dropped = ledger.offer(MilliSatoshi::from(2000), payment([9; 32]), 100).unwrap();
        ledger.abandon_pending(Party::Local);

        assert!(ledger.get(Party::Local, dropped).is_none());
        assert_eq!(ledger.get(Party::Local, kept).unwrap().state, HtlcState::Committed);
    }
}
