use bitcoin_hashes::{sha256, Hash};
use log::{debug, warn};
use secp256k1::{All, Secp256k1, SecretKey};

use channel::{
    build, ChannelConfig, Commitment, CommitmentParams, HtlcLedger, LedgerError, Party, ViewScope,
};
use shachain::{RevocationProducer, RevocationStore};
use wire::{
    AddHtlc, ChannelPoint, CloseRequest, CloseResponse, CommitSig, FailHtlc, FailureCode, Hash256,
    HtlcId, Message, MilliSatoshi, PublicKey, Revocation, RevokeAndAck, SettleHtlc, Signature,
};

use binformat::SerdeVec;

use std::collections::BTreeMap;

use crate::error::ChannelError;

/// Update phase of one direction-pair of the channel. The handshake walks
/// Stable -> ProposalSent -> AwaitingRevocation -> Stable; Breached is
/// terminal.
#[derive(Clone, Debug)]
pub enum Phase {
    /// No update in flight.
    Stable,
    /// We signed the counterparty's next commitment and wait for the
    /// counter-signature. The expected local commitment is pinned here so
    /// the counter-signature is verified against exactly what was
    /// proposed.
    ProposalSent { expected: Commitment },
    /// Counter-signature exchanged; the revocation of the superseded
    /// height is outstanding.
    AwaitingRevocation,
    /// Cooperative close requested by us, response outstanding.
    Closing,
    /// No further updates, settlement is up to the on-chain layer.
    Closed,
    /// A protocol or cryptographic check failed. Only unilateral
    /// enforcement remains; every operation is refused.
    Breached,
}

/// Commitment signing keys of the channel: our secret key and the
/// counterparty's verification key.
pub struct ChannelKeys {
    pub commit_sk: SecretKey,
    pub remote_commit_pk: secp256k1::PublicKey,
}

/// The number of window-seeding revocation points each side announces
/// before the first update: the point of the still-active initial state
/// and the point of the first signable height.
const REVOCATION_WINDOW: u64 = 2;

struct RevocationPoint {
    key: PublicKey,
    hash: Hash256,
}

/// All mutable state of one channel. Single logical owner: exactly one
/// caller at a time may hold this (the dispatcher wraps it in a mutex),
/// so concurrent local and remote proposals for one channel are always
/// serialized, never interleaved.
pub struct ChannelMachine {
    channel: ChannelPoint,
    phase: Phase,
    keys: ChannelKeys,
    secp: Secp256k1<All>,

    local_height: u64,
    remote_height: u64,

    producer: RevocationProducer,
    store: RevocationStore,
    /// The counterparty's pre-committed revocation points by commitment
    /// height, recorded from its window seeding and every later
    /// revoke-and-ack.
    remote_points: BTreeMap<u64, RevocationPoint>,
    /// How many points the counterparty has announced; they arrive for
    /// strictly sequential heights starting at zero.
    remote_announced: u64,
    window_sent: bool,

    ledger: HtlcLedger,
    params: CommitmentParams,
}

impl ChannelMachine {
    pub fn new(
        channel: ChannelPoint,
        keys: ChannelKeys,
        config: ChannelConfig,
        revocation_seed: [u8; 32],
        local: MilliSatoshi,
        remote: MilliSatoshi,
    ) -> Self {
        let params = CommitmentParams {
            dust_limit: config.dust_limit,
            fee: config.commit_fee,
            initiator: config.initiator,
        };
        ChannelMachine {
            channel,
            phase: Phase::Stable,
            keys,
            secp: Secp256k1::new(),
            local_height: 0,
            remote_height: 0,
            producer: RevocationProducer::new(revocation_seed),
            store: RevocationStore::new(),
            remote_points: BTreeMap::new(),
            remote_announced: 0,
            window_sent: false,
            ledger: HtlcLedger::new(config, local, remote),
            params,
        }
    }

    pub fn channel(&self) -> ChannelPoint {
        self.channel
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn local_height(&self) -> u64 {
        self.local_height
    }

    pub fn remote_height(&self) -> u64 {
        self.remote_height
    }

    pub fn ledger(&self) -> &HtlcLedger {
        &self.ledger
    }

    fn window_seeded(&self) -> bool {
        self.remote_announced >= REVOCATION_WINDOW
    }

    fn breach<T>(&mut self, error: ChannelError) -> Result<T, ChannelError> {
        warn!("channel {:?} breached: {}", self.channel, error);
        self.phase = Phase::Breached;
        Err(error)
    }

    fn ensure_operational(&self) -> Result<(), ChannelError> {
        match self.phase {
            Phase::Breached => Err(ChannelError::Breached),
            Phase::Closing | Phase::Closed => Err(ChannelError::Closed),
            _ => Ok(()),
        }
    }

    fn ensure_stable(&self) -> Result<(), ChannelError> {
        self.ensure_operational()?;
        match self.phase {
            Phase::Stable => Ok(()),
            _ => Err(ChannelError::UpdateInFlight),
        }
    }

    // ---- local operations (user initiated) ----

    /// Sends the two window-seeding revocation points. Must complete on
    /// both sides before the first commitment can be signed.
    pub fn seed_window(&mut self) -> Result<Vec<Message>, ChannelError> {
        self.ensure_stable()?;
        if self.window_sent {
            return Err(ChannelError::NotReady("revocation window already seeded"));
        }
        let mut messages = Vec::with_capacity(REVOCATION_WINDOW as usize);
        for height in 0..REVOCATION_WINDOW {
            let message = self.build_revoke(Revocation::WindowSeed, height)?;
            messages.push(Message::RevokeAndAck(message));
        }
        self.window_sent = true;
        Ok(messages)
    }

    /// Queues a new outgoing HTLC and returns the message proposing it.
    /// The payment is not part of any commitment until `sign_commit`.
    pub fn add_htlc(
        &mut self,
        amount: MilliSatoshi,
        payment_hash: Hash256,
        expiry: u32,
    ) -> Result<(HtlcId, Message), ChannelError> {
        self.ensure_stable()?;
        let id = self
            .ledger
            .offer(amount, payment_hash, expiry)
            .map_err(ChannelError::Resource)?;
        let message = Message::AddHtlc(AddHtlc {
            channel: self.channel,
            id,
            amount,
            payment_hash,
            expiry,
        });
        Ok((id, message))
    }

    /// Proposes settlement of an HTLC the counterparty offered to us.
    pub fn settle_htlc(
        &mut self,
        id: HtlcId,
        payment_preimage: [u8; 32],
    ) -> Result<Message, ChannelError> {
        self.ensure_stable()?;
        self.ledger
            .settle(id, payment_preimage, Party::Local)
            .map_err(ChannelError::Resource)?;
        Ok(Message::SettleHtlc(SettleHtlc {
            channel: self.channel,
            id,
            payment_preimage,
        }))
    }

    /// Proposes removal of an HTLC the counterparty offered to us.
    pub fn fail_htlc(&mut self, id: HtlcId, reason: FailureCode) -> Result<Message, ChannelError> {
        self.ensure_stable()?;
        self.ledger
            .fail(id, reason, Party::Local)
            .map_err(ChannelError::Resource)?;
        Ok(Message::FailHtlc(FailHtlc {
            channel: self.channel,
            id,
            reason,
        }))
    }

    /// Drops locally queued updates that no commitment signature covers
    /// yet. After `sign_commit` the proposer is committed and the queued
    /// set can no longer be taken back.
    pub fn abandon_updates(&mut self) -> Result<(), ChannelError> {
        self.ensure_stable()?;
        self.ledger.abandon_pending(Party::Local);
        Ok(())
    }

    /// Builds and signs the counterparty's next commitment covering every
    /// queued local update. The point of no return for the proposer; a
    /// second call while the handshake is in flight is rejected rather
    /// than interleaved.
    pub fn sign_commit(&mut self) -> Result<Message, ChannelError> {
        self.ensure_stable()?;
        if !(self.window_sent && self.window_seeded()) {
            return Err(ChannelError::NotReady("revocation window is not seeded"));
        }
        if !self.ledger.has_pending(Party::Local) {
            return Err(ChannelError::Resource(LedgerError::NothingToCommit));
        }

        let height = self.remote_height + 1;
        let view = self.ledger.commitment_view(ViewScope::NextFrom(Party::Local));

        let their_point = self
            .remote_points
            .get(&height)
            .ok_or(ChannelError::NotReady("no revocation point for the next height"))?;
        let theirs = build(
            self.channel,
            &view,
            height,
            Party::Remote,
            their_point.hash,
            &self.params,
        );
        let message = self.commit_sig_message(&theirs)?;

        // pin what the counter-signature must cover
        let own_hash = self.own_revocation_hash(self.local_height + 1)?;
        let expected = build(
            self.channel,
            &view,
            self.local_height + 1,
            Party::Local,
            own_hash,
            &self.params,
        );

        self.remote_height = height;
        self.phase = Phase::ProposalSent { expected };
        Ok(message)
    }

    /// Starts a cooperative close. Refused while an update is in flight.
    pub fn request_close(&mut self) -> Result<Message, ChannelError> {
        self.ensure_stable()?;
        self.phase = Phase::Closing;
        Ok(Message::CloseRequest(CloseRequest {
            channel: self.channel,
        }))
    }

    // ---- inbound message handling ----

    /// Applies one inbound protocol message and returns the outbound
    /// replies. Fatal errors have already frozen the channel when this
    /// returns them; from then on every call answers `Breached` and emits
    /// nothing.
    pub fn handle(&mut self, message: Message) -> Result<Vec<Message>, ChannelError> {
        if let Phase::Breached = self.phase {
            return Err(ChannelError::Breached);
        }

        match message {
            Message::AddHtlc(m) => self.handle_add(m),
            Message::SettleHtlc(m) => self.handle_settle(m),
            Message::FailHtlc(m) => self.handle_fail(m),
            Message::CommitSig(m) => self.handle_commit_sig(m),
            Message::RevokeAndAck(m) => self.handle_revoke(m),
            Message::CloseRequest(m) => self.handle_close_request(m),
            Message::CloseResponse(m) => self.handle_close_response(m),
            Message::Text(_) => self.breach(ChannelError::Protocol(
                "text is not a channel protocol message",
            )),
        }
    }

    fn ensure_updatable(&mut self) -> Result<(), ChannelError> {
        match self.phase {
            Phase::Stable | Phase::ProposalSent { .. } | Phase::AwaitingRevocation => Ok(()),
            Phase::Closing | Phase::Closed => Err(ChannelError::Closed),
            Phase::Breached => Err(ChannelError::Breached),
        }
    }

    /// Remote ledger failures split in two: limit violations are
    /// recoverable, everything else means the counterparty referenced
    /// state it must know it cannot touch.
    fn remote_ledger(&mut self, result: Result<(), LedgerError>) -> Result<(), ChannelError> {
        match result {
            Ok(()) => Ok(()),
            Err(error @ LedgerError::TooManyHtlcs { .. })
            | Err(error @ LedgerError::TooMuchValueInFlight)
            | Err(error @ LedgerError::InsufficientBalance) => {
                Err(ChannelError::Resource(error))
            }
            Err(error) => self.breach(ChannelError::RemoteViolation(error)),
        }
    }

    fn handle_add(&mut self, message: AddHtlc) -> Result<Vec<Message>, ChannelError> {
        self.ensure_updatable()?;
        let result = self.ledger.receive(
            message.id,
            message.amount,
            message.payment_hash,
            message.expiry,
        );
        self.remote_ledger(result)?;
        Ok(Vec::new())
    }

    fn handle_settle(&mut self, message: SettleHtlc) -> Result<Vec<Message>, ChannelError> {
        self.ensure_updatable()?;
        let result = self
            .ledger
            .settle(message.id, message.payment_preimage, Party::Remote);
        self.remote_ledger(result)?;
        Ok(Vec::new())
    }

    fn handle_fail(&mut self, message: FailHtlc) -> Result<Vec<Message>, ChannelError> {
        self.ensure_updatable()?;
        let result = self.ledger.fail(message.id, message.reason, Party::Remote);
        self.remote_ledger(result)?;
        Ok(Vec::new())
    }

    fn handle_commit_sig(&mut self, message: CommitSig) -> Result<Vec<Message>, ChannelError> {
        match std::mem::replace(&mut self.phase, Phase::Stable) {
            Phase::Stable => self.remote_initiated_commit(message),
            Phase::ProposalSent { expected } => self.counter_signature(message, expected),
            Phase::AwaitingRevocation => self.breach(ChannelError::Protocol(
                "commitment signature while a revocation is outstanding",
            )),
            phase @ Phase::Closing | phase @ Phase::Closed => {
                self.phase = phase;
                Err(ChannelError::Closed)
            }
            Phase::Breached => {
                self.phase = Phase::Breached;
                Err(ChannelError::Breached)
            }
        }
    }

    /// The counterparty proposes the next commitment height: verify its
    /// signature against the locally recomputed commitment, counter-sign
    /// its view, then disclose our revocation of the superseded height.
    fn remote_initiated_commit(
        &mut self,
        message: CommitSig,
    ) -> Result<Vec<Message>, ChannelError> {
        if !(self.window_sent && self.window_seeded()) {
            return self.breach(ChannelError::Protocol(
                "commitment signed before revocation window seeding",
            ));
        }
        if !self.ledger.has_pending(Party::Remote) {
            return self.breach(ChannelError::Protocol(
                "commitment signature for a height never proposed",
            ));
        }

        let local_new = self.local_height + 1;
        let view = self.ledger.commitment_view(ViewScope::NextFrom(Party::Remote));
        let own_hash = self.own_revocation_hash(local_new)?;
        let own = build(
            self.channel,
            &view,
            local_new,
            Party::Local,
            own_hash,
            &self.params,
        );
        self.verify_commit_sig(&own, &message)?;

        // their view of the same update set
        let their_height = self.remote_height + 1;
        let their_point = match self.remote_points.get(&their_height) {
            Some(point) => point,
            None => {
                return self.breach(ChannelError::Protocol(
                    "counterparty proposed beyond its announced revocation points",
                ));
            }
        };
        let theirs = build(
            self.channel,
            &view,
            their_height,
            Party::Remote,
            their_point.hash,
            &self.params,
        );
        let counter_sig = self.commit_sig_message(&theirs)?;

        self.local_height = local_new;
        self.remote_height = their_height;
        let _ = self.ledger.commit_pending(Party::Remote);
        let revoke = self.accept_revoke(local_new)?;

        self.phase = Phase::AwaitingRevocation;
        Ok(vec![counter_sig, Message::RevokeAndAck(revoke)])
    }

    /// The counterparty counter-signed our proposal: accept the new local
    /// commitment and disclose the revocation of the superseded height.
    fn counter_signature(
        &mut self,
        message: CommitSig,
        expected: Commitment,
    ) -> Result<Vec<Message>, ChannelError> {
        if let Err(error) = self.verify_commit_sig(&expected, &message) {
            // no revocation leaves this node on a bad counter-signature
            return Err(error);
        }

        self.local_height = expected.height;
        let _ = self.ledger.commit_pending(Party::Local);
        let revoke = self.accept_revoke(expected.height)?;

        self.phase = Phase::AwaitingRevocation;
        Ok(vec![Message::RevokeAndAck(revoke)])
    }

    fn handle_revoke(&mut self, message: RevokeAndAck) -> Result<Vec<Message>, ChannelError> {
        match self.phase {
            Phase::Stable => self.handle_window_seed(message),
            Phase::AwaitingRevocation => self.handle_disclosure(message),
            Phase::ProposalSent { .. } => self.breach(ChannelError::Protocol(
                "revocation before the counter-signature",
            )),
            Phase::Closing | Phase::Closed => Err(ChannelError::Closed),
            Phase::Breached => Err(ChannelError::Breached),
        }
    }

    /// Initial revocation window: the counterparty announces the points
    /// of its first heights before any update runs. Only the all-zero
    /// sentinel is legal here, and only until the window is full.
    fn handle_window_seed(&mut self, message: RevokeAndAck) -> Result<Vec<Message>, ChannelError> {
        if self.remote_height != 0 || self.window_seeded() {
            return self.breach(ChannelError::Protocol("revocation received while stable"));
        }
        match message.revocation {
            Revocation::WindowSeed => {
                self.record_announcement(&message);
                Ok(Vec::new())
            }
            Revocation::Secret(_) => self.breach(ChannelError::Protocol(
                "secret disclosed during window seeding",
            )),
        }
    }

    /// The revocation completing an update handshake. The disclosed
    /// secret must hash to the value the counterparty committed for that
    /// height, re-derive the announced key, and extend the shachain
    /// store; any mismatch is a breach.
    fn handle_disclosure(&mut self, message: RevokeAndAck) -> Result<Vec<Message>, ChannelError> {
        let accepted = self.remote_height;
        match message.revocation {
            Revocation::WindowSeed => {
                if accepted >= 2 {
                    return self.breach(ChannelError::Crypto(
                        "window seed sentinel in place of a due revocation",
                    ));
                }
                // below height two there is no predecessor to revoke
            }
            Revocation::Secret(secret) => {
                if accepted < 2 {
                    return self.breach(ChannelError::Protocol(
                        "secret disclosed for a height that cannot be revoked yet",
                    ));
                }
                let disclosed_height = accepted - 2;
                if self.store.next_height() != disclosed_height {
                    return self.breach(ChannelError::Protocol("revocation out of order"));
                }
                self.verify_disclosure(disclosed_height, secret)?;
                self.remote_points.remove(&disclosed_height);
            }
        }

        self.record_announcement(&message);
        self.ledger.ack_remote_commit();
        self.phase = Phase::Stable;
        Ok(Vec::new())
    }

    fn verify_disclosure(&mut self, height: u64, secret: [u8; 32]) -> Result<(), ChannelError> {
        let (committed_hash, committed_key) = match self.remote_points.get(&height) {
            Some(point) => (point.hash, point.key),
            None => {
                return self.breach(ChannelError::Protocol(
                    "no revocation point recorded for the disclosed height",
                ));
            }
        };

        if sha256_of(&secret) != committed_hash {
            return self.breach(ChannelError::Crypto(
                "disclosed secret does not hash to the committed value",
            ));
        }
        let derived_key = SecretKey::from_slice(&secret)
            .map(|sk| secp256k1::PublicKey::from_secret_key(&self.secp, &sk));
        match derived_key {
            Ok(key) if PublicKey::from(key) == committed_key => (),
            _ => {
                return self.breach(ChannelError::Crypto(
                    "disclosed secret does not derive the committed key",
                ));
            }
        }
        if self.store.add_next_entry(secret).is_err() {
            return self.breach(ChannelError::Crypto(
                "disclosed secret does not extend the revocation chain",
            ));
        }
        debug!(
            "channel {:?}: height {} irrevocably superseded",
            self.channel, height
        );
        Ok(())
    }

    fn record_announcement(&mut self, message: &RevokeAndAck) {
        self.remote_points.insert(
            self.remote_announced,
            RevocationPoint {
                key: message.next_revocation_key,
                hash: message.next_revocation_hash,
            },
        );
        self.remote_announced += 1;
    }

    fn handle_close_request(&mut self, _message: CloseRequest) -> Result<Vec<Message>, ChannelError> {
        match self.phase {
            Phase::Stable | Phase::Closing => {
                self.phase = Phase::Closed;
                Ok(vec![Message::CloseResponse(CloseResponse {
                    channel: self.channel,
                })])
            }
            Phase::Closed => Ok(Vec::new()),
            Phase::Breached => Err(ChannelError::Breached),
            _ => self.breach(ChannelError::Protocol(
                "close requested while an update is in flight",
            )),
        }
    }

    fn handle_close_response(
        &mut self,
        _message: CloseResponse,
    ) -> Result<Vec<Message>, ChannelError> {
        match self.phase {
            Phase::Closing => {
                self.phase = Phase::Closed;
                Ok(Vec::new())
            }
            Phase::Closed => Ok(Vec::new()),
            Phase::Breached => Err(ChannelError::Breached),
            _ => self.breach(ChannelError::Protocol("unsolicited close response")),
        }
    }

    // ---- signing plumbing ----

    fn own_revocation_hash(&self, height: u64) -> Result<Hash256, ChannelError> {
        let secret = self.producer.secret_for_height(height)?;
        Ok(sha256_of(&secret))
    }

    fn accept_revoke(&self, accepted_height: u64) -> Result<RevokeAndAck, ChannelError> {
        let revocation = if accepted_height >= 2 {
            Revocation::Secret(self.producer.secret_for_height(accepted_height - 2)?)
        } else {
            Revocation::WindowSeed
        };
        self.build_revoke(revocation, accepted_height + 1)
    }

    fn build_revoke(
        &self,
        revocation: Revocation,
        announce_height: u64,
    ) -> Result<RevokeAndAck, ChannelError> {
        let secret = self.producer.secret_for_height(announce_height)?;
        let sk = SecretKey::from_slice(&secret)?;
        let key = secp256k1::PublicKey::from_secret_key(&self.secp, &sk);
        Ok(RevokeAndAck {
            channel: self.channel,
            revocation,
            next_revocation_key: key.into(),
            next_revocation_hash: sha256_of(&secret),
        })
    }

    fn commit_sig_message(&self, commitment: &Commitment) -> Result<Message, ChannelError> {
        let commit_sig = self.sign_digest(commitment.digest())?;
        let htlc_sigs = commitment
            .htlc_digests()
            .into_iter()
            .map(|digest| self.sign_digest(digest))
            .collect::<Result<Vec<Signature>, ChannelError>>()?;
        Ok(Message::CommitSig(CommitSig {
            channel: self.channel,
            commit_sig,
            htlc_sigs: SerdeVec(htlc_sigs),
        }))
    }

    fn verify_commit_sig(
        &mut self,
        commitment: &Commitment,
        message: &CommitSig,
    ) -> Result<(), ChannelError> {
        if !self.verify_digest(commitment.digest(), &message.commit_sig) {
            return self.breach(ChannelError::Crypto(
                "commitment signature does not verify",
            ));
        }
        let SerdeVec(ref htlc_sigs) = message.htlc_sigs;
        let digests = commitment.htlc_digests();
        if htlc_sigs.len() != digests.len() {
            return self.breach(ChannelError::Crypto(
                "wrong number of htlc signatures",
            ));
        }
        for (digest, sig) in digests.into_iter().zip(htlc_sigs) {
            if !self.verify_digest(digest, sig) {
                return self.breach(ChannelError::Crypto("htlc signature does not verify"));
            }
        }
        Ok(())
    }

    fn sign_digest(&self, digest: Hash256) -> Result<Signature, ChannelError> {
        let message = secp256k1::Message::from_slice(&digest.as_bytes()[..])?;
        Ok(self.secp.sign(&message, &self.keys.commit_sk).into())
    }

    fn verify_digest(&self, digest: Hash256, signature: &Signature) -> bool {
        match secp256k1::Message::from_slice(&digest.as_bytes()[..]) {
            Ok(message) => self
                .secp
                .verify(&message, signature.as_ref(), &self.keys.remote_commit_pk)
                .is_ok(),
            Err(_) => false,
        }
    }
}

fn sha256_of(bytes: &[u8]) -> Hash256 {
    sha256::Hash::hash(bytes).into_inner().into()
}
