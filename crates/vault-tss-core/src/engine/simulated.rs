//! Simulated protocol engine
//!
//! A stand-in for the native threshold engine with the same polling
//! surface, used by the CLI simulation and the test suite. Every protocol
//! runs two rounds:
//!
//! - **Keygen**: commit to a random contribution, then reveal it. The key
//!   is derived from all contributions in party order.
//! - **Sign**: announce the key id, then confirm. Each party signs the
//!   payload locally once both rounds are complete.
//! - **Quorum change**: announce, then old parties transfer the key to the
//!   parties joining the new quorum.
//!
//! **This engine is not secure.** Every party ends up holding the whole
//! secret. It exists to exercise the driver with real, verifiable
//! signatures and deterministic output when seeded.

use super::{Handle, ProtocolEngine, SessionKind};
use crate::{Error, KeyType, PartyId, Result};
use ed25519_dalek::Signer;
use k256::{
    ProjectivePoint, Scalar,
    elliptic_curve::{bigint::U256, ops::Reduce, sec1::ToEncodedPoint},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

// ============ Wire Formats ============

/// Serialized key share
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimKeyshare {
    key_type: KeyType,
    party_id: PartyId,
    parties: Vec<PartyId>,
    threshold: usize,
    secret: String,
    public_key: String,
    chain_code: Option<String>,
    generation: u32,
}

impl SimKeyshare {
    fn secret_bytes(&self) -> Result<[u8; 32]> {
        decode_32(&self.secret, "secret")
    }

    fn key_id(&self) -> Result<String> {
        key_id_of(&self.public_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SimSetup {
    Keygen {
        key_type: KeyType,
        threshold: usize,
        parties: Vec<PartyId>,
        nonce: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chain_code: Option<String>,
    },
    Sign {
        key_type: KeyType,
        key_id: String,
        derive_path: String,
        payload: String,
        parties: Vec<PartyId>,
    },
    QuorumChange {
        key_type: KeyType,
        threshold: usize,
        parties: Vec<PartyId>,
        old_indices: Vec<usize>,
        new_indices: Vec<usize>,
        public_key: String,
        generation: u32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Payload {
    Commit { commitment: String },
    Reveal { contribution: String },
    Announce { key_id: String },
    Confirm { key_id: String },
    Transfer { secret: String, chain_code: Option<String> },
}

impl Payload {
    fn round(&self) -> u8 {
        match self {
            Payload::Commit { .. } | Payload::Announce { .. } => 1,
            Payload::Reveal { .. } | Payload::Confirm { .. } | Payload::Transfer { .. } => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimMessage {
    from: PartyId,
    to: Vec<PartyId>,
    payload: Payload,
}

// ============ Session State ============

enum Work {
    Keygen {
        contribution: [u8; 32],
        chain_code: Option<String>,
    },
    Sign {
        share: SimKeyshare,
        derive_path: Vec<u8>,
        payload: Vec<u8>,
    },
    QuorumChange {
        share: Option<SimKeyshare>,
        old: Vec<PartyId>,
        new: Vec<PartyId>,
        public_key: String,
        generation: u32,
    },
}

struct SimSession {
    key_type: KeyType,
    local: PartyId,
    parties: Vec<PartyId>,
    threshold: usize,
    key_id: String,
    work: Work,
    outbound: VecDeque<Vec<u8>>,
    round1: HashMap<PartyId, Payload>,
    round2: HashMap<PartyId, Payload>,
    second_round_queued: bool,
    finished: bool,
}

impl SimSession {
    fn others(&self) -> Vec<PartyId> {
        self.parties
            .iter()
            .filter(|p| **p != self.local)
            .cloned()
            .collect()
    }

    fn queue(&mut self, to: Vec<PartyId>, payload: Payload) -> Result<()> {
        if to.is_empty() {
            return Ok(());
        }
        let message = SimMessage {
            from: self.local.clone(),
            to,
            payload,
        };
        self.outbound.push_back(serde_json::to_vec(&message)?);
        Ok(())
    }

    fn first_round(&self) -> Result<Payload> {
        Ok(match &self.work {
            Work::Keygen { contribution, .. } => Payload::Commit {
                commitment: hex::encode(Sha256::digest(contribution)),
            },
            Work::Sign { .. } | Work::QuorumChange { .. } => Payload::Announce {
                key_id: self.key_id.clone(),
            },
        })
    }

    /// Receivers and payload of this party's second-round message, if any
    fn second_round(&self) -> Result<Option<(Vec<PartyId>, Payload)>> {
        Ok(match &self.work {
            Work::Keygen { contribution, .. } => Some((
                self.others(),
                Payload::Reveal {
                    contribution: hex::encode(contribution),
                },
            )),
            Work::Sign { .. } => Some((
                self.others(),
                Payload::Confirm {
                    key_id: self.key_id.clone(),
                },
            )),
            Work::QuorumChange { share, new, .. } => match share {
                Some(share) => {
                    let to: Vec<PartyId> =
                        new.iter().filter(|p| **p != self.local).cloned().collect();
                    Some((
                        to,
                        Payload::Transfer {
                            secret: share.secret.clone(),
                            chain_code: share.chain_code.clone(),
                        },
                    ))
                }
                None => None,
            },
        })
    }

    /// Parties whose second-round message this party waits for
    fn second_round_senders(&self) -> Vec<PartyId> {
        match &self.work {
            Work::Keygen { .. } | Work::Sign { .. } => self.others(),
            Work::QuorumChange { old, new, .. } => {
                if new.contains(&self.local) {
                    old.iter().filter(|p| **p != self.local).cloned().collect()
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn first_round_complete(&self) -> bool {
        self.others().iter().all(|p| self.round1.contains_key(p))
    }

    fn complete(&self) -> bool {
        self.first_round_complete()
            && self.second_round_queued
            && self
                .second_round_senders()
                .iter()
                .all(|p| self.round2.contains_key(p))
    }

    fn check_payload(&self, from: &str, payload: &Payload) -> Result<()> {
        match (payload, &self.work) {
            (Payload::Commit { .. } | Payload::Reveal { .. }, Work::Keygen { .. }) => Ok(()),
            (Payload::Announce { key_id } | Payload::Confirm { key_id }, Work::Sign { .. })
            | (Payload::Announce { key_id }, Work::QuorumChange { .. }) => {
                if *key_id != self.key_id {
                    return Err(Error::Engine(format!("key id mismatch from {}", from)));
                }
                Ok(())
            }
            (Payload::Transfer { secret, .. }, Work::QuorumChange { old, new, public_key, .. }) => {
                if !old.iter().any(|p| p == from) {
                    return Err(Error::Engine(format!("{} is not in the old quorum", from)));
                }
                if !new.contains(&self.local) {
                    return Err(Error::Engine("transfer to a party leaving the quorum".into()));
                }
                let secret = decode_32(secret, "secret")?;
                if hex::encode(public_key_for(self.key_type, &secret)?) != *public_key {
                    return Err(Error::Engine(format!("transfer from {} has wrong key", from)));
                }
                Ok(())
            }
            _ => Err(Error::Engine(format!("unexpected message from {}", from))),
        }
    }

    fn apply(&mut self, message: SimMessage) -> Result<bool> {
        if self.finished {
            return Err(Error::Engine("session already finished".into()));
        }
        if message.from == self.local {
            return Err(Error::Engine("message from self".into()));
        }
        if !self.parties.contains(&message.from) {
            return Err(Error::Engine(format!("unknown sender {}", message.from)));
        }
        if !message.to.contains(&self.local) {
            return Err(Error::Engine("message not addressed to this party".into()));
        }
        self.check_payload(&message.from, &message.payload)?;

        let received = match message.payload.round() {
            1 => &mut self.round1,
            _ => &mut self.round2,
        };
        if received.contains_key(&message.from) {
            return Err(Error::Engine(format!(
                "duplicate round {} message from {}",
                message.payload.round(),
                message.from
            )));
        }
        received.insert(message.from, message.payload);

        if !self.second_round_queued && self.first_round_complete() {
            if let Some((to, payload)) = self.second_round()? {
                self.queue(to, payload)?;
            }
            self.second_round_queued = true;
        }

        if self.complete() {
            self.finished = true;
            return Ok(true);
        }
        Ok(false)
    }

    fn finish(&self) -> Result<Vec<u8>> {
        if !self.finished {
            return Err(Error::Engine("session not finished".into()));
        }

        match &self.work {
            Work::Keygen {
                contribution,
                chain_code,
            } => {
                let mut hasher = Sha256::new();
                hasher.update(self.key_type.message_tag().as_bytes());
                for party in &self.parties {
                    if *party == self.local {
                        hasher.update(contribution);
                        continue;
                    }
                    let commitment = match self.round1.get(party) {
                        Some(Payload::Commit { commitment }) => commitment,
                        _ => return Err(Error::Engine(format!("missing commit of {}", party))),
                    };
                    let revealed = match self.round2.get(party) {
                        Some(Payload::Reveal { contribution }) => decode_32(contribution, "reveal")?,
                        _ => return Err(Error::Engine(format!("missing reveal of {}", party))),
                    };
                    if hex::encode(Sha256::digest(revealed)) != *commitment {
                        return Err(Error::Engine(format!("{} broke its commitment", party)));
                    }
                    hasher.update(revealed);
                }
                let secret: [u8; 32] = hasher.finalize().into();
                let chain_code = match self.key_type {
                    KeyType::Ecdsa => chain_code
                        .clone()
                        .or_else(|| chain_code_for(self.key_type, &secret)),
                    KeyType::Eddsa => None,
                };
                self.new_share(&secret, chain_code, 0)
            }
            Work::Sign {
                share,
                derive_path,
                payload,
            } => sign(share, derive_path, payload),
            Work::QuorumChange {
                share,
                old,
                new,
                generation,
                ..
            } => {
                if !new.contains(&self.local) {
                    return Ok(Vec::new());
                }
                let (secret, chain_code) = match share {
                    Some(share) => (share.secret_bytes()?, share.chain_code.clone()),
                    None => {
                        let sender = old
                            .iter()
                            .find(|p| self.round2.contains_key(*p))
                            .ok_or_else(|| Error::Engine("no key transfer received".into()))?;
                        match self.round2.get(sender) {
                            Some(Payload::Transfer { secret, chain_code }) => {
                                (decode_32(secret, "secret")?, chain_code.clone())
                            }
                            _ => return Err(Error::Engine("no key transfer received".into())),
                        }
                    }
                };

                let mut share = self.new_share_record(&secret, chain_code, generation + 1)?;
                share.parties = new.clone();
                Ok(serde_json::to_vec(&share)?)
            }
        }
    }

    fn new_share_record(
        &self,
        secret: &[u8; 32],
        chain_code: Option<String>,
        generation: u32,
    ) -> Result<SimKeyshare> {
        Ok(SimKeyshare {
            key_type: self.key_type,
            party_id: self.local.clone(),
            parties: self.parties.clone(),
            threshold: self.threshold,
            secret: hex::encode(secret),
            public_key: hex::encode(public_key_for(self.key_type, secret)?),
            chain_code,
            generation,
        })
    }

    fn new_share(
        &self,
        secret: &[u8; 32],
        chain_code: Option<String>,
        generation: u32,
    ) -> Result<Vec<u8>> {
        let share = self.new_share_record(secret, chain_code, generation)?;
        Ok(serde_json::to_vec(&share)?)
    }
}

enum Slot {
    Keyshare(SimKeyshare),
    Session(Box<SimSession>),
}

// ============ Engine ============

/// In-process engine for one key type
pub struct SimulatedEngine {
    key_type: KeyType,
    seed: [u8; 32],
    setups: AtomicU64,
    next_handle: AtomicU64,
    slots: Mutex<HashMap<Handle, Slot>>,
}

impl SimulatedEngine {
    /// Engine with fresh randomness
    pub fn new(key_type: KeyType) -> Self {
        Self::with_seed_bytes(key_type, rand::random())
    }

    /// Engine whose every output is a function of `seed` and its inputs
    pub fn seeded(key_type: KeyType, seed: u64) -> Self {
        let seed = Sha256::new()
            .chain_update(b"vault-tss/sim/seed")
            .chain_update(seed.to_be_bytes())
            .finalize();
        Self::with_seed_bytes(key_type, seed.into())
    }

    fn with_seed_bytes(key_type: KeyType, seed: [u8; 32]) -> Self {
        Self {
            key_type,
            seed,
            setups: AtomicU64::new(0),
            next_handle: AtomicU64::new(0),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Number of handles not yet released
    pub fn live_handles(&self) -> usize {
        self.slots.lock().len()
    }

    /// Public key a signature over `derive_path` verifies against
    pub fn signing_public_key(&self, keyshare: Handle, derive_path: &[u8]) -> Result<Vec<u8>> {
        let share = self.keyshare(keyshare)?;
        match (self.key_type, &share.chain_code) {
            (KeyType::Ecdsa, Some(chain_code)) if !derive_path.is_empty() => {
                let secret = derive_ecdsa_secret(&share.secret_bytes()?, chain_code, derive_path)?;
                public_key_for(KeyType::Ecdsa, &secret)
            }
            _ => Ok(hex::decode(&share.public_key)?),
        }
    }

    fn allocate(&self, slot: Slot) -> Handle {
        let handle = Handle::new(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.slots.lock().insert(handle, slot);
        handle
    }

    fn keyshare(&self, handle: Handle) -> Result<SimKeyshare> {
        match self.slots.lock().get(&handle) {
            Some(Slot::Keyshare(share)) => Ok(share.clone()),
            Some(Slot::Session(_)) => Err(Error::Engine(format!("{} is a session", handle))),
            None => Err(Error::Engine(format!("unknown key share handle {}", handle))),
        }
    }

    fn with_session<T>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut SimSession) -> Result<T>,
    ) -> Result<T> {
        match self.slots.lock().get_mut(&handle) {
            Some(Slot::Session(session)) => f(session),
            Some(Slot::Keyshare(_)) => Err(Error::Engine(format!("{} is a key share", handle))),
            None => Err(Error::Engine(format!("unknown session handle {}", handle))),
        }
    }

    fn ensure_key_type(&self, key_type: KeyType) -> Result<()> {
        if key_type != self.key_type {
            return Err(Error::Engine(format!(
                "{} material given to {} engine",
                key_type, self.key_type
            )));
        }
        Ok(())
    }

    fn contribution(&self, nonce: &str, local_party_id: &str) -> [u8; 32] {
        Sha256::new()
            .chain_update(self.seed)
            .chain_update(b"contribution")
            .chain_update(nonce.as_bytes())
            .chain_update(local_party_id.as_bytes())
            .finalize()
            .into()
    }
}

impl ProtocolEngine for SimulatedEngine {
    fn key_type(&self) -> KeyType {
        self.key_type
    }

    fn load_keyshare(&self, bytes: &[u8]) -> Result<Handle> {
        let share: SimKeyshare = serde_json::from_slice(bytes)
            .map_err(|e| Error::Engine(format!("malformed key share: {}", e)))?;
        self.ensure_key_type(share.key_type)?;
        Ok(self.allocate(Slot::Keyshare(share)))
    }

    fn free_keyshare(&self, keyshare: Handle) -> Result<()> {
        let mut slots = self.slots.lock();
        match slots.get(&keyshare) {
            Some(Slot::Keyshare(_)) => {
                slots.remove(&keyshare);
                Ok(())
            }
            _ => Err(Error::Engine(format!("no key share {}", keyshare))),
        }
    }

    fn key_id(&self, keyshare: Handle) -> Result<Vec<u8>> {
        Ok(hex::decode(self.keyshare(keyshare)?.key_id()?)?)
    }

    fn public_key(&self, keyshare: Handle) -> Result<Vec<u8>> {
        Ok(hex::decode(self.keyshare(keyshare)?.public_key)?)
    }

    fn chain_code(&self, keyshare: Handle) -> Result<Option<Vec<u8>>> {
        match self.keyshare(keyshare)?.chain_code {
            Some(code) => Ok(Some(hex::decode(code)?)),
            None => Ok(None),
        }
    }

    fn keygen_setup(
        &self,
        threshold: usize,
        parties: &[PartyId],
        chain_code: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        validate_parties(parties, threshold)?;
        if let Some(code) = chain_code.filter(|c| c.len() != 32) {
            return Err(Error::Engine(format!(
                "chain code must be 32 bytes, got {}",
                code.len()
            )));
        }
        let counter = self.setups.fetch_add(1, Ordering::SeqCst);
        let nonce = Sha256::new()
            .chain_update(self.seed)
            .chain_update(b"keygen-setup")
            .chain_update(counter.to_be_bytes())
            .finalize();

        let setup = SimSetup::Keygen {
            key_type: self.key_type,
            threshold,
            parties: parties.to_vec(),
            nonce: hex::encode(nonce),
            chain_code: chain_code.map(hex::encode),
        };
        Ok(serde_json::to_vec(&setup)?)
    }

    fn sign_setup(
        &self,
        key_id: &[u8],
        derive_path: &[u8],
        payload: &[u8],
        parties: &[PartyId],
    ) -> Result<Vec<u8>> {
        validate_parties(parties, 1)?;
        if payload.len() != 32 {
            return Err(Error::Engine(format!(
                "payload must be 32 bytes, got {}",
                payload.len()
            )));
        }

        let setup = SimSetup::Sign {
            key_type: self.key_type,
            key_id: hex::encode(key_id),
            derive_path: hex::encode(derive_path),
            payload: hex::encode(payload),
            parties: parties.to_vec(),
        };
        Ok(serde_json::to_vec(&setup)?)
    }

    fn quorum_change_setup(
        &self,
        keyshare: Handle,
        threshold: usize,
        parties: &[PartyId],
        old_indices: &[usize],
        new_indices: &[usize],
    ) -> Result<Vec<u8>> {
        validate_parties(parties, threshold)?;
        if old_indices.is_empty() || new_indices.is_empty() {
            return Err(Error::Engine("old and new quorums must not be empty".into()));
        }
        if let Some(index) = old_indices
            .iter()
            .chain(new_indices)
            .find(|i| **i >= parties.len())
        {
            return Err(Error::Engine(format!("party index {} out of range", index)));
        }

        let share = self.keyshare(keyshare)?;
        let setup = SimSetup::QuorumChange {
            key_type: self.key_type,
            threshold,
            parties: parties.to_vec(),
            old_indices: old_indices.to_vec(),
            new_indices: new_indices.to_vec(),
            public_key: share.public_key,
            generation: share.generation,
        };
        Ok(serde_json::to_vec(&setup)?)
    }

    fn session_from_setup(
        &self,
        kind: SessionKind,
        setup: &[u8],
        local_party_id: &str,
        keyshare: Option<Handle>,
    ) -> Result<Handle> {
        let parsed: SimSetup = serde_json::from_slice(setup)
            .map_err(|e| Error::Engine(format!("malformed setup: {}", e)))?;
        let share = keyshare.map(|h| self.keyshare(h)).transpose()?;

        let (key_type, parties, threshold, key_id, work) = match (kind, parsed) {
            (
                SessionKind::Keygen,
                SimSetup::Keygen {
                    key_type,
                    threshold,
                    parties,
                    nonce,
                    chain_code,
                },
            ) => {
                let contribution = self.contribution(&nonce, local_party_id);
                (
                    key_type,
                    parties,
                    threshold,
                    String::new(),
                    Work::Keygen {
                        contribution,
                        chain_code,
                    },
                )
            }
            (
                SessionKind::Sign,
                SimSetup::Sign {
                    key_type,
                    key_id,
                    derive_path,
                    payload,
                    parties,
                },
            ) => {
                let share = share
                    .ok_or_else(|| Error::Engine("signing requires a key share".into()))?;
                if share.key_id()? != key_id {
                    return Err(Error::Engine("key share does not match setup key id".into()));
                }
                if let Some(stranger) = parties.iter().find(|p| !share.parties.contains(*p)) {
                    return Err(Error::Engine(format!("{} holds no share of this key", stranger)));
                }
                let threshold = share.threshold;
                let work = Work::Sign {
                    share,
                    derive_path: hex::decode(derive_path)?,
                    payload: hex::decode(payload)?,
                };
                (key_type, parties, threshold, key_id, work)
            }
            (
                SessionKind::QuorumChange,
                SimSetup::QuorumChange {
                    key_type,
                    threshold,
                    parties,
                    old_indices,
                    new_indices,
                    public_key,
                    generation,
                },
            ) => {
                let pick = |indices: &[usize]| -> Vec<PartyId> {
                    indices
                        .iter()
                        .filter_map(|i| parties.get(*i).cloned())
                        .collect()
                };
                let old = pick(&old_indices);
                let new = pick(&new_indices);
                let is_old = old.iter().any(|p| p == local_party_id);
                let share = match (is_old, share) {
                    (true, Some(share)) => {
                        if share.public_key != public_key {
                            return Err(Error::Engine("key share is for another key".into()));
                        }
                        Some(share)
                    }
                    (true, None) => {
                        return Err(Error::Engine("old party without a key share".into()));
                    }
                    (false, _) => None,
                };
                let key_id = key_id_of(&public_key)?;
                let work = Work::QuorumChange {
                    share,
                    old,
                    new,
                    public_key,
                    generation,
                };
                (key_type, parties, threshold, key_id, work)
            }
            (kind, _) => {
                return Err(Error::Engine(format!("setup is not a {:?} setup", kind)));
            }
        };

        self.ensure_key_type(key_type)?;
        if !parties.iter().any(|p| p == local_party_id) {
            return Err(Error::Engine(format!(
                "{} is not a party of this setup",
                local_party_id
            )));
        }

        let mut session = SimSession {
            key_type,
            local: local_party_id.to_string(),
            parties,
            threshold,
            key_id,
            work,
            outbound: VecDeque::new(),
            round1: HashMap::new(),
            round2: HashMap::new(),
            second_round_queued: false,
            finished: false,
        };
        let first = session.first_round()?;
        session.queue(session.others(), first)?;

        debug!(key_type = %self.key_type, ?kind, party = local_party_id, "Simulated session created");
        Ok(self.allocate(Slot::Session(Box::new(session))))
    }

    fn next_outbound(&self, session: Handle) -> Result<Vec<u8>> {
        self.with_session(session, |s| Ok(s.outbound.pop_front().unwrap_or_default()))
    }

    fn receiver_of(
        &self,
        session: Handle,
        message: &[u8],
        index: usize,
    ) -> Result<Option<PartyId>> {
        self.with_session(session, |_| {
            let message: SimMessage = serde_json::from_slice(message)
                .map_err(|e| Error::Engine(format!("malformed message: {}", e)))?;
            Ok(message.to.get(index).cloned())
        })
    }

    fn apply_inbound(&self, session: Handle, message: &[u8]) -> Result<bool> {
        let message: SimMessage = serde_json::from_slice(message)
            .map_err(|e| Error::Engine(format!("malformed message: {}", e)))?;
        self.with_session(session, |s| s.apply(message))
    }

    fn finish(&self, session: Handle) -> Result<Vec<u8>> {
        self.with_session(session, |s| s.finish())
    }

    fn free_session(&self, session: Handle) -> Result<()> {
        let mut slots = self.slots.lock();
        match slots.get(&session) {
            Some(Slot::Session(_)) => {
                slots.remove(&session);
                Ok(())
            }
            _ => Err(Error::Engine(format!("no session {}", session))),
        }
    }
}

// ============ Curve Helpers ============

fn validate_parties(parties: &[PartyId], threshold: usize) -> Result<()> {
    if parties.len() < 2 {
        return Err(Error::Engine("at least two parties are required".into()));
    }
    if threshold == 0 || threshold > parties.len() {
        return Err(Error::Engine(format!(
            "threshold {} invalid for {} parties",
            threshold,
            parties.len()
        )));
    }
    for (i, party) in parties.iter().enumerate() {
        if parties[..i].contains(party) {
            return Err(Error::Engine(format!("duplicate party {}", party)));
        }
    }
    Ok(())
}

fn decode_32(value: &str, what: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Engine(format!("{} must be 32 bytes", what)))
}

fn key_id_of(public_key_hex: &str) -> Result<String> {
    Ok(hex::encode(Sha256::digest(hex::decode(public_key_hex)?)))
}

fn ecdsa_scalar(secret: &[u8; 32]) -> Result<Scalar> {
    let scalar = <Scalar as Reduce<U256>>::reduce_bytes(&(*secret).into());
    if bool::from(scalar.is_zero()) {
        return Err(Error::Engine("secret reduces to zero".into()));
    }
    Ok(scalar)
}

fn public_key_for(key_type: KeyType, secret: &[u8; 32]) -> Result<Vec<u8>> {
    match key_type {
        KeyType::Ecdsa => {
            let point = ProjectivePoint::GENERATOR * ecdsa_scalar(secret)?;
            Ok(point.to_affine().to_encoded_point(true).as_bytes().to_vec())
        }
        KeyType::Eddsa => Ok(ed25519_dalek::SigningKey::from_bytes(secret)
            .verifying_key()
            .to_bytes()
            .to_vec()),
    }
}

fn chain_code_for(key_type: KeyType, secret: &[u8; 32]) -> Option<String> {
    match key_type {
        KeyType::Ecdsa => Some(hex::encode(
            Sha256::new()
                .chain_update(b"chain-code")
                .chain_update(secret)
                .finalize(),
        )),
        KeyType::Eddsa => None,
    }
}

/// Additive tweak of the root secret for a derivation path
fn derive_ecdsa_secret(secret: &[u8; 32], chain_code_hex: &str, path: &[u8]) -> Result<[u8; 32]> {
    let digest = Sha256::new()
        .chain_update(hex::decode(chain_code_hex)?)
        .chain_update(path)
        .finalize();
    let tweak = <Scalar as Reduce<U256>>::reduce_bytes(&digest);
    let derived = ecdsa_scalar(secret)? + tweak;
    if bool::from(derived.is_zero()) {
        return Err(Error::Engine("derived key is zero".into()));
    }
    Ok(derived.to_bytes().into())
}

fn sign(share: &SimKeyshare, derive_path: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let secret = share.secret_bytes()?;
    match share.key_type {
        KeyType::Ecdsa => {
            let secret = match &share.chain_code {
                Some(chain_code) if !derive_path.is_empty() => {
                    derive_ecdsa_secret(&secret, chain_code, derive_path)?
                }
                _ => ecdsa_scalar(&secret)?.to_bytes().into(),
            };
            let key = k256::ecdsa::SigningKey::from_slice(&secret)
                .map_err(|e| Error::Engine(format!("signing key: {}", e)))?;
            let (signature, recovery_id) = key
                .sign_prehash_recoverable(payload)
                .map_err(|e| Error::Engine(format!("sign: {}", e)))?;

            let mut artifact = signature.to_bytes().to_vec();
            artifact.push(recovery_id.to_byte());
            Ok(artifact)
        }
        KeyType::Eddsa => {
            let key = ed25519_dalek::SigningKey::from_bytes(&secret);
            Ok(key.sign(payload).to_bytes().to_vec())
        }
    }
}
