//! The Double Ratchet (component C, §4.C).
//!
//! This replaces the single-hash-advance stub this workspace started from:
//! every decrypt call maintains a per-DH-epoch map of skipped message keys
//! and triggers a full DH ratchet step whenever the sender's ratchet public
//! key changes, bounded by [`Config::max_skip_total`] and
//! [`Config::max_skip_per_chain`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};
use zeroize::Zeroizing;

use crate::config::Config;
use crate::error::SessionError;
use crate::primitives::{self, NONCE_LEN};

const INFO_ROOT: &[u8] = b"SignetDoubleRatchetRootKey";
const INFO_CHAIN: &[u8] = b"SignetDoubleRatchetChainKey";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    SetupPending,
    Active,
    Closed,
}

/// A single ratchet-framed ciphertext, as carried inside a `chat` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatchetMessage {
    pub dh_pub: [u8; 32],
    /// Message index within the sending chain identified by `dh_pub`.
    pub n: u32,
    /// Length of the previous sending chain, for skipped-key bookkeeping on
    /// the receiver.
    pub pn: u32,
    pub ciphertext: Vec<u8>,
}

/// AEAD nonce derivation: `u96_from(N)`, the chain counter zero-extended to
/// 96 bits. Never reused because the chain key — and with it the AEAD key —
/// advances every message and is re-keyed on every DH ratchet.
fn u96_from(n: u32) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[NONCE_LEN - 4..].copy_from_slice(&n.to_be_bytes());
    nonce
}

type SkipKey = ([u8; 32], u32);

pub struct DoubleRatchetSession {
    state: SessionState,
    root_key: Zeroizing<[u8; 32]>,
    sending_chain_key: Option<Zeroizing<[u8; 32]>>,
    sending_count: u32,
    receiving_chain_key: Option<Zeroizing<[u8; 32]>>,
    receiving_count: u32,
    previous_sending_count: u32,
    dh_self_secret: X25519Secret,
    dh_self_public: X25519Public,
    dh_remote_public: Option<X25519Public>,
    skipped: HashMap<SkipKey, Zeroizing<[u8; 32]>>,
}

impl DoubleRatchetSession {
    /// Initialize as the X3DH initiator: reuse the X3DH ephemeral as the
    /// first DH ratchet keypair and take a single KDF_RK step against the
    /// peer's signed prekey, establishing a sending chain only. The
    /// receiving chain is established once the peer's first reply triggers
    /// a DH ratchet in [`decrypt`].
    pub fn new_initiator(
        x3dh_root_key: [u8; 32],
        ephemeral_secret: X25519Secret,
        ephemeral_public: X25519Public,
        peer_signed_prekey_public: X25519Public,
    ) -> Self {
        let dh_out = primitives::x25519_dh(&ephemeral_secret, &peer_signed_prekey_public);
        let (new_root, sending_chain_key) = kdf_rk(&x3dh_root_key, &dh_out);

        Self {
            state: SessionState::SetupPending,
            root_key: Zeroizing::new(new_root),
            sending_chain_key: Some(Zeroizing::new(sending_chain_key)),
            sending_count: 0,
            receiving_chain_key: None,
            receiving_count: 0,
            previous_sending_count: 0,
            dh_self_secret: ephemeral_secret,
            dh_self_public: ephemeral_public,
            dh_remote_public: Some(peer_signed_prekey_public),
            skipped: HashMap::new(),
        }
    }

    /// Initialize as the X3DH responder: take two KDF_RK steps — one
    /// mirroring the initiator's first step to establish a matching
    /// receiving chain, then one against a freshly generated DH keypair to
    /// establish our own sending chain — so the responder is immediately
    /// `Active` rather than waiting on a reply.
    pub fn new_responder(
        x3dh_root_key: [u8; 32],
        our_signed_prekey_secret: X25519Secret,
        peer_ephemeral_public: X25519Public,
    ) -> Self {
        let dh1 = primitives::x25519_dh(&our_signed_prekey_secret, &peer_ephemeral_public);
        let (root_after_recv, receiving_chain_key) = kdf_rk(&x3dh_root_key, &dh1);

        let fresh = primitives::x25519_keypair();
        let dh2 = primitives::x25519_dh(&fresh.secret, &peer_ephemeral_public);
        let (root_after_send, sending_chain_key) = kdf_rk(&root_after_recv, &dh2);

        Self {
            state: SessionState::Active,
            root_key: Zeroizing::new(root_after_send),
            sending_chain_key: Some(Zeroizing::new(sending_chain_key)),
            sending_count: 0,
            receiving_chain_key: Some(Zeroizing::new(receiving_chain_key)),
            receiving_count: 0,
            previous_sending_count: 0,
            dh_self_secret: fresh.secret,
            dh_self_public: fresh.public,
            dh_remote_public: Some(peer_ephemeral_public),
            skipped: HashMap::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn associated_data(dh_pub: &[u8; 32], n: u32, pn: u32) -> Vec<u8> {
        let mut ad = Vec::with_capacity(32 + 4 + 4);
        ad.extend_from_slice(dh_pub);
        ad.extend_from_slice(&n.to_be_bytes());
        ad.extend_from_slice(&pn.to_be_bytes());
        ad
    }

    /// Encrypt `plaintext`, advancing the sending chain by one message.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::InvalidState("session is closed".into()));
        }
        let chain = self
            .sending_chain_key
            .as_ref()
            .ok_or_else(|| SessionError::InvalidState("no sending chain established".into()))?;
        let (message_key, next_chain) = kdf_ck(chain);
        self.sending_chain_key = Some(Zeroizing::new(next_chain));

        let n = self.sending_count;
        self.sending_count += 1;

        let dh_pub = *self.dh_self_public.as_bytes();
        let nonce = u96_from(n);
        let ad = Self::associated_data(&dh_pub, n, self.previous_sending_count);
        let ciphertext = primitives::aead_seal(&message_key, &nonce, plaintext, &ad)
            .map_err(SessionError::Crypto)?;

        Ok(RatchetMessage {
            dh_pub,
            n,
            pn: self.previous_sending_count,
            ciphertext,
        })
    }

    /// Decrypt a message, ratcheting the DH state forward if the sender's
    /// ratchet public key has changed and deriving any skipped message keys
    /// needed to reach the requested message index.
    pub fn decrypt(&mut self, msg: &RatchetMessage) -> Result<Vec<u8>, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::InvalidState("session is closed".into()));
        }

        if let Some(key) = self.skipped.remove(&(msg.dh_pub, msg.n)) {
            let ad = Self::associated_data(&msg.dh_pub, msg.n, msg.pn);
            let nonce = u96_from(msg.n);
            let pt = primitives::aead_open(&key, &nonce, &msg.ciphertext, &ad)
                .map_err(|_| SessionError::AuthFailed)?;
            return Ok(pt);
        }

        let is_new_epoch = self.dh_remote_public.map(|p| *p.as_bytes()) != Some(msg.dh_pub);

        if is_new_epoch {
            if let Some(current_remote) = self.dh_remote_public {
                self.skip_message_keys(*current_remote.as_bytes(), msg.pn)?;
            }
            self.dh_ratchet(msg.dh_pub)?;
        }

        if msg.n < self.receiving_count {
            return Err(SessionError::ReplayDetected);
        }

        self.skip_message_keys(msg.dh_pub, msg.n)?;

        let chain = self
            .receiving_chain_key
            .as_ref()
            .ok_or(SessionError::UnknownChain)?;
        let (message_key, next_chain) = kdf_ck(chain);
        self.receiving_chain_key = Some(Zeroizing::new(next_chain));
        self.receiving_count += 1;

        let ad = Self::associated_data(&msg.dh_pub, msg.n, msg.pn);
        let nonce = u96_from(msg.n);
        let pt = primitives::aead_open(&message_key, &nonce, &msg.ciphertext, &ad)
            .map_err(|_| SessionError::AuthFailed)?;

        if self.state == SessionState::SetupPending {
            self.state = SessionState::Active;
        }

        Ok(pt)
    }

    /// Derive and store skipped message keys on the *current* receiving
    /// chain up to `up_to`. Callers always invoke this while `dh_pub` still
    /// matches `self.dh_remote_public` — either before a ratchet (draining
    /// the outgoing epoch using `pn`) or just after one (catching up to
    /// `n` on the freshly installed chain).
    fn skip_message_keys(&mut self, dh_pub: [u8; 32], up_to: u32) -> Result<(), SessionError> {
        debug_assert_eq!(self.dh_remote_public.map(|p| *p.as_bytes()), Some(dh_pub));

        let Some(chain) = self.receiving_chain_key.clone() else {
            return Ok(());
        };
        let gap = up_to.saturating_sub(self.receiving_count);
        let cfg = Config::global();
        if gap as usize > cfg.max_skip_per_chain {
            return Err(SessionError::TooManySkipped);
        }
        if self.skipped.len() + gap as usize > cfg.max_skip_total {
            return Err(SessionError::OutOfOrderTooFar);
        }

        let mut current = chain;
        while self.receiving_count < up_to {
            let (message_key, next_chain) = kdf_ck(&current);
            self.skipped.insert((dh_pub, self.receiving_count), Zeroizing::new(message_key));
            current = Zeroizing::new(next_chain);
            self.receiving_count += 1;
        }
        self.receiving_chain_key = Some(current);
        Ok(())
    }

    fn dh_ratchet(&mut self, new_remote_public_bytes: [u8; 32]) -> Result<(), SessionError> {
        let new_remote = X25519Public::from(new_remote_public_bytes);

        self.previous_sending_count = self.sending_count;
        self.sending_count = 0;
        self.receiving_count = 0;

        let dh_recv = primitives::x25519_dh(&self.dh_self_secret, &new_remote);
        let (root_after_recv, receiving_chain_key) = kdf_rk(&self.root_key, &dh_recv);

        let fresh = primitives::x25519_keypair();
        let dh_send = primitives::x25519_dh(&fresh.secret, &new_remote);
        let (root_after_send, sending_chain_key) = kdf_rk(&root_after_recv, &dh_send);

        self.root_key = Zeroizing::new(root_after_send);
        self.receiving_chain_key = Some(Zeroizing::new(receiving_chain_key));
        self.sending_chain_key = Some(Zeroizing::new(sending_chain_key));
        self.dh_self_secret = fresh.secret;
        self.dh_self_public = fresh.public;
        self.dh_remote_public = Some(new_remote);

        tracing::debug!("dh ratchet advanced");
        Ok(())
    }

    /// Close the session; any further encrypt/decrypt calls fail. Chain and
    /// root key material is zeroized on drop via `Zeroizing`.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.sending_chain_key = None;
        self.receiving_chain_key = None;
        self.skipped.clear();
    }
}

fn kdf_rk(root_key: &[u8; 32], dh_out: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let okm = primitives::hkdf_sha256(root_key, dh_out, INFO_ROOT, 64).expect("fixed-length hkdf expand cannot fail");
    let mut new_root = [0u8; 32];
    let mut chain = [0u8; 32];
    new_root.copy_from_slice(&okm[..32]);
    chain.copy_from_slice(&okm[32..]);
    (new_root, chain)
}

fn kdf_ck(chain_key: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let okm = primitives::hkdf_sha256(chain_key, b"", INFO_CHAIN, 64).expect("fixed-length hkdf expand cannot fail");
    let mut message_key = [0u8; 32];
    let mut next_chain = [0u8; 32];
    message_key.copy_from_slice(&okm[..32]);
    next_chain.copy_from_slice(&okm[32..]);
    (message_key, next_chain)
}
