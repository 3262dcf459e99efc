//! Signed and one-time prekey management (§3–§4.B).
//!
//! A [`PreKeyManager`] owns one identity's signed prekey (rotated on a
//! schedule, with a grace period for handshakes already in flight) and a
//! pool of one-time prekeys that are handed out once each and then
//! discarded.

use std::collections::HashMap;

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};

use crate::config::Config;
use crate::error::SessionError;
use crate::identity::IdentityKeyPair;
use crate::primitives;

/// A signed prekey and the signature over it, as published in a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPreKeyPublic {
    pub id: u32,
    #[serde(with = "hex_array32")]
    pub public: [u8; 32],
    #[serde(with = "hex_array64")]
    pub signature: [u8; 64],
}

/// A one-time prekey as published in a bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneTimePreKeyPublic {
    pub id: u32,
    #[serde(with = "hex_array32")]
    pub public: [u8; 32],
}

/// Everything a would-be initiator needs to run X3DH against a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreKeyBundle {
    #[serde(with = "hex_array32")]
    pub identity_sig_pub: [u8; 32],
    #[serde(with = "hex_array32")]
    pub identity_dh_pub: [u8; 32],
    pub signed_prekey: SignedPreKeyPublic,
    pub one_time_prekey: Option<OneTimePreKeyPublic>,
    pub registration_id: u32,
}

impl PreKeyBundle {
    /// Verify the signed prekey's signature against the bundle's own
    /// identity signing key. Does not check freshness — callers that care
    /// about rotation/grace windows do that separately, since a bundle on
    /// the wire carries no timestamp by design (§4.D keeps envelopes small).
    pub fn verify_signature(&self) -> Result<(), SessionError> {
        let verifying_key = VerifyingKey::from_bytes(&self.identity_sig_pub)
            .map_err(|e| SessionError::InvalidPreKeyBundle(e.to_string()))?;
        let signature = Signature::from_bytes(&self.signed_prekey.signature);
        IdentityKeyPair::verify(&verifying_key, &self.signed_prekey.public, &signature)
            .map_err(|e| SessionError::InvalidPreKeyBundle(e.to_string()))
    }
}

struct SignedPreKeyRecord {
    id: u32,
    secret: X25519Secret,
    public: X25519Public,
    signature: Signature,
    created_at_secs: u64,
}

/// Owns the rotation lifecycle for one identity's signed prekey and pool of
/// one-time prekeys.
pub struct PreKeyManager {
    next_signed_prekey_id: u32,
    current: SignedPreKeyRecord,
    /// Retained past rotation so handshakes already using it still verify
    /// during the grace window.
    previous: Option<(SignedPreKeyRecord, u64)>,
    one_time: HashMap<u32, X25519Secret>,
    next_one_time_id: u32,
    registration_id: u32,
}

impl PreKeyManager {
    /// Create a manager with a freshly generated signed prekey and a full
    /// one-time prekey pool.
    pub fn generate(identity: &IdentityKeyPair, registration_id: u32, now_secs: u64) -> Self {
        let mut mgr = Self {
            next_signed_prekey_id: 1,
            current: Self::new_signed_prekey(identity, 1, now_secs),
            previous: None,
            one_time: HashMap::new(),
            next_one_time_id: 1,
            registration_id,
        };
        mgr.next_signed_prekey_id = 2;
        mgr.replenish_one_time_prekeys();
        mgr
    }

    fn new_signed_prekey(identity: &IdentityKeyPair, id: u32, now_secs: u64) -> SignedPreKeyRecord {
        let kp = primitives::x25519_keypair();
        let signature = identity.sign(kp.public.as_bytes());
        SignedPreKeyRecord {
            id,
            secret: kp.secret,
            public: kp.public,
            signature,
            created_at_secs: now_secs,
        }
    }

    /// Rotate the signed prekey if the rotation period has elapsed. The
    /// prior key is kept around for the grace period so in-flight
    /// handshakes that fetched the old bundle still succeed.
    pub fn rotate_if_due(&mut self, identity: &IdentityKeyPair, now_secs: u64) {
        let cfg = Config::global();
        if now_secs.saturating_sub(self.current.created_at_secs) < cfg.signed_prekey_rotation_period_secs {
            return;
        }
        let id = self.next_signed_prekey_id;
        self.next_signed_prekey_id += 1;
        let new_current = Self::new_signed_prekey(identity, id, now_secs);
        let expired = std::mem::replace(&mut self.current, new_current);
        self.previous = Some((expired, now_secs + cfg.signed_prekey_grace_period_secs));
        tracing::info!(signed_prekey_id = id, "rotated signed prekey");
    }

    /// Drop the previous signed prekey once its grace period has elapsed.
    pub fn expire_grace_period(&mut self, now_secs: u64) {
        if let Some((_, expires_at)) = &self.previous {
            if now_secs >= *expires_at {
                self.previous = None;
            }
        }
    }

    /// Refill the one-time prekey pool back up to the configured size.
    pub fn replenish_one_time_prekeys(&mut self) {
        let cfg = Config::global();
        while self.one_time.len() < cfg.one_time_prekey_pool_size {
            let id = self.next_one_time_id;
            self.next_one_time_id += 1;
            let kp = primitives::x25519_keypair();
            self.one_time.insert(id, kp.secret);
        }
    }

    /// True once the pool has dropped below the replenish threshold.
    pub fn needs_replenish(&self) -> bool {
        self.one_time.len() < Config::global().one_time_prekey_replenish_threshold
    }

    pub fn one_time_prekey_count(&self) -> usize {
        self.one_time.len()
    }

    /// Look up the DH secret for a signed prekey id, checking both the
    /// current key and the previous one if it's still within its grace
    /// window.
    pub fn signed_prekey_secret(&self, id: u32) -> Option<&X25519Secret> {
        if self.current.id == id {
            return Some(&self.current.secret);
        }
        if let Some((prev, _)) = &self.previous {
            if prev.id == id {
                return Some(&prev.secret);
            }
        }
        None
    }

    /// Consume one one-time prekey for a bundle being handed out. Returns
    /// `None` if the pool is exhausted (the bundle is still valid for X3DH
    /// without the optional fourth DH term).
    pub fn take_one_time_prekey(&mut self) -> Option<(u32, X25519Secret)> {
        let id = *self.one_time.keys().next()?;
        let secret = self.one_time.remove(&id)?;
        Some((id, secret))
    }

    pub fn take_one_time_prekey_secret(&mut self, id: u32) -> Option<X25519Secret> {
        self.one_time.remove(&id)
    }

    /// Build a bundle for distribution, consuming one one-time prekey from
    /// the pool if any remain.
    pub fn issue_bundle(&mut self, identity: &IdentityKeyPair) -> PreKeyBundle {
        let one_time = self.take_one_time_prekey().map(|(id, secret)| {
            let public = X25519Public::from(&secret);
            OneTimePreKeyPublic { id, public: *public.as_bytes() }
        });

        PreKeyBundle {
            identity_sig_pub: identity.signing_public_bytes(),
            identity_dh_pub: *identity.dh_public().as_bytes(),
            signed_prekey: SignedPreKeyPublic {
                id: self.current.id,
                public: *self.current.public.as_bytes(),
                signature: self.current.signature.to_bytes(),
            },
            one_time_prekey: one_time,
            registration_id: self.registration_id,
        }
    }
}

mod hex_array32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(s).map_err(serde::de::Error::custom)?;
        v.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

mod hex_array64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(d)?;
        let v = hex::decode(s).map_err(serde::de::Error::custom)?;
        v.try_into().map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_bundle_verifies_and_consumes_one_time_prekey() {
        let identity = IdentityKeyPair::generate();
        let mut mgr = PreKeyManager::generate(&identity, 1, 1_000);
        let before = mgr.one_time_prekey_count();

        let bundle = mgr.issue_bundle(&identity);
        assert!(bundle.verify_signature().is_ok());
        assert!(bundle.one_time_prekey.is_some());
        assert_eq!(mgr.one_time_prekey_count(), before - 1);
    }

    #[test]
    fn rotation_keeps_old_key_valid_during_grace_period() {
        let identity = IdentityKeyPair::generate();
        let mut mgr = PreKeyManager::generate(&identity, 1, 0);
        let old_id = mgr.current.id;

        let rotation_period = Config::global().signed_prekey_rotation_period_secs;
        mgr.rotate_if_due(&identity, rotation_period + 1);

        assert_ne!(mgr.current.id, old_id);
        assert!(mgr.signed_prekey_secret(old_id).is_some());
    }

    #[test]
    fn grace_period_eventually_expires() {
        let identity = IdentityKeyPair::generate();
        let mut mgr = PreKeyManager::generate(&identity, 1, 0);
        let old_id = mgr.current.id;

        let rotation_period = Config::global().signed_prekey_rotation_period_secs;
        let grace = Config::global().signed_prekey_grace_period_secs;
        mgr.rotate_if_due(&identity, rotation_period + 1);
        mgr.expire_grace_period(rotation_period + 1 + grace + 1);

        assert!(mgr.signed_prekey_secret(old_id).is_none());
    }

    #[test]
    fn replenish_tops_pool_back_up() {
        let identity = IdentityKeyPair::generate();
        let mut mgr = PreKeyManager::generate(&identity, 1, 0);
        for _ in 0..85 {
            mgr.take_one_time_prekey();
        }
        assert!(mgr.needs_replenish());
        mgr.replenish_one_time_prekeys();
        assert!(!mgr.needs_replenish());
        assert_eq!(mgr.one_time_prekey_count(), Config::global().one_time_prekey_pool_size);
    }
}
