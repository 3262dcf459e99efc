//! Component C: a `Session` ties an X3DH handshake to a Double Ratchet.

pub mod handshake;
pub mod ratchet;

use serde::{Deserialize, Serialize};
use x25519_dalek::PublicKey as X25519Public;

use crate::error::SessionError;
use crate::identity::IdentityKeyPair;
use crate::prekeys::{PreKeyBundle, PreKeyManager};
use crate::session::ratchet::{DoubleRatchetSession, RatchetMessage, SessionState};

/// The `key_exchange` envelope payload (§4.D): everything the responder
/// needs to reconstruct the same X3DH agreement and start its ratchet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeInit {
    #[serde(with = "hex32")]
    pub sender_identity_sig_pub: [u8; 32],
    #[serde(with = "hex32")]
    pub sender_identity_dh_pub: [u8; 32],
    #[serde(with = "hex32")]
    pub ephemeral_public: [u8; 32],
    pub used_signed_prekey_id: u32,
    pub used_one_time_prekey_id: Option<u32>,
}

/// A live end-to-end session with one peer.
pub struct Session {
    pub peer_user_id: String,
    ratchet: DoubleRatchetSession,
}

impl Session {
    /// Start a session as the initiator against a peer's prekey bundle.
    /// Returns the session plus the `key_exchange` payload to send.
    pub fn initiate(
        peer_user_id: impl Into<String>,
        identity: &IdentityKeyPair,
        bundle: &PreKeyBundle,
    ) -> Result<(Self, KeyExchangeInit), SessionError> {
        bundle.verify_signature()?;

        let hs = handshake::initiate(identity, bundle);
        let ratchet = DoubleRatchetSession::new_initiator(
            hs.root_key,
            hs.ephemeral_secret,
            hs.ephemeral_public,
            hs.peer_signed_prekey_public,
        );

        let init = KeyExchangeInit {
            sender_identity_sig_pub: identity.signing_public_bytes(),
            sender_identity_dh_pub: *identity.dh_public().as_bytes(),
            ephemeral_public: *hs.ephemeral_public.as_bytes(),
            used_signed_prekey_id: bundle.signed_prekey.id,
            used_one_time_prekey_id: bundle.one_time_prekey.as_ref().map(|k| k.id),
        };

        Ok((
            Self {
                peer_user_id: peer_user_id.into(),
                ratchet,
            },
            init,
        ))
    }

    /// Accept an incoming `key_exchange` as the responder.
    pub fn respond(
        peer_user_id: impl Into<String>,
        identity: &IdentityKeyPair,
        prekeys: &mut PreKeyManager,
        init: &KeyExchangeInit,
    ) -> Result<Self, SessionError> {
        let signed_prekey_secret = prekeys
            .signed_prekey_secret(init.used_signed_prekey_id)
            .ok_or_else(|| SessionError::InvalidPreKeyBundle("unknown signed prekey id".into()))?
            .clone();

        let one_time_secret = match init.used_one_time_prekey_id {
            Some(id) => Some(
                prekeys
                    .take_one_time_prekey_secret(id)
                    .ok_or_else(|| SessionError::InvalidPreKeyBundle("one-time prekey already consumed".into()))?,
            ),
            None => None,
        };

        let peer_identity_dh = X25519Public::from(init.sender_identity_dh_pub);
        let peer_ephemeral = X25519Public::from(init.ephemeral_public);

        let hs = handshake::respond(
            identity,
            &signed_prekey_secret,
            one_time_secret.as_ref(),
            &peer_identity_dh,
            &peer_ephemeral,
        );

        let ratchet = DoubleRatchetSession::new_responder(hs.root_key, signed_prekey_secret, peer_ephemeral);

        Ok(Self {
            peer_user_id: peer_user_id.into(),
            ratchet,
        })
    }

    pub fn state(&self) -> SessionState {
        self.ratchet.state()
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<RatchetMessage, SessionError> {
        self.ratchet.encrypt(plaintext)
    }

    pub fn decrypt(&mut self, msg: &RatchetMessage) -> Result<Vec<u8>, SessionError> {
        self.ratchet.decrypt(msg)
    }

    pub fn close(&mut self) {
        self.ratchet.close();
    }
}

mod hex32 {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initiate_then_respond_establishes_matching_sessions() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let mut bob_prekeys = PreKeyManager::generate(&bob, 1, 0);

        let bundle = bob_prekeys.issue_bundle(&bob);
        let (mut alice_session, init) = Session::initiate("bob", &alice, &bundle).unwrap();
        let mut bob_session = Session::respond("alice", &bob, &mut bob_prekeys, &init).unwrap();

        let ct = alice_session.encrypt(b"hello").unwrap();
        let pt = bob_session.decrypt(&ct).unwrap();
        assert_eq!(pt, b"hello");

        let reply = bob_session.encrypt(b"hi back").unwrap();
        let pt2 = alice_session.decrypt(&reply).unwrap();
        assert_eq!(pt2, b"hi back");
    }

    #[test]
    fn tampered_bundle_signature_is_rejected() {
        let alice = IdentityKeyPair::generate();
        let bob = IdentityKeyPair::generate();
        let mut bob_prekeys = PreKeyManager::generate(&bob, 1, 0);
        let mut bundle = bob_prekeys.issue_bundle(&bob);
        bundle.signed_prekey.public[0] ^= 0xFF;

        let result = Session::initiate("bob", &alice, &bundle);
        assert!(result.is_err());
    }
}
