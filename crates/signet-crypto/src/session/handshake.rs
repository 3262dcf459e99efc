//! X3DH initial key agreement (§4.C), extended with the optional fourth DH
//! term against a one-time prekey when the peer's bundle still has one.

use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Secret};

use crate::identity::IdentityKeyPair;
use crate::prekeys::PreKeyBundle;
use crate::primitives;

const INFO_X3DH: &[u8] = b"SignetX3DH";

/// Output of running X3DH as the initiator: the derived root key plus the
/// ephemeral keypair the responder needs to mirror the agreement.
pub struct InitiatorHandshake {
    pub root_key: [u8; 32],
    pub ephemeral_secret: X25519Secret,
    pub ephemeral_public: X25519Public,
    pub peer_signed_prekey_public: X25519Public,
}

/// Run X3DH as the initiator against a peer's published prekey bundle.
///
/// `identity` is the initiator's own long-term identity. The bundle's
/// signature is assumed already verified by the caller via
/// [`PreKeyBundle::verify_signature`] — this function only performs the key
/// agreement.
pub fn initiate(identity: &IdentityKeyPair, bundle: &PreKeyBundle) -> InitiatorHandshake {
    let peer_identity_dh = X25519Public::from(bundle.identity_dh_pub);
    let peer_signed_prekey = X25519Public::from(bundle.signed_prekey.public);
    let ephemeral = primitives::x25519_keypair();

    let dh1 = primitives::x25519_dh(identity.dh_secret(), &peer_signed_prekey);
    let dh2 = primitives::x25519_dh(&ephemeral.secret, &peer_identity_dh);
    let dh3 = primitives::x25519_dh(&ephemeral.secret, &peer_signed_prekey);

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);
    ikm.extend_from_slice(&dh3);

    if let Some(otpk) = &bundle.one_time_prekey {
        let peer_one_time = X25519Public::from(otpk.public);
        let dh4 = primitives::x25519_dh(&ephemeral.secret, &peer_one_time);
        ikm.extend_from_slice(&dh4);
    }

    let root_key_vec = primitives::hkdf_sha256(&[0u8; 32], &ikm, INFO_X3DH, 32)
        .expect("fixed-length hkdf expand cannot fail");
    let mut root_key = [0u8; 32];
    root_key.copy_from_slice(&root_key_vec);

    InitiatorHandshake {
        root_key,
        ephemeral_secret: ephemeral.secret,
        ephemeral_public: ephemeral.public,
        peer_signed_prekey_public: peer_signed_prekey,
    }
}

/// Output of running X3DH as the responder.
pub struct ResponderHandshake {
    pub root_key: [u8; 32],
}

/// Run X3DH as the responder, mirroring [`initiate`].
///
/// `our_signed_prekey_secret` and `our_one_time_prekey_secret` must be the
/// secrets corresponding to the ids the initiator's first message says it
/// used — callers look those up via `PreKeyManager` before calling this.
pub fn respond(
    identity: &IdentityKeyPair,
    our_signed_prekey_secret: &X25519Secret,
    our_one_time_prekey_secret: Option<&X25519Secret>,
    peer_identity_dh_pub: &X25519Public,
    peer_ephemeral_public: &X25519Public,
) -> ResponderHandshake {
    let dh1 = primitives::x25519_dh(our_signed_prekey_secret, peer_identity_dh_pub);
    let dh2 = primitives::x25519_dh(identity.dh_secret(), peer_ephemeral_public);
    let dh3 = primitives::x25519_dh(our_signed_prekey_secret, peer_ephemeral_public);

    let mut ikm = Vec::with_capacity(32 * 4);
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);
    ikm.extend_from_slice(&dh3);

    if let Some(otpk_secret) = our_one_time_prekey_secret {
        let dh4 = primitives::x25519_dh(otpk_secret, peer_ephemeral_public);
        ikm.extend_from_slice(&dh4);
    }

    let root_key_vec = primitives::hkdf_sha256(&[0u8; 32], &ikm, INFO_X3DH, 32)
        .expect("fixed-length hkdf expand cannot fail");
    let mut root_key = [0u8; 32];
    root_key.copy_from_slice(&root_key_vec);

    ResponderHandshake { root_key }
}
