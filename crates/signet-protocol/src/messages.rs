//! Payload schemas carried inside each envelope type (§4.D, §6).

use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use signet_crypto::session::ratchet::RatchetMessage;
use signet_crypto::session::KeyExchangeInit;
use signet_crypto::IdentityKeyPair;

use crate::error::TransportError;

/// An identity-signed payload: `signature` covers `header_bytes ‖
/// serde_json(payload)`, i.e. the inner payload serialized on its own,
/// never including this wrapper's own fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signed<T> {
    pub payload: T,
    #[serde(with = "hex32")]
    pub sender_sig_pub: [u8; 32],
    #[serde(with = "hex64")]
    pub signature: [u8; 64],
}

impl<T: Serialize> Signed<T> {
    pub fn sign(payload: T, header_bytes: &[u8], identity: &IdentityKeyPair) -> Self {
        let payload_bytes = serde_json::to_vec(&payload).expect("payload types always serialize");
        let mut signing_input = Vec::with_capacity(header_bytes.len() + payload_bytes.len());
        signing_input.extend_from_slice(header_bytes);
        signing_input.extend_from_slice(&payload_bytes);
        let signature = identity.sign(&signing_input);
        Self {
            payload,
            sender_sig_pub: identity.signing_public_bytes(),
            signature: signature.to_bytes(),
        }
    }
}

impl<T: Serialize> Signed<T> {
    pub fn verify(&self, header_bytes: &[u8]) -> Result<(), TransportError> {
        let payload_bytes = serde_json::to_vec(&self.payload).expect("payload types always serialize");
        let mut signing_input = Vec::with_capacity(header_bytes.len() + payload_bytes.len());
        signing_input.extend_from_slice(header_bytes);
        signing_input.extend_from_slice(&payload_bytes);

        let verifying_key = VerifyingKey::from_bytes(&self.sender_sig_pub)
            .map_err(|_| TransportError::SignatureInvalid)?;
        let signature = Signature::from_bytes(&self.signature);
        IdentityKeyPair::verify(&verifying_key, &signing_input, &signature)
            .map_err(|_| TransportError::SignatureInvalid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHelloPayload {
    pub user_id: String,
    #[serde(with = "hex32")]
    pub identity_sig_pub: [u8; 32],
    /// Absent on the first `client_hello` a connection sends (before it has
    /// seen the server's challenge). Present on the second, carrying the
    /// Ed25519 signature over the raw challenge bytes from `server_hello` —
    /// this is what the broker's handshake treats as the challenge response
    /// (§9 open question resolution), reusing `client_hello` rather than
    /// adding a tenth envelope type.
    #[serde(with = "hex64_opt", default)]
    pub challenge_signature: Option<[u8; 64]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerHelloPayload {
    /// A fresh random challenge the client must sign and return before the
    /// broker advances it past `CONNECTED` (§9 open question resolution).
    #[serde(with = "hex32")]
    pub challenge: [u8; 32],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    pub id: String,
    pub from: String,
    pub to: String,
    pub ratchet: RatchetMessage,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckPayload {
    pub message_id: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: String,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangePayload {
    pub id: String,
    pub from: String,
    pub to: String,
    pub init: KeyExchangeInit,
}

/// A relay- or peer-originated error, carrying a reference back to the
/// envelope id it answers so the sender can correlate the two (§4.E, S6 —
/// `error{code=UserOffline, ref=envelope.id}`). `reference` is empty when
/// the triggering frame couldn't be parsed far enough to recover an id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    #[serde(rename = "ref")]
    pub reference: String,
    pub message: String,
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

mod hex64 {
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

mod hex64_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<[u8; 64]>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 64]>, D::Error> {
        let opt = Option::<String>::deserialize(d)?;
        match opt {
            None => Ok(None),
            Some(s) => {
                let v = hex::decode(s).map_err(serde::de::Error::custom)?;
                let arr: [u8; 64] = v.try_into().map_err(|_| serde::de::Error::custom("expected 64 bytes"))?;
                Ok(Some(arr))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_payload_roundtrips_and_detects_tampering() {
        let identity = IdentityKeyPair::generate();
        let header = crate::wire::FrameHeader {
            version: crate::wire::VERSION,
            payload_len: 0,
            kind: crate::wire::EnvelopeType::Ack,
        }
        .to_bytes();

        let signed = Signed::sign(
            AckPayload { message_id: "m1".into(), to: "bob".into() },
            &header,
            &identity,
        );
        assert!(signed.verify(&header).is_ok());

        let mut tampered = signed.clone();
        tampered.payload.message_id = "m2".into();
        assert!(tampered.verify(&header).is_err());
    }
}
