use hex::{decode, encode};
use secp256k1::hashes::sha256;
use secp256k1::rand::rngs::OsRng;
use secp256k1::schnorr::Signature;
use secp256k1::{All, KeyPair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::utils::current_timestamp_ms;

/// A Nostr event. Once accepted it is immutable; the relay never alters a
/// signed client event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(|e| Error::BadEnvelope(e.to_string()))
    }

    /// NIP-01 canonical serialization. Divergence here invalidates every
    /// signature, so this must stay byte-exact: integers as JSON numbers,
    /// no extraneous whitespace.
    fn canonical(&self) -> String {
        json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ])
        .to_string()
    }

    fn digest(&self) -> Message {
        Message::from_hashed_data::<sha256::Hash>(self.canonical().as_bytes())
    }

    /// Lowercase hex SHA-256 of the canonical form.
    pub fn canonical_id(&self) -> String {
        encode(self.digest().as_ref())
    }

    /// Recompute the canonical id and verify the BIP-340 signature over it.
    pub fn verify(&self) -> Result<()> {
        let message = self.digest();
        if encode(message.as_ref()) != self.id.to_ascii_lowercase() {
            return Err(Error::BadId);
        }

        let pubkey_bytes = decode(&self.pubkey).map_err(|_| Error::BadSig)?;
        let pubkey = XOnlyPublicKey::from_slice(&pubkey_bytes).map_err(|_| Error::BadSig)?;
        let sig_bytes = decode(&self.sig).map_err(|_| Error::BadSig)?;
        let sig = Signature::from_slice(&sig_bytes).map_err(|_| Error::BadSig)?;

        Secp256k1::verification_only()
            .verify_schnorr(&sig, &message, &pubkey)
            .map_err(|_| Error::BadSig)
    }

    /// Values of every tag whose first element is `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.first().map(String::as_str) == Some(name))
            .filter_map(|tag| tag.get(1).map(String::as_str))
    }
}

/// Process-wide signing identity. Read-only after startup; a fresh keypair is
/// generated when none is configured.
pub struct RelaySigner {
    secp: Secp256k1<All>,
    keypair: KeyPair,
    pubkey_hex: String,
}

impl RelaySigner {
    pub fn from_config(privkey_hex: Option<&str>, pubkey_hex: Option<&str>) -> Result<Self> {
        let secp = Secp256k1::new();
        let keypair = match privkey_hex {
            Some(secret) => {
                KeyPair::from_seckey_str(&secp, secret).map_err(|e| Error::BadKey(e.to_string()))?
            }
            None => KeyPair::new(&secp, &mut OsRng),
        };

        let (xonly, _parity) = keypair.x_only_public_key();
        let derived = encode(xonly.serialize());
        if let Some(expected) = pubkey_hex {
            if !expected.eq_ignore_ascii_case(&derived) {
                return Err(Error::BadKey(
                    "RELAY_PUBKEY_HEX does not match the configured private key".to_string(),
                ));
            }
        }

        Ok(RelaySigner {
            secp,
            keypair,
            pubkey_hex: derived,
        })
    }

    pub fn public_key_hex(&self) -> &str {
        &self.pubkey_hex
    }

    /// Build and sign an event over its canonical id digest.
    pub fn sign(&self, kind: u32, tags: Vec<Vec<String>>, content: String) -> Event {
        let mut event = Event {
            id: String::new(),
            pubkey: self.pubkey_hex.clone(),
            created_at: current_timestamp_ms() / 1000,
            kind,
            tags,
            content,
            sig: String::new(),
        };

        let message = event.digest();
        event.id = encode(message.as_ref());
        let sig = self.secp.sign_schnorr(&message, &self.keypair);
        event.sig = encode(sig.as_ref());
        event
    }
}
