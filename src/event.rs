//! Nostr event model, canonical hashing, and Schnorr signing.

use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Profile metadata events.
pub const KIND_METADATA: u32 = 0;
/// Short text notes.
pub const KIND_NOTE: u32 = 1;
/// Follow lists.
pub const KIND_CONTACTS: u32 = 3;
/// File chunk events carrying base64 content.
pub const KIND_FILE_CHUNK: u32 = 1064;
/// File metadata events referencing their chunks.
pub const KIND_FILE_HEADER: u32 = 1065;

/// Simple tag wrapper preserving tag fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from string-like parts.
    pub fn new<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// Tag name, i.e. the first element.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Tag value, i.e. the second element.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Signed Nostr event as exchanged with relays.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (x-only hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `1065`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Arbitrary tags.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl Event {
    /// Values of all tags with the given name (the second tag element).
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.tags
            .iter()
            .filter(move |t| t.name() == Some(name))
            .filter_map(Tag::value)
    }
}

/// The unsigned shape of an event: everything a signer needs besides the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub kind: u32,
    pub created_at: u64,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// Compute the canonical event hash over `[0, pubkey, created_at, kind, tags, content]`.
pub fn event_hash(
    pubkey: &str,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<[u8; 32]> {
    let arr = serde_json::json!([0, pubkey, created_at, kind, tags, content]);
    let data = serde_json::to_vec(&arr)?;
    Ok(Sha256::digest(&data).into())
}

/// Anything that can turn an event template into a signed event.
///
/// Implementations must be deterministic for a given template so that the
/// file codec can re-derive identical events on a second pass.
pub trait Signer: Send + Sync {
    /// Hex x-only public key of the signing identity.
    fn pubkey(&self) -> String;
    /// Produce a signed event from the template.
    fn sign(&self, template: &EventTemplate) -> Result<Event>;
}

/// Signer backed by a local secret key.
pub struct KeySigner {
    keypair: Keypair,
}

impl KeySigner {
    /// Build a signer from a 64-hex-char secret key.
    pub fn from_hex(seckey: &str) -> Result<Self> {
        let secp = Secp256k1::new();
        let bytes = hex::decode(seckey)?;
        let keypair = Keypair::from_seckey_slice(&secp, &bytes)?;
        Ok(Self { keypair })
    }

    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (sk, _) = secp.generate_keypair(&mut rand::thread_rng());
        let keypair = Keypair::from_secret_key(&secp, &sk);
        Self { keypair }
    }

    /// Hex-encoded secret key.
    pub fn seckey_hex(&self) -> String {
        hex::encode(self.keypair.secret_bytes())
    }
}

impl Signer for KeySigner {
    fn pubkey(&self) -> String {
        hex::encode(self.keypair.x_only_public_key().0.serialize())
    }

    fn sign(&self, template: &EventTemplate) -> Result<Event> {
        let secp = Secp256k1::new();
        let pubkey = self.pubkey();
        let hash = event_hash(
            &pubkey,
            template.created_at,
            template.kind,
            &template.tags,
            &template.content,
        )?;
        let msg = Message::from_digest_slice(&hash)?;
        // Zero auxiliary randomness keeps signatures reproducible for a
        // given template; the file codec's two-pass emission relies on that.
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &self.keypair);
        Ok(Event {
            id: hex::encode(hash),
            pubkey,
            kind: template.kind,
            created_at: template.created_at,
            tags: template.tags.clone(),
            content: template.content.clone(),
            sig: hex::encode(sig.as_ref()),
        })
    }
}

/// Verify an event's ID and Schnorr signature.
///
/// Returns `false` on any mismatch or malformed field; a relay may serve
/// events it never verified, and stream processing has to keep going.
pub fn verify_event(ev: &Event) -> bool {
    let Ok(hash) = event_hash(&ev.pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content) else {
        return false;
    };
    if hex::encode(hash) != ev.id {
        return false;
    }
    let Ok(sig_bytes) = hex::decode(&ev.sig) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    let Ok(pk_bytes) = hex::decode(&ev.pubkey) else {
        return false;
    };
    let Ok(pk) = XOnlyPublicKey::from_slice(&pk_bytes) else {
        return false;
    };
    let Ok(msg) = Message::from_digest_slice(&hash) else {
        return false;
    };
    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(&sig, &msg, &pk).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECKEY: &str = "f5dfe77a89298142e2d464ca4368485c8b23825c082ff69be80538f980c403dc";
    const PUBKEY: &str = "82a4a84ca26e47fb041606f6e6baba3dc5c82a74bc9921a70c909c52067e5351";

    #[test]
    fn sign_and_verify_round_trip() {
        let signer = KeySigner::from_hex(SECKEY).unwrap();
        assert_eq!(signer.pubkey(), PUBKEY);
        let ev = signer
            .sign(&EventTemplate {
                kind: 1,
                created_at: 1700000000,
                tags: vec![],
                content: "hi".into(),
            })
            .unwrap();
        assert_eq!(ev.pubkey, PUBKEY);
        assert!(verify_event(&ev));
    }

    #[test]
    fn id_matches_canonical_hash() {
        let signer = KeySigner::from_hex(SECKEY).unwrap();
        let ev = signer
            .sign(&EventTemplate {
                kind: 1,
                created_at: 1700000000,
                tags: vec![Tag::new(["t", "essay"])],
                content: "body".into(),
            })
            .unwrap();
        let hash =
            event_hash(&ev.pubkey, ev.created_at, ev.kind, &ev.tags, &ev.content).unwrap();
        assert_eq!(ev.id, hex::encode(hash));
    }

    #[test]
    fn signing_is_deterministic() {
        let signer = KeySigner::from_hex(SECKEY).unwrap();
        let template = EventTemplate {
            kind: 1064,
            created_at: 1700000000,
            tags: vec![],
            content: "AAAA".into(),
        };
        let a = signer.sign(&template).unwrap();
        let b = signer.sign(&template).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tampered_event_fails_verification() {
        let signer = KeySigner::from_hex(SECKEY).unwrap();
        let mut ev = signer
            .sign(&EventTemplate {
                kind: 1,
                created_at: 1700000000,
                tags: vec![],
                content: "hi".into(),
            })
            .unwrap();
        ev.content = "bye".into();
        assert!(!verify_event(&ev));
    }

    #[test]
    fn malformed_fields_fail_verification_quietly() {
        let ev = Event {
            id: "zz".into(),
            pubkey: "not hex".into(),
            kind: 1,
            created_at: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        assert!(!verify_event(&ev));
    }

    #[test]
    fn tag_values_by_name() {
        let ev = Event {
            id: String::new(),
            pubkey: String::new(),
            kind: 3,
            created_at: 1,
            tags: vec![
                Tag::new(["p", "pk1"]),
                Tag::new(["e", "ev1"]),
                Tag::new(["p", "pk2", "wss://relay"]),
                Tag::new(["p"]),
            ],
            content: String::new(),
            sig: String::new(),
        };
        let ps: Vec<&str> = ev.tag_values("p").collect();
        assert_eq!(ps, vec!["pk1", "pk2"]);
    }

    #[test]
    fn generated_keys_round_trip() {
        let signer = KeySigner::generate();
        let restored = KeySigner::from_hex(&signer.seckey_hex()).unwrap();
        assert_eq!(signer.pubkey(), restored.pubkey());
    }
}
