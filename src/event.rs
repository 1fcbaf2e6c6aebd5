//! Nostr event model, canonical serialization and signing.

use std::{
    io,
    time::{SystemTime, UNIX_EPOCH},
};

use secp256k1::XOnlyPublicKey;
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use sha2::{Digest, Sha256};

use crate::{
    error::{Error, Result},
    keys::{self, KeyPair},
};

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags are small arrays where the first element names the tag type:
///
/// - `e` – references another event: `["e", <event-id>, <relay-hint>]`
/// - `p` – references a user: `["p", <pubkey>, <relay-hint>]`
///
/// Always serialized as a nested array, never as an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

/// Event kinds this client can author.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TextNote,
}

impl EventKind {
    pub fn as_u16(self) -> u16 {
        match self {
            EventKind::TextNote => 1,
        }
    }
}

/// An unsigned event under construction.
///
/// `created_at`, `id` and `sig` do not exist yet: they are produced together
/// by [`Event::sign`], so an id can never be paired with the wrong timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Author public key (x-only, hex).
    pub author: String,
    pub content: String,
    pub kind: EventKind,
    pub tags: Vec<Tag>,
}

impl Event {
    /// A text note with no tags.
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
            kind: EventKind::TextNote,
            tags: Vec::new(),
        }
    }

    /// Reference another event. `relay_hint` may be empty.
    pub fn tag_event(&mut self, event_id: &str, relay_hint: &str) {
        self.tags.push(Tag(vec!["e".into(), event_id.into(), relay_hint.into()]));
    }

    /// Reference another user. `relay_hint` may be empty.
    pub fn tag_user(&mut self, pubkey: &str, relay_hint: &str) {
        self.tags.push(Tag(vec!["p".into(), pubkey.into(), relay_hint.into()]));
    }

    #[allow(dead_code)]
    pub fn clear_tags(&mut self) {
        self.tags.clear();
    }

    /// Stamp the event with the current time and return the canonical bytes.
    pub fn stamped_event(&self) -> Result<(u64, Vec<u8>)> {
        self.stamped_event_at(unix_now()?)
    }

    /// Canonical bytes `[0,author,created_at,kind,tags,content]` for a given
    /// timestamp.
    pub fn stamped_event_at(&self, created_at: u64) -> Result<(u64, Vec<u8>)> {
        let bytes = canonical_bytes(
            &self.author,
            created_at,
            self.kind.as_u16(),
            &self.tags,
            &self.content,
        )?;
        Ok((created_at, bytes))
    }

    /// Hex SHA-256 of canonical event bytes.
    pub fn compute_id(canonical: &[u8]) -> String {
        hex::encode(Sha256::digest(canonical))
    }

    /// Stamp, hash and sign in one step.
    pub fn sign(&self, keys: &KeyPair) -> Result<SignedEvent> {
        self.check_author(keys)?;
        let (created_at, canonical) = self.stamped_event()?;
        self.finish(keys, created_at, &canonical)
    }

    /// [`Event::sign`] with a fixed timestamp.
    #[cfg(test)]
    pub fn sign_at(&self, keys: &KeyPair, created_at: u64) -> Result<SignedEvent> {
        self.check_author(keys)?;
        let (created_at, canonical) = self.stamped_event_at(created_at)?;
        self.finish(keys, created_at, &canonical)
    }

    fn check_author(&self, keys: &KeyPair) -> Result<()> {
        if keys.public_key_hex() != self.author {
            return Err(Error::InvalidKey(
                "signing key does not match event author".into(),
            ));
        }
        Ok(())
    }

    fn finish(&self, keys: &KeyPair, created_at: u64, canonical: &[u8]) -> Result<SignedEvent> {
        let id = Self::compute_id(canonical);
        let digest = hex::decode(&id).map_err(|e| Error::Encoding(e.to_string()))?;
        let sig = keys.sign(&digest)?;
        Ok(SignedEvent {
            id,
            pubkey: self.author.clone(),
            created_at,
            kind: self.kind.as_u16(),
            tags: self.tags.clone(),
            content: self.content.clone(),
            sig,
        })
    }
}

/// A signed event as it travels on the wire.
///
/// ```json
/// {
///   "id": "4f3c...",
///   "pubkey": "79be...",
///   "created_at": 1700000000,
///   "kind": 1,
///   "tags": [["e", "aa11...", ""]],
///   "content": "hello",
///   "sig": "9a1e..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedEvent {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Unix timestamp the event was stamped with.
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Tag>,
    pub content: String,
    /// Schnorr signature over the event hash.
    pub sig: String,
}

impl SignedEvent {
    /// `["EVENT", {...}]` message for relays.
    pub fn payload(&self) -> Result<String> {
        to_ascii_string(&("EVENT", self))
    }

    /// Recompute the id from the fields and check the signature.
    pub fn verify(&self) -> bool {
        let Ok(canonical) = canonical_bytes(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        ) else {
            return false;
        };
        if Event::compute_id(&canonical) != self.id {
            return false;
        }
        let Ok(digest) = hex::decode(&self.id) else {
            return false;
        };
        let Ok(pk_bytes) = hex::decode(&self.pubkey) else {
            return false;
        };
        let Ok(pk) = XOnlyPublicKey::from_slice(&pk_bytes) else {
            return false;
        };
        keys::verify_schnorr(&pk, &digest, &self.sig)
    }
}

fn canonical_bytes(
    author: &str,
    created_at: u64,
    kind: u16,
    tags: &[Tag],
    content: &str,
) -> Result<Vec<u8>> {
    to_ascii_json(&(0u8, author, created_at, kind, tags, content))
}

/// Compact JSON with every character outside printable ASCII written as a
/// `\uXXXX` escape, so the bytes hash identically across implementations.
pub(crate) fn to_ascii_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, AsciiFormatter);
    value.serialize(&mut ser)?;
    Ok(out)
}

pub(crate) fn to_ascii_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    String::from_utf8(to_ascii_json(value)?).map_err(|e| Error::Encoding(e.to_string()))
}

/// Compact formatter escaping non-ASCII and DEL.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if (c as u32) < 0x7f {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Current wall-clock second. A clock set before 1970 is an error.
pub(crate) fn unix_now() -> Result<u64> {
    secs_since_epoch(SystemTime::now())
}

fn secs_since_epoch(now: SystemTime) -> Result<u64> {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| Error::Clock(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const G_X: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";

    fn generator_key() -> KeyPair {
        let mut sk = [0u8; 32];
        sk[31] = 1;
        KeyPair::from_secret_bytes(&sk).unwrap()
    }

    #[test]
    fn new_event_is_untagged_text_note() {
        let ev = Event::new(G_X, "hi");
        assert_eq!(ev.kind, EventKind::TextNote);
        assert_eq!(ev.kind.as_u16(), 1);
        assert!(ev.tags.is_empty());
    }

    #[test]
    fn canonical_form_matches_reference_serializer() {
        // Reference bytes and hash from Python's
        // json.dumps([...], separators=(',', ':')) with default ensure_ascii.
        let mut ev = Event::new(G_X, "héllo 🌍 \"q\"\n");
        ev.tag_event(&"a".repeat(64), "");
        ev.tag_user(G_X, "wss://relay.example");
        let (ts, bytes) = ev.stamped_event_at(1_700_000_000).unwrap();
        assert_eq!(ts, 1_700_000_000);
        let expected = format!(
            "[0,\"{G_X}\",1700000000,1,[[\"e\",\"{}\",\"\"],[\"p\",\"{G_X}\",\"wss://relay.example\"]],\"h\\u00e9llo \\ud83c\\udf0d \\\"q\\\"\\n\"]",
            "a".repeat(64)
        );
        assert_eq!(String::from_utf8(bytes.clone()).unwrap(), expected);
        assert_eq!(
            Event::compute_id(&bytes),
            "406dddf25cc68ded7bc1f321e4e52f4e994315ad906610ed89599c5028cc610c"
        );
    }

    #[test]
    fn plain_note_id_matches_reference() {
        let ev = Event::new(G_X, "hello");
        let (_, bytes) = ev.stamped_event_at(1_700_000_000).unwrap();
        assert_eq!(
            Event::compute_id(&bytes),
            "bde202ea7642ff9910600c7edc948a1f4220f0cbf5e4fb2b7efafa681bbb5285"
        );
    }

    #[test]
    fn id_is_deterministic_for_fixed_timestamp() {
        let mut ev = Event::new(G_X, "same");
        ev.tag_user(G_X, "");
        let (_, a) = ev.stamped_event_at(42).unwrap();
        let (_, b) = ev.stamped_event_at(42).unwrap();
        let id = Event::compute_id(&a);
        assert_eq!(id, Event::compute_id(&b));
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        let (_, later) = ev.stamped_event_at(43).unwrap();
        assert_ne!(id, Event::compute_id(&later));
    }

    #[test]
    fn stamped_event_uses_current_time() {
        let before = unix_now().unwrap();
        let (ts, _) = Event::new(G_X, "x").stamped_event().unwrap();
        assert!(ts >= before && ts <= unix_now().unwrap());
        assert!(ts > 1_600_000_000);
    }

    #[test]
    fn clock_before_epoch_is_an_error() {
        let early = UNIX_EPOCH - std::time::Duration::from_secs(1);
        assert!(matches!(secs_since_epoch(early), Err(Error::Clock(_))));
        let late = UNIX_EPOCH + std::time::Duration::from_secs(42);
        assert_eq!(secs_since_epoch(late).unwrap(), 42);
    }

    #[test]
    fn tag_order_is_significant() {
        let mut a = Event::new(G_X, "x");
        a.tag_event("e1", "");
        a.tag_user("p1", "");
        let mut b = Event::new(G_X, "x");
        b.tag_user("p1", "");
        b.tag_event("e1", "");
        let (_, ba) = a.stamped_event_at(1).unwrap();
        let (_, bb) = b.stamped_event_at(1).unwrap();
        assert_ne!(Event::compute_id(&ba), Event::compute_id(&bb));
        a.clear_tags();
        assert!(a.tags.is_empty());
    }

    #[test]
    fn del_and_controls_are_escaped() {
        let ev = Event::new(G_X, "a\u{7f}b\u{1}");
        let (_, bytes) = ev.stamped_event_at(1).unwrap();
        let s = String::from_utf8(bytes).unwrap();
        assert!(s.ends_with("\"a\\u007fb\\u0001\"]"));
        assert!(s.is_ascii());
    }

    #[test]
    fn signed_event_verifies() {
        let kp = generator_key();
        let mut ev = Event::new(kp.public_key_hex(), "hello ✓");
        ev.tag_event(&"b".repeat(64), "wss://r");
        let signed = ev.sign_at(&kp, 1_700_000_000).unwrap();
        let (_, bytes) = ev.stamped_event_at(1_700_000_000).unwrap();
        assert_eq!(signed.id, Event::compute_id(&bytes));
        assert_eq!(signed.sig.len(), 128);
        assert!(signed.verify());
        assert!(kp.verify(&hex::decode(&signed.id).unwrap(), &signed.sig));
    }

    #[test]
    fn tampering_breaks_verification() {
        let kp = KeyPair::generate().unwrap();
        let signed = Event::new(kp.public_key_hex(), "original").sign(&kp).unwrap();

        let mut content = signed.clone();
        content.content = "edited".into();
        assert!(!content.verify());

        let mut stamp = signed.clone();
        stamp.created_at += 1;
        assert!(!stamp.verify());

        let mut sig = signed;
        sig.sig = "00".repeat(64);
        assert!(!sig.verify());
    }

    #[test]
    fn sign_rejects_foreign_author() {
        let kp = KeyPair::generate().unwrap();
        let ev = Event::new(G_X, "not mine");
        assert!(matches!(ev.sign(&kp), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn payload_shape() {
        let kp = generator_key();
        let signed = Event::new(kp.public_key_hex(), "ünï").sign_at(&kp, 5).unwrap();
        let payload = signed.payload().unwrap();
        assert!(payload.is_ascii());
        assert!(payload.starts_with("[\"EVENT\",{\"id\":\""));
        let fields = ["\"id\"", "\"pubkey\"", "\"created_at\"", "\"kind\"", "\"tags\"", "\"content\"", "\"sig\""];
        let positions: Vec<usize> = fields.iter().map(|k| payload.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed[0], "EVENT");
        let back: SignedEvent = serde_json::from_value(parsed[1].clone()).unwrap();
        assert_eq!(back.content, "ünï");
        assert!(back.verify());
    }
}
