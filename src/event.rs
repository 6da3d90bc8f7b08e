//! Nostr event model.

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    canonical,
    error::{Error, Result},
    keys::{PublicKey, SecretKey, Signature},
};

/// Kind number of a short text note.
pub const KIND_TEXT_NOTE: u32 = 1;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. Common examples include:
///
/// - `p` – references another author's public key
/// - `e` – links to another event ID
/// - `t` – free-form topic or hashtag
///
/// Each tag is stored verbatim so uncommon or custom tags are preserved. For
/// example, a `["t", "news"]` tag from the protocol is represented as
/// `Tag(vec!["t".into(), "news".into()])`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from its name followed by its values.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    /// Tag name, the first element.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First value after the name.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// 32-byte SHA-256 event identifier, lowercase hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId([u8; 32]);

impl EventId {
    /// Wrap a SHA-256 digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// Parse 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            Error::InvalidEvent(format!("event id must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    /// Parse 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidEvent(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, the wire form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({})", self.to_hex())
    }
}

impl FromStr for EventId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Event under construction. Becomes an [`Event`] through [`finalize`].
///
/// [`finalize`]: UnsignedEvent::finalize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    pub pubkey: Option<PublicKey>,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
}

/// Start a kind-1 text note stamped with the current time.
pub fn create_note(content: impl Into<String>) -> UnsignedEvent {
    UnsignedEvent::new(KIND_TEXT_NOTE, content)
}

impl UnsignedEvent {
    /// Unsigned event of `kind` stamped with the current time and no tags.
    pub fn new(kind: u32, content: impl Into<String>) -> Self {
        Self {
            pubkey: None,
            created_at: unix_now(),
            kind,
            tags: Vec::new(),
            content: content.into(),
        }
    }

    /// Override the kind.
    pub fn kind(mut self, kind: u32) -> Self {
        self.kind = kind;
        self
    }

    /// Override the creation time, in Unix seconds.
    pub fn created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Replace all tags.
    pub fn tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Append one tag.
    pub fn tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Declare the expected author. [`finalize`](Self::finalize) checks it
    /// against the signing key.
    pub fn pubkey(mut self, pubkey: PublicKey) -> Self {
        self.pubkey = Some(pubkey);
        self
    }

    /// Stamp the author, compute the id and sign it.
    ///
    /// A preset pubkey that does not belong to `secret_key` is rejected rather
    /// than producing an event whose signature can never verify.
    pub fn finalize(self, secret_key: &SecretKey) -> Result<Event> {
        let derived = secret_key.public_key();
        if let Some(preset) = self.pubkey {
            if preset != derived {
                return Err(Error::InvalidEvent(
                    "pubkey does not belong to the signing key".into(),
                ));
            }
        }
        let id = canonical::event_id(
            &derived,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        let sig = secret_key.sign(id.as_bytes())?;
        Ok(Event {
            id,
            pubkey: derived,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig,
        })
    }
}

/// Signed Nostr event as exchanged with relays.
///
/// ```json
/// {
///   "id": "4376c65d...",
///   "pubkey": "6e468422...",
///   "created_at": 1673347337,
///   "kind": 1,
///   "tags": [["t", "news"]],
///   "content": "hello",
///   "sig": "908a15e4..."
/// }
/// ```
///
/// Fields are read-only; an event parsed from the wire must pass
/// [`Event::verify`] before it is trusted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    id: EventId,
    pubkey: PublicKey,
    created_at: u64,
    kind: u32,
    tags: Vec<Tag>,
    content: String,
    sig: Signature,
}

impl Event {
    /// Hash of the canonical serialization.
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Author's x-only public key.
    pub fn pubkey(&self) -> &PublicKey {
        &self.pubkey
    }

    /// Unix timestamp in seconds.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn kind(&self) -> u32 {
        self.kind
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Schnorr signature over the id.
    pub fn sig(&self) -> &Signature {
        &self.sig
    }

    /// Values of every tag named `name`, in order.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |tag| tag.name() == Some(name))
            .filter_map(Tag::value)
    }

    /// Recompute the id from the event's own fields.
    pub fn compute_id(&self) -> Result<EventId> {
        canonical::event_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )
    }

    /// Check id and signature, reporting which one failed.
    pub fn validate(&self) -> Result<()> {
        if self.compute_id()? != self.id {
            return Err(Error::InvalidEvent(format!("id mismatch for {}", self.id)));
        }
        if !self.pubkey.verify(self.id.as_bytes(), &self.sig) {
            return Err(Error::InvalidEvent(format!("bad signature on {}", self.id)));
        }
        Ok(())
    }

    /// Boolean form of [`validate`](Self::validate).
    pub fn verify(&self) -> bool {
        self.validate().is_ok()
    }

    /// Wire JSON object `{id, pubkey, created_at, kind, tags, content, sig}`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the wire JSON object. The result is not verified.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
