//! Canonical event serialization used for id hashing.
//!
//! The canonical form is the compact JSON array
//! `[0,"<pubkey>",<created_at>,<kind>,<tags>,"<content>"]`. Strings use the
//! standard JSON escapes for `"`, `\` and control characters, forward slashes
//! are written as `\/`, and everything else (including non-ASCII) stays
//! literal UTF-8.

use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use sha2::{Digest, Sha256};

use crate::{
    error::Result,
    event::{EventId, Tag},
    keys::PublicKey,
};

/// Compact formatter that additionally escapes `/`.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut parts = fragment.split('/');
        if let Some(first) = parts.next() {
            writer.write_all(first.as_bytes())?;
        }
        for part in parts {
            writer.write_all(b"\\/")?;
            writer.write_all(part.as_bytes())?;
        }
        Ok(())
    }
}

/// Produce the canonical bytes for an event's fields.
pub fn serialize(
    pubkey: &PublicKey,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128 + content.len());
    let mut ser = serde_json::Serializer::with_formatter(&mut out, CanonicalFormatter);
    (0u8, pubkey, created_at, kind, tags, content).serialize(&mut ser)?;
    Ok(out)
}

/// SHA-256 of the canonical serialization: the event id.
pub fn event_id(
    pubkey: &PublicKey,
    created_at: u64,
    kind: u32,
    tags: &[Tag],
    content: &str,
) -> Result<EventId> {
    let data = serialize(pubkey, created_at, kind, tags, content)?;
    Ok(EventId::from_digest(Sha256::digest(&data).into()))
}
