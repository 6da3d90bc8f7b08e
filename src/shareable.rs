//! NIP-19 shareable identifiers: `npub`, `nsec`, `note`, `nevent` and
//! `nprofile` bech32 strings.
//!
//! Bare entities encode their 32 raw bytes. `nevent` and `nprofile` encode a
//! sequence of TLV records (1-byte type, 1-byte length, value):
//!
//! | type | meaning | value |
//! |------|---------|-------|
//! | 0 | special | 32-byte event id or pubkey |
//! | 1 | relay | UTF-8 relay URL |
//! | 2 | author | 32-byte pubkey |
//! | 3 | kind | 4-byte big-endian integer |

use std::{fmt, str::FromStr};

use bech32::{FromBase32, ToBase32, Variant};

use crate::{
    error::{Error, Result},
    event::EventId,
    keys::{PublicKey, SecretKey},
};

const HRP_PUBKEY: &str = "npub";
const HRP_SECRET: &str = "nsec";
const HRP_NOTE: &str = "note";
const HRP_EVENT: &str = "nevent";
const HRP_PROFILE: &str = "nprofile";

const TLV_SPECIAL: u8 = 0;
const TLV_RELAY: u8 = 1;
const TLV_AUTHOR: u8 = 2;
const TLV_KIND: u8 = 3;

/// A key or event reference in its shareable form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shareable {
    PublicKey(PublicKey),
    SecretKey(SecretKey),
    Note(EventId),
    Event {
        id: EventId,
        relays: Vec<String>,
        author: Option<PublicKey>,
        kind: Option<u32>,
    },
    Profile {
        pubkey: PublicKey,
        relays: Vec<String>,
    },
}

impl Shareable {
    /// Event reference with relay hints and optional author/kind metadata.
    pub fn nevent(
        id: EventId,
        relays: impl IntoIterator<Item = impl Into<String>>,
        author: Option<PublicKey>,
        kind: Option<u32>,
    ) -> Self {
        Self::Event {
            id,
            relays: relays.into_iter().map(Into::into).collect(),
            author,
            kind,
        }
    }

    /// Profile reference with relay hints.
    pub fn nprofile(
        pubkey: PublicKey,
        relays: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::Profile {
            pubkey,
            relays: relays.into_iter().map(Into::into).collect(),
        }
    }

    /// Human-readable prefix for this entity.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::PublicKey(_) => HRP_PUBKEY,
            Self::SecretKey(_) => HRP_SECRET,
            Self::Note(_) => HRP_NOTE,
            Self::Event { .. } => HRP_EVENT,
            Self::Profile { .. } => HRP_PROFILE,
        }
    }

    /// Encode as a lowercase bech32 string.
    pub fn encode(&self) -> Result<String> {
        let payload = match self {
            Self::PublicKey(pk) => pk.as_bytes().to_vec(),
            Self::SecretKey(sk) => sk.secret_bytes().to_vec(),
            Self::Note(id) => id.as_bytes().to_vec(),
            Self::Event {
                id,
                relays,
                author,
                kind,
            } => {
                let mut out = Vec::new();
                push_tlv(&mut out, TLV_SPECIAL, id.as_bytes())?;
                for relay in relays {
                    push_tlv(&mut out, TLV_RELAY, relay.as_bytes())?;
                }
                if let Some(author) = author {
                    push_tlv(&mut out, TLV_AUTHOR, author.as_bytes())?;
                }
                if let Some(kind) = kind {
                    push_tlv(&mut out, TLV_KIND, &kind.to_be_bytes())?;
                }
                out
            }
            Self::Profile { pubkey, relays } => {
                let mut out = Vec::new();
                push_tlv(&mut out, TLV_SPECIAL, pubkey.as_bytes())?;
                for relay in relays {
                    push_tlv(&mut out, TLV_RELAY, relay.as_bytes())?;
                }
                out
            }
        };
        Ok(bech32::encode(
            self.prefix(),
            payload.to_base32(),
            Variant::Bech32,
        )?)
    }

    /// Decode a bech32 string. Fails with [`Error::MalformedEncoding`] on a bad
    /// checksum, an unknown prefix or inconsistent lengths.
    pub fn decode(text: &str) -> Result<Self> {
        let (hrp, data, variant) = bech32::decode(text)?;
        if variant != Variant::Bech32 {
            return Err(malformed("expected bech32, got bech32m"));
        }
        let bytes = Vec::<u8>::from_base32(&data)?;
        match hrp.as_str() {
            HRP_PUBKEY => Ok(Self::PublicKey(public_key(&bytes)?)),
            HRP_SECRET => {
                check_len("secret key", &bytes, 32)?;
                let sk = SecretKey::from_bytes(&bytes).map_err(|e| malformed(e.to_string()))?;
                Ok(Self::SecretKey(sk))
            }
            HRP_NOTE => Ok(Self::Note(event_id(&bytes)?)),
            HRP_EVENT => {
                let mut id = None;
                let mut relays = Vec::new();
                let mut author = None;
                let mut kind = None;
                for (ty, value) in parse_tlv(&bytes)? {
                    match ty {
                        TLV_SPECIAL => id = Some(event_id(value)?),
                        TLV_RELAY => relays.push(relay(value)?),
                        TLV_AUTHOR => author = Some(public_key(value)?),
                        TLV_KIND => {
                            let raw: [u8; 4] = value.try_into().map_err(|_| {
                                malformed(format!("kind must be 4 bytes, got {}", value.len()))
                            })?;
                            kind = Some(u32::from_be_bytes(raw));
                        }
                        _ => {}
                    }
                }
                let id = id.ok_or_else(|| malformed("nevent without event id"))?;
                Ok(Self::Event {
                    id,
                    relays,
                    author,
                    kind,
                })
            }
            HRP_PROFILE => {
                let mut pubkey = None;
                let mut relays = Vec::new();
                for (ty, value) in parse_tlv(&bytes)? {
                    match ty {
                        TLV_SPECIAL => pubkey = Some(public_key(value)?),
                        TLV_RELAY => relays.push(relay(value)?),
                        _ => {}
                    }
                }
                let pubkey = pubkey.ok_or_else(|| malformed("nprofile without pubkey"))?;
                Ok(Self::Profile { pubkey, relays })
            }
            other => Err(malformed(format!("unknown prefix `{other}`"))),
        }
    }
}

impl fmt::Display for Shareable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.encode().map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl FromStr for Shareable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedEncoding(msg.into())
}

fn push_tlv(out: &mut Vec<u8>, ty: u8, value: &[u8]) -> Result<()> {
    let len = u8::try_from(value.len())
        .map_err(|_| malformed(format!("TLV value of {} bytes exceeds 255", value.len())))?;
    out.push(ty);
    out.push(len);
    out.extend_from_slice(value);
    Ok(())
}

/// Split a TLV payload into `(type, value)` records.
fn parse_tlv(mut bytes: &[u8]) -> Result<Vec<(u8, &[u8])>> {
    let mut records = Vec::new();
    while !bytes.is_empty() {
        let [ty, len, rest @ ..] = bytes else {
            return Err(malformed("truncated TLV header"));
        };
        let len = *len as usize;
        if rest.len() < len {
            return Err(malformed(format!(
                "TLV type {ty} declares {len} bytes but {} remain",
                rest.len()
            )));
        }
        records.push((*ty, &rest[..len]));
        bytes = &rest[len..];
    }
    Ok(records)
}

fn check_len(what: &str, bytes: &[u8], expected: usize) -> Result<()> {
    if bytes.len() != expected {
        return Err(malformed(format!(
            "{what} must be {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

fn public_key(bytes: &[u8]) -> Result<PublicKey> {
    check_len("public key", bytes, 32)?;
    PublicKey::from_bytes(bytes).map_err(|e| malformed(e.to_string()))
}

fn event_id(bytes: &[u8]) -> Result<EventId> {
    check_len("event id", bytes, 32)?;
    EventId::from_bytes(bytes).map_err(|e| malformed(e.to_string()))
}

fn relay(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| malformed(format!("relay is not UTF-8: {e}")))
}
