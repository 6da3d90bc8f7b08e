//! secp256k1 identities: secret keys, x-only public keys and BIP-340 Schnorr
//! signatures.
//!
//! All curve arithmetic is delegated to libsecp256k1 through the `secp256k1`
//! crate, whose secret-dependent operations run in constant time.

use std::{fmt, str::FromStr};

use rand::{rngs::OsRng, RngCore};
use secp256k1::{schnorr, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// A secp256k1 secret scalar. Owned by the caller; never transmitted.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(secp256k1::SecretKey);

impl SecretKey {
    /// Generate a fresh key from the operating system CSPRNG.
    ///
    /// Raw values that are zero or not below the curve order are rejected and
    /// redrawn.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        loop {
            OsRng.fill_bytes(&mut bytes);
            if let Ok(sk) = secp256k1::SecretKey::from_slice(&bytes) {
                bytes.fill(0);
                return Self(sk);
            }
        }
    }

    /// Import a key from its 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        secp256k1::SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// Import a key from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Raw scalar bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.0.secret_bytes()
    }

    /// Lowercase hex of the scalar.
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret_bytes())
    }

    /// Derive the x-only public key (even-Y normalized).
    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::signing_only();
        let (xonly, _parity) = Keypair::from_secret_key(&secp, &self.0).x_only_public_key();
        PublicKey(xonly.serialize())
    }

    /// Deterministic BIP-340 signature over a 32-byte message, without
    /// auxiliary randomness.
    pub fn sign(&self, message: &[u8; 32]) -> Result<Signature> {
        let secp = Secp256k1::signing_only();
        let keypair = Keypair::from_secret_key(&secp, &self.0);
        let msg = Message::from_digest(*message);
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &keypair);
        Signature::from_bytes(sig.as_ref())
    }

    /// BIP-340 signature using caller-provided auxiliary randomness.
    pub fn sign_with_aux(&self, message: &[u8; 32], aux: &[u8; 32]) -> Result<Signature> {
        let secp = Secp256k1::signing_only();
        let keypair = Keypair::from_secret_key(&secp, &self.0);
        let msg = Message::from_digest(*message);
        let sig = secp.sign_schnorr_with_aux_rand(&msg, &keypair, aux);
        Signature::from_bytes(sig.as_ref())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.non_secure_erase();
    }
}

/// A 32-byte x-only public key, validated to lie on the curve.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Parse 32 raw bytes, rejecting values that are not a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let xonly =
            XOnlyPublicKey::from_slice(bytes).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Ok(Self(xonly.serialize()))
    }

    /// Parse 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidKey(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check a Schnorr signature over `message`. Never fails; any mismatch or
    /// malformed input yields `false`.
    pub fn verify(&self, message: &[u8; 32], sig: &Signature) -> bool {
        let Ok(xonly) = XOnlyPublicKey::from_slice(&self.0) else {
            return false;
        };
        let Ok(sig) = schnorr::Signature::from_slice(&sig.0) else {
            return false;
        };
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest(*message);
        secp.verify_schnorr(&sig, &msg, &xonly).is_ok()
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}

/// A 64-byte BIP-340 Schnorr signature.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 64] = bytes.try_into().map_err(|_| {
            Error::InvalidEvent(format!("signature must be 64 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidEvent(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(de::Error::custom)
    }
}
