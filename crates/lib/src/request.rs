//! Data model for verification requests.
//!
//! A [`VerificationRequest`] is built fresh for every verification call and
//! never persisted; it carries exactly what the directory needs to prove the
//! identifier→key binding.

use std::fmt;

use serde::{Deserialize, Serialize};

/// An account identifier (ACI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aci(String);

impl Aci {
    /// View the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Aci {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Aci {
    fn from(s: &str) -> Self {
        Aci(s.to_string())
    }
}

impl From<String> for Aci {
    fn from(s: String) -> Self {
        Aci(s)
    }
}

/// A public identity key.
///
/// Opaque to this crate; the directory transport interprets the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityKey(Vec<u8>);

impl IdentityKey {
    /// Wrap raw identity key bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// View the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short hex fingerprint; never the full key in logs.
        let fingerprint = hex::encode(&self.0[..self.0.len().min(4)]);
        write!(f, "IdentityKey({fingerprint}…)")
    }
}

/// Phone-number pairing for discoverable accounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct E164Info {
    /// E.164-formatted phone number.
    pub e164: String,
    /// Unidentified-access key associated with the number.
    pub access_key: Vec<u8>,
}

/// A locally cached directory proof for one identifier.
///
/// Opaque blob owned by the directory cache collaborator; its presence
/// selects monitor mode over search mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord(pub Vec<u8>);

/// Monitor-mode selector: verifying our own binding or a peer's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    /// The request targets the local account.
    Own,
    /// The request targets a conversation peer.
    Other,
}

/// Everything the directory needs to verify one identifier binding.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    /// The identifier under verification.
    pub aci: Aci,
    /// The identity key the app has cached for that identifier.
    pub identity_key: IdentityKey,
    /// Phone-number binding, when known and discoverable.
    pub e164_info: Option<E164Info>,
    /// Username hash binding, when a username is set and intact.
    pub username_hash: Option<Vec<u8>>,
}

impl VerificationRequest {
    /// Build a minimal request with only the required bindings.
    pub fn new(aci: Aci, identity_key: IdentityKey) -> Self {
        Self {
            aci,
            identity_key,
            e164_info: None,
            username_hash: None,
        }
    }
}
