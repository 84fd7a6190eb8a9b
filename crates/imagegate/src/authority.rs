//! Attestation authorities: named trust roots with their public keys.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One public key configured on an authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityKey {
    /// The ID attestations use for this key. Defaults to the key fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    /// Standard base64 of the armored OpenPGP key or PEM PKIX key.
    pub encoded_key: String,
}

impl AuthorityKey {
    /// A key identified by its fingerprint.
    pub fn new(encoded_key: impl Into<String>) -> Self {
        Self {
            key_id: None,
            encoded_key: encoded_key.into(),
        }
    }

    /// A key with an explicit ID.
    pub fn with_id(key_id: impl Into<String>, encoded_key: impl Into<String>) -> Self {
        Self {
            key_id: Some(key_id.into()),
            encoded_key: encoded_key.into(),
        }
    }
}

/// A named trust root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationAuthority {
    /// Authority name, unique within its namespace.
    pub name: String,
    /// Namespace the authority belongs to.
    pub namespace: String,
    /// Explicit metadata note name. Derived from the project when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_reference: Option<String>,
    /// Name of the secret holding the authority's signing key.
    pub private_key_secret_name: String,
    /// Public keys trusted for this authority.
    #[serde(default)]
    pub public_keys: Vec<AuthorityKey>,
}

/// Looks up attestation authorities.
pub trait AuthorityFetcher {
    /// All authorities in a namespace.
    fn authorities(&self, namespace: &str) -> Result<Vec<AttestationAuthority>>;

    /// One authority, or [`Error::AuthorityNotFound`].
    fn authority(&self, namespace: &str, name: &str) -> Result<AttestationAuthority>;
}

/// A fixed set of authorities, as loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorities {
    authorities: Vec<AttestationAuthority>,
}

impl StaticAuthorities {
    /// Creates a fetcher over `authorities`.
    pub fn new(authorities: Vec<AttestationAuthority>) -> Self {
        Self { authorities }
    }
}

impl AuthorityFetcher for StaticAuthorities {
    fn authorities(&self, namespace: &str) -> Result<Vec<AttestationAuthority>> {
        Ok(self
            .authorities
            .iter()
            .filter(|a| a.namespace == namespace)
            .cloned()
            .collect())
    }

    fn authority(&self, namespace: &str, name: &str) -> Result<AttestationAuthority> {
        self.authorities
            .iter()
            .find(|a| a.namespace == namespace && a.name == name)
            .cloned()
            .ok_or_else(|| Error::AuthorityNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}
