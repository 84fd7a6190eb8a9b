//! The metadata store contract: vulnerabilities, attestation notes and
//! attestation occurrences for container images.
//!
//! Remote stores are reached through [`ReadOnlyClient`] and [`Fetcher`];
//! [`local::LocalStore`] is a self-contained implementation.

use std::{collections::BTreeMap, fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{
    authority::AttestationAuthority,
    crypto,
    keys::{self, PrivateKey},
    payload::AtomicContainerSig,
    secrets::SigningSecret,
    Error, Result,
};

pub mod local;

/// How an attestation's signature is encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignatureType {
    /// An armored OpenPGP signed message carrying the payload.
    Pgp,
    /// A detached signature over a separately stored payload.
    Generic,
    /// Anything else; verification refuses these.
    Unknown(String),
}

impl SignatureType {
    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        match self {
            SignatureType::Pgp => "pgp",
            SignatureType::Generic => "generic",
            SignatureType::Unknown(other) => other,
        }
    }
}

impl From<String> for SignatureType {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "pgp" => SignatureType::Pgp,
            "generic" => SignatureType::Generic,
            _ => SignatureType::Unknown(s),
        }
    }
}

impl From<SignatureType> for String {
    fn from(t: SignatureType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attestation as stored, before any verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAttestation {
    /// Signature encoding.
    pub signature_type: SignatureType,
    /// Standard base64 of the signature (the armored message for
    /// [`SignatureType::Pgp`]).
    pub signature: String,
    /// ID of the key that claims to have signed.
    pub public_key_id: String,
    /// Optional locator of the signature in an external store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_address: Option<String>,
    /// Standard base64 of the signed payload, for [`SignatureType::Generic`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialized_payload: Option<String>,
}

impl RawAttestation {
    /// An OpenPGP attestation.
    pub fn pgp(signature: impl Into<String>, public_key_id: impl Into<String>) -> Self {
        Self {
            signature_type: SignatureType::Pgp,
            signature: signature.into(),
            public_key_id: public_key_id.into(),
            generic_address: None,
            serialized_payload: None,
        }
    }

    /// A detached-signature attestation.
    pub fn generic(
        signature: impl Into<String>,
        public_key_id: impl Into<String>,
        serialized_payload: impl Into<String>,
    ) -> Self {
        Self {
            signature_type: SignatureType::Generic,
            signature: signature.into(),
            public_key_id: public_key_id.into(),
            generic_address: None,
            serialized_payload: Some(serialized_payload.into()),
        }
    }
}

/// Vulnerability severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    SeverityUnspecified,
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::SeverityUnspecified => "SEVERITY_UNSPECIFIED",
            Severity::Minimal => "MINIMAL",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SEVERITY_UNSPECIFIED" => Ok(Severity::SeverityUnspecified),
            "MINIMAL" => Ok(Severity::Minimal),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(Error::Config(format!("unknown severity {s:?}"))),
        }
    }
}

/// A known vulnerability in an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    /// CVE identifier (or the note naming it).
    pub cve: String,
    /// Severity.
    pub severity: Severity,
    /// Whether a fixed version exists.
    #[serde(default)]
    pub has_fix_available: bool,
}

/// An attestation note: the metadata anchor of an attestation authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// Full note name.
    pub name: String,
    /// Name of the authority the note represents.
    pub authority: String,
    pub short_description: String,
    pub long_description: String,
}

/// An attestation recorded against an image under a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Full occurrence name.
    pub name: String,
    /// The note this occurrence belongs to.
    pub note_name: String,
    /// Resource URL of the attested image.
    pub resource_uri: String,
    /// The attestation itself.
    pub attestation: RawAttestation,
}

/// Read access to a metadata store.
pub trait ReadOnlyClient {
    /// Vulnerabilities known for an image.
    fn vulnerabilities(&self, image: &str) -> Result<Vec<Vulnerability>>;

    /// Attestations recorded for an image under an authority's note.
    fn attestations(
        &self,
        image: &str,
        authority: &AttestationAuthority,
    ) -> Result<Vec<RawAttestation>>;
}

/// Read-write access to a metadata store.
pub trait Fetcher: ReadOnlyClient {
    /// The authority's note, if it exists.
    fn attestation_note(&self, authority: &AttestationAuthority) -> Result<Option<Note>>;

    /// Creates the authority's note.
    fn create_attestation_note(&self, authority: &AttestationAuthority) -> Result<Note>;

    /// Signs the canonical payload for `image` with `secret` and records it
    /// under `note`.
    fn create_attestation_occurrence(
        &self,
        note: &Note,
        image: &str,
        secret: &SigningSecret,
    ) -> Result<Occurrence>;
}

/// The note name for an authority: its explicit note reference, or one
/// derived from the project.
pub fn note_name(project: &str, authority: &AttestationAuthority) -> String {
    match &authority.note_reference {
        Some(reference) => reference.clone(),
        None => format!("projects/{project}/notes/{}", authority.name),
    }
}

/// Returns the authority's note, creating it when missing.
pub fn get_or_create_attestation_note<F: Fetcher + ?Sized>(
    client: &F,
    authority: &AttestationAuthority,
) -> Result<Note> {
    match client.attestation_note(authority)? {
        Some(note) => Ok(note),
        None => client.create_attestation_note(authority),
    }
}

/// Signs the canonical payload for `image` with the secret's private key.
///
/// OpenPGP keys produce a [`SignatureType::Pgp`] attestation carrying the
/// armored message; PKIX keys produce a [`SignatureType::Generic`] one with
/// a detached signature and the serialized payload.
pub fn create_attestation_signature(image: &str, secret: &SigningSecret) -> Result<RawAttestation> {
    let payload = AtomicContainerSig::new(image, BTreeMap::new())?.to_json()?;
    let attestation = match secret.private_key()? {
        PrivateKey::Pgp(key) => {
            let armored = crypto::sign_clearsign(&key, payload.as_bytes())?;
            RawAttestation::pgp(STANDARD.encode(armored), key.fingerprint())
        }
        PrivateKey::Pkix(key) => {
            let signature = crypto::sign_pkix(&key, payload.as_bytes())?;
            RawAttestation::generic(
                STANDARD.encode(signature),
                keys::pkix_private_key_id(&key)?,
                STANDARD.encode(&payload),
            )
        }
    };
    Ok(attestation)
}
