//! Attestation verification: find the keys an attestation claims, check the
//! signature with each until one matches, then check the signed content names
//! the image under review.
//!
//! Key IDs are not unique. Several configured keys may share an ID (for
//! example an operator-chosen name reused across a rotation), so keys are kept
//! in a multimap and every candidate is tried before giving up.

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;

use crate::{
    crypto::{self, OpensslPkixVerifier, PkixVerifier},
    image,
    keys::{self, KeyType, PublicKey},
    metadata::{RawAttestation, SignatureType},
    payload::{AuthenticatedAttestation, VerifiedPayload},
    Error, Result,
};

/// An attestation decoded from its wire form, not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attestation {
    /// An armored OpenPGP signed message carrying the payload.
    Pgp {
        /// ID of the claimed signing key.
        public_key_id: String,
        /// The armored message.
        signed_message: Vec<u8>,
    },
    /// A detached signature over `serialized_payload`.
    Generic {
        /// ID of the claimed signing key.
        public_key_id: String,
        /// Raw signature bytes.
        signature: Vec<u8>,
        /// The signed payload.
        serialized_payload: Vec<u8>,
    },
}

impl Attestation {
    /// The key ID this attestation claims.
    pub fn public_key_id(&self) -> &str {
        match self {
            Attestation::Pgp { public_key_id, .. } | Attestation::Generic { public_key_id, .. } => {
                public_key_id
            }
        }
    }

    fn key_type(&self) -> KeyType {
        match self {
            Attestation::Pgp { .. } => KeyType::Pgp,
            Attestation::Generic { .. } => KeyType::Pkix,
        }
    }
}

impl TryFrom<&RawAttestation> for Attestation {
    type Error = Error;

    /// Decodes the wire form. Unknown signature types fail with
    /// [`Error::UnsupportedSignatureType`].
    fn try_from(raw: &RawAttestation) -> Result<Self> {
        match &raw.signature_type {
            SignatureType::Pgp => Ok(Attestation::Pgp {
                public_key_id: raw.public_key_id.clone(),
                signed_message: STANDARD.decode(&raw.signature)?,
            }),
            SignatureType::Generic => {
                let payload = raw.serialized_payload.as_deref().ok_or_else(|| {
                    Error::MalformedPayload("generic attestation has no serialized payload".into())
                })?;
                Ok(Attestation::Generic {
                    public_key_id: raw.public_key_id.clone(),
                    signature: STANDARD.decode(&raw.signature)?,
                    serialized_payload: STANDARD.decode(payload)?,
                })
            }
            SignatureType::Unknown(other) => Err(Error::UnsupportedSignatureType(other.clone())),
        }
    }
}

/// Groups keys by ID, keeping every key that shares an ID.
pub fn index_public_keys_by_id(
    keys: impl IntoIterator<Item = PublicKey>,
) -> HashMap<String, Vec<PublicKey>> {
    let mut index: HashMap<String, Vec<PublicKey>> = HashMap::new();
    for key in keys {
        index.entry(key.id.clone()).or_default().push(key);
    }
    index
}

/// Verifies attestations for one image against a fixed key set.
#[derive(Debug)]
pub struct Verifier<V = OpensslPkixVerifier> {
    image_name: String,
    image_digest: String,
    public_keys: HashMap<String, Vec<PublicKey>>,
    pkix: V,
}

impl Verifier {
    /// Creates a verifier for a digest-qualified image.
    pub fn new(image: &str, keys: impl IntoIterator<Item = PublicKey>) -> Result<Self> {
        Self::with_pkix_verifier(image, keys, OpensslPkixVerifier)
    }
}

impl<V: PkixVerifier> Verifier<V> {
    /// Creates a verifier using a custom PKIX signature backend.
    pub fn with_pkix_verifier(
        image: &str,
        keys: impl IntoIterator<Item = PublicKey>,
        pkix: V,
    ) -> Result<Self> {
        let (name, digest) = image::parse_qualified(image)?;
        Ok(Self {
            image_name: name.to_string(),
            image_digest: digest.to_string(),
            public_keys: index_public_keys_by_id(keys),
            pkix,
        })
    }

    /// Verifies an attestation for this verifier's image.
    ///
    /// Fails with [`Error::NoKeyForId`] if no key carries the claimed ID,
    /// [`Error::NoMatchingKey`] if none of them verifies the signature, and
    /// [`Error::ContentMismatch`] if the signed payload names another image.
    pub fn verify_attestation(&self, attestation: &Attestation) -> Result<()> {
        let key_id = attestation.public_key_id();
        let candidates = self
            .public_keys
            .get(key_id)
            .filter(|keys| !keys.is_empty())
            .ok_or_else(|| Error::NoKeyForId(key_id.to_string()))?;

        let payload = candidates
            .iter()
            .find_map(|key| match self.verify_with_key(key, attestation) {
                Ok(payload) => Some(payload),
                Err(e) => {
                    debug!("Key {key_id:?} ({}) did not verify attestation: {e}", key.key_type);
                    None
                }
            })
            .ok_or_else(|| Error::NoMatchingKey(key_id.to_string()))?;

        AuthenticatedAttestation::from_verified(&payload)?
            .check(&self.image_name, &self.image_digest)
    }

    fn verify_with_key(&self, key: &PublicKey, attestation: &Attestation) -> Result<VerifiedPayload> {
        if key.key_type != attestation.key_type() {
            return Err(Error::KeyTypeMismatch {
                expected: attestation.key_type().as_str(),
                found: key.key_type.to_string(),
            });
        }
        match attestation {
            Attestation::Pgp { signed_message, .. } => {
                let certificate = keys::parse_pgp_public_key(&key.key_data)?;
                crypto::verify_clearsign(signed_message, std::slice::from_ref(&certificate))
            }
            Attestation::Generic {
                signature,
                serialized_payload,
                ..
            } => {
                self.pkix
                    .verify_pkix(&key.key_data, serialized_payload, signature)?;
                Ok(VerifiedPayload::new(serialized_payload.clone()))
            }
        }
    }
}
