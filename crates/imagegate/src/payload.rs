//! The signed attestation payload and the claims extracted from it after
//! verification.
//!
//! Attestations sign an "atomic container signature" document naming the
//! image and its manifest digest. The JSON form is canonical: fields are
//! emitted in a fixed order and the optional section is left out when empty,
//! so signer and verifier agree byte for byte.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{image, Error, Result};

/// The `type` value of every atomic container signature.
pub const ATOMIC_CONTAINER_SIG_TYPE: &str = "atomic container signature";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Identity {
    #[serde(rename = "docker-reference")]
    docker_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ImageDigest {
    #[serde(rename = "docker-manifest-digest")]
    docker_manifest_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Critical {
    identity: Identity,
    image: ImageDigest,
    #[serde(rename = "type")]
    sig_type: String,
}

/// An atomic container signature document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomicContainerSig {
    critical: Critical,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    optional: BTreeMap<String, String>,
}

impl AtomicContainerSig {
    /// Builds the payload for a digest-qualified image.
    pub fn new(image: &str, optional: BTreeMap<String, String>) -> Result<Self> {
        let (name, digest) = image::parse_qualified(image)?;
        Ok(Self {
            critical: Critical {
                identity: Identity {
                    docker_reference: name.to_string(),
                },
                image: ImageDigest {
                    docker_manifest_digest: digest.to_string(),
                },
                sig_type: ATOMIC_CONTAINER_SIG_TYPE.to_string(),
            },
            optional,
        })
    }

    /// The canonical JSON encoding.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The image name (docker reference without digest).
    pub fn image_name(&self) -> &str {
        &self.critical.identity.docker_reference
    }

    /// The manifest digest.
    pub fn image_digest(&self) -> &str {
        &self.critical.image.docker_manifest_digest
    }

    /// Optional annotations.
    pub fn optional(&self) -> &BTreeMap<String, String> {
        &self.optional
    }
}

/// Payload bytes whose signature has been verified.
///
/// Only the verification primitives in this crate construct these, so holding
/// one proves the bytes were signed by a trusted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayload(Vec<u8>);

impl VerifiedPayload {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    /// The verified bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Claims extracted from a [`VerifiedPayload`].
///
/// The contents of an unverified payload are never inspected; this type is
/// the only way to look inside one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedAttestation {
    image_name: String,
    image_digest: String,
}

impl AuthenticatedAttestation {
    /// Parses verified payload bytes as an atomic container signature.
    pub fn from_verified(payload: &VerifiedPayload) -> Result<Self> {
        let sig: AtomicContainerSig = serde_json::from_slice(payload.as_bytes())
            .map_err(|e| Error::MalformedPayload(e.to_string()))?;
        if sig.critical.sig_type != ATOMIC_CONTAINER_SIG_TYPE {
            return Err(Error::MalformedPayload(format!(
                "unexpected payload type {:?}",
                sig.critical.sig_type
            )));
        }
        Ok(Self {
            image_name: sig.critical.identity.docker_reference,
            image_digest: sig.critical.image.docker_manifest_digest,
        })
    }

    /// The attested image name.
    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    /// The attested manifest digest.
    pub fn image_digest(&self) -> &str {
        &self.image_digest
    }

    /// Checks the claims against the image under review.
    pub fn check(&self, image_name: &str, image_digest: &str) -> Result<()> {
        if self.image_name != image_name {
            return Err(Error::ContentMismatch {
                field: "image name",
                expected: image_name.to_string(),
                actual: self.image_name.clone(),
            });
        }
        if self.image_digest != image_digest {
            return Err(Error::ContentMismatch {
                field: "image digest",
                expected: image_digest.to_string(),
                actual: self.image_digest.clone(),
            });
        }
        Ok(())
    }
}
