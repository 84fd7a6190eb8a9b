//! Key material: parsing and fingerprinting of OpenPGP and PKIX keys.
//!
//! Two key families are supported:
//!
//! - **OpenPGP**: ASCII-armored public or private key blocks. Identified by
//!   the upper-case hex v4 fingerprint.
//! - **PKIX**: PEM-encoded RSA or EC keys. Identified by an RFC 6920 style
//!   `ni:///sha-256;<base64url>` digest of the SubjectPublicKeyInfo DER.
//!
//! Identifiers are used to index keys but are not unique; see
//! [`crate::verifier::index_public_keys_by_id`].

use std::fmt;

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use openssl::{
    ec::EcKey,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    pgp::{self, Certificate, SigningKey},
    Error, Result,
};

const PGP_ARMOR_MARKER: &str = "-----BEGIN PGP ";

/// The family a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// OpenPGP armored keys.
    Pgp,
    /// PEM-encoded X.509 SubjectPublicKeyInfo / PKCS keys.
    Pkix,
}

impl KeyType {
    /// Returns the string representation used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Pgp => "pgp",
            KeyType::Pkix => "pkix",
        }
    }

    /// Guesses the family of encoded key material from its framing.
    pub fn detect(data: &[u8]) -> Self {
        if String::from_utf8_lossy(data).contains(PGP_ARMOR_MARKER) {
            KeyType::Pgp
        } else {
            KeyType::Pkix
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A public key as configured on an attestation authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// The key family.
    pub key_type: KeyType,
    /// The encoded key: armored text for OpenPGP, PEM for PKIX.
    pub key_data: Vec<u8>,
    /// The identifier attestations use to name this key.
    pub id: String,
}

impl PublicKey {
    /// Creates a new public key entry.
    pub fn new(key_type: KeyType, key_data: impl Into<Vec<u8>>, id: impl Into<String>) -> Self {
        Self {
            key_type,
            key_data: key_data.into(),
            id: id.into(),
        }
    }
}

/// A private signing key.
pub enum PrivateKey {
    /// An unprotected OpenPGP secret key.
    Pgp(SigningKey),
    /// An RSA or EC private key.
    Pkix(PKey<Private>),
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKey::Pgp(key) => f.debug_tuple("Pgp").field(key).finish(),
            PrivateKey::Pkix(_) => f.debug_tuple("Pkix").field(&"<redacted>").finish(),
        }
    }
}

impl PrivateKey {
    /// The key family.
    pub fn key_type(&self) -> KeyType {
        match self {
            PrivateKey::Pgp(_) => KeyType::Pgp,
            PrivateKey::Pkix(_) => KeyType::Pkix,
        }
    }

    /// The identifier of the matching public key.
    pub fn fingerprint(&self) -> Result<String> {
        match self {
            PrivateKey::Pgp(key) => Ok(key.fingerprint()),
            PrivateKey::Pkix(key) => pkix_private_key_id(key),
        }
    }
}

/// Decodes exactly one PEM block, returning its label and DER contents.
pub(crate) fn decode_pem(data: &[u8]) -> Result<(String, Vec<u8>)> {
    let mut blocks = pem::parse_many(data).map_err(|e| Error::ArmorDecode(e.to_string()))?;
    match blocks.len() {
        0 => Err(Error::ArmorDecode("no PEM block found".into())),
        1 => {
            let block = blocks.remove(0);
            Ok((block.tag().to_string(), block.into_contents()))
        }
        _ => Err(Error::MultipleKeys),
    }
}

fn malformed(e: impl fmt::Display) -> Error {
    Error::MalformedKey(e.to_string())
}

fn ni_digest(der: &[u8]) -> String {
    format!("ni:///sha-256;{}", URL_SAFE_NO_PAD.encode(Sha256::digest(der)))
}

fn check_algorithm<T>(key: &PKey<T>) -> Result<()> {
    match key.id() {
        Id::RSA | Id::EC => Ok(()),
        other => Err(Error::MalformedKey(format!(
            "unsupported PKIX key algorithm {other:?}"
        ))),
    }
}

/// Parses an armored OpenPGP public key block.
pub fn parse_pgp_public_key(data: &[u8]) -> Result<Certificate> {
    pgp::parse_certificate(data)
}

/// Parses an armored, unprotected OpenPGP private key block.
pub fn parse_pgp_secret_key(data: &[u8]) -> Result<SigningKey> {
    SigningKey::from_armor(data)
}

/// The fingerprint of an armored OpenPGP public key.
pub fn pgp_fingerprint(data: &[u8]) -> Result<String> {
    Ok(parse_pgp_public_key(data)?.fingerprint().to_hex())
}

/// Parses a PEM private key, dispatching on the block label:
/// `RSA PRIVATE KEY` (PKCS#1), `EC PRIVATE KEY` (SEC 1) or `PRIVATE KEY`
/// (PKCS#8).
pub fn parse_pkix_private_key(data: &[u8]) -> Result<PKey<Private>> {
    let (label, der) = decode_pem(data)?;
    let key = match label.as_str() {
        "RSA PRIVATE KEY" => {
            PKey::from_rsa(Rsa::private_key_from_der(&der).map_err(malformed)?)?
        }
        "EC PRIVATE KEY" => {
            PKey::from_ec_key(EcKey::private_key_from_der(&der).map_err(malformed)?)?
        }
        "PRIVATE KEY" => PKey::private_key_from_pkcs8(&der).map_err(malformed)?,
        _ => return Err(Error::UnsupportedKeyLabel(label)),
    };
    check_algorithm(&key)?;
    Ok(key)
}

/// Parses a PEM `PUBLIC KEY` block, returning the key and its DER encoding.
pub fn parse_pkix_public_key(data: &[u8]) -> Result<(PKey<Public>, Vec<u8>)> {
    let (label, der) = decode_pem(data)?;
    if label != "PUBLIC KEY" {
        return Err(Error::UnsupportedKeyLabel(label));
    }
    let key = PKey::public_key_from_der(&der).map_err(malformed)?;
    check_algorithm(&key)?;
    Ok((key, der))
}

/// The identifier of a PKIX private key: a digest of its public half.
pub fn pkix_private_key_id(key: &PKey<Private>) -> Result<String> {
    Ok(ni_digest(&key.public_key_to_der()?))
}

/// The identifier of a PEM `PUBLIC KEY`: a digest of its DER encoding.
pub fn pkix_public_key_id(data: &[u8]) -> Result<String> {
    let (_, der) = parse_pkix_public_key(data)?;
    Ok(ni_digest(&der))
}

/// Parses private key material of either family.
pub fn parse_private_key(data: &[u8]) -> Result<PrivateKey> {
    match KeyType::detect(data) {
        KeyType::Pgp => parse_pgp_secret_key(data).map(PrivateKey::Pgp),
        KeyType::Pkix => parse_pkix_private_key(data).map(PrivateKey::Pkix),
    }
}

/// Parses public key material of either family into a [`PublicKey`] whose ID
/// is its fingerprint.
pub fn parse_public_key(data: &[u8]) -> Result<PublicKey> {
    let key_type = KeyType::detect(data);
    let id = match key_type {
        KeyType::Pgp => pgp_fingerprint(data)?,
        KeyType::Pkix => pkix_public_key_id(data)?,
    };
    Ok(PublicKey::new(key_type, data, id))
}

/// Decodes a standard-base64 encoded key and returns it with its fingerprint.
pub fn key_and_fingerprint(encoded: &str) -> Result<(PublicKey, String)> {
    let data = STANDARD.decode(encoded.trim())?;
    let key = parse_public_key(&data)?;
    let fingerprint = key.id.clone();
    Ok((key, fingerprint))
}
