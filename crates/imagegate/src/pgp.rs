//! OpenPGP certificates, signing keys and signed messages.
//!
//! Everything here is a thin layer over `sequoia-openpgp`. Certificates are
//! validated under sequoia's [`StandardPolicy`], so keys must carry a valid
//! binding signature and signatures made with weak hashes are refused.

use std::io::{Read, Write};

use log::debug;
use sequoia_openpgp::{
    self as openpgp,
    cert::{CertBuilder, CertParser, CipherSuite},
    crypto::KeyPair,
    parse::{
        stream::{MessageLayer, MessageStructure, VerificationHelper, VerifierBuilder},
        Parse,
    },
    policy::StandardPolicy,
    serialize::{
        stream::{Armorer, LiteralWriter, Message, Signer},
        SerializeInto,
    },
    types::KeyFlags,
    Cert, KeyHandle,
};

use crate::{Error, Result};

pub use sequoia_openpgp::Cert as Certificate;

/// Largest signed payload that will be read out of a message.
///
/// Compressed messages are inflated while they are parsed, so this also
/// bounds the memory a hostile message can claim before its signature is
/// checked.
pub const MAX_PAYLOAD_SIZE: usize = 1 << 20;

const ARMOR_BEGIN: &str = "-----BEGIN PGP ";
const ARMOR_END: &str = "-----END PGP ";

fn pgp_error(e: openpgp::anyhow::Error) -> Error {
    Error::Pgp(format!("{e:#}"))
}

/// Rejects a second armored block or any data after the first one.
fn check_single_block(data: &[u8]) -> Result<()> {
    let text = String::from_utf8_lossy(data);
    if text.matches(ARMOR_BEGIN).count() > 1 {
        return Err(Error::MultipleKeys);
    }
    if let Some(end) = text.find(ARMOR_END) {
        let trailing = text[end..].split_once('\n').map_or("", |(_, rest)| rest);
        if !trailing.trim().is_empty() {
            return Err(Error::MultipleKeys);
        }
    }
    Ok(())
}

/// Parses exactly one certificate from armored key material.
fn parse_one(data: &[u8]) -> Result<Cert> {
    check_single_block(data)?;
    let mut certs = CertParser::from_bytes(data)
        .map_err(pgp_error)?
        .collect::<openpgp::Result<Vec<Cert>>>()
        .map_err(pgp_error)?;
    match certs.len() {
        0 => Err(Error::MalformedKey("no OpenPGP certificate found".into())),
        1 => Ok(certs.remove(0)),
        _ => Err(Error::MultipleKeys),
    }
}

/// Parses one armored public certificate.
///
/// Secret key material is refused here so that a private key pasted into a
/// trust configuration is caught early.
pub fn parse_certificate(data: &[u8]) -> Result<Certificate> {
    let cert = parse_one(data)?;
    if cert.is_tsk() {
        return Err(Error::KeyTypeMismatch {
            expected: "OpenPGP public key block",
            found: "OpenPGP private key block".to_string(),
        });
    }
    Ok(cert)
}

/// Algorithms [`SigningKey::generate`] can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA with a 2048, 3072 or 4096 bit modulus.
    Rsa(u32),
    /// Ed25519.
    Ed25519,
}

/// An OpenPGP certificate holding an unencrypted, signing-capable secret key.
#[derive(Clone)]
pub struct SigningKey {
    cert: Cert,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("fingerprint", &self.fingerprint())
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SigningKey {
    /// Parses one armored private key block.
    pub fn from_armor(data: &[u8]) -> Result<Self> {
        let cert = parse_one(data)?;
        if !cert.is_tsk() {
            return Err(Error::KeyTypeMismatch {
                expected: "OpenPGP private key block",
                found: "OpenPGP public key block".to_string(),
            });
        }
        let key = Self { cert };
        key.keypair()?;
        Ok(key)
    }

    /// Generates a v4 key with a self-signed user ID that never expires.
    pub fn generate(algorithm: KeyAlgorithm, user_id: &str) -> Result<Self> {
        let suite = match algorithm {
            KeyAlgorithm::Ed25519 => CipherSuite::Cv25519,
            KeyAlgorithm::Rsa(2048) => CipherSuite::RSA2k,
            KeyAlgorithm::Rsa(3072) => CipherSuite::RSA3k,
            KeyAlgorithm::Rsa(4096) => CipherSuite::RSA4k,
            KeyAlgorithm::Rsa(bits) => {
                return Err(Error::Config(format!("unsupported RSA key size {bits}")))
            }
        };
        let (cert, _revocation) = CertBuilder::new()
            .set_cipher_suite(suite)
            .set_primary_key_flags(KeyFlags::empty().set_certification().set_signing())
            .add_userid(user_id)
            .generate()
            .map_err(pgp_error)?;
        Ok(Self { cert })
    }

    /// The certificate, including secret key material.
    pub fn certificate(&self) -> &Certificate {
        &self.cert
    }

    /// Upper-case hex fingerprint of the primary key.
    pub fn fingerprint(&self) -> String {
        self.cert.fingerprint().to_hex()
    }

    /// The public certificate as an armored `PUBLIC KEY BLOCK`.
    pub fn to_public_armor(&self) -> Result<String> {
        let armored = self.cert.armored().to_vec().map_err(pgp_error)?;
        String::from_utf8(armored).map_err(|e| Error::Pgp(e.to_string()))
    }

    /// The unprotected secret key as an armored `PRIVATE KEY BLOCK`.
    pub fn to_secret_armor(&self) -> Result<String> {
        let armored = self.cert.as_tsk().armored().to_vec().map_err(pgp_error)?;
        String::from_utf8(armored).map_err(|e| Error::Pgp(e.to_string()))
    }

    fn keypair(&self) -> Result<KeyPair> {
        let policy = StandardPolicy::new();
        let key = self
            .cert
            .keys()
            .unencrypted_secret()
            .with_policy(&policy, None)
            .supported()
            .alive()
            .revoked(false)
            .for_signing()
            .next()
            .ok_or_else(|| {
                Error::MalformedKey(format!(
                    "{} has no usable unencrypted signing key",
                    self.fingerprint()
                ))
            })?;
        key.key().clone().into_keypair().map_err(pgp_error)
    }
}

/// Signs `data` and returns an armored `PGP MESSAGE` carrying it.
pub fn sign_message(key: &SigningKey, data: &[u8]) -> Result<String> {
    let keypair = key.keypair()?;
    let mut sink = Vec::new();
    {
        let message = Message::new(&mut sink);
        let message = Armorer::new(message).build().map_err(pgp_error)?;
        let message = Signer::new(message, keypair)
            .map_err(pgp_error)?
            .build()
            .map_err(pgp_error)?;
        let mut message = LiteralWriter::new(message).build().map_err(pgp_error)?;
        message.write_all(data)?;
        message.finalize().map_err(pgp_error)?;
    }
    String::from_utf8(sink).map_err(|e| Error::Pgp(e.to_string()))
}

/// Accepts a message when any signature verifies against the keyring.
struct Keyring<'a> {
    certs: &'a [Certificate],
}

impl VerificationHelper for Keyring<'_> {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.certs.to_vec())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        let mut failure = None;
        for layer in structure {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    match result {
                        Ok(_) => return Ok(()),
                        Err(e) => {
                            debug!("Signature check failed: {e}");
                            failure = Some(e.to_string());
                        }
                    }
                }
            }
        }
        Err(match failure {
            Some(reason) => Error::BadSignature(reason),
            None => Error::NoSignature,
        }
        .into())
    }
}

fn message_error(e: openpgp::anyhow::Error) -> Error {
    match e.downcast::<Error>() {
        Ok(e) => e,
        Err(e) => Error::BadSignature(format!("{e:#}")),
    }
}

/// Verifies a signed message against `keyring` and returns the signed data.
///
/// Messages up to [`MAX_PAYLOAD_SIZE`] are verified in full before any data
/// is returned; larger ones are refused.
pub fn verify_message(armored: &[u8], keyring: &[Certificate]) -> Result<Vec<u8>> {
    let policy = StandardPolicy::new();
    let verifier = VerifierBuilder::from_bytes(armored)
        .map_err(message_error)?
        .buffer_size(MAX_PAYLOAD_SIZE)
        .with_policy(&policy, None, Keyring { certs: keyring })
        .map_err(message_error)?;

    let mut data = Vec::new();
    verifier
        .take(MAX_PAYLOAD_SIZE as u64 + 1)
        .read_to_end(&mut data)
        .map_err(|e| Error::BadSignature(e.to_string()))?;
    if data.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge(MAX_PAYLOAD_SIZE));
    }
    Ok(data)
}
