//! Signature verification and signing primitives.
//!
//! Verification comes in two shapes: OpenPGP signed messages, where the
//! payload travels inside the signature, and detached PKIX signatures over a
//! separately transported payload. Only these primitives create
//! [`VerifiedPayload`] values.

use openssl::{
    hash::MessageDigest,
    pkey::{PKey, Private},
    sign::{Signer, Verifier},
};

use crate::{
    keys::parse_pkix_public_key,
    payload::VerifiedPayload,
    pgp::{self, Certificate, SigningKey},
    Error, Result,
};

/// Verifies an armored OpenPGP signed message against `keyring` and returns
/// the signed payload.
pub fn verify_clearsign(armored: &[u8], keyring: &[Certificate]) -> Result<VerifiedPayload> {
    let data = pgp::verify_message(armored, keyring)?;
    Ok(VerifiedPayload::new(data))
}

/// Produces an armored OpenPGP signed message carrying `message`.
pub fn sign_clearsign(key: &SigningKey, message: &[u8]) -> Result<String> {
    pgp::sign_message(key, message)
}

/// Verification of detached signatures made with PKIX keys.
///
/// The engine is generic over this trait so tests can substitute the
/// cryptography.
pub trait PkixVerifier {
    /// Verifies `signature` over `payload` with the PEM-encoded public key.
    ///
    /// Returns [`Error::MalformedKey`] when the key cannot be used and
    /// [`Error::SignatureMismatch`] when the signature does not verify.
    fn verify_pkix(&self, public_key: &[u8], payload: &[u8], signature: &[u8]) -> Result<()>;
}

/// [`PkixVerifier`] backed by OpenSSL: SHA-256 with RSA PKCS#1 v1.5 or ECDSA,
/// depending on the key.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpensslPkixVerifier;

impl PkixVerifier for OpensslPkixVerifier {
    fn verify_pkix(&self, public_key: &[u8], payload: &[u8], signature: &[u8]) -> Result<()> {
        let (key, _) = parse_pkix_public_key(public_key)?;
        let mut verifier = Verifier::new(MessageDigest::sha256(), &key)
            .map_err(|e| Error::MalformedKey(e.to_string()))?;
        verifier.update(payload)?;
        match verifier.verify(signature) {
            Ok(true) => Ok(()),
            // OpenSSL reports undecodable signatures as errors
            Ok(false) | Err(_) => Err(Error::SignatureMismatch),
        }
    }
}

/// Signs `payload` with a PKIX private key using SHA-256.
pub fn sign_pkix(key: &PKey<Private>, payload: &[u8]) -> Result<Vec<u8>> {
    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    signer.update(payload)?;
    Ok(signer.sign_to_vec()?)
}

#[cfg(test)]
mod tests {
    use openssl::{ec::EcGroup, ec::EcKey, nid::Nid, rsa::Rsa};

    use super::*;
    use crate::pgp::{parse_certificate, KeyAlgorithm};

    const RSA_PUB: &str = include_str!("../tests/fixtures/rsa.pub.asc");
    const RSA_SIGNED: &str = include_str!("../tests/fixtures/rsa.payload.asc");
    const PAYLOAD: &str = include_str!("../tests/fixtures/payload.json");

    fn keys() -> Vec<PKey<Private>> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        vec![
            PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap(),
            PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap(),
        ]
    }

    #[test]
    fn test_pkix_round_trip() {
        for key in keys() {
            let public = key.public_key_to_pem().unwrap();
            let signature = sign_pkix(&key, b"payload").unwrap();
            OpensslPkixVerifier
                .verify_pkix(&public, b"payload", &signature)
                .unwrap();
            assert!(matches!(
                OpensslPkixVerifier.verify_pkix(&public, b"other", &signature),
                Err(Error::SignatureMismatch)
            ));
            assert!(matches!(
                OpensslPkixVerifier.verify_pkix(&public, b"payload", b"garbage"),
                Err(Error::SignatureMismatch)
            ));
        }
    }

    #[test]
    fn test_pkix_malformed_key() {
        assert!(matches!(
            OpensslPkixVerifier.verify_pkix(b"not a key", b"payload", b"sig"),
            Err(Error::ArmorDecode(_))
        ));
        let pem = b"-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n";
        assert!(matches!(
            OpensslPkixVerifier.verify_pkix(pem, b"payload", b"sig"),
            Err(Error::MalformedKey(_))
        ));
    }

    #[test]
    fn test_clearsign() {
        let cert = parse_certificate(RSA_PUB.as_bytes()).unwrap();
        let verified = verify_clearsign(RSA_SIGNED.as_bytes(), &[cert]).unwrap();
        assert_eq!(verified.as_bytes(), PAYLOAD.as_bytes());

        let key = SigningKey::generate(KeyAlgorithm::Ed25519, "t").unwrap();
        let cert = parse_certificate(key.to_public_armor().unwrap().as_bytes()).unwrap();
        let armored = sign_clearsign(&key, b"msg").unwrap();
        let verified = verify_clearsign(armored.as_bytes(), &[cert]).unwrap();
        assert_eq!(verified.as_bytes(), b"msg");
    }

    #[test]
    fn test_clearsign_empty_keyring() {
        assert!(matches!(
            verify_clearsign(RSA_SIGNED.as_bytes(), &[]),
            Err(Error::BadSignature(_))
        ));
    }
}
