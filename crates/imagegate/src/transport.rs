//! Fetches an authority's attestations for an image and returns only the ones
//! that verify.

use std::collections::HashMap;

use log::{error, warn};

use crate::{
    authority::AttestationAuthority,
    keys,
    metadata::ReadOnlyClient,
    verifier::{Attestation, Verifier},
    Error, Result,
};

/// An attestation that passed full verification for an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAttestation {
    attestor_name: String,
    image: String,
}

impl ValidatedAttestation {
    pub(crate) fn new(attestor_name: &str, image: &str) -> Self {
        Self {
            attestor_name: attestor_name.to_string(),
            image: image.to_string(),
        }
    }

    /// The authority that made the attestation.
    pub fn attestor_name(&self) -> &str {
        &self.attestor_name
    }

    /// The attested image.
    pub fn image(&self) -> &str {
        &self.image
    }
}

/// A source of verified attestations.
pub trait ValidatingTransport {
    /// Returns every attestation for `image` that verifies.
    fn get_validated_attestations(&self, image: &str) -> Result<Vec<ValidatedAttestation>>;
}

/// [`ValidatingTransport`] for a single attestation authority.
pub struct AttestorValidatingTransport<'a> {
    client: &'a dyn ReadOnlyClient,
    attestor: &'a AttestationAuthority,
}

impl<'a> AttestorValidatingTransport<'a> {
    /// Creates a transport reading `attestor`'s attestations from `client`.
    pub fn new(client: &'a dyn ReadOnlyClient, attestor: &'a AttestationAuthority) -> Self {
        Self { client, attestor }
    }

    /// Parses the authority's keys, keyed by fingerprint. Unparseable keys are
    /// skipped; a later key with the same fingerprint replaces an earlier one.
    fn public_keys(&self) -> Vec<keys::PublicKey> {
        let name = &self.attestor.name;
        let total = self.attestor.public_keys.len();
        let mut by_fingerprint = HashMap::new();
        for (i, entry) in self.attestor.public_keys.iter().enumerate() {
            match keys::key_and_fingerprint(&entry.encoded_key) {
                Ok((mut key, fingerprint)) => {
                    if let Some(id) = &entry.key_id {
                        key.id = id.clone();
                    }
                    if by_fingerprint.insert(fingerprint.clone(), key).is_some() {
                        warn!("Overwriting key with same fingerprint {fingerprint} for {name:?}");
                    }
                }
                Err(e) => warn!("Error parsing key {i} ({total} keys total) for {name:?}: {e}"),
            }
        }
        by_fingerprint.into_values().collect()
    }
}

impl ValidatingTransport for AttestorValidatingTransport<'_> {
    fn get_validated_attestations(&self, image: &str) -> Result<Vec<ValidatedAttestation>> {
        let keys = self.public_keys();
        if keys.is_empty() {
            return Err(Error::NoValidKey(self.attestor.name.clone()));
        }
        let verifier = Verifier::new(image, keys)?;

        let raw_attestations = self
            .client
            .attestations(image, self.attestor)
            .inspect_err(|e| error!("Fetching attestations for {image:?}: {e}"))?;

        let mut validated = Vec::new();
        for raw in &raw_attestations {
            let attestation = match Attestation::try_from(raw) {
                Ok(attestation) => attestation,
                Err(e @ Error::UnsupportedSignatureType(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        "Cannot decode attestation signed by {:?}: {e}",
                        raw.public_key_id
                    );
                    continue;
                }
            };
            if let Err(e) = verifier.verify_attestation(&attestation) {
                warn!(
                    "Could not find or verify attestation for attestor {}: {e}",
                    raw.public_key_id
                );
                continue;
            }
            validated.push(ValidatedAttestation::new(&self.attestor.name, image));
        }
        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        authority::AuthorityKey,
        metadata::{create_attestation_signature, RawAttestation, SignatureType},
        test::{
            authority, encode, pkix_public_pem, pkix_secret, FakeClient, ED25519_FINGERPRINT,
            ED25519_PUB, ED25519_SIGNED, QUALIFIED_IMAGE, RSA_FINGERPRINT, RSA_PUB, RSA_SIGNED,
            RSA_SIGNED_OTHER,
        },
    };

    fn pgp(signed: &str, id: &str) -> RawAttestation {
        RawAttestation::pgp(encode(signed), id)
    }

    fn validated(
        attestor: &AttestationAuthority,
        client: &FakeClient,
    ) -> Result<Vec<ValidatedAttestation>> {
        AttestorValidatingTransport::new(client, attestor).get_validated_attestations(QUALIFIED_IMAGE)
    }

    #[test]
    fn test_good_pgp_attestation() {
        let attestor = authority("a", &[AuthorityKey::new(encode(RSA_PUB))]);
        let client = FakeClient::with_attestations("a", vec![pgp(RSA_SIGNED, RSA_FINGERPRINT)]);
        let result = validated(&attestor, &client).unwrap();
        assert_eq!(result, vec![ValidatedAttestation::new("a", QUALIFIED_IMAGE)]);
        assert_eq!(result[0].attestor_name(), "a");
        assert_eq!(result[0].image(), QUALIFIED_IMAGE);
    }

    #[test]
    fn test_good_generic_attestation() {
        let attestor = authority("a", &[AuthorityKey::new(encode(pkix_public_pem()))]);
        let raw = create_attestation_signature(QUALIFIED_IMAGE, &pkix_secret()).unwrap();
        let client = FakeClient::with_attestations("a", vec![raw]);
        assert_eq!(validated(&attestor, &client).unwrap().len(), 1);
    }

    #[test]
    fn test_soft_failures_are_skipped() {
        let attestor = authority(
            "a",
            &[
                AuthorityKey::new(encode(RSA_PUB)),
                AuthorityKey::new(encode(ED25519_PUB)),
            ],
        );
        let mut generic_without_payload = RawAttestation::generic("c2ln", "id", "");
        generic_without_payload.serialized_payload = None;
        let client = FakeClient::with_attestations(
            "a",
            vec![
                pgp(RSA_SIGNED, RSA_FINGERPRINT),
                RawAttestation::pgp("not base64!", RSA_FINGERPRINT),
                pgp(RSA_SIGNED, "unknown-id"),
                pgp(RSA_SIGNED_OTHER, RSA_FINGERPRINT),
                generic_without_payload,
                pgp(ED25519_SIGNED, ED25519_FINGERPRINT),
            ],
        );
        assert_eq!(validated(&attestor, &client).unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_signature_type_aborts() {
        let attestor = authority("a", &[AuthorityKey::new(encode(RSA_PUB))]);
        let mut unknown = pgp(RSA_SIGNED, RSA_FINGERPRINT);
        unknown.signature_type = SignatureType::Unknown("x509".into());
        let client = FakeClient::with_attestations(
            "a",
            vec![pgp(RSA_SIGNED, RSA_FINGERPRINT), unknown],
        );
        assert!(matches!(
            validated(&attestor, &client),
            Err(Error::UnsupportedSignatureType(t)) if t == "x509"
        ));
    }

    #[test]
    fn test_no_valid_keys() {
        let client = FakeClient::with_attestations("a", vec![pgp(RSA_SIGNED, RSA_FINGERPRINT)]);
        for keys in [
            vec![],
            vec![AuthorityKey::new("not base64!")],
            vec![AuthorityKey::new(encode("not a key"))],
        ] {
            let attestor = authority("a", &keys);
            assert!(matches!(
                validated(&attestor, &client),
                Err(Error::NoValidKey(name)) if name == "a"
            ));
        }
    }

    #[test]
    fn test_bad_key_is_skipped() {
        let attestor = authority(
            "a",
            &[
                AuthorityKey::new(encode("garbage")),
                AuthorityKey::new(encode(RSA_PUB)),
            ],
        );
        let client = FakeClient::with_attestations("a", vec![pgp(RSA_SIGNED, RSA_FINGERPRINT)]);
        assert_eq!(validated(&attestor, &client).unwrap().len(), 1);
    }

    #[test]
    fn test_explicit_key_ids() {
        // Operator-chosen IDs may collide; both keys stay candidates.
        let attestor = authority(
            "a",
            &[
                AuthorityKey::with_id("release", encode(ED25519_PUB)),
                AuthorityKey::with_id("release", encode(RSA_PUB)),
            ],
        );
        let client = FakeClient::with_attestations(
            "a",
            vec![pgp(RSA_SIGNED, "release"), pgp(ED25519_SIGNED, "release")],
        );
        assert_eq!(validated(&attestor, &client).unwrap().len(), 2);

        // The fingerprint no longer names the key.
        let client = FakeClient::with_attestations("a", vec![pgp(RSA_SIGNED, RSA_FINGERPRINT)]);
        assert!(validated(&attestor, &client).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_fingerprint_last_wins() {
        let attestor = authority(
            "a",
            &[
                AuthorityKey::with_id("old", encode(RSA_PUB)),
                AuthorityKey::with_id("new", encode(RSA_PUB)),
            ],
        );
        let client = FakeClient::with_attestations(
            "a",
            vec![pgp(RSA_SIGNED, "old"), pgp(RSA_SIGNED, "new")],
        );
        assert_eq!(validated(&attestor, &client).unwrap().len(), 1);
    }

    #[test]
    fn test_client_error_propagates() {
        let attestor = authority("a", &[AuthorityKey::new(encode(RSA_PUB))]);
        let client = FakeClient {
            fail_attestations: true,
            ..Default::default()
        };
        assert!(matches!(
            validated(&attestor, &client),
            Err(Error::Metadata(_))
        ));
    }

    #[test]
    fn test_unqualified_image() {
        let attestor = authority("a", &[AuthorityKey::new(encode(RSA_PUB))]);
        let client = FakeClient::default();
        let transport = AttestorValidatingTransport::new(&client, &attestor);
        assert!(matches!(
            transport.get_validated_attestations("gcr.io/imagegate/test:latest"),
            Err(Error::UnqualifiedImage(_))
        ));
    }
}
