//! Helpers shared by the integration tests.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use imagegate::{
    authority::{AttestationAuthority, AuthorityKey, StaticAuthorities},
    metadata::{local::LocalStore, Severity, Vulnerability},
    pgp::{KeyAlgorithm, SigningKey},
    policy::{ImageSecurityPolicy, PackageVulnerabilityRequirements, SeverityThreshold},
    secrets::{SigningSecret, StaticSecrets},
};

pub const IMAGE: &str =
    "gcr.io/imagegate/app@sha256:2222222222222222222222222222222222222222222222222222222222222222";
pub const OTHER_IMAGE: &str =
    "gcr.io/imagegate/app@sha256:3333333333333333333333333333333333333333333333333333333333333333";

pub const RSA_PUB: &str = include_str!("../fixtures/rsa.pub.asc");
pub const RSA_SEC: &str = include_str!("../fixtures/rsa.sec.asc");
pub const ED25519_PUB: &str = include_str!("../fixtures/ed25519.pub.asc");
pub const ED25519_SEC: &str = include_str!("../fixtures/ed25519.sec.asc");

pub const NAMESPACE: &str = "default";

pub fn encode(data: &str) -> String {
    STANDARD.encode(data)
}

/// A freshly generated OpenPGP key as a signing secret.
pub fn generated_secret(name: &str, algorithm: KeyAlgorithm) -> SigningSecret {
    let key = SigningKey::generate(algorithm, "Test Signer <test@example.com>").unwrap();
    SigningSecret::new(
        NAMESPACE,
        name,
        key.to_public_armor().unwrap(),
        key.to_secret_armor().unwrap(),
    )
}

/// An authority trusting the secret's public key.
pub fn authority_for(name: &str, secret: &SigningSecret) -> AttestationAuthority {
    AttestationAuthority {
        name: name.to_string(),
        namespace: NAMESPACE.to_string(),
        note_reference: None,
        private_key_secret_name: secret.name.clone(),
        public_keys: vec![AuthorityKey::new(encode(&secret.public_key))],
    }
}

/// Two authorities with their own generated keys.
pub fn two_authorities() -> (StaticAuthorities, StaticSecrets) {
    let a = generated_secret("a-key", KeyAlgorithm::Ed25519);
    let b = generated_secret("b-key", KeyAlgorithm::Ed25519);
    let authorities = StaticAuthorities::new(vec![authority_for("a", &a), authority_for("b", &b)]);
    (authorities, StaticSecrets::new(vec![a, b]))
}

/// A policy in the test namespace governed by every authority.
pub fn policy(maximum_severity: SeverityThreshold) -> ImageSecurityPolicy {
    ImageSecurityPolicy {
        name: "isp".to_string(),
        namespace: NAMESPACE.to_string(),
        attestation_authority_names: vec![],
        image_allowlist: vec![],
        require_attestation: false,
        package_vulnerability_requirements: PackageVulnerabilityRequirements {
            maximum_severity,
            ..Default::default()
        },
    }
}

/// A store where `image` has one critical, fixable vulnerability.
pub fn vulnerable_store(image: &str) -> LocalStore {
    let store = LocalStore::new("test");
    store
        .add_vulnerability(
            image,
            Vulnerability {
                cve: "CVE-2024-0001".to_string(),
                severity: Severity::Critical,
                has_fix_available: true,
            },
        )
        .unwrap();
    store
}
