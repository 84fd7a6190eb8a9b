//! Signing secrets: the key pairs attestation authorities sign with.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    keys::{self, PrivateKey},
    Error, Result,
};

/// A named key pair held by the secret store.
#[derive(Clone)]
pub struct SigningSecret {
    /// Secret name.
    pub name: String,
    /// Namespace the secret lives in.
    pub namespace: String,
    /// Encoded public key (armored OpenPGP or PEM).
    pub public_key: String,
    /// Encoded private key (armored OpenPGP or PEM).
    pub private_key: String,
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecret")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl SigningSecret {
    /// Creates a secret from already-decoded key material.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        public_key: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            public_key: public_key.into(),
            private_key: private_key.into(),
        }
    }

    /// Creates a secret from standard-base64 encoded key material, as secret
    /// stores usually hold it.
    pub fn from_base64(
        namespace: impl Into<String>,
        name: impl Into<String>,
        public_key: &str,
        private_key: &str,
    ) -> Result<Self> {
        let decode = |data: &str| -> Result<String> {
            String::from_utf8(STANDARD.decode(data.trim())?)
                .map_err(|_| Error::MalformedKey("key material is not valid UTF-8".into()))
        };
        Ok(Self::new(
            namespace,
            name,
            decode(public_key)?,
            decode(private_key)?,
        ))
    }

    /// Parses the private key.
    pub fn private_key(&self) -> Result<PrivateKey> {
        keys::parse_private_key(self.private_key.as_bytes())
    }

    /// The identifier of the signing key.
    pub fn fingerprint(&self) -> Result<String> {
        self.private_key()?.fingerprint()
    }
}

/// Looks up signing secrets by namespace and name.
pub trait SecretFetcher {
    /// Returns the secret, or [`Error::SecretNotFound`].
    fn fetch(&self, namespace: &str, name: &str) -> Result<SigningSecret>;
}

impl<F> SecretFetcher for F
where
    F: Fn(&str, &str) -> Result<SigningSecret>,
{
    fn fetch(&self, namespace: &str, name: &str) -> Result<SigningSecret> {
        self(namespace, name)
    }
}

/// A fixed set of secrets.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    secrets: Vec<SigningSecret>,
}

impl StaticSecrets {
    /// Creates a store over `secrets`.
    pub fn new(secrets: Vec<SigningSecret>) -> Self {
        Self { secrets }
    }

    /// Adds a secret, replacing one with the same namespace and name.
    pub fn insert(&mut self, secret: SigningSecret) {
        self.secrets
            .retain(|s| !(s.namespace == secret.namespace && s.name == secret.name));
        self.secrets.push(secret);
    }
}

impl SecretFetcher for StaticSecrets {
    fn fetch(&self, namespace: &str, name: &str) -> Result<SigningSecret> {
        self.secrets
            .iter()
            .find(|s| s.namespace == namespace && s.name == name)
            .cloned()
            .ok_or_else(|| Error::SecretNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}
