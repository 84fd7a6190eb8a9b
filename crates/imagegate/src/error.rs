//! Error types for the imagegate library.
//!
//! All fallible operations return a [`Result<T>`], an alias for
//! `Result<T, Error>`. Policy violations are *not* errors: they are reported
//! through [`crate::violation::ViolationStrategy`] and turned into denials.
//!
//! # Error Categories
//!
//! - **Configuration errors**: [`NoValidKey`], [`UnsupportedSignatureType`],
//!   [`UnsupportedKeyLabel`], [`MultipleKeys`], [`KeyTypeMismatch`],
//!   [`UnqualifiedImage`], [`AuthorityNotFound`], [`SecretNotFound`],
//!   [`Config`], [`Toml`]
//! - **Per-item and cryptographic errors**: [`Base64`], [`ArmorDecode`],
//!   [`MalformedKey`], [`SignatureMismatch`], [`BadSignature`],
//!   [`NoSignature`], [`PayloadTooLarge`], [`NoKeyForId`], [`NoMatchingKey`],
//!   [`ContentMismatch`], [`MalformedPayload`]
//! - **Downstream errors**: [`Metadata`], [`Io`], [`Json`], [`Pgp`],
//!   [`Openssl`]
//!
//! [`NoValidKey`]: Error::NoValidKey
//! [`UnsupportedSignatureType`]: Error::UnsupportedSignatureType
//! [`UnsupportedKeyLabel`]: Error::UnsupportedKeyLabel
//! [`MultipleKeys`]: Error::MultipleKeys
//! [`KeyTypeMismatch`]: Error::KeyTypeMismatch
//! [`UnqualifiedImage`]: Error::UnqualifiedImage
//! [`AuthorityNotFound`]: Error::AuthorityNotFound
//! [`SecretNotFound`]: Error::SecretNotFound
//! [`Config`]: Error::Config
//! [`Base64`]: Error::Base64
//! [`ArmorDecode`]: Error::ArmorDecode
//! [`MalformedKey`]: Error::MalformedKey
//! [`SignatureMismatch`]: Error::SignatureMismatch
//! [`BadSignature`]: Error::BadSignature
//! [`NoSignature`]: Error::NoSignature
//! [`PayloadTooLarge`]: Error::PayloadTooLarge
//! [`NoKeyForId`]: Error::NoKeyForId
//! [`NoMatchingKey`]: Error::NoMatchingKey
//! [`ContentMismatch`]: Error::ContentMismatch
//! [`MalformedPayload`]: Error::MalformedPayload
//! [`Metadata`]: Error::Metadata
//! [`Io`]: Error::Io
//! [`Json`]: Error::Json
//! [`Toml`]: Error::Toml
//! [`Pgp`]: Error::Pgp
//! [`Openssl`]: Error::Openssl

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for attestation verification and policy review.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An attestation authority has no public key that could be parsed.
    #[error("no valid keys configured for attestation authority {0:?}")]
    NoValidKey(String),

    /// A raw attestation carries a signature type this library cannot verify.
    #[error("unsupported signature type {0:?}")]
    UnsupportedSignatureType(String),

    /// A PEM block has a label that does not name a supported key encoding.
    #[error("unsupported key label {0:?}")]
    UnsupportedKeyLabel(String),

    /// More than one key (or trailing data) where exactly one key was expected.
    #[error("multiple keys in single-key field")]
    MultipleKeys,

    /// Key material of one kind was supplied where another was required.
    #[error("expected {expected}, found {found}")]
    KeyTypeMismatch {
        /// What the caller asked for.
        expected: &'static str,
        /// What the input actually contained.
        found: String,
    },

    /// An image reference is not pinned to a `sha256` digest.
    #[error("image {0:?} is not fully qualified with a sha256 digest")]
    UnqualifiedImage(String),

    /// The named attestation authority does not exist.
    #[error("attestation authority {namespace}/{name} not found")]
    AuthorityNotFound {
        /// Namespace that was searched.
        namespace: String,
        /// Authority name.
        name: String,
    },

    /// The named signing secret does not exist.
    #[error("signing secret {namespace}/{name} not found")]
    SecretNotFound {
        /// Namespace that was searched.
        namespace: String,
        /// Secret name.
        name: String,
    },

    /// Invalid configuration that does not fit a more specific variant.
    #[error("configuration error: {0}")]
    Config(String),

    /// Standard base64 decoding failed.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// ASCII armor or PEM framing could not be decoded.
    #[error("armor decode error: {0}")]
    ArmorDecode(String),

    /// Key material is present but unusable.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// The signature is well formed but does not verify.
    #[error("signature did not verify")]
    SignatureMismatch,

    /// A signed message could not be verified against the keyring.
    #[error("bad signature: {0}")]
    BadSignature(String),

    /// A signed message carries no signature packet.
    #[error("signed message has no signature")]
    NoSignature,

    /// A signed message holds more data than will be read from it.
    #[error("signed payload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// No configured key carries the identifier an attestation claims.
    #[error("no public key found with id {0:?}")]
    NoKeyForId(String),

    /// Every key sharing the claimed identifier failed to verify.
    #[error("no key with id {0:?} verified the attestation")]
    NoMatchingKey(String),

    /// The authenticated payload names a different image than expected.
    #[error("{field} mismatch: expected {expected:?}, attestation has {actual:?}")]
    ContentMismatch {
        /// Which payload field differed.
        field: &'static str,
        /// The value derived from the image under review.
        expected: String,
        /// The value found in the signed payload.
        actual: String,
    },

    /// A verified payload could not be interpreted as an attestation.
    #[error("malformed attestation payload: {0}")]
    MalformedPayload(String),

    /// A metadata backend failed.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// OpenPGP packet data could not be processed.
    #[error("OpenPGP error: {0}")]
    Pgp(String),

    /// OpenSSL error.
    #[error("OpenSSL error: {0}")]
    Openssl(#[from] openssl::error::ErrorStack),
}

impl Error {
    /// Returns true for errors caused by configuration rather than by a single
    /// attestation or by a downstream service.
    ///
    /// These abort a review instead of being skipped.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::NoValidKey(_)
                | Error::UnsupportedSignatureType(_)
                | Error::UnsupportedKeyLabel(_)
                | Error::MultipleKeys
                | Error::KeyTypeMismatch { .. }
                | Error::UnqualifiedImage(_)
                | Error::AuthorityNotFound { .. }
                | Error::SecretNotFound { .. }
                | Error::Config(_)
                | Error::Toml(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::NoValidKey("a".into()).is_configuration());
        assert!(Error::UnsupportedSignatureType("x509".into()).is_configuration());
        assert!(Error::MultipleKeys.is_configuration());
        assert!(!Error::SignatureMismatch.is_configuration());
        assert!(!Error::NoKeyForId("k".into()).is_configuration());
        assert!(!Error::Metadata("down".into()).is_configuration());
        assert!(!Error::PayloadTooLarge(1).is_configuration());
        let toml = toml::from_str::<toml::Table>("= 1").unwrap_err();
        assert!(Error::Toml(toml).is_configuration());
    }

    #[test]
    fn test_content_mismatch_message() {
        let e = Error::ContentMismatch {
            field: "image digest",
            expected: "sha256:aa".into(),
            actual: "sha256:bb".into(),
        };
        assert_eq!(
            e.to_string(),
            "image digest mismatch: expected \"sha256:aa\", attestation has \"sha256:bb\""
        );
    }
}
