//! Gate configuration.
//!
//! A single TOML file describes everything a standalone gate needs: the
//! execution mode, the attestation authorities, the policies and where to find
//! signing keys and metadata state.
//!
//! ```toml
//! mode = "webhook"
//! project = "my-project"
//! global_allowlist = ["gcr.io/distroless/*"]
//! metadata_path = "metadata.json"
//!
//! [[authorities]]
//! name = "qa"
//! namespace = "default"
//! private_key_secret_name = "qa-key"
//!
//! [[authorities.public_keys]]
//! encoded_key = "LS0tLS1CRUdJTi..."
//!
//! [[image_security_policies]]
//! name = "isp"
//! namespace = "default"
//! attestation_authority_names = ["qa"]
//!
//! [image_security_policies.package_vulnerability_requirements]
//! maximum_severity = "MEDIUM"
//!
//! [[secrets]]
//! name = "qa-key"
//! namespace = "default"
//! public_key_path = "keys/qa.pub.asc"
//! private_key_path = "keys/qa.sec.asc"
//! ```
//!
//! Relative paths are resolved against the directory of the configuration
//! file.

use std::path::{Path, PathBuf};

use log::debug;
use serde::Deserialize;

use crate::{
    authority::{AttestationAuthority, StaticAuthorities},
    policy::{BuildPolicy, ImageSecurityPolicy},
    review::ExecutionMode,
    secrets::{SigningSecret, StaticSecrets},
    Error, Result,
};

/// Project used for derived note names when none is configured.
pub const DEFAULT_PROJECT: &str = "imagegate";

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

/// Where a signing secret's key files live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SecretConfig {
    pub name: String,
    pub namespace: String,
    /// Armored OpenPGP or PEM public key.
    pub public_key_path: PathBuf,
    /// Armored OpenPGP or PEM private key.
    pub private_key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Project that derived note names live under.
    #[serde(default = "default_project")]
    pub project: String,

    /// Images that are never reviewed.
    #[serde(default)]
    pub global_allowlist: Vec<String>,

    /// JSON state file of the local metadata store. In-memory when absent.
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,

    #[serde(default)]
    pub authorities: Vec<AttestationAuthority>,

    #[serde(default)]
    pub image_security_policies: Vec<ImageSecurityPolicy>,

    #[serde(default)]
    pub build_policies: Vec<BuildPolicy>,

    #[serde(default)]
    pub secrets: Vec<SecretConfig>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            project: default_project(),
            global_allowlist: Vec::new(),
            metadata_path: None,
            authorities: Vec::new(),
            image_security_policies: Vec::new(),
            build_policies: Vec::new(),
            secrets: Vec::new(),
        }
    }
}

impl GateConfig {
    /// Parse configuration from TOML content. Paths are left as written.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Loads configuration from a file, resolving relative paths against its
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {path:?}");
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(p) = self.metadata_path.as_mut() {
            resolve(p);
        }
        for secret in &mut self.secrets {
            resolve(&mut secret.public_key_path);
            resolve(&mut secret.private_key_path);
        }
    }

    fn check(&self) -> Result<()> {
        for (i, a) in self.authorities.iter().enumerate() {
            if self.authorities[..i]
                .iter()
                .any(|b| b.namespace == a.namespace && b.name == a.name)
            {
                return Err(Error::Config(format!(
                    "duplicate authority {}/{}",
                    a.namespace, a.name
                )));
            }
        }
        for isp in &self.image_security_policies {
            for name in &isp.attestation_authority_names {
                if !self
                    .authorities
                    .iter()
                    .any(|a| a.namespace == isp.namespace && &a.name == name)
                {
                    return Err(Error::Config(format!(
                        "image security policy {}/{} names unknown authority {name:?}",
                        isp.namespace, isp.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// The configured authorities.
    pub fn authority_fetcher(&self) -> StaticAuthorities {
        StaticAuthorities::new(self.authorities.clone())
    }

    /// Image security policies of a namespace.
    pub fn image_security_policies_in(&self, namespace: &str) -> Vec<ImageSecurityPolicy> {
        self.image_security_policies
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect()
    }

    /// Build policies of a namespace.
    pub fn build_policies_in(&self, namespace: &str) -> Vec<BuildPolicy> {
        self.build_policies
            .iter()
            .filter(|p| p.namespace == namespace)
            .cloned()
            .collect()
    }

    /// Reads the key files of every configured secret.
    pub fn load_secrets(&self) -> Result<StaticSecrets> {
        let mut secrets = StaticSecrets::default();
        for secret in &self.secrets {
            debug!("Loading secret {}/{}", secret.namespace, secret.name);
            secrets.insert(SigningSecret::new(
                &secret.namespace,
                &secret.name,
                std::fs::read_to_string(&secret.public_key_path)?,
                std::fs::read_to_string(&secret.private_key_path)?,
            ));
        }
        Ok(secrets)
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::{
        authority::AuthorityFetcher,
        policy::SeverityThreshold,
        secrets::SecretFetcher,
        test::{RSA_FINGERPRINT, RSA_PUB, RSA_SEC},
    };

    const CONFIG: &str = r#"
mode = "cron"
global_allowlist = ["gcr.io/distroless/*"]
metadata_path = "state/metadata.json"

[[authorities]]
name = "qa"
namespace = "default"
private_key_secret_name = "qa-key"

[[authorities.public_keys]]
key_id = "release"
encoded_key = "a2V5"

[[image_security_policies]]
name = "isp"
namespace = "default"
attestation_authority_names = ["qa"]
require_attestation = true

[image_security_policies.package_vulnerability_requirements]
maximum_severity = "MEDIUM"

[[build_policies]]
name = "bp"
namespace = "default"
attestation_authority_name = "qa"
built_from = "main"

[[secrets]]
name = "qa-key"
namespace = "default"
public_key_path = "qa.pub.asc"
private_key_path = "/abs/qa.sec.asc"
"#;

    #[test]
    fn test_parse_config() {
        let config = GateConfig::from_toml(CONFIG).unwrap();
        assert_eq!(config.mode, ExecutionMode::Cron);
        assert_eq!(config.project, DEFAULT_PROJECT);
        assert_eq!(config.authorities[0].public_keys[0].key_id.as_deref(), Some("release"));
        let isps = config.image_security_policies_in("default");
        assert_eq!(isps.len(), 1);
        assert!(isps[0].require_attestation);
        assert_eq!(
            isps[0].package_vulnerability_requirements.maximum_severity,
            SeverityThreshold::Medium
        );
        assert!(config.image_security_policies_in("other").is_empty());
        assert_eq!(config.build_policies_in("default")[0].built_from, "main");
        assert_eq!(
            config.authority_fetcher().authority("default", "qa").unwrap().name,
            "qa"
        );
    }

    #[test]
    fn test_defaults() {
        let config = GateConfig::from_toml("").unwrap();
        assert_eq!(config.mode, ExecutionMode::Webhook);
        assert!(config.metadata_path.is_none());
        assert!(config.authorities.is_empty());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            GateConfig::from_toml("mode = \"sometimes\""),
            Err(Error::Toml(_))
        ));

        let unknown = r#"
[[image_security_policies]]
name = "isp"
namespace = "default"
attestation_authority_names = ["missing"]
"#;
        assert!(matches!(GateConfig::from_toml(unknown), Err(Error::Config(_))));

        let duplicate = r#"
[[authorities]]
name = "a"
namespace = "default"
private_key_secret_name = "s"

[[authorities]]
name = "a"
namespace = "default"
private_key_secret_name = "t"
"#;
        assert!(matches!(GateConfig::from_toml(duplicate), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let config = GateConfig::load(&path).unwrap();
        assert_eq!(
            config.metadata_path.as_deref(),
            Some(dir.path().join("state/metadata.json").as_path())
        );
        assert_eq!(config.secrets[0].public_key_path, dir.path().join("qa.pub.asc"));
        assert_eq!(config.secrets[0].private_key_path, PathBuf::from("/abs/qa.sec.asc"));
    }

    #[test]
    fn test_load_secrets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("qa.pub.asc"), RSA_PUB).unwrap();
        std::fs::write(dir.path().join("qa.sec.asc"), RSA_SEC).unwrap();
        let path = dir.path().join("gate.toml");
        std::fs::write(
            &path,
            r#"
[[secrets]]
name = "qa-key"
namespace = "default"
public_key_path = "qa.pub.asc"
private_key_path = "qa.sec.asc"
"#,
        )
        .unwrap();
        let secrets = GateConfig::load(&path).unwrap().load_secrets().unwrap();
        let secret = secrets.fetch("default", "qa-key").unwrap();
        assert_eq!(secret.fingerprint().unwrap(), RSA_FINGERPRINT);

        let mut config = GateConfig::load(&path).unwrap();
        config.secrets[0].private_key_path = dir.path().join("missing");
        assert!(matches!(config.load_secrets(), Err(Error::Io(_))));
    }
}
