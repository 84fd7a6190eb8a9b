//! Policy objects and the default policy validators.
//!
//! An [`ImageSecurityPolicy`] governs admission of images in a namespace: it
//! names the attestation authorities whose approval counts and the
//! vulnerability thresholds images must meet. A [`BuildPolicy`] binds a build
//! source to an authority that attests images built from it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    image,
    metadata::{ReadOnlyClient, Severity, Vulnerability},
    Error, Result,
};

/// The most severe vulnerability a policy tolerates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeverityThreshold {
    /// Any vulnerability is tolerated.
    #[default]
    AllowAll,
    /// No vulnerability is tolerated.
    BlockAll,
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityThreshold {
    /// Returns true if a vulnerability of `severity` is within the threshold.
    pub fn allows(self, severity: Severity) -> bool {
        match self {
            SeverityThreshold::AllowAll => true,
            SeverityThreshold::BlockAll => false,
            SeverityThreshold::Low => severity <= Severity::Low,
            SeverityThreshold::Medium => severity <= Severity::Medium,
            SeverityThreshold::High => severity <= Severity::High,
            SeverityThreshold::Critical => severity <= Severity::Critical,
        }
    }
}

/// Vulnerability requirements of an image security policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageVulnerabilityRequirements {
    /// Threshold for vulnerabilities that have a fix available.
    pub maximum_severity: SeverityThreshold,
    /// Threshold for vulnerabilities without a fix.
    pub maximum_fix_unavailable_severity: SeverityThreshold,
    /// CVEs that are never violations.
    pub allowlist_cves: Vec<String>,
}

/// Admission policy for images in a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSecurityPolicy {
    pub name: String,
    pub namespace: String,
    /// Authorities whose attestations count. Empty means every authority in
    /// the namespace.
    #[serde(default)]
    pub attestation_authority_names: Vec<String>,
    /// Images exempt from vulnerability checks.
    #[serde(default)]
    pub image_allowlist: Vec<String>,
    /// Deny images lacking an attestation from a governing authority.
    #[serde(default)]
    pub require_attestation: bool,
    #[serde(default)]
    pub package_vulnerability_requirements: PackageVulnerabilityRequirements,
}

/// Binds a build source to the authority that attests its images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPolicy {
    pub name: String,
    pub namespace: String,
    pub attestation_authority_name: String,
    /// The source images must be built from.
    pub built_from: String,
}

/// Why an image violates a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// A vulnerability exceeds the maximum severity.
    Severity,
    /// An unfixable vulnerability exceeds its maximum severity.
    FixUnavailable,
    /// A required attestation is missing.
    MissingAttestation,
    /// The image is not pinned to a digest.
    UnqualifiedImage,
}

/// One policy violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub vulnerability: Option<Vulnerability>,
    pub reason: String,
}

impl Violation {
    /// A violation not tied to a vulnerability.
    pub fn new(kind: ViolationKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            vulnerability: None,
            reason: reason.into(),
        }
    }

    fn for_vulnerability(kind: ViolationKind, image: &str, vulnerability: &Vulnerability) -> Self {
        let reason = match kind {
            ViolationKind::FixUnavailable => format!(
                "found unfixable {} vulnerability {} in {image}",
                vulnerability.severity, vulnerability.cve
            ),
            _ => format!(
                "found {} vulnerability {} in {image}",
                vulnerability.severity, vulnerability.cve
            ),
        };
        Self {
            kind,
            vulnerability: Some(vulnerability.clone()),
            reason,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)
    }
}

/// Evaluates an image against the vulnerability part of a policy.
pub trait VulnerabilityPolicy {
    fn validate(
        &self,
        isp: &ImageSecurityPolicy,
        image: &str,
        client: &dyn ReadOnlyClient,
    ) -> Result<Vec<Violation>>;
}

impl<F> VulnerabilityPolicy for F
where
    F: Fn(&ImageSecurityPolicy, &str, &dyn ReadOnlyClient) -> Result<Vec<Violation>>,
{
    fn validate(
        &self,
        isp: &ImageSecurityPolicy,
        image: &str,
        client: &dyn ReadOnlyClient,
    ) -> Result<Vec<Violation>> {
        self(isp, image, client)
    }
}

/// The default [`VulnerabilityPolicy`]: severity thresholds with image and
/// CVE allowlists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeverityPolicy;

impl VulnerabilityPolicy for SeverityPolicy {
    fn validate(
        &self,
        isp: &ImageSecurityPolicy,
        image: &str,
        client: &dyn ReadOnlyClient,
    ) -> Result<Vec<Violation>> {
        if image::matches_allowlist(image, &isp.image_allowlist) {
            return Ok(Vec::new());
        }
        let requirements = &isp.package_vulnerability_requirements;
        let mut violations = Vec::new();
        for vulnerability in client.vulnerabilities(image)? {
            if requirements.allowlist_cves.contains(&vulnerability.cve) {
                continue;
            }
            if !vulnerability.has_fix_available {
                if !requirements
                    .maximum_fix_unavailable_severity
                    .allows(vulnerability.severity)
                {
                    violations.push(Violation::for_vulnerability(
                        ViolationKind::FixUnavailable,
                        image,
                        &vulnerability,
                    ));
                }
                continue;
            }
            if !requirements.maximum_severity.allows(vulnerability.severity) {
                violations.push(Violation::for_vulnerability(
                    ViolationKind::Severity,
                    image,
                    &vulnerability,
                ));
            }
        }
        Ok(violations)
    }
}

/// Checks build provenance against a build policy.
pub trait BuildPolicyValidator {
    /// Returns an error describing the mismatch when `built_from` does not
    /// satisfy the policy.
    fn validate(&self, policy: &BuildPolicy, built_from: &str) -> Result<()>;
}

impl<F> BuildPolicyValidator for F
where
    F: Fn(&BuildPolicy, &str) -> Result<()>,
{
    fn validate(&self, policy: &BuildPolicy, built_from: &str) -> Result<()> {
        self(policy, built_from)
    }
}

/// The default [`BuildPolicyValidator`]: the source must match exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltFromPolicy;

impl BuildPolicyValidator for BuiltFromPolicy {
    fn validate(&self, policy: &BuildPolicy, built_from: &str) -> Result<()> {
        if policy.built_from == built_from {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "source {built_from:?} does not match required source {:?}",
                policy.built_from
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{FakeClient, QUALIFIED_IMAGE};

    fn vuln(cve: &str, severity: Severity, has_fix_available: bool) -> Vulnerability {
        Vulnerability {
            cve: cve.into(),
            severity,
            has_fix_available,
        }
    }

    fn isp(requirements: PackageVulnerabilityRequirements) -> ImageSecurityPolicy {
        ImageSecurityPolicy {
            name: "isp".into(),
            namespace: "default".into(),
            attestation_authority_names: vec![],
            image_allowlist: vec![],
            require_attestation: false,
            package_vulnerability_requirements: requirements,
        }
    }

    #[test]
    fn test_thresholds() {
        assert!(SeverityThreshold::AllowAll.allows(Severity::Critical));
        assert!(!SeverityThreshold::BlockAll.allows(Severity::Minimal));
        assert!(SeverityThreshold::Medium.allows(Severity::Medium));
        assert!(!SeverityThreshold::Medium.allows(Severity::High));
        assert!(SeverityThreshold::Low.allows(Severity::SeverityUnspecified));
    }

    #[test]
    fn test_severity_policy() {
        let client = FakeClient {
            vulnerabilities: vec![
                vuln("CVE-low", Severity::Low, true),
                vuln("CVE-high", Severity::High, true),
                vuln("CVE-allowed", Severity::Critical, true),
                vuln("CVE-nofix", Severity::Medium, false),
            ],
            ..Default::default()
        };
        let policy = isp(PackageVulnerabilityRequirements {
            maximum_severity: SeverityThreshold::Medium,
            maximum_fix_unavailable_severity: SeverityThreshold::Low,
            allowlist_cves: vec!["CVE-allowed".into()],
        });
        let violations = SeverityPolicy
            .validate(&policy, QUALIFIED_IMAGE, &client)
            .unwrap();
        let kinds: Vec<_> = violations.iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            [ViolationKind::Severity, ViolationKind::FixUnavailable]
        );
        assert_eq!(
            violations[0].vulnerability.as_ref().map(|v| v.cve.as_str()),
            Some("CVE-high")
        );
        assert!(violations[1].reason.contains("CVE-nofix"));
    }

    #[test]
    fn test_image_allowlist() {
        let client = FakeClient {
            vulnerabilities: vec![vuln("CVE-1", Severity::Critical, true)],
            ..Default::default()
        };
        let mut policy = isp(PackageVulnerabilityRequirements {
            maximum_severity: SeverityThreshold::BlockAll,
            ..Default::default()
        });
        assert_eq!(
            SeverityPolicy
                .validate(&policy, QUALIFIED_IMAGE, &client)
                .unwrap()
                .len(),
            1
        );
        policy.image_allowlist = vec!["gcr.io/imagegate/test".into()];
        assert!(SeverityPolicy
            .validate(&policy, QUALIFIED_IMAGE, &client)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_built_from() {
        let policy = BuildPolicy {
            name: "bp".into(),
            namespace: "default".into(),
            attestation_authority_name: "a".into(),
            built_from: "main".into(),
        };
        BuiltFromPolicy.validate(&policy, "main").unwrap();
        assert!(BuiltFromPolicy.validate(&policy, "dev").is_err());

        let always = |_: &BuildPolicy, _: &str| -> Result<()> { Ok(()) };
        always.validate(&policy, "anything").unwrap();
    }

    #[test]
    fn test_deserialize_isp() {
        let policy: ImageSecurityPolicy = toml::from_str(
            r#"
            name = "isp"
            namespace = "default"

            [package_vulnerability_requirements]
            maximum_severity = "HIGH"
            allowlist_cves = ["CVE-1"]
            "#,
        )
        .unwrap();
        assert_eq!(
            policy.package_vulnerability_requirements.maximum_severity,
            SeverityThreshold::High
        );
        assert_eq!(
            policy
                .package_vulnerability_requirements
                .maximum_fix_unavailable_severity,
            SeverityThreshold::AllowAll
        );
        assert!(!policy.require_attestation);
    }
}
