//! The policy review engine.
//!
//! [`Reviewer::review`] evaluates a batch of images belonging to one workload
//! against the image security policies of its namespace. Each image is
//! checked for verified attestations from the governing authorities and for
//! vulnerability violations; how the two interact depends on the
//! [`ExecutionMode`]:
//!
//! - In [`ExecutionMode::Webhook`] an attested image is trusted and its
//!   vulnerabilities are not reported. Attestations are never issued.
//! - In [`ExecutionMode::Cron`] violations are always reported, and a clean
//!   image is attested by every governing authority that has not attested it
//!   yet.

use std::{collections::HashSet, fmt, str::FromStr};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    admission::Workload,
    authority::{AttestationAuthority, AuthorityFetcher},
    image,
    metadata::{get_or_create_attestation_note, Fetcher},
    policy::{ImageSecurityPolicy, Violation, ViolationKind, VulnerabilityPolicy},
    secrets::SecretFetcher,
    transport::{AttestorValidatingTransport, ValidatedAttestation, ValidatingTransport},
    violation::ViolationStrategy,
    Error, Result,
};

/// When a review runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Synchronous admission check.
    #[default]
    Webhook,
    /// Periodic reconciliation of running workloads.
    Cron,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecutionMode::Webhook => "webhook",
            ExecutionMode::Cron => "cron",
        })
    }
}

impl FromStr for ExecutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "webhook" => Ok(ExecutionMode::Webhook),
            "cron" => Ok(ExecutionMode::Cron),
            other => Err(Error::Config(format!("unknown execution mode {other:?}"))),
        }
    }
}

/// Collaborators and settings of a [`Reviewer`].
pub struct Config<'a> {
    pub mode: ExecutionMode,
    pub secrets: &'a dyn SecretFetcher,
    pub authorities: &'a dyn AuthorityFetcher,
    pub validate: &'a dyn VulnerabilityPolicy,
    /// Images that are never reviewed.
    pub global_allowlist: Vec<String>,
}

/// The outcome of a review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decision {
    denials: Vec<String>,
}

impl Decision {
    /// A decision with no denials.
    pub fn allow() -> Self {
        Self::default()
    }

    /// A decision denying for each of `reasons`.
    pub fn deny<I, S>(reasons: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denials: reasons.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.denials.is_empty()
    }

    /// Every denial reason, in the order found.
    pub fn denials(&self) -> &[String] {
        &self.denials
    }

    /// The denial reasons joined into one message.
    pub fn message(&self) -> String {
        self.denials.join(",")
    }

    /// Adds the denials of `other` to this decision.
    pub fn merge(&mut self, other: Decision) {
        self.denials.extend(other.denials);
    }
}

/// Governing authorities that have no verified attestation, by identity.
pub fn unattested_authorities<'a>(
    authorities: &'a [AttestationAuthority],
    attestations: &[ValidatedAttestation],
) -> Vec<&'a AttestationAuthority> {
    let attested: HashSet<&str> = attestations.iter().map(|a| a.attestor_name()).collect();
    authorities
        .iter()
        .filter(|a| !attested.contains(a.name.as_str()))
        .collect()
}

/// Reviews images against image security policies.
pub struct Reviewer<'a, C> {
    client: &'a C,
    config: Config<'a>,
}

impl<'a, C: Fetcher> Reviewer<'a, C> {
    pub fn new(client: &'a C, config: Config<'a>) -> Self {
        Self { client, config }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    /// Reviews `images` of one workload against every policy in `isps`.
    ///
    /// The workload is denied if any image is denied. Errors from key
    /// configuration, metadata access or attestation issuance abort the
    /// review and are returned.
    pub fn review(
        &self,
        images: &[String],
        isps: &[ImageSecurityPolicy],
        pod: Option<&Workload>,
        strategy: &mut dyn ViolationStrategy,
    ) -> Result<Decision> {
        let images: Vec<&str> = images
            .iter()
            .map(String::as_str)
            .filter(|image| {
                let allowed = image::matches_allowlist(image, &self.config.global_allowlist);
                if allowed {
                    info!("{image} is in the global allowlist");
                }
                !allowed
            })
            .collect();
        if images.is_empty() {
            return Ok(Decision::allow());
        }
        if isps.is_empty() {
            info!("No image security policies found, allowing");
            return Ok(Decision::allow());
        }

        let mut decision = Decision::allow();
        for image in images {
            if !image::is_fully_qualified(image) {
                let violation = Violation::new(
                    ViolationKind::UnqualifiedImage,
                    format!("{image} is not a fully qualified image"),
                );
                strategy.handle_violations(image, pod, std::slice::from_ref(&violation))?;
                decision.merge(Decision::deny([violation.reason]));
                continue;
            }
            for isp in isps {
                decision.merge(self.review_image(image, isp, pod, strategy)?);
            }
        }
        if decision.is_allowed() {
            info!("Allowing review in {} mode", self.config.mode);
        } else {
            info!("Denying review: {}", decision.message());
        }
        Ok(decision)
    }

    /// The authorities whose attestations count for `isp`.
    fn governing_authorities(&self, isp: &ImageSecurityPolicy) -> Result<Vec<AttestationAuthority>> {
        if isp.attestation_authority_names.is_empty() {
            return self.config.authorities.authorities(&isp.namespace);
        }
        isp.attestation_authority_names
            .iter()
            .map(|name| self.config.authorities.authority(&isp.namespace, name))
            .collect()
    }

    fn review_image(
        &self,
        image: &str,
        isp: &ImageSecurityPolicy,
        pod: Option<&Workload>,
        strategy: &mut dyn ViolationStrategy,
    ) -> Result<Decision> {
        debug!("Reviewing {image} against {}/{}", isp.namespace, isp.name);
        let authorities = self.governing_authorities(isp)?;
        let mut attestations = Vec::new();
        for authority in &authorities {
            let transport = AttestorValidatingTransport::new(self.client, authority);
            attestations.extend(transport.get_validated_attestations(image)?);
        }
        let is_attested = !attestations.is_empty();
        strategy.handle_attestation(image, pod, is_attested)?;

        if self.config.mode == ExecutionMode::Webhook && is_attested {
            debug!("{image} is attested, skipping vulnerability checks");
            return Ok(Decision::allow());
        }

        let mut violations = self.config.validate.validate(isp, image, self.client)?;
        let missing = unattested_authorities(&authorities, &attestations);
        match self.config.mode {
            ExecutionMode::Cron if violations.is_empty() => {
                for authority in missing {
                    self.issue_attestation(image, authority)?;
                }
            }
            _ if isp.require_attestation => {
                violations.extend(missing.into_iter().map(|authority| {
                    Violation::new(
                        ViolationKind::MissingAttestation,
                        format!(
                            "{image} is not attested by {}/{}",
                            authority.namespace, authority.name
                        ),
                    )
                }));
            }
            _ => {}
        }

        if violations.is_empty() {
            return Ok(Decision::allow());
        }
        strategy.handle_violations(image, pod, &violations)?;
        Ok(Decision::deny(violations.into_iter().map(|v| v.reason)))
    }

    fn issue_attestation(&self, image: &str, authority: &AttestationAuthority) -> Result<()> {
        let note = get_or_create_attestation_note(self.client, authority)?;
        let secret = self
            .config
            .secrets
            .fetch(&authority.namespace, &authority.private_key_secret_name)?;
        let occurrence = self
            .client
            .create_attestation_occurrence(&note, image, &secret)?;
        info!(
            "Attested {image} for {}/{} as {}",
            authority.namespace, authority.name, occurrence.name
        );
        Ok(())
    }
}
