//! Attests freshly built images whose provenance satisfies a build policy.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    authority::AuthorityFetcher,
    image,
    metadata::{get_or_create_attestation_note, Fetcher, Occurrence},
    policy::{BuildPolicy, BuildPolicyValidator},
    secrets::SecretFetcher,
    Result,
};

/// What produced an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProvenance {
    pub build_id: String,
    /// Image reference as reported by the build system.
    pub image_ref: String,
    /// The source the image was built from.
    pub built_from: String,
}

/// Signs build provenance on behalf of the authorities named by build
/// policies.
pub struct Signer<'a, C> {
    client: &'a C,
    secrets: &'a dyn SecretFetcher,
    authorities: &'a dyn AuthorityFetcher,
    validate: &'a dyn BuildPolicyValidator,
}

impl<'a, C: Fetcher> Signer<'a, C> {
    pub fn new(
        client: &'a C,
        secrets: &'a dyn SecretFetcher,
        authorities: &'a dyn AuthorityFetcher,
        validate: &'a dyn BuildPolicyValidator,
    ) -> Self {
        Self {
            client,
            secrets,
            authorities,
            validate,
        }
    }

    /// Attests the provenance's image for every policy it satisfies.
    ///
    /// A policy the provenance does not satisfy is logged and skipped. The
    /// first failure to resolve an authority or secret, or to issue an
    /// attestation, is returned.
    pub fn validate_and_sign(
        &self,
        provenance: &BuildProvenance,
        policies: &[BuildPolicy],
    ) -> Result<Vec<Occurrence>> {
        let image = image::normalize_build_reference(&provenance.image_ref);
        let mut occurrences = Vec::new();
        for policy in policies {
            if let Err(e) = self.validate.validate(policy, &provenance.built_from) {
                warn!(
                    "Build {} does not satisfy build policy {}/{}: {e}",
                    provenance.build_id, policy.namespace, policy.name
                );
                continue;
            }
            info!(
                "Build {} satisfies build policy {}/{}",
                provenance.build_id, policy.namespace, policy.name
            );
            let authority = self
                .authorities
                .authority(&policy.namespace, &policy.attestation_authority_name)?;
            let note = get_or_create_attestation_note(self.client, &authority)?;
            let secret = self
                .secrets
                .fetch(&authority.namespace, &authority.private_key_secret_name)?;
            let occurrence = self
                .client
                .create_attestation_occurrence(&note, &image, &secret)?;
            info!("Attested {image} for {} as {}", authority.name, occurrence.name);
            occurrences.push(occurrence);
        }
        Ok(occurrences)
    }
}
