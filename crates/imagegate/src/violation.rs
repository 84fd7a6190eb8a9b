//! Sinks that record review outcomes.

use std::collections::HashMap;

use log::{info, warn};

use crate::{admission::Workload, policy::Violation, Result};

/// Receives the outcome of reviewing each image.
///
/// A sink is borrowed mutably for one review call; concurrent reviews need
/// their own sinks.
pub trait ViolationStrategy {
    /// Records the violations reported for `image`. Not called when there are
    /// none.
    fn handle_violations(
        &mut self,
        image: &str,
        pod: Option<&Workload>,
        violations: &[Violation],
    ) -> Result<()>;

    /// Records whether `image` carries a verified attestation.
    fn handle_attestation(
        &mut self,
        image: &str,
        pod: Option<&Workload>,
        is_attested: bool,
    ) -> Result<()>;
}

fn pod_name(pod: Option<&Workload>) -> String {
    pod.map_or_else(String::new, |p| format!(" in {}/{}", p.namespace, p.name))
}

/// Emits every outcome through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStrategy;

impl ViolationStrategy for LoggingStrategy {
    fn handle_violations(
        &mut self,
        image: &str,
        pod: Option<&Workload>,
        violations: &[Violation],
    ) -> Result<()> {
        let pod = pod_name(pod);
        for violation in violations {
            warn!("Violation for {image}{pod}: {violation}");
        }
        Ok(())
    }

    fn handle_attestation(
        &mut self,
        image: &str,
        pod: Option<&Workload>,
        is_attested: bool,
    ) -> Result<()> {
        let pod = pod_name(pod);
        if is_attested {
            info!("Image {image}{pod} is attested");
        } else {
            info!("Image {image}{pod} is not attested");
        }
        Ok(())
    }
}

/// Keeps outcomes in memory, keyed by image.
#[derive(Debug, Default, Clone)]
pub struct MemoryStrategy {
    pub violations: HashMap<String, Vec<Violation>>,
    pub attestations: HashMap<String, bool>,
}

impl MemoryStrategy {
    /// Total number of recorded violations across all images.
    pub fn violation_count(&self) -> usize {
        self.violations.values().map(Vec::len).sum()
    }
}

impl ViolationStrategy for MemoryStrategy {
    fn handle_violations(
        &mut self,
        image: &str,
        _pod: Option<&Workload>,
        violations: &[Violation],
    ) -> Result<()> {
        self.violations
            .entry(image.to_string())
            .or_default()
            .extend_from_slice(violations);
        Ok(())
    }

    fn handle_attestation(
        &mut self,
        image: &str,
        _pod: Option<&Workload>,
        is_attested: bool,
    ) -> Result<()> {
        self.attestations.insert(image.to_string(), is_attested);
        Ok(())
    }
}
