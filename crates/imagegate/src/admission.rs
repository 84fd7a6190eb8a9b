//! Workload-level admission decisions.
//!
//! A [`Workload`] is the unit a decision applies to: a pod or the controller
//! that owns it. [`review_workload`] applies the bypasses before handing the
//! workload's images to a [`Reviewer`], and [`AdmissionResponse`] maps the
//! result to a status that tells "denied" apart from "could not decide".

use std::{collections::BTreeMap, fmt};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    metadata::Fetcher,
    policy::ImageSecurityPolicy,
    review::{Decision, Reviewer},
    violation::ViolationStrategy,
    Result,
};

/// Annotation that bypasses policy review when present.
pub const BREAKGLASS_ANNOTATION: &str = "imagegate.dev/breakglass";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    #[default]
    Pod,
    Deployment,
    ReplicaSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A resource whose images are reviewed together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    #[serde(default)]
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub images: Vec<String>,
    /// The owning controller was already admitted.
    #[serde(default)]
    pub owner_validated: bool,
}

impl Workload {
    /// Returns true if the breakglass annotation is present, whatever its
    /// value.
    pub fn has_breakglass(&self) -> bool {
        self.annotations.contains_key(BREAKGLASS_ANNOTATION)
    }
}

/// Reviews every image of `workload`.
///
/// Workloads whose owner was already validated, and workloads carrying the
/// breakglass annotation, are allowed without evaluation.
pub fn review_workload<C: Fetcher>(
    reviewer: &Reviewer<'_, C>,
    workload: &Workload,
    isps: &[ImageSecurityPolicy],
    strategy: &mut dyn ViolationStrategy,
) -> Result<Decision> {
    if workload.owner_validated {
        info!(
            "Owner of {} {}/{} already validated, allowing",
            workload.kind, workload.namespace, workload.name
        );
        return Ok(Decision::allow());
    }
    if workload.has_breakglass() {
        info!(
            "Found breakglass annotation on {} {}/{}, allowing",
            workload.kind, workload.namespace, workload.name
        );
        return Ok(Decision::allow());
    }
    reviewer.review(&workload.images, isps, Some(workload), strategy)
}

/// Admission status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// The workload is allowed.
    Success,
    /// The workload violates policy.
    Failure,
    /// No decision could be made.
    Error,
}

/// The answer returned to the admission caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionResponse {
    pub allowed: bool,
    pub status: Status,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl AdmissionResponse {
    /// Maps a review result to a response. Errors deny with
    /// [`Status::Error`].
    pub fn from_review(result: &Result<Decision>) -> Self {
        match result {
            Ok(decision) if decision.is_allowed() => Self {
                allowed: true,
                status: Status::Success,
                message: String::new(),
            },
            Ok(decision) => Self {
                allowed: false,
                status: Status::Failure,
                message: decision.message(),
            },
            Err(e) => Self {
                allowed: false,
                status: Status::Error,
                message: e.to_string(),
            },
        }
    }
}
