//! Attestation verification and admission policy for container images.
//!
//! An attestation is a signed statement by an attestation authority that it
//! approved a specific image digest. This library verifies attestations,
//! evaluates images against image security policies, and issues new
//! attestations for images that pass.
//!
//! # Overview
//!
//! - [`keys`], [`crypto`] and [`pgp`] parse key material and check
//!   OpenPGP and PKIX signatures.
//! - [`payload`] is the canonical signed document and the check that binds a
//!   verified signature to an image.
//! - [`verifier`] matches an attestation against a set of possibly colliding
//!   key IDs and fails closed.
//! - [`transport`] fetches one authority's attestations for an image and
//!   returns those that verify.
//! - [`review`] runs the policy decision for a batch of images, and
//!   [`admission`] wraps it with workload-level bypasses.
//! - [`provenance`] attests freshly built images that satisfy build policies.
//!
//! Metadata stores, secret stores and policy evaluators are injected through
//! the traits in [`metadata`], [`secrets`], [`authority`], [`policy`] and
//! [`violation`]. [`metadata::local::LocalStore`] is a file-backed store for
//! standalone use.
//!
//! # Example
//!
//! ```no_run
//! use imagegate::{
//!     config::GateConfig,
//!     metadata::local::LocalStore,
//!     policy::SeverityPolicy,
//!     review::{Config, Reviewer},
//!     violation::LoggingStrategy,
//! };
//!
//! let config = GateConfig::load("/etc/imagegate/gate.toml")?;
//! let store = LocalStore::new(&config.project);
//! let secrets = config.load_secrets()?;
//! let authorities = config.authority_fetcher();
//! let reviewer = Reviewer::new(
//!     &store,
//!     Config {
//!         mode: config.mode,
//!         secrets: &secrets,
//!         authorities: &authorities,
//!         validate: &SeverityPolicy,
//!         global_allowlist: config.global_allowlist.clone(),
//!     },
//! );
//! let images = vec!["gcr.io/app@sha256:...".to_string()];
//! let decision = reviewer.review(
//!     &images,
//!     &config.image_security_policies_in("default"),
//!     None,
//!     &mut LoggingStrategy,
//! )?;
//! println!("allowed: {}", decision.is_allowed());
//! # Ok::<(), imagegate::Error>(())
//! ```

pub mod admission;
pub mod authority;
pub mod config;
pub mod crypto;
pub mod error;
pub mod image;
pub mod keys;
pub mod metadata;
pub mod payload;
pub mod pgp;
pub mod policy;
pub mod provenance;
pub mod review;
pub mod secrets;
pub mod transport;
pub mod verifier;
pub mod violation;


pub use error::{Error, Result};
