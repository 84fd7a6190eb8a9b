//! Command-line front end for imagegate.
//!
//! `gatectl` manages signing keys, signs and verifies attestations, and runs
//! admission reviews and provenance signing against a local metadata store
//! described by a TOML configuration file.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use imagegate::{
    admission::{review_workload, AdmissionResponse, Workload, WorkloadKind, BREAKGLASS_ANNOTATION},
    config::GateConfig,
    keys,
    metadata::{create_attestation_signature, local::LocalStore, RawAttestation, Severity, Vulnerability},
    pgp::{KeyAlgorithm, SigningKey},
    policy::{BuiltFromPolicy, SeverityPolicy},
    provenance::{BuildProvenance, Signer},
    review::{Config, ExecutionMode, Reviewer},
    secrets::SigningSecret,
    verifier::{Attestation, Verifier},
    violation::LoggingStrategy,
};

/// gatectl
#[derive(Debug, Parser)]
#[clap(name = "gatectl", version)]
pub struct App {
    /// Path to the gate configuration file
    #[clap(long, env = "IMAGEGATE_CONFIG")]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum, Default)]
enum Algorithm {
    Rsa,
    #[default]
    Ed25519,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Mode {
    Webhook,
    Cron,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Webhook => ExecutionMode::Webhook,
            Mode::Cron => ExecutionMode::Cron,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an OpenPGP signing key, writing <output>.pub.asc and <output>.sec.asc
    Keygen {
        #[clap(long, value_enum, default_value_t = Algorithm::Ed25519)]
        algorithm: Algorithm,
        /// RSA modulus size
        #[clap(long, default_value_t = 3072)]
        bits: u32,
        /// User ID bound to the key, e.g. "QA <qa@example.com>"
        #[clap(long)]
        user_id: String,
        /// Path prefix of the key files
        #[clap(long)]
        output: PathBuf,
    },
    /// Print the ID of a public or private key file
    Fingerprint { key: PathBuf },
    /// Sign the attestation payload for an image and print the attestation as JSON
    Sign {
        /// Private key file (armored OpenPGP or PEM)
        #[clap(long)]
        key: PathBuf,
        /// Digest-qualified image reference
        #[clap(long)]
        image: String,
    },
    /// Verify an attestation JSON file for an image
    Verify {
        #[clap(long)]
        image: String,
        /// Attestation as printed by `sign`
        #[clap(long)]
        attestation: PathBuf,
        /// Trusted public key files
        #[clap(long = "public-key", required = true)]
        public_keys: Vec<PathBuf>,
        /// ID the trusted keys are known by, instead of their fingerprints
        #[clap(long)]
        key_id: Option<String>,
    },
    /// Review the images of a workload and print the admission response
    Review {
        #[clap(long, default_value = "default")]
        namespace: String,
        /// Workload name
        #[clap(long, default_value = "gatectl")]
        name: String,
        /// Override the configured execution mode
        #[clap(long, value_enum)]
        mode: Option<Mode>,
        /// Set the breakglass annotation on the workload
        #[clap(long)]
        breakglass: bool,
        /// Treat the workload's owner as already validated
        #[clap(long)]
        owner_validated: bool,
        #[clap(required = true)]
        images: Vec<String>,
    },
    /// Attest a built image for every build policy its source satisfies
    SignProvenance {
        #[clap(long)]
        build_id: String,
        /// Image reference as reported by the build
        #[clap(long)]
        image: String,
        /// Source the image was built from
        #[clap(long)]
        built_from: String,
        #[clap(long, default_value = "default")]
        namespace: String,
    },
    /// Record a vulnerability for an image in the local metadata store
    AddVulnerability {
        #[clap(long)]
        image: String,
        #[clap(long)]
        cve: String,
        #[clap(long)]
        severity: Severity,
        #[clap(long)]
        fix_available: bool,
    },
}

fn load_config(args: &App) -> Result<GateConfig> {
    let Some(path) = &args.config else {
        bail!("this command needs a configuration file (--config or IMAGEGATE_CONFIG)");
    };
    GateConfig::load(path).with_context(|| format!("Loading configuration from {path:?}"))
}

fn open_store(config: &GateConfig) -> Result<LocalStore> {
    match &config.metadata_path {
        Some(path) => LocalStore::open(&config.project, path)
            .with_context(|| format!("Opening metadata store {path:?}")),
        None => Ok(LocalStore::new(&config.project)),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Reading {path:?}"))
}

fn keygen(algorithm: Algorithm, bits: u32, user_id: &str, output: &Path) -> Result<()> {
    let algorithm = match algorithm {
        Algorithm::Rsa => KeyAlgorithm::Rsa(bits),
        Algorithm::Ed25519 => KeyAlgorithm::Ed25519,
    };
    let key = SigningKey::generate(algorithm, user_id)?;

    let with_suffix = |suffix: &str| {
        let mut path = output.as_os_str().to_owned();
        path.push(suffix);
        PathBuf::from(path)
    };
    let public = with_suffix(".pub.asc");
    let secret = with_suffix(".sec.asc");
    std::fs::write(&public, key.to_public_armor()?)
        .with_context(|| format!("Writing {public:?}"))?;
    std::fs::write(&secret, key.to_secret_armor()?)
        .with_context(|| format!("Writing {secret:?}"))?;
    println!("{}", key.fingerprint());
    Ok(())
}

fn fingerprint(path: &Path) -> Result<String> {
    let data = read_file(path)?;
    let id = match keys::parse_public_key(data.as_bytes()) {
        Ok(key) => key.id,
        Err(_) => keys::parse_private_key(data.as_bytes())
            .and_then(|key| key.fingerprint())
            .with_context(|| format!("{path:?} is not a supported key"))?,
    };
    Ok(id)
}

fn sign(key: &Path, image: &str) -> Result<RawAttestation> {
    let private_key = read_file(key)?;
    let secret = SigningSecret::new("", "cli", "", private_key);
    create_attestation_signature(image, &secret)
        .with_context(|| format!("Signing attestation for {image}"))
}

fn verify(
    image: &str,
    attestation: &Path,
    public_keys: &[PathBuf],
    key_id: Option<&str>,
) -> Result<()> {
    let raw: RawAttestation = serde_json::from_str(&read_file(attestation)?)
        .with_context(|| format!("Parsing attestation {attestation:?}"))?;
    let attestation = Attestation::try_from(&raw)?;
    let keys = public_keys
        .iter()
        .map(|path| {
            let mut key = keys::parse_public_key(read_file(path)?.as_bytes())
                .with_context(|| format!("Parsing public key {path:?}"))?;
            if let Some(id) = key_id {
                key.id = id.to_string();
            }
            Ok(key)
        })
        .collect::<Result<Vec<_>>>()?;
    Verifier::new(image, keys)?
        .verify_attestation(&attestation)
        .with_context(|| format!("Verifying attestation for {image}"))?;
    info!("Attestation by {} verified", raw.public_key_id);
    Ok(())
}

fn main() -> Result<ExitCode> {
    env_logger::init();

    let args = App::parse();

    match &args.cmd {
        Command::Keygen {
            algorithm,
            bits,
            user_id,
            output,
        } => keygen(*algorithm, *bits, user_id, output)?,
        Command::Fingerprint { key } => println!("{}", fingerprint(key)?),
        Command::Sign { key, image } => {
            let attestation = sign(key, image)?;
            println!("{}", serde_json::to_string_pretty(&attestation)?);
        }
        Command::Verify {
            image,
            attestation,
            public_keys,
            key_id,
        } => {
            verify(image, attestation, public_keys, key_id.as_deref())?;
            println!("OK");
        }
        Command::Review {
            namespace,
            name,
            mode,
            breakglass,
            owner_validated,
            images,
        } => {
            let config = load_config(&args)?;
            let store = open_store(&config)?;
            let secrets = config.load_secrets()?;
            let authorities = config.authority_fetcher();
            let reviewer = Reviewer::new(
                &store,
                Config {
                    mode: mode.map_or(config.mode, ExecutionMode::from),
                    secrets: &secrets,
                    authorities: &authorities,
                    validate: &SeverityPolicy,
                    global_allowlist: config.global_allowlist.clone(),
                },
            );
            let mut annotations = BTreeMap::new();
            if *breakglass {
                annotations.insert(BREAKGLASS_ANNOTATION.to_string(), "true".to_string());
            }
            let workload = Workload {
                kind: WorkloadKind::Pod,
                name: name.clone(),
                namespace: namespace.clone(),
                annotations,
                images: images.clone(),
                owner_validated: *owner_validated,
            };
            let result = review_workload(
                &reviewer,
                &workload,
                &config.image_security_policies_in(namespace),
                &mut LoggingStrategy,
            );
            let response = AdmissionResponse::from_review(&result);
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.allowed {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::SignProvenance {
            build_id,
            image,
            built_from,
            namespace,
        } => {
            let config = load_config(&args)?;
            let store = open_store(&config)?;
            let secrets = config.load_secrets()?;
            let authorities = config.authority_fetcher();
            let provenance = BuildProvenance {
                build_id: build_id.clone(),
                image_ref: image.clone(),
                built_from: built_from.clone(),
            };
            let occurrences = Signer::new(&store, &secrets, &authorities, &BuiltFromPolicy)
                .validate_and_sign(&provenance, &config.build_policies_in(namespace))
                .with_context(|| format!("Signing provenance of build {build_id}"))?;
            for occurrence in occurrences {
                println!("{}", occurrence.name);
            }
        }
        Command::AddVulnerability {
            image,
            cve,
            severity,
            fix_available,
        } => {
            let config = load_config(&args)?;
            let store = open_store(&config)?;
            store.add_vulnerability(
                image,
                Vulnerability {
                    cve: cve.clone(),
                    severity: *severity,
                    has_fix_available: *fix_available,
                },
            )?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
