//! Smoke tests driving the `gatectl` binary.

use std::{
    path::{Path, PathBuf},
    process::{Command, Output},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use similar_asserts::assert_eq;

const IMAGE: &str =
    "gcr.io/imagegate/app@sha256:4444444444444444444444444444444444444444444444444444444444444444";
const OTHER_IMAGE: &str =
    "gcr.io/imagegate/app@sha256:5555555555555555555555555555555555555555555555555555555555555555";
const RSA_FINGERPRINT: &str = "CD8282D7078397BB0A1A73204C95BABCF8216A1B";

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../imagegate/tests/fixtures")
        .join(name)
}

fn gatectl(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_gatectl"))
        .args(args)
        .env_remove("IMAGEGATE_CONFIG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "gatectl failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn path(p: &Path) -> &str {
    p.to_str().unwrap()
}

#[test]
fn test_fingerprint() {
    for name in ["rsa.pub.asc", "rsa.sec.asc"] {
        let output = gatectl(&["fingerprint", path(&fixture(name))]);
        assert_eq!(stdout(&output).trim(), RSA_FINGERPRINT);
    }
}

#[test]
fn test_sign_and_verify() {
    let dir = tempfile::tempdir().unwrap();
    let attestation = dir.path().join("attestation.json");
    let output = gatectl(&["sign", "--key", path(&fixture("rsa.sec.asc")), "--image", IMAGE]);
    std::fs::write(&attestation, stdout(&output)).unwrap();

    let public_key = fixture("rsa.pub.asc");
    let verify = |image: &str, key_id: Option<&str>| {
        let mut args = vec![
            "verify",
            "--image",
            image,
            "--attestation",
            path(&attestation),
            "--public-key",
            path(&public_key),
        ];
        if let Some(id) = key_id {
            args.extend(["--key-id", id]);
        }
        gatectl(&args)
    };
    assert_eq!(stdout(&verify(IMAGE, None)).trim(), "OK");
    assert!(!verify(OTHER_IMAGE, None).status.success());
    assert!(!verify(IMAGE, Some("someone-else")).status.success());
}

#[test]
fn test_keygen() {
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("qa");
    let output = gatectl(&[
        "keygen",
        "--user-id",
        "QA <qa@example.com>",
        "--output",
        path(&prefix),
    ]);
    let fingerprint = stdout(&output).trim().to_string();
    assert_eq!(fingerprint.len(), 40);

    let public = dir.path().join("qa.pub.asc");
    let output = gatectl(&["fingerprint", path(&public)]);
    assert_eq!(stdout(&output).trim(), fingerprint);

    let secret = dir.path().join("qa.sec.asc");
    let output = gatectl(&["sign", "--key", path(&secret), "--image", IMAGE]);
    assert!(stdout(&output).contains(&fingerprint));
}

/// Writes a configuration with one authority signing with the RSA fixture
/// and a policy that blocks every vulnerability, fixable or not.
fn write_config(dir: &Path) -> PathBuf {
    let public = std::fs::read_to_string(fixture("rsa.pub.asc")).unwrap();
    std::fs::copy(fixture("rsa.pub.asc"), dir.join("qa.pub.asc")).unwrap();
    std::fs::copy(fixture("rsa.sec.asc"), dir.join("qa.sec.asc")).unwrap();
    let config = format!(
        r#"
metadata_path = "metadata.json"

[[authorities]]
name = "qa"
namespace = "default"
private_key_secret_name = "qa-key"

[[authorities.public_keys]]
encoded_key = "{}"

[[image_security_policies]]
name = "isp"
namespace = "default"

[image_security_policies.package_vulnerability_requirements]
maximum_severity = "BLOCK_ALL"
maximum_fix_unavailable_severity = "BLOCK_ALL"

[[build_policies]]
name = "bp"
namespace = "default"
attestation_authority_name = "qa"
built_from = "main"

[[secrets]]
name = "qa-key"
namespace = "default"
public_key_path = "qa.pub.asc"
private_key_path = "qa.sec.asc"
"#,
        STANDARD.encode(public)
    );
    let path = dir.join("gate.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn review(config: &Path, extra: &[&str], image: &str) -> (bool, serde_json::Value) {
    let mut args = vec!["--config", path(config), "review"];
    args.extend(extra);
    args.push(image);
    let output = gatectl(&args);
    let response = serde_json::from_slice(&output.stdout).unwrap();
    (output.status.success(), response)
}

#[test]
fn test_review() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let output = gatectl(&[
        "--config",
        path(&config),
        "add-vulnerability",
        "--image",
        OTHER_IMAGE,
        "--cve",
        "CVE-2024-0002",
        "--severity",
        "LOW",
    ]);
    stdout(&output);

    let (allowed, response) = review(&config, &[], OTHER_IMAGE);
    assert!(!allowed);
    assert_eq!(response["status"], "Failure");
    assert!(response["message"]
        .as_str()
        .unwrap()
        .contains("CVE-2024-0002"));

    let (allowed, response) = review(&config, &["--breakglass"], OTHER_IMAGE);
    assert!(allowed);
    assert_eq!(response["status"], "Success");

    // A clean image gets attested in cron mode and is then trusted.
    let (allowed, _) = review(&config, &["--mode", "cron"], IMAGE);
    assert!(allowed);
    let state = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
    assert!(state.contains("https://gcr.io/imagegate/app@sha256:4444"));

    let (allowed, _) = review(&config, &[], IMAGE);
    assert!(allowed);
}

#[test]
fn test_sign_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());
    let digest = IMAGE.rsplit_once(':').unwrap().1;
    let image_ref = format!("gcr.io/imagegate/app:v1@sha256:{digest}");

    let sign = |built_from: &str| {
        gatectl(&[
            "--config",
            path(&config),
            "sign-provenance",
            "--build-id",
            "7",
            "--image",
            &image_ref,
            "--built-from",
            built_from,
        ])
    };
    assert_eq!(stdout(&sign("fork")), "");
    let output = sign("main");
    assert!(stdout(&output).contains("occurrences/1"));

    let state = std::fs::read_to_string(dir.path().join("metadata.json")).unwrap();
    assert!(state.contains(&format!("https://{IMAGE}")));
}

#[test]
fn test_missing_config() {
    let output = gatectl(&["review", IMAGE]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("configuration"));
}
