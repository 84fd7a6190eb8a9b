//! Container image reference helpers.

use crate::{Error, Result};

const DIGEST_PREFIX: &str = "sha256:";

/// Prefix used to turn an image reference into a metadata resource URL.
pub const RESOURCE_URL_PREFIX: &str = "https://";

fn is_sha256_digest(digest: &str) -> bool {
    digest
        .strip_prefix(DIGEST_PREFIX)
        .is_some_and(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Splits a digest-qualified reference (`repo@sha256:<64 hex>`) into its
/// name and digest.
pub fn parse_qualified(image: &str) -> Result<(&str, &str)> {
    match image.rsplit_once('@') {
        Some((name, digest)) if !name.is_empty() && is_sha256_digest(digest) => Ok((name, digest)),
        _ => Err(Error::UnqualifiedImage(image.to_string())),
    }
}

/// Returns true if `image` is pinned to a sha256 digest.
pub fn is_fully_qualified(image: &str) -> bool {
    parse_qualified(image).is_ok()
}

/// The repository part of a reference, without digest or tag.
pub fn repository(image: &str) -> &str {
    let name = image.split_once('@').map_or(image, |(name, _)| name);
    match name.rfind(':') {
        // a colon after the last slash separates the tag; before it, a port
        Some(colon) if !name[colon..].contains('/') => &name[..colon],
        _ => name,
    }
}

/// Returns true if `image` matches any allowlist pattern.
///
/// A pattern matches when it equals the full reference or its repository, or
/// when it ends in `*` and the reference starts with the preceding prefix.
pub fn matches_allowlist<S: AsRef<str>>(image: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| {
        let pattern = pattern.as_ref();
        match pattern.strip_suffix('*') {
            Some(prefix) => image.starts_with(prefix),
            None => pattern == image || pattern == repository(image),
        }
    })
}

/// The metadata resource URL for an image.
pub fn resource_url(image: &str) -> String {
    format!("{RESOURCE_URL_PREFIX}{image}")
}

/// Normalizes image references reported by build systems.
///
/// References of the form `repo:tag:digest-hex` (more than one colon) are
/// rewritten as `repo@sha256:digest-hex`, dropping any `@...` suffix from the
/// first component. Anything else is returned unchanged.
pub fn normalize_build_reference(image: &str) -> String {
    let parts: Vec<&str> = image.split(':').collect();
    if parts.len() > 2 {
        let repo = parts[0].split('@').next().unwrap_or(parts[0]);
        format!("{repo}@{DIGEST_PREFIX}{}", parts[parts.len() - 1])
    } else {
        image.to_string()
    }
}
