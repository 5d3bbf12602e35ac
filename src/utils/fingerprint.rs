// src/utils/fingerprint.rs

//! Listing fingerprints, the uniqueness key of the record store.

use sha2::{Digest, Sha256};

/// Deterministic digest of `target | title | url`.
///
/// Each part is trimmed and lowercased. Internal whitespace is left as is,
/// so `"Backend  Intern"` and `"Backend Intern"` are different listings.
pub fn fingerprint(target: &str, title: &str, url: &str) -> String {
    let combined = format!(
        "{}|{}|{}",
        target.trim().to_lowercase(),
        title.trim().to_lowercase(),
        url.trim().to_lowercase()
    );
    hex::encode(Sha256::digest(combined.as_bytes()))
}
