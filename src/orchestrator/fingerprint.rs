//! Request fingerprints.
//!
//! A fingerprint is a SHA-256 digest over the canonical form of a resolved
//! request: the request kind plus, for every sub-query, the instance id, the
//! instance revision, the scenario and the JSON payload. Entries are sorted,
//! so the order in which sub-queries were listed does not matter.
//!
//! The instance revision changes whenever an instance is reloaded, so a
//! request resolved against a replaced instance can never produce the key
//! that requests against the new instance read.

use sha2::{Digest, Sha256};

use super::request::RequestKind;
use crate::capability::CapabilityRequest;
use crate::instance::Instance;

const FIELD_SEP: u8 = 0x1f;
const RECORD_SEP: u8 = 0x1e;

/// Content-derived identity of a resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    digest: String,
    instance_ids: Vec<String>,
}

impl Fingerprint {
    /// Fingerprint of `parts` under `kind`.
    pub fn compute<'a, I>(kind: &RequestKind, parts: I) -> Result<Self, serde_json::Error>
    where
        I: IntoIterator<Item = (&'a Instance, &'a CapabilityRequest)>,
    {
        let mut entries = Vec::new();
        let mut instance_ids = Vec::new();
        for (instance, request) in parts {
            entries.push(canonical_entry(instance, request)?);
            instance_ids.push(instance.id().to_string());
        }
        entries.sort();
        instance_ids.sort();
        instance_ids.dedup();

        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(kind)?);
        hasher.update([RECORD_SEP]);
        for entry in &entries {
            hasher.update(entry.as_bytes());
            hasher.update([RECORD_SEP]);
        }

        Ok(Self {
            digest: hex::encode(hasher.finalize()),
            instance_ids,
        })
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Distinct instance ids the request depends on, sorted.
    pub fn instance_ids(&self) -> impl Iterator<Item = &str> {
        self.instance_ids.iter().map(String::as_str)
    }
}

/// Canonical text of one sub-query, also used to order sub-results.
pub(crate) fn canonical_entry(
    instance: &Instance,
    request: &CapabilityRequest,
) -> Result<String, serde_json::Error> {
    let payload = serde_json::to_string(request)?;
    let sep = char::from(FIELD_SEP);
    Ok(format!(
        "{}{sep}{}{sep}{}{sep}{}",
        instance.id(),
        instance.revision(),
        instance.config().scenario,
        payload
    ))
}
