//! Input digests for idempotent re-resolution
//!
//! A digest covers the policy version, the field and every claim that fed a
//! resolution. Equal digests mean the stored ResolvedValue is still current
//! and is kept unchanged (including `resolved_at`).

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::types::FieldValue;

/// Incremental builder; claims may be pushed in any order
pub struct InputsDigest {
    header: String,
    entries: Vec<String>,
}

impl InputsDigest {
    pub fn new(policy_version: &str, field: &str) -> Self {
        Self {
            header: format!("{}\u{1f}{}", policy_version, field),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, source_id: &str, retrieved_at: DateTime<Utc>, value: &FieldValue) {
        let value_json = serde_json::to_string(value).unwrap_or_default();
        self.entries.push(format!(
            "{}\u{1f}{}\u{1f}{}",
            source_id,
            retrieved_at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            value_json
        ));
    }

    /// Fold in the digest of an upstream value (derived fields)
    pub fn push_upstream(&mut self, field: &str, digest: &str) {
        self.entries.push(format!("{}\u{1f}{}", field, digest));
    }

    pub fn finish(mut self) -> String {
        self.entries.sort();
        let mut hasher = Sha256::new();
        hasher.update(self.header.as_bytes());
        for entry in &self.entries {
            hasher.update([0x1e]);
            hasher.update(entry.as_bytes());
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}
