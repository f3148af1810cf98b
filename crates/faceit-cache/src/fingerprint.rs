//! Deterministic cache keys.

use faceit_models::AnalysisConfig;
use sha2::{Digest, Sha256};
use std::fmt;

/// Bytes of content hashed into a fingerprint.
pub const DEFAULT_PREFIX_BYTES: usize = 64 * 1024;

/// Cache key derived from a content sample and the analysis config.
///
/// Only the first [`DEFAULT_PREFIX_BYTES`] and the total length of the
/// content are hashed, so fingerprinting large uploads stays cheap. No clock
/// input is involved: the same upload with the same config always maps to the
/// same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn make_key(content: &[u8], config: &AnalysisConfig) -> Self {
        Self::with_prefix_len(content, config, DEFAULT_PREFIX_BYTES)
    }

    pub fn with_prefix_len(content: &[u8], config: &AnalysisConfig, prefix_len: usize) -> Self {
        let sample = &content[..content.len().min(prefix_len)];

        let mut hasher = Sha256::new();
        hasher.update(sample);
        hasher.update((content.len() as u64).to_le_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Self(format!("face_{}_{}", &digest[..16], config.cache_signature()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form for response metadata.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(20);
        &self.0[..end]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
