pub mod memory;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::report::FinalReport;

/// Content key under which a report is cached: hex SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of raw bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Fingerprint of a whole submission: the image plus the parameters the
    /// analyses depend on. Each field is length-prefixed so that moving bytes
    /// between fields always changes the key.
    pub fn of_submission(image: &[u8], topic: &str, auxiliary_context: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, image);
        hash_field(&mut hasher, topic.as_bytes());
        match auxiliary_context {
            Some(context) => {
                hasher.update([1u8]);
                hash_field(&mut hasher, context.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("cached report could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Memoized final reports, keyed by submission fingerprint.
#[async_trait]
pub trait ReportCache: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<FinalReport>, CacheError>;

    /// Insert or overwrite. Last write wins.
    async fn put(&self, fingerprint: &Fingerprint, report: FinalReport) -> Result<(), CacheError>;
}
