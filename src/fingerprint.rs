//! Deterministic 256-bit digest keying the cache and the deduplicator.
//!
//! Canonicalizes `(texts, target_language, model)` into length-prefixed
//! bytes before hashing, the same anti-collision technique used for cache
//! keys elsewhere in this codebase's lineage: prefixing each field with its
//! byte length means a field boundary can never be forged by embedding the
//! separator inside a value.

use sha2::{Digest, Sha256};

/// A stable 256-bit digest over `(texts, language, model)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute the fingerprint for an ordered list of texts, a target
    /// language label, and a model label.
    pub fn compute<S: AsRef<str>>(texts: &[S], language: &str, model: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((texts.len() as u64).to_le_bytes());
        for text in texts {
            Self::update_field(&mut hasher, text.as_ref());
        }
        Self::update_field(&mut hasher, language);
        Self::update_field(&mut hasher, model);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Fingerprint(bytes)
    }

    fn update_field(hasher: &mut Sha256, field: &str) {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }

    /// Render as 64 lowercase hex characters.
    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 8 hex characters, for log lines that shouldn't spell out the full key.
    pub fn short(self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
