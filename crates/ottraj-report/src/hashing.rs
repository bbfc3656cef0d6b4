use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest
pub type HashRef = String;

/// Streaming SHA-256 over the numeric arrays of a bundle
///
/// Floats are fed as little-endian bytes and every array is prefixed with its
/// length, so the digest does not depend on JSON number formatting and two
/// arrays cannot trade elements without changing it.
#[derive(Debug, Clone, Default)]
pub struct ArrayDigest {
    hasher: Sha256,
}

impl ArrayDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dims(mut self, dims: &[usize]) -> Self {
        self.hasher.update((dims.len() as u64).to_le_bytes());
        for &d in dims {
            self.hasher.update((d as u64).to_le_bytes());
        }
        self
    }

    pub fn floats(mut self, values: &[f64]) -> Self {
        self.hasher.update((values.len() as u64).to_le_bytes());
        for v in values {
            self.hasher.update(v.to_le_bytes());
        }
        self
    }

    pub fn finish(self) -> HashRef {
        hex::encode(self.hasher.finalize())
    }
}
