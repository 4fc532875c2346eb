// src/ids.rs
//
// Random identifiers for blob-name suffixes and staged block ids.

use rand::distr::Alphanumeric;
use rand::{Rng, rng};

/// Source of random ASCII identifiers.
///
/// Suffixes and block ids must not collide across concurrent writers to the
/// same logical path, so implementations need real entropy.
pub trait IdGenerator: Send + Sync {
    fn random_ascii(&self, len: usize) -> String;
}

/// `[A-Za-z0-9]` identifiers from the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlphanumericIds;

impl IdGenerator for AlphanumericIds {
    fn random_ascii(&self, len: usize) -> String {
        rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }
}
