//! Secret generation
//!
//! Tokens are drawn from the operating system CSPRNG and hex encoded. There
//! is no fallback source: if the OS refuses, the run aborts.

use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::error::{StoreError, StoreResult};

/// Source of random hex tokens
pub trait SecretGenerator {
    /// Generate `byte_len` random bytes, hex encoded (`2 * byte_len` chars)
    ///
    /// # Errors
    /// `StoreError::EntropyUnavailable` if the random source fails
    fn generate(&self, byte_len: usize) -> StoreResult<String>;
}

/// Generator backed by the operating system random source
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSecretGenerator;

impl OsSecretGenerator {
    /// Create new generator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl SecretGenerator for OsSecretGenerator {
    fn generate(&self, byte_len: usize) -> StoreResult<String> {
        let mut buf = vec![0u8; byte_len];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| StoreError::EntropyUnavailable(e.to_string()))?;
        Ok(hex::encode(buf))
    }
}

impl<G: SecretGenerator + ?Sized> SecretGenerator for &G {
    fn generate(&self, byte_len: usize) -> StoreResult<String> {
        (**self).generate(byte_len)
    }
}

/// Check that `value` is lowercase-or-uppercase hex of exactly `2 * byte_len` chars
#[must_use]
pub fn is_hex_of_len(value: &str, byte_len: usize) -> bool {
    value.len() == byte_len * 2 && value.bytes().all(|b| b.is_ascii_hexdigit())
}
