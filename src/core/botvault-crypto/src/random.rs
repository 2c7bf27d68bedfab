//! Cryptographically secure random generation.
//!
//! Uses the operating system's CSPRNG.

use rand::{rngs::OsRng, RngCore};

/// Generates cryptographically secure random bytes.
///
/// # Arguments
///
/// * `len` - Number of random bytes to generate
pub fn generate_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_bytes_length() {
        for len in [0, 1, 16, 32, 64] {
            assert_eq!(generate_bytes(len).len(), len);
        }
    }

    #[test]
    fn test_randomness_distribution() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(generate_bytes(16)), "duplicate bytes generated");
        }
    }
}
