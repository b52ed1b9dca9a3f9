//! Random suffix generation for job identifiers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, TryRngCore};

/// Number of random bytes behind each suffix (128 bits).
pub const SUFFIX_BYTES: usize = 16;

/// Length of an encoded suffix: 16 bytes in unpadded base64.
pub const SUFFIX_LEN: usize = 22;

/// Generate an unguessable job ID suffix.
///
/// Reads 16 bytes from the operating system CSPRNG and encodes them as
/// URL-safe base64 with the `=` padding stripped.
///
/// # Panics
///
/// Panics if the operating system random source fails. A job ID is never
/// produced from a weaker source.
#[must_use]
pub fn random_suffix() -> String {
    let mut bytes = [0u8; SUFFIX_BYTES];
    if let Err(e) = OsRng.try_fill_bytes(&mut bytes) {
        panic!("operating system random source failed: {e}");
    }
    URL_SAFE_NO_PAD.encode(bytes)
}
