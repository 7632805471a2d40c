//! CSRF state for the signin round trip.
//!
//! The state is self-certifying: 32 bytes from the thread-local CSPRNG,
//! hex-encoded. The core only checks its shape; binding it to a browser is
//! left to the HTTP layer (see `StateGuard::matches`).

use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// Length of an encoded state value.
pub const STATE_LEN: usize = 64;

pub struct StateGuard;

impl StateGuard {
    /// Generate a fresh state value for one signin attempt.
    pub fn generate() -> String {
        let mut bytes = [0u8; STATE_LEN / 2];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
        hex::encode(bytes)
    }

    /// Reject anything that is not exactly 64 hex characters.
    pub fn validate(presented: &str) -> Result<()> {
        if is_hex_token(presented, STATE_LEN) {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }

    /// Shape-check `presented` and compare it to the value bound at signin.
    pub fn matches(presented: &str, expected: &str) -> Result<()> {
        Self::validate(presented)?;
        if presented.as_bytes().ct_eq(expected.as_bytes()).into() {
            Ok(())
        } else {
            Err(Error::InvalidState)
        }
    }
}

/// True when `value` is exactly `len` ASCII hex digits (either case).
pub(crate) fn is_hex_token(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_hexdigit())
}
