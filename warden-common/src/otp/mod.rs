use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;

use crate::threadrand::SecureRng;

/// Attempt ceiling for a single passcode record. Every code path that
/// reasons about attempts must read this constant; it is not part of the
/// configuration surface.
pub const MAX_OTP_ATTEMPTS: i32 = 3;

pub const OTP_LENGTH: usize = 8;

pub struct Otp {}

impl Otp {
    pub fn generate(length: usize) -> String {
        let mut rng = SecureRng;
        (0..length)
            .map(|_| (b'0' + rng.gen_range(0..10)) as char)
            .collect()
    }

    /// HMAC-SHA256 digest of a passcode under the server secret. Only the
    /// digest is ever persisted.
    pub fn hash(code: &str, key: &[u8]) -> [u8; 32] {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(code.as_bytes());
        mac.finalize().into_bytes().into()
    }

    pub fn digests_are_equal(given: &[u8], saved: &[u8]) -> bool {
        if given.len() != saved.len() {
            return false;
        }

        let mut digests_dont_match = 0u8;

        // Do bitwise comparison to prevent timing attacks
        for (i, saved_byte) in saved.iter().enumerate() {
            unsafe {
                digests_dont_match |= saved_byte ^ given.get_unchecked(i);
            }
        }

        digests_dont_match == 0
    }
}
