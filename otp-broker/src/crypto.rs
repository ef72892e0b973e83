//! Token and OTP code generation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use sha2::Sha256;

/// Raw entropy per link token
const TOKEN_BYTES: usize = 24;

/// Digits in a one-time passcode
pub const OTP_CODE_LENGTH: usize = 6;

/// Generate a random link token (URL-safe base64, no padding)
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// HMAC-SHA256 of a plaintext token under the broker secret. Only the hash
/// is ever stored.
pub fn hash_token(token: &str, secret: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac key");
    mac.update(token.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Generate a numeric OTP code from the OS CSPRNG
pub fn generate_otp_code() -> String {
    let mut rng = OsRng;
    (0..OTP_CODE_LENGTH)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}
