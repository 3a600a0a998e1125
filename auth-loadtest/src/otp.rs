use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use totp_rs::{Algorithm, TOTP};
use tracing::warn;

const STEP_SECS: u64 = 30;
const DIGITS: usize = 6;

/// Derives the current 6-digit time-based code from a hex-encoded seed.
///
/// When `hold_max_secs` is non-zero, a random delay bounded by the hold
/// window is inserted first to emulate a human typing the code. Failures
/// are recoverable: a bad seed yields an empty code, which callers treat
/// as "no second factor required".
pub async fn generate_code(seed_hex: &str, hold_min_secs: u64, hold_max_secs: u64) -> String {
    if hold_max_secs > 0 {
        let hold = rand::thread_rng().gen_range(hold_min_secs..=hold_max_secs);
        tokio::time::sleep(Duration::from_secs(hold)).await;
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    code_at(seed_hex, now)
}

/// Code for a fixed timestamp. Returns an empty string when the seed
/// does not decode.
pub fn code_at(seed_hex: &str, timestamp: u64) -> String {
    let secret = match hex::decode(seed_hex) {
        Ok(secret) if !secret.is_empty() => secret,
        Ok(_) => {
            warn!("empty OTP seed, skipping code generation");
            return String::new();
        }
        Err(err) => {
            warn!(%err, "failed to decode OTP seed, skipping code generation");
            return String::new();
        }
    };

    let totp = TOTP::new_unchecked(Algorithm::SHA1, DIGITS, 1, STEP_SECS, secret);
    totp.generate(timestamp)
}
