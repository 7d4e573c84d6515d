/// Short-lived and service credentials
///
/// API key pairs, one-time passcodes and password reset tokens.

pub mod api_keys;
pub mod otp;
pub mod password_reset;

pub use api_keys::{ApiKeyManager, KeyRejection};
pub use otp::OtpService;
pub use password_reset::PasswordResetFlow;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Six-digit passcodes
pub const OTP_RANGE: RangeInclusive<u32> = 100_000..=999_999;

/// Nine-digit reset tokens
pub const RESET_TOKEN_RANGE: RangeInclusive<u32> = 100_000_000..=999_999_999;

pub(crate) fn random_code(range: RangeInclusive<u32>) -> String {
    rand::thread_rng().gen_range(range).to_string()
}

/// A numeric code that clients send either as a JSON string or a number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumericCode {
    Number(u64),
    Text(String),
}

impl NumericCode {
    pub fn as_code(&self) -> String {
        match self {
            NumericCode::Number(n) => n.to_string(),
            NumericCode::Text(s) => s.trim().to_string(),
        }
    }
}

impl Default for NumericCode {
    fn default() -> Self {
        NumericCode::Text(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_codes_stay_in_range() {
        for _ in 0..1000 {
            let otp: u32 = random_code(OTP_RANGE).parse().unwrap();
            assert!(OTP_RANGE.contains(&otp));
            let reset: u32 = random_code(RESET_TOKEN_RANGE).parse().unwrap();
            assert!(RESET_TOKEN_RANGE.contains(&reset));
        }
    }

    #[test]
    fn test_numeric_code_accepts_string_or_number() {
        let text: NumericCode = serde_json::from_str("\"482913\"").unwrap();
        let number: NumericCode = serde_json::from_str("482913").unwrap();
        assert_eq!(text.as_code(), "482913");
        assert_eq!(number.as_code(), "482913");
    }
}
