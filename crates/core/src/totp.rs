//! Time-based one-time passwords for the dashboard second factor.
//!
//! Codes follow RFC 6238 with a 30 second step and six digits, keyed with HMAC-SHA256.
//! Secrets are exchanged as unpadded RFC 4648 base32 so authenticator apps can import
//! them from an `otpauth://` link.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const STEP_SECONDS: i64 = 30;
pub const DIGITS: u32 = 6;
const SECRET_BYTES: usize = 20;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TotpError {
    #[error("secret is not valid base32")]
    InvalidSecret,
    #[error("code must be {DIGITS} digits")]
    InvalidCode,
}

pub fn generate_secret() -> String {
    let mut bytes = [0_u8; SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

pub fn code_at(secret: &str, at: DateTime<Utc>) -> Result<String, TotpError> {
    let key = base32_decode(secret)?;
    Ok(code_for_counter(&key, at.timestamp().div_euclid(STEP_SECONDS)))
}

/// Accepts the code for the current step and one step either side of it.
pub fn verify(secret: &str, code: &str, at: DateTime<Utc>) -> Result<bool, TotpError> {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(TotpError::InvalidCode);
    }
    let key = base32_decode(secret)?;
    let counter = at.timestamp().div_euclid(STEP_SECONDS);
    Ok((counter - 1..=counter + 1).any(|step| code_for_counter(&key, step) == code))
}

pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    let encode = |value: &str| url::form_urlencoded::byte_serialize(value.as_bytes()).collect::<String>();
    format!(
        "otpauth://totp/{issuer_label}:{account_label}?secret={secret}&issuer={issuer_label}&algorithm=SHA256&digits={DIGITS}&period={STEP_SECONDS}",
        issuer_label = encode(issuer),
        account_label = encode(account),
    )
}

fn code_for_counter(key: &[u8], counter: i64) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return String::new();
    };
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[digest.len() - 1] & 0x0f);
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    format!("{:0width$}", binary % 10_u32.pow(DIGITS), width = DIGITS as usize)
}

pub fn base32_encode(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for byte in bytes {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            output.push(char::from(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize]));
        }
    }
    if bits > 0 {
        output.push(char::from(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize]));
    }
    output
}

pub fn base32_decode(input: &str) -> Result<Vec<u8>, TotpError> {
    let mut output = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for character in input.trim().trim_end_matches('=').chars() {
        if character == ' ' || character == '-' {
            continue;
        }
        let value = BASE32_ALPHABET
            .iter()
            .position(|candidate| char::from(*candidate) == character.to_ascii_uppercase())
            .ok_or(TotpError::InvalidSecret)?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            output.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    if output.is_empty() {
        return Err(TotpError::InvalidSecret);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{base32_decode, base32_encode, code_at, generate_secret, provisioning_uri, verify};

    #[test]
    fn base32_matches_rfc4648_vectors() {
        assert_eq!(base32_encode(b"foobar"), "MZXW6YTBOI");
        assert_eq!(base32_decode("MZXW6YTBOI======").expect("decode"), b"foobar");
        assert!(base32_decode("not base32!").is_err());
    }

    #[test]
    fn rfc6238_sha256_reference_code() {
        // 32-byte ASCII seed from the RFC appendix, truncated to six digits.
        let secret = base32_encode(b"12345678901234567890123456789012");
        let at = Utc.timestamp_opt(59, 0).single().expect("valid");

        assert_eq!(code_at(&secret, at).expect("code"), "119246");
    }

    #[test]
    fn verification_tolerates_one_step_of_drift() {
        let secret = base32_encode(b"12345678901234567890");
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 10).single().expect("valid");
        let previous = code_at(&secret, now - Duration::seconds(30)).expect("code");
        let stale = code_at(&secret, now - Duration::seconds(90)).expect("code");

        assert!(verify(&secret, &previous, now).expect("verify"));
        assert!(!verify(&secret, &stale, now).expect("verify"));
        assert!(verify(&secret, "12ab56", now).is_err());
    }

    #[test]
    fn generated_secrets_decode_to_twenty_bytes() {
        assert_eq!(base32_decode(&generate_secret()).expect("decode").len(), 20);
    }

    #[test]
    fn provisioning_uri_escapes_labels() {
        let uri = provisioning_uri("ABC", "ann smith", "Teamdesk");

        assert!(uri.starts_with("otpauth://totp/Teamdesk:ann+smith?secret=ABC"));
        assert!(uri.contains("period=30"));
    }
}
