use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

/// Claims embedded in the dashboard login link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginClaims {
    #[serde(rename = "id")]
    pub user_id: String,
    #[serde(rename = "name")]
    pub username: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token signing secret is not configured")]
    MissingSecret,
    #[error("token must have three dot-separated parts")]
    Malformed,
    #[error("token segment is not valid base64: {0}")]
    Encoding(String),
    #[error("token payload is not valid json: {0}")]
    Payload(String),
    #[error("token signature does not match")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

#[derive(Clone, Debug)]
pub struct LoginTokenSigner {
    secret: Option<SecretString>,
}

impl LoginTokenSigner {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self { secret }
    }

    pub fn sign(&self, claims: &LoginClaims) -> Result<String, TokenError> {
        let header = STANDARD.encode(br#"{"alg":"HS512","typ":"JWT"}"#);
        let payload_json =
            serde_json::to_vec(claims).map_err(|error| TokenError::Payload(error.to_string()))?;
        let payload = STANDARD.encode(payload_json);
        let signature = STANDARD.encode(self.mac(&payload)?.finalize().into_bytes());
        Ok(format!("{header}.{payload}.{signature}"))
    }

    pub fn verify(&self, token: &str) -> Result<LoginClaims, TokenError> {
        let mut parts = token.trim().split('.');
        let (Some(_header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TokenError::Malformed);
        };

        let signature =
            STANDARD.decode(signature).map_err(|error| TokenError::Encoding(error.to_string()))?;
        self.mac(payload)?.verify_slice(&signature).map_err(|_| TokenError::InvalidSignature)?;

        let payload_json =
            STANDARD.decode(payload).map_err(|error| TokenError::Encoding(error.to_string()))?;
        serde_json::from_slice(&payload_json).map_err(|error| TokenError::Payload(error.to_string()))
    }

    pub fn verify_fresh(
        &self,
        token: &str,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<LoginClaims, TokenError> {
        let claims = self.verify(token)?;
        let age = now.timestamp() - claims.issued_at;
        if age < 0 || age > max_age.num_seconds() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn mac(&self, payload: &str) -> Result<HmacSha512, TokenError> {
        let secret = self
            .secret
            .as_ref()
            .map(|secret| secret.expose_secret().as_bytes())
            .filter(|bytes| !bytes.is_empty())
            .ok_or(TokenError::MissingSecret)?;
        let mut mac =
            HmacSha512::new_from_slice(secret).map_err(|_| TokenError::MissingSecret)?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{LoginClaims, LoginTokenSigner, TokenError};

    fn signer(secret: &str) -> LoginTokenSigner {
        LoginTokenSigner::new(Some(secret.to_owned().into()))
    }

    fn claims(issued_at: i64) -> LoginClaims {
        LoginClaims { user_id: "U1".to_owned(), username: "ann".to_owned(), issued_at }
    }

    #[test]
    fn signed_token_verifies_with_same_secret() {
        let token = signer("s3cret").sign(&claims(1_700_000_000)).expect("sign");

        assert_eq!(token.split('.').count(), 3);
        assert_eq!(signer("s3cret").verify(&token).expect("verify"), claims(1_700_000_000));
    }

    #[test]
    fn other_secret_fails_signature_check() {
        let token = signer("s3cret").sign(&claims(1)).expect("sign");

        assert_eq!(signer("other").verify(&token), Err(TokenError::InvalidSignature));
        assert_eq!(signer("s3cret").verify("only.two"), Err(TokenError::Malformed));
    }

    #[test]
    fn freshness_window_is_enforced() {
        let issued = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).single().expect("valid");
        let token = signer("k").sign(&claims(issued.timestamp())).expect("sign");

        assert!(signer("k")
            .verify_fresh(&token, issued + Duration::minutes(4), Duration::minutes(5))
            .is_ok());
        assert_eq!(
            signer("k").verify_fresh(&token, issued + Duration::minutes(6), Duration::minutes(5)),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn missing_secret_refuses_to_sign() {
        assert_eq!(LoginTokenSigner::new(None).sign(&claims(1)), Err(TokenError::MissingSecret));
    }
}
