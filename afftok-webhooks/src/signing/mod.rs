//! Outbound request signing: HMAC-SHA256 or HS256 JWT (4.K).

use hmac::{Hmac, Mac};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningMode {
    Hmac,
    Jwt,
}

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("secret is invalid for HMAC keying")]
    InvalidSecret,
    #[error("jwt encode failed: {0}")]
    JwtEncode(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub task_id: String,
    pub advertiser_id: Option<String>,
    pub pipeline_id: String,
    pub execution_id: String,
    pub step_index: u32,
    pub timestamp: i64,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub jti: String,
}

pub struct HmacHeaders {
    pub signature: String,
    pub timestamp: String,
    pub algorithm: &'static str,
}

pub fn sign_hmac(secret: &str, body: &str) -> Result<HmacHeaders, SigningError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SigningError::InvalidSecret)?;
    mac.update(body.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(HmacHeaders {
        signature,
        timestamp: chrono::Utc::now().timestamp().to_string(),
        algorithm: "HMAC-SHA256",
    })
}

pub fn verify_hmac(secret: &str, body: &str, signature: &str) -> Result<bool, SigningError> {
    let expected = sign_hmac(secret, body)?;
    Ok(constant_time_eq::constant_time_eq(expected.signature.as_bytes(), signature.as_bytes()))
}

pub fn sign_jwt(
    secret: &str,
    task_id: &str,
    advertiser_id: Option<&str>,
    pipeline_id: &str,
    execution_id: &str,
    step_index: u32,
) -> Result<String, SigningError> {
    let now = chrono::Utc::now();
    let claims = JwtClaims {
        task_id: task_id.to_string(),
        advertiser_id: advertiser_id.map(str::to_string),
        pipeline_id: pipeline_id.to_string(),
        execution_id: execution_id.to_string(),
        step_index,
        timestamp: now.timestamp(),
        iss: "afftok-webhooks".to_string(),
        sub: task_id.to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::minutes(5)).timestamp(),
        nbf: (now - chrono::Duration::minutes(1)).timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };

    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(SigningError::JwtEncode)
}

pub fn verify_jwt(secret: &str, token: &str) -> bool {
    let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "nbf"]);
    jsonwebtoken::decode::<JwtClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_signature_round_trips() {
        let headers = sign_hmac("s3cret", "body-bytes").unwrap();
        assert!(verify_hmac("s3cret", "body-bytes", &headers.signature).unwrap());
    }

    #[test]
    fn hmac_signature_rejects_wrong_secret() {
        let headers = sign_hmac("s3cret", "body-bytes").unwrap();
        assert!(!verify_hmac("other", "body-bytes", &headers.signature).unwrap());
    }

    #[test]
    fn jwt_round_trips_with_correct_secret() {
        let token = sign_jwt("secret", "task-1", Some("adv-1"), "pipe-1", "exec-1", 0).unwrap();
        assert!(verify_jwt("secret", &token));
    }

    #[test]
    fn jwt_rejects_wrong_secret() {
        let token = sign_jwt("secret", "task-1", None, "pipe-1", "exec-1", 0).unwrap();
        assert!(!verify_jwt("wrong", &token));
    }
}
