use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity attached to an authenticated request. Operators call admin
/// endpoints; advertisers sign postbacks with a JWT scoped to their account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalRole {
    Advertiser,
    Admin,
}

impl std::fmt::Display for PrincipalRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrincipalRole::Advertiser => write!(f, "advertiser"),
            PrincipalRole::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: PrincipalRole,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

impl Claims {
    pub fn new(principal_id: Uuid, role: PrincipalRole, duration_secs: i64) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: principal_id,
            role,
            iat: now,
            exp: now + duration_secs,
            jti: Uuid::now_v7(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }

    pub fn is_admin(&self) -> bool {
        self.role == PrincipalRole::Admin
    }
}

#[derive(Debug, Clone)]
pub struct AuthPrincipal {
    pub id: Uuid,
    pub role: PrincipalRole,
    pub token_id: Uuid,
}

impl From<Claims> for AuthPrincipal {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
            token_id: claims.jti,
        }
    }
}
