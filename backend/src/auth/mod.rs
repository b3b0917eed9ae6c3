//! Identity verification for milestone actions.
//!
//! The coordinator only needs a verified subject and its role claims. The
//! bundled [`StaticTokenVerifier`] checks bearer tokens against a configured
//! table using constant-time comparison to mitigate timing attacks.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::errors::AppError;

/// Role claims understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Donor,
    Volunteer,
    Recipient,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Volunteer => "volunteer",
            Role::Recipient => "recipient",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "donor" => Ok(Role::Donor),
            "volunteer" => Ok(Role::Volunteer),
            "recipient" => Ok(Role::Recipient),
            "admin" => Ok(Role::Admin),
            other => Err(AppError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// Verified identity of a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    pub roles: Vec<Role>,
}

impl Claims {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Verifies a bearer credential and returns the caller's claims.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Claims, AppError>;
}

/// One accepted token of the static verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCredential {
    pub token: String,
    pub subject: String,
    pub roles: Vec<Role>,
}

/// Verifier backed by a fixed token table (development and tests).
pub struct StaticTokenVerifier {
    credentials: Vec<StaticCredential>,
}

impl StaticTokenVerifier {
    pub fn new(credentials: Vec<StaticCredential>) -> Self {
        if credentials.is_empty() {
            tracing::warn!("No identity tokens configured (UMI_AUTH_TOKENS). Milestone actions will be rejected!");
        }
        Self { credentials }
    }
}

#[async_trait]
impl IdentityVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<Claims, AppError> {
        let provided = credential.strip_prefix("Bearer ").unwrap_or(credential).trim();

        // Every entry is compared so the time taken does not depend on which one matches
        let mut matched: Option<&StaticCredential> = None;
        for entry in &self.credentials {
            if constant_time_compare(provided, &entry.token) && matched.is_none() {
                matched = Some(entry);
            }
        }

        match matched {
            Some(entry) if !provided.is_empty() => Ok(Claims {
                subject: entry.subject.clone(),
                roles: entry.roles.clone(),
            }),
            _ => Err(AppError::Authorization(
                "Missing or invalid credential".to_string(),
            )),
        }
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    // Constant-time comparison
    a_bytes.ct_eq(b_bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> StaticTokenVerifier {
        StaticTokenVerifier::new(vec![
            StaticCredential {
                token: "volunteer-token".to_string(),
                subject: "auth0|volunteer".to_string(),
                roles: vec![Role::Volunteer],
            },
            StaticCredential {
                token: "admin-token".to_string(),
                subject: "auth0|admin".to_string(),
                roles: vec![Role::Admin, Role::Donor],
            },
        ])
    }

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare("test-key-123", "test-key-123"));
    }

    #[test]
    fn test_constant_time_compare_not_equal() {
        assert!(!constant_time_compare("test-key-123", "test-key-124"));
    }

    #[test]
    fn test_constant_time_compare_different_lengths() {
        assert!(!constant_time_compare("short", "much-longer-key"));
    }

    #[tokio::test]
    async fn test_verify_accepts_bearer_prefix() {
        let claims = verifier().verify("Bearer volunteer-token").await.unwrap();
        assert_eq!(claims.subject, "auth0|volunteer");
        assert!(claims.has_role(Role::Volunteer));
        assert!(!claims.has_role(Role::Admin));
    }

    #[tokio::test]
    async fn test_verify_rejects_unknown_and_empty_tokens() {
        let verifier = verifier();
        let err = verifier.verify("Bearer nope").await.unwrap_err();
        assert_eq!(err.error_code(), "AUTHORIZATION_ERROR");
        assert!(verifier.verify("").await.is_err());
    }

    #[test]
    fn test_role_round_trip_names() {
        for role in [Role::Donor, Role::Volunteer, Role::Recipient, Role::Admin] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("pilot".parse::<Role>().is_err());
    }
}
