//! Mock bearer tokens.
//!
//! A token is `hex(payload_json) "." hex(sha256(secret || payload_json))`.
//! It carries the user id, email, role and an expiry in milliseconds since
//! the epoch, and is valid for seven days from issue.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, FundingResult, ValidationError};
use crate::models::{Startup, User, UserRole};

pub const TOKEN_TTL_DAYS: i64 = 7;
pub const MIN_PASSWORD_LEN: usize = 6;

/// Roles that run platform administration commands.
pub const ADMIN_ROLES: &[UserRole] = &[UserRole::Admin, UserRole::SuperAdmin];

/// Roles an account may sign up for without an administrator.
pub const SELF_SERVICE_ROLES: &[UserRole] = &[UserRole::Startup, UserRole::Investor];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub user_id: String,
    pub email: String,
    pub role: UserRole,
    pub exp: i64,
}

pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn sign(secret: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

pub fn issue_token(user: &User, secret: &str, now: DateTime<Utc>) -> Result<String, AuthError> {
    let payload = TokenPayload {
        user_id: user.id.clone(),
        email: user.email.clone(),
        role: user.role,
        exp: (now + Duration::days(TOKEN_TTL_DAYS)).timestamp_millis(),
    };
    let json = serde_json::to_vec(&payload).map_err(|_| AuthError::MalformedToken)?;
    Ok(format!("{}.{}", hex::encode(&json), sign(secret, &json)))
}

pub fn verify_token(token: &str, secret: &str, now: DateTime<Utc>) -> Result<TokenPayload, AuthError> {
    let (body, signature) = token.split_once('.').ok_or(AuthError::MalformedToken)?;
    let json = hex::decode(body).map_err(|_| AuthError::MalformedToken)?;
    if sign(secret, &json) != signature.to_ascii_lowercase() {
        return Err(AuthError::BadSignature);
    }
    let payload: TokenPayload =
        serde_json::from_slice(&json).map_err(|_| AuthError::MalformedToken)?;
    if payload.exp < now.timestamp_millis() {
        return Err(AuthError::Expired);
    }
    Ok(payload)
}

/// Checks credentials for a user record looked up by email.
pub fn check_credentials(
    user: Option<&User>,
    password: &str,
    role: UserRole,
) -> Result<(), AuthError> {
    let user = user.ok_or(AuthError::InvalidCredentials)?;
    if user.role != role || user.password_hash != hash_password(password) {
        return Err(AuthError::InvalidCredentials);
    }
    if !user.is_active {
        return Err(AuthError::Inactive(user.email.clone()));
    }
    Ok(())
}

pub fn require_role(payload: &TokenPayload, allowed: &[UserRole]) -> Result<(), AuthError> {
    if allowed.contains(&payload.role) {
        Ok(())
    } else {
        Err(AuthError::Forbidden { role: payload.role })
    }
}

/// A sign-up request. Startups must name their company.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub company_name: Option<String>,
    pub sector: Option<String>,
}

fn required(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ValidationError::InvalidField {
            field,
            value: String::new(),
        });
    }
    Ok(value.to_string())
}

/// Builds the user record, and the startup record for startup accounts.
/// Email uniqueness is left to the caller.
pub fn new_account(
    registration: &Registration,
    now: DateTime<Utc>,
) -> FundingResult<(User, Option<Startup>)> {
    if !SELF_SERVICE_ROLES.contains(&registration.role) {
        return Err(AuthError::Forbidden {
            role: registration.role,
        }
        .into());
    }
    let email = required("email", &registration.email)?.to_ascii_lowercase();
    if !email.contains('@') {
        return Err(ValidationError::InvalidField {
            field: "email",
            value: email,
        }
        .into());
    }
    if registration.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::InvalidField {
            field: "password",
            value: format!("shorter than {MIN_PASSWORD_LEN} characters"),
        }
        .into());
    }

    let user = User {
        id: format!("u-{}", uuid::Uuid::new_v4()),
        email,
        first_name: required("first name", &registration.first_name)?,
        last_name: required("last name", &registration.last_name)?,
        role: registration.role,
        password_hash: hash_password(&registration.password),
        is_active: true,
        created_at: now,
    };

    let startup = match registration.role {
        UserRole::Startup => Some(Startup {
            id: format!("s-{}", uuid::Uuid::new_v4()),
            user_id: user.id.clone(),
            company_name: required(
                "company name",
                registration.company_name.as_deref().unwrap_or_default(),
            )?,
            sector: registration
                .sector
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => None,
    };
    Ok((user, startup))
}
