use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::gate::Tier;
use super::repo_types::{Role, User};
use crate::error::{AppError, FieldError};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Request body for registration and first-admin bootstrap.
#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Registration input after shape checks and normalization.
#[derive(Debug)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<Registration, AppError> {
        let email = normalize_email(&self.email);
        let name = self.name.trim().to_string();
        let mut details = Vec::new();

        if !is_valid_email(&email) {
            details.push(FieldError {
                field: "email",
                message: "Invalid email".into(),
            });
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            details.push(FieldError {
                field: "password",
                message: format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
            });
        }
        if name.is_empty() {
            details.push(FieldError {
                field: "name",
                message: "Name is required".into(),
            });
        }

        if !details.is_empty() {
            return Err(AppError::BadRequest {
                message: "Invalid input".into(),
                details,
            });
        }
        Ok(Registration {
            email,
            password: self.password,
            name,
        })
    }
}

/// Request body for login.
#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Acknowledgement returned by the session endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthAck {
    pub success: bool,
    pub message: String,
}

impl AuthAck {
    pub fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublicUser {
    pub id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Role,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            role: u.role,
        }
    }
}

/// "Who am I" answer; `user` is absent for anonymous callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub authenticated: bool,
    pub user: Option<PublicUser>,
    pub tiers: Vec<Tier>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallbackQuery {
    pub code: String,
    #[serde(default)]
    pub state: String,
}
