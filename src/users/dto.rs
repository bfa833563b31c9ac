use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::{
    dto::{is_valid_email, normalize_email, RegisterRequest},
    repo_types::{LoginMethod, Role, User, UserUpdate},
};
use crate::error::{AppError, FieldError};

/// Admin view of a user; password material never leaves the directory.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserView {
    pub id: i64,
    pub open_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Role,
    pub login_method: LoginMethod,
    #[serde(with = "time::serde::rfc3339")]
    pub last_signed_in: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            open_id: u.open_id,
            name: u.name,
            email: u.email,
            role: u.role,
            login_method: u.login_method,
            last_signed_in: u.last_signed_in,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<Role>,
}

impl CreateUserRequest {
    pub fn into_parts(self) -> (RegisterRequest, Role) {
        (
            RegisterRequest {
                email: self.email,
                password: self.password,
                name: self.name,
            },
            self.role.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

impl UpdateUserRequest {
    pub fn validate(self) -> Result<UserUpdate, AppError> {
        let mut details = Vec::new();
        let name = self.name.map(|n| n.trim().to_string());
        if name.as_deref() == Some("") {
            details.push(FieldError {
                field: "name",
                message: "Name cannot be empty".into(),
            });
        }
        let email = self.email.as_deref().map(normalize_email);
        if let Some(email) = &email {
            if !is_valid_email(email) {
                details.push(FieldError {
                    field: "email",
                    message: "Invalid email".into(),
                });
            }
        }
        if !details.is_empty() {
            return Err(AppError::BadRequest {
                message: "Invalid input".into(),
                details,
            });
        }
        Ok(UserUpdate {
            name,
            email,
            role: self.role,
        })
    }
}
