use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use super::password::PasswordDigest;

/// Prefix marking locally registered identity keys.
pub const LOCAL_OPEN_ID_PREFIX: &str = "local_";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    ContentEditor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::ContentEditor => "content_editor",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "content_editor" => Some(Role::ContentEditor),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an identity originates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    Local,
    External,
}

impl LoginMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginMethod::Local => "local",
            LoginMethod::External => "external",
        }
    }

    /// Anything other than `local` was asserted by a sign-on provider.
    pub fn from_tag(tag: &str) -> LoginMethod {
        if tag == "local" {
            LoginMethod::Local
        } else {
            LoginMethod::External
        }
    }
}

/// Canonical user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub open_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub credentials: Option<PasswordDigest>,
    pub login_method: LoginMethod,
    pub role: Role,
    pub last_signed_in: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Row shape as stored; converted to `User` after invariant checks.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub open_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub password_salt: Option<String>,
    pub login_method: String,
    pub role: String,
    pub last_signed_in: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let credentials = match (row.password_hash, row.password_salt) {
            (Some(hash), Some(salt)) => Some(PasswordDigest { hash, salt }),
            (None, None) => None,
            _ => return Err(format!("user {} has a password hash without salt or vice versa", row.id)),
        };
        let role = Role::parse(&row.role)
            .ok_or_else(|| format!("user {} has unknown role {:?}", row.id, row.role))?;
        Ok(User {
            id: row.id,
            open_id: row.open_id,
            name: row.name,
            email: row.email,
            credentials,
            login_method: LoginMethod::from_tag(&row.login_method),
            role,
            last_signed_in: row.last_signed_in,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Full record for an explicit create.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub open_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub credentials: Option<PasswordDigest>,
    pub login_method: LoginMethod,
    pub role: Role,
}

impl NewUser {
    /// Local accounts carry password material; external ones never do.
    pub fn validate(&self) -> Result<(), String> {
        if self.open_id.trim().is_empty() {
            return Err("open_id is required".into());
        }
        match (self.login_method, &self.credentials) {
            (LoginMethod::Local, None) => Err("local accounts require a password".into()),
            (LoginMethod::External, Some(_)) => {
                Err("externally authenticated accounts cannot hold a password".into())
            }
            (_, Some(c)) if c.hash.is_empty() || c.salt.is_empty() => {
                Err("password hash and salt must both be present".into())
            }
            _ => Ok(()),
        }
    }
}

/// Sparse attributes for `upsert_by_open_id`; `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub open_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub login_method: Option<LoginMethod>,
    pub role: Option<Role>,
    pub last_signed_in: Option<OffsetDateTime>,
}

impl UserPatch {
    pub fn new(open_id: impl Into<String>) -> Self {
        Self {
            open_id: open_id.into(),
            ..Default::default()
        }
    }

    pub fn has_changes(&self) -> bool {
        self.name.is_some()
            || self.email.is_some()
            || self.login_method.is_some()
            || self.role.is_some()
            || self.last_signed_in.is_some()
    }
}

/// Administrative edit of an existing user.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}
