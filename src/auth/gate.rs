use serde::{Deserialize, Serialize};

use super::repo_types::{Role, User};
use crate::error::{AppError, AppResult};

/// Ordered authorization levels; each one includes every check below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Anonymous,
    Authenticated,
    ContentOperator,
    Owner,
}

impl Tier {
    pub const ALL: [Tier; 4] = [
        Tier::Anonymous,
        Tier::Authenticated,
        Tier::ContentOperator,
        Tier::Owner,
    ];

    fn below(self) -> Option<Tier> {
        match self {
            Tier::Anonymous => None,
            Tier::Authenticated => Some(Tier::Anonymous),
            Tier::ContentOperator => Some(Tier::Authenticated),
            Tier::Owner => Some(Tier::ContentOperator),
        }
    }

    /// Every tier the principal satisfies, lowest first.
    pub fn granted_to(user: Option<&User>) -> Vec<Tier> {
        Tier::ALL
            .into_iter()
            .filter(|tier| authorize(*tier, user).is_ok())
            .collect()
    }
}

/// Check `user` against `tier`, lower tiers first.
pub fn authorize(tier: Tier, user: Option<&User>) -> AppResult<Option<&User>> {
    if let Some(lower) = tier.below() {
        authorize(lower, user)?;
    }
    match tier {
        Tier::Anonymous => Ok(user),
        Tier::Authenticated => user.map(Some).ok_or_else(AppError::unauthenticated),
        Tier::ContentOperator => match user {
            Some(u) if matches!(u.role, Role::ContentEditor | Role::Admin) => Ok(Some(u)),
            _ => Err(AppError::Forbidden("Content editor access required".into())),
        },
        Tier::Owner => match user {
            Some(u) if u.role == Role::Admin => Ok(Some(u)),
            _ => Err(AppError::Forbidden("Admin access required".into())),
        },
    }
}
