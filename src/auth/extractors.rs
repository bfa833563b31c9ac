use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use super::{
    gate::{authorize, Tier},
    reconcile::Reconciler,
    repo_types::User,
};
use crate::{error::AppError, state::AppState};

/// Principal resolved for this request, cached so stacked extractors hit the store once.
#[derive(Clone)]
struct Resolved(Option<User>);

async fn principal(parts: &mut Parts, state: &AppState) -> Result<Option<User>, AppError> {
    if let Some(Resolved(user)) = parts.extensions.get::<Resolved>() {
        return Ok(user.clone());
    }
    let user = Reconciler::from_ref(state).resolve(&parts.headers).await?;
    parts.extensions.insert(Resolved(user.clone()));
    Ok(user)
}

async fn require(parts: &mut Parts, state: &AppState, tier: Tier) -> Result<User, AppError> {
    let user = principal(parts, state).await?;
    authorize(tier, user.as_ref())?;
    user.ok_or_else(AppError::unauthenticated)
}

/// Anonymous tier: the principal if there is one.
pub struct MaybeUser(pub Option<User>);

/// Any signed-in user.
pub struct AuthUser(pub User);

/// Role `content_editor` or `admin`.
pub struct ContentOperator(pub User);

/// Role `admin`.
pub struct Owner(pub User);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(principal(parts, state).await?))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        require(parts, state, Tier::Authenticated).await.map(AuthUser)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ContentOperator {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        require(parts, state, Tier::ContentOperator).await.map(ContentOperator)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Owner {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        require(parts, state, Tier::Owner).await.map(Owner)
    }
}
