use axum::{
    extract::{FromRef, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{extractors::Owner, reconcile::Reconciler},
    error::{AppError, AppResult},
    extract::AppJson,
    state::AppState,
};

use super::dto::{CreateUserRequest, UpdateUserRequest, UserView};

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", get(get_user).patch(update_user).delete(delete_user))
}

#[instrument(skip(state, _admin))]
pub async fn list_users(
    State(state): State<AppState>,
    Owner(_admin): Owner,
) -> AppResult<Json<Vec<UserView>>> {
    let users = state.users.list_all().await?;
    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

#[instrument(skip(state, admin, payload), fields(admin_id = admin.id))]
pub async fn create_user(
    State(state): State<AppState>,
    Owner(admin): Owner,
    AppJson(payload): AppJson<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserView>)> {
    let (request, role) = payload.into_parts();
    let user = Reconciler::from_ref(&state).create_local(request, role).await?;
    info!(user_id = user.id, role = %user.role, "user created by admin");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, _admin))]
pub async fn get_user(
    State(state): State<AppState>,
    Owner(_admin): Owner,
    Path(id): Path<i64>,
) -> AppResult<Json<UserView>> {
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, admin, payload), fields(admin_id = admin.id))]
pub async fn update_user(
    State(state): State<AppState>,
    Owner(admin): Owner,
    Path(id): Path<i64>,
    AppJson(payload): AppJson<UpdateUserRequest>,
) -> AppResult<Json<UserView>> {
    let update = payload.validate()?;
    if id == admin.id && update.role.is_some() {
        return Err(AppError::Conflict("Cannot change your own role".into()));
    }
    let user = state.users.update(id, &update).await?;
    info!(user_id = user.id, role = %user.role, "user updated by admin");
    Ok(Json(user.into()))
}

#[instrument(skip(state, admin), fields(admin_id = admin.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    Owner(admin): Owner,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    if id == admin.id {
        return Err(AppError::Conflict("Cannot delete your own account".into()));
    }
    state.users.delete(id).await?;
    info!(user_id = id, "user deleted by admin");
    Ok(StatusCode::NO_CONTENT)
}
