use crate::state::AppState;
use axum::Router;

pub mod claims;
pub mod directory;
pub mod dto;
pub mod extractors;
pub mod gate;
pub mod handlers;
pub mod memory;
pub mod password;
pub mod provider;
pub mod reconcile;
pub mod repo;
pub mod repo_types;
pub mod session;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::auth_routes())
        .merge(handlers::oauth_routes())
}
