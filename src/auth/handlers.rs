use axum::{
    extract::{FromRef, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{AuthAck, LoginRequest, MeResponse, OAuthCallbackQuery, PublicUser, RegisterRequest},
        extractors::MaybeUser,
        gate::Tier,
        reconcile::Reconciler,
        session::SessionKeys,
    },
    error::{AppError, AppResult},
    extract::AppJson,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/init-admin", post(init_admin))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
}

pub fn oauth_routes() -> Router<AppState> {
    Router::new().route("/oauth/callback", get(oauth_callback))
}

fn with_session(rec: &Reconciler, token: &str, ack: AuthAck) -> impl IntoResponse {
    ([(header::SET_COOKIE, rec.keys().session_cookie(token))], Json(ack))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let rec = Reconciler::from_ref(&state);
    let (_, token) = rec.register_local(payload).await?;
    Ok(with_session(&rec, &token, AuthAck::ok("Registration successful")))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let rec = Reconciler::from_ref(&state);
    let (_, token) = rec.login_local(&payload.email, &payload.password).await?;
    Ok(with_session(&rec, &token, AuthAck::ok("Login successful")))
}

#[instrument(skip(state, payload))]
pub async fn init_admin(
    State(state): State<AppState>,
    payload: Result<AppJson<RegisterRequest>, AppError>,
) -> AppResult<impl IntoResponse> {
    let rec = Reconciler::from_ref(&state);
    rec.ensure_unseeded().await?;
    let AppJson(payload) = payload?;
    let (user, token) = rec.bootstrap_admin(payload).await?;
    info!(user_id = user.id, "admin user initialized");
    Ok(with_session(&rec, &token, AuthAck::ok("Admin user created")))
}

#[instrument(skip(keys))]
pub async fn logout(State(keys): State<SessionKeys>) -> impl IntoResponse {
    (
        [(header::SET_COOKIE, keys.clear_session_cookie())],
        Json(AuthAck::ok("Logged out")),
    )
}

#[instrument(skip_all)]
pub async fn me(MaybeUser(user): MaybeUser) -> Json<MeResponse> {
    Json(MeResponse {
        authenticated: user.is_some(),
        tiers: Tier::granted_to(user.as_ref()),
        user: user.as_ref().map(PublicUser::from),
    })
}

#[instrument(skip(state, query))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> AppResult<impl IntoResponse> {
    let rec = Reconciler::from_ref(&state);
    let (_, token) = rec.complete_oauth(&query.code, &query.state).await?;
    Ok((
        StatusCode::FOUND,
        [
            (header::SET_COOKIE, rec.keys().session_cookie(&token)),
            (header::LOCATION, "/".to_string()),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{HeaderMap, Request},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{
        memory::MemoryUserStore,
        provider::{IdentityProvider, ProviderIdentity},
        repo_types::Role,
    };

    fn app(state: AppState) -> Router {
        auth_routes().merge(oauth_routes()).with_state(state)
    }

    async fn post_json(state: &AppState, path: &str, body: Value) -> Response {
        app(state.clone())
            .oneshot(
                Request::post(path)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn get_with_cookie(state: &AppState, path: &str, cookie: Option<&str>) -> Response {
        let mut req = Request::get(path);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        app(state.clone())
            .oneshot(req.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// `name=value` of the first Set-Cookie header.
    fn cookie_pair(headers: &HeaderMap) -> String {
        let set = headers.get(header::SET_COOKIE).unwrap().to_str().unwrap();
        set.split(';').next().unwrap().to_string()
    }

    fn account() -> Value {
        json!({ "email": "ada@example.com", "password": "correct-horse", "name": "Ada" })
    }

    #[tokio::test]
    async fn register_sets_cookie_and_me_sees_user() {
        let state = AppState::fake();
        let res = post_json(&state, "/auth/register", account()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let set_cookie = res.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.contains("HttpOnly"));
        let cookie = cookie_pair(res.headers());
        assert_eq!(json_body(res).await["success"], true);

        let me = json_body(get_with_cookie(&state, "/auth/me", Some(&cookie)).await).await;
        assert_eq!(me["authenticated"], true);
        assert_eq!(me["user"]["email"], "ada@example.com");
        assert_eq!(me["user"]["role"], "user");
        assert_eq!(me["tiers"], json!(["anonymous", "authenticated"]));
        assert!(me["user"].get("password_hash").is_none());
    }

    #[tokio::test]
    async fn me_is_anonymous_without_cookie() {
        let state = AppState::fake();
        let me = json_body(get_with_cookie(&state, "/auth/me", None).await).await;
        assert_eq!(me["authenticated"], false);
        assert!(me["user"].is_null());
        assert_eq!(me["tiers"], json!(["anonymous"]));
    }

    #[tokio::test]
    async fn register_reports_field_errors() {
        let state = AppState::fake();
        let res = post_json(
            &state,
            "/auth/register",
            json!({ "email": "bad", "password": "short", "name": "Ada" }),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body = json_body(res).await;
        assert_eq!(body["details"][0]["field"], "email");
        assert_eq!(body["details"][1]["field"], "password");
    }

    #[tokio::test]
    async fn incomplete_body_is_bad_request_not_unprocessable() {
        let state = AppState::fake();
        for path in ["/auth/register", "/auth/login", "/auth/init-admin"] {
            let res = post_json(&state, path, json!({ "email": "a@x.com", "name": "A" })).await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{path}");
            let body = json_body(res).await;
            assert_eq!(body["details"][0]["field"], "body");
            assert!(body["details"][0]["message"].as_str().unwrap().contains("password"));
        }
        assert!(state.users.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_register_is_conflict() {
        let state = AppState::fake();
        post_json(&state, "/auth/register", account()).await;
        let res = post_json(&state, "/auth/register", account()).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn login_errors_do_not_reveal_which_half_failed() {
        let state = AppState::fake();
        post_json(&state, "/auth/register", account()).await;

        let wrong_password = post_json(
            &state,
            "/auth/login",
            json!({ "email": "ada@example.com", "password": "wrong-horse" }),
        )
        .await;
        let unknown_email = post_json(
            &state,
            "/auth/login",
            json!({ "email": "nobody@example.com", "password": "correct-horse" }),
        )
        .await;
        assert_eq!(wrong_password.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unknown_email.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(wrong_password).await, json_body(unknown_email).await);

        let ok = post_json(
            &state,
            "/auth/login",
            json!({ "email": "ADA@example.com", "password": "correct-horse" }),
        )
        .await;
        assert_eq!(ok.status(), StatusCode::OK);
        assert!(ok.headers().contains_key(header::SET_COOKIE));
    }

    #[tokio::test]
    async fn init_admin_only_once() {
        let state = AppState::fake();
        let res = post_json(&state, "/auth/init-admin", account()).await;
        assert_eq!(res.status(), StatusCode::OK);
        let cookie = cookie_pair(res.headers());
        let me = json_body(get_with_cookie(&state, "/auth/me", Some(&cookie)).await).await;
        assert_eq!(me["user"]["role"], "admin");

        let again = post_json(
            &state,
            "/auth/init-admin",
            json!({ "email": "eve@example.com", "password": "correct-horse", "name": "Eve" }),
        )
        .await;
        assert_eq!(again.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(again).await["error"], "Admin user already exists");

        let malformed = post_json(
            &state,
            "/auth/init-admin",
            json!({ "email": "nope", "password": "short", "name": "" }),
        )
        .await;
        assert_eq!(malformed.status(), StatusCode::CONFLICT);

        let incomplete = post_json(&state, "/auth/init-admin", json!({ "email": "x@y.z" })).await;
        assert_eq!(incomplete.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn logout_clears_cookie_even_when_anonymous() {
        let state = AppState::fake();
        let res = post_json(&state, "/auth/logout", json!({})).await;
        assert_eq!(res.status(), StatusCode::OK);
        let set_cookie = res.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("app_session_id=;"));
        assert!(set_cookie.contains("Max-Age=0"));
    }

    struct FixedProvider;

    #[async_trait]
    impl IdentityProvider for FixedProvider {
        async fn exchange_code(&self, _code: &str, _state: &str) -> anyhow::Result<ProviderIdentity> {
            Ok(ProviderIdentity {
                open_id: "sso-1".into(),
                name: Some("Grace".into()),
                email: None,
            })
        }
    }

    #[tokio::test]
    async fn oauth_callback_redirects_home_with_session() {
        let store = Arc::new(MemoryUserStore::new());
        let state = AppState::fake_with(store, Some(Arc::new(FixedProvider)));
        let res = get_with_cookie(&state, "/oauth/callback?code=abc&state=xyz", None).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/");
        let cookie = cookie_pair(res.headers());

        let me = json_body(get_with_cookie(&state, "/auth/me", Some(&cookie)).await).await;
        assert_eq!(me["user"]["name"], "Grace");
        let user = state.users.find_by_open_id("sso-1").await.unwrap().unwrap();
        assert!(user.credentials.is_none());
        assert_eq!(user.role, Role::User);
    }

    #[tokio::test]
    async fn oauth_callback_without_provider_is_404() {
        let state = AppState::fake();
        let res = get_with_cookie(&state, "/oauth/callback?code=abc&state=xyz", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
