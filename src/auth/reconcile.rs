use std::sync::Arc;

use anyhow::Context;
use axum::{extract::FromRef, http::HeaderMap};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::{
    directory::UserDirectory,
    dto::{normalize_email, RegisterRequest, Registration},
    password::{hash_password, verify_password, PasswordDigest},
    provider::IdentityProvider,
    repo_types::{LoginMethod, NewUser, Role, User, UserPatch, LOCAL_OPEN_ID_PREFIX},
    session::SessionKeys,
};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

const INVALID_LOGIN: &str = "Invalid email or password";
const LOCAL_OPEN_ID_LEN: usize = 32;

/// Turns session cookies and credentials into canonical user rows.
#[derive(Clone)]
pub struct Reconciler {
    users: UserDirectory,
    keys: SessionKeys,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl FromRef<AppState> for Reconciler {
    fn from_ref(state: &AppState) -> Self {
        Self {
            users: state.users.clone(),
            keys: state.keys.clone(),
            provider: state.provider.clone(),
        }
    }
}

/// `local_` followed by random alphanumerics.
pub fn local_open_id() -> String {
    let suffix: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(LOCAL_OPEN_ID_LEN)
        .map(char::from)
        .collect();
    format!("{LOCAL_OPEN_ID_PREFIX}{suffix}")
}

async fn hash_blocking(password: String) -> AppResult<PasswordDigest> {
    let digest = tokio::task::spawn_blocking(move || hash_password(&password, None))
        .await
        .context("password hashing task")??;
    Ok(digest)
}

async fn verify_blocking(password: String, digest: PasswordDigest) -> AppResult<bool> {
    let ok = tokio::task::spawn_blocking(move || verify_password(&password, &digest))
        .await
        .context("password verification task")??;
    Ok(ok)
}

impl Reconciler {
    pub fn keys(&self) -> &SessionKeys {
        &self.keys
    }

    fn issue_for(&self, user: &User) -> AppResult<String> {
        Ok(self
            .keys
            .issue(&user.open_id, user.name.as_deref().unwrap_or_default())?)
    }

    /// The principal behind the request's session cookie, or `None` for anonymous.
    pub async fn resolve(&self, headers: &HeaderMap) -> AppResult<Option<User>> {
        let Some(token) = self.keys.read_session_cookie(headers) else {
            return Ok(None);
        };
        let claims = match self.keys.verify(token) {
            Ok(claims) => claims,
            Err(_) => return Ok(None),
        };

        if let Some(user) = self.users.find_by_open_id(&claims.sub).await? {
            self.users.touch(&user.open_id).await;
            let refreshed = self.users.find_by_open_id(&user.open_id).await?;
            return Ok(Some(refreshed.unwrap_or(user)));
        }

        debug!(open_id = %claims.sub, "session for a deleted account");
        Ok(None)
    }

    #[instrument(skip(self, password))]
    pub async fn login_local(&self, email: &str, password: &str) -> AppResult<(User, String)> {
        let email = normalize_email(email);
        let Some(user) = self.users.find_by_email(&email).await? else {
            warn!("login for unknown email");
            return Err(AppError::Unauthorized(INVALID_LOGIN.into()));
        };
        let Some(digest) = user.credentials.clone() else {
            warn!(user_id = user.id, "login for account without password");
            return Err(AppError::Unauthorized(INVALID_LOGIN.into()));
        };
        if !verify_blocking(password.to_string(), digest).await? {
            warn!(user_id = user.id, "login with wrong password");
            return Err(AppError::Unauthorized(INVALID_LOGIN.into()));
        }

        self.users.touch(&user.open_id).await;
        let token = self.issue_for(&user)?;
        info!(user_id = user.id, "user logged in");
        Ok((user, token))
    }

    async fn local_account(&self, registration: Registration, role: Role) -> AppResult<NewUser> {
        let credentials = hash_blocking(registration.password).await?;
        Ok(NewUser {
            open_id: local_open_id(),
            name: Some(registration.name),
            email: Some(registration.email),
            credentials: Some(credentials),
            login_method: LoginMethod::Local,
            role,
        })
    }

    /// Validated local account with the given role; no session is issued.
    pub async fn create_local(&self, request: RegisterRequest, role: Role) -> AppResult<User> {
        let registration = request.validate()?;
        if self.users.find_by_email(&registration.email).await?.is_some() {
            return Err(AppError::Conflict("Email already registered".into()));
        }
        let account = self.local_account(registration, role).await?;
        Ok(self.users.create(account).await?)
    }

    #[instrument(skip(self, request))]
    pub async fn register_local(&self, request: RegisterRequest) -> AppResult<(User, String)> {
        let user = self.create_local(request, Role::User).await?;
        let token = self.issue_for(&user)?;
        info!(user_id = user.id, "user registered");
        Ok((user, token))
    }

    /// `Conflict` once any user exists.
    pub async fn ensure_unseeded(&self) -> AppResult<()> {
        if !self.users.is_empty().await? {
            return Err(AppError::Conflict("Admin user already exists".into()));
        }
        Ok(())
    }

    /// Seed the first admin; rejected once any user exists.
    #[instrument(skip(self, request))]
    pub async fn bootstrap_admin(&self, request: RegisterRequest) -> AppResult<(User, String)> {
        self.ensure_unseeded().await?;
        let registration = request.validate()?;
        let account = self.local_account(registration, Role::Admin).await?;
        let user = self.users.create_first_admin(account).await?;
        let token = self.issue_for(&user)?;
        Ok((user, token))
    }

    #[instrument(skip(self, code, state))]
    pub async fn complete_oauth(&self, code: &str, state: &str) -> AppResult<(User, String)> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| AppError::NotFound("OAuth is not configured".into()))?;
        if code.is_empty() {
            return Err(AppError::bad_request("code is required"));
        }
        let identity = provider
            .exchange_code(code, state)
            .await
            .context("oauth code exchange")?;

        let mut patch = UserPatch::new(identity.open_id);
        patch.name = identity.name;
        patch.email = identity.email.as_deref().map(normalize_email);
        patch.login_method = Some(LoginMethod::External);
        patch.last_signed_in = Some(OffsetDateTime::now_utc());
        let user = self.users.upsert_by_open_id(patch).await?;
        let token = self.issue_for(&user)?;
        info!(user_id = user.id, "oauth sign-in completed");
        Ok((user, token))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::{header, HeaderValue};

    use super::*;
    use crate::auth::{memory::MemoryUserStore, provider::ProviderIdentity};

    struct StaticProvider(ProviderIdentity);

    #[async_trait]
    impl IdentityProvider for StaticProvider {
        async fn exchange_code(&self, code: &str, _state: &str) -> anyhow::Result<ProviderIdentity> {
            anyhow::ensure!(code == "good-code", "unknown code");
            Ok(self.0.clone())
        }
    }

    fn reconciler_with(store: Arc<MemoryUserStore>) -> Reconciler {
        Reconciler::from_ref(&AppState::fake_with(store, None))
    }

    fn reconciler() -> Reconciler {
        reconciler_with(Arc::new(MemoryUserStore::new()))
    }

    fn register(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "correct-horse".into(),
            name: "Ada".into(),
        }
    }

    fn cookie_headers(rec: &Reconciler, token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("{}={}", rec.keys().cookie_name, token);
        headers.insert(header::COOKIE, HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn local_open_ids_are_namespaced_and_distinct() {
        let a = local_open_id();
        let b = local_open_id();
        assert!(a.starts_with("local_"));
        assert_eq!(a.len(), "local_".len() + 32);
        assert!(a["local_".len()..].chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn register_then_login() {
        let rec = reconciler();
        let (user, token) = rec.register_local(register(" Ada@X.com ")).await.unwrap();
        assert_eq!(user.email.as_deref(), Some("ada@x.com"));
        assert_eq!(user.role, Role::User);
        assert_eq!(user.login_method, LoginMethod::Local);
        assert!(user.open_id.starts_with("local_"));
        assert_eq!(rec.keys().verify(&token).unwrap().sub, user.open_id);

        let (again, _) = rec.login_local("ADA@x.com", "correct-horse").await.unwrap();
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let rec = reconciler();
        rec.register_local(register("a@x.com")).await.unwrap();
        let err = rec.register_local(register("A@X.COM")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn login_failures_share_one_message() {
        let store = Arc::new(MemoryUserStore::new());
        let rec = reconciler_with(store);
        rec.register_local(register("a@x.com")).await.unwrap();

        let mut external = UserPatch::new("ext-1");
        external.email = Some("ext@x.com".into());
        rec.users.upsert_by_open_id(external).await.unwrap();

        let wrong_password = rec.login_local("a@x.com", "nope-nope").await.unwrap_err();
        let unknown = rec.login_local("b@x.com", "correct-horse").await.unwrap_err();
        let no_password = rec.login_local("ext@x.com", "correct-horse").await.unwrap_err();
        for err in [wrong_password, unknown, no_password] {
            assert!(matches!(err, AppError::Unauthorized(ref m) if m == INVALID_LOGIN));
        }
    }

    #[tokio::test]
    async fn resolve_without_or_with_bad_cookie_is_anonymous() {
        let rec = reconciler();
        assert!(rec.resolve(&HeaderMap::new()).await.unwrap().is_none());
        let headers = cookie_headers(&rec, "garbage.token.here");
        assert!(rec.resolve(&headers).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_loads_and_touches_existing_user() {
        let rec = reconciler();
        let (user, token) = rec.register_local(register("a@x.com")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let resolved = rec
            .resolve(&cookie_headers(&rec, &token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, user.id);
        assert!(resolved.last_signed_in > user.last_signed_in);
    }

    #[tokio::test]
    async fn deleted_local_account_resolves_anonymous() {
        let rec = reconciler();
        let (user, token) = rec.register_local(register("a@x.com")).await.unwrap();
        rec.users.delete(user.id).await.unwrap();
        assert!(rec.resolve(&cookie_headers(&rec, &token)).await.unwrap().is_none());
        assert!(rec.users.list_all().await.unwrap().is_empty());
    }

    fn oauth_reconciler(open_id: &str, name: &str) -> Reconciler {
        let provider = Arc::new(StaticProvider(ProviderIdentity {
            open_id: open_id.into(),
            name: Some(name.into()),
            email: None,
        }));
        Reconciler::from_ref(&AppState::fake_with(Arc::new(MemoryUserStore::new()), Some(provider)))
    }

    #[tokio::test]
    async fn external_identity_is_provisioned_through_oauth() {
        let rec = oauth_reconciler("ext-42", "Grace");
        let (_, token) = rec.complete_oauth("good-code", "s").await.unwrap();
        let user = rec
            .resolve(&cookie_headers(&rec, &token))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.open_id, "ext-42");
        assert_eq!(user.name.as_deref(), Some("Grace"));
        assert_eq!(user.login_method, LoginMethod::External);
        assert!(user.credentials.is_none());
        assert_eq!(user.role, Role::User);
    }

    #[tokio::test]
    async fn owner_identity_is_provisioned_as_admin() {
        let rec = oauth_reconciler("owner-open-id", "Owner");
        let (user, _) = rec.complete_oauth("good-code", "s").await.unwrap();
        assert_eq!(user.role, Role::Admin);
    }

    #[tokio::test]
    async fn unknown_external_subject_is_anonymous() {
        let rec = reconciler();
        let token = rec.keys().issue("ext-42", "Grace").unwrap();
        assert!(rec.resolve(&cookie_headers(&rec, &token)).await.unwrap().is_none());
        assert!(rec.users.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleted_external_account_stays_deleted() {
        let rec = oauth_reconciler("ext-7", "Victim");
        let (user, token) = rec.complete_oauth("good-code", "s").await.unwrap();
        rec.users.delete(user.id).await.unwrap();

        assert!(rec.resolve(&cookie_headers(&rec, &token)).await.unwrap().is_none());
        assert!(rec.users.find_by_open_id("ext-7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resolve_surfaces_unavailable_store() {
        let store = Arc::new(MemoryUserStore::new());
        let rec = reconciler_with(store.clone());
        let (_, token) = rec.register_local(register("a@x.com")).await.unwrap();
        store.set_unavailable(true);
        let err = rec.resolve(&cookie_headers(&rec, &token)).await.unwrap_err();
        assert!(matches!(err, AppError::Unavailable(_)));
    }

    #[tokio::test]
    async fn bootstrap_only_once() {
        let rec = reconciler();
        let (admin, _) = rec.bootstrap_admin(register("root@x.com")).await.unwrap();
        assert_eq!(admin.role, Role::Admin);
        let err = rec.bootstrap_admin(register("other@x.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "Admin user already exists"));
    }

    #[tokio::test]
    async fn bootstrap_validates_input() {
        let rec = reconciler();
        let mut bad = register("root@x.com");
        bad.password = "short".into();
        assert!(matches!(
            rec.bootstrap_admin(bad).await.unwrap_err(),
            AppError::BadRequest { .. }
        ));
        assert!(rec.users.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn bootstrap_after_seeding_conflicts_before_validation() {
        let rec = reconciler();
        rec.bootstrap_admin(register("root@x.com")).await.unwrap();
        let mut bad = register("not-an-email");
        bad.password = "short".into();
        let err = rec.bootstrap_admin(bad).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref m) if m == "Admin user already exists"));
    }

    #[tokio::test]
    async fn oauth_provisions_external_user() {
        let store = Arc::new(MemoryUserStore::new());
        let provider = Arc::new(StaticProvider(ProviderIdentity {
            open_id: "gh-7".into(),
            name: Some("Linus".into()),
            email: Some("Linus@X.com".into()),
        }));
        let rec = Reconciler::from_ref(&AppState::fake_with(store, Some(provider)));

        let (user, token) = rec.complete_oauth("good-code", "s").await.unwrap();
        assert_eq!(user.open_id, "gh-7");
        assert_eq!(user.email.as_deref(), Some("linus@x.com"));
        assert!(user.credentials.is_none());
        assert_eq!(rec.keys().verify(&token).unwrap().sub, "gh-7");

        let (again, _) = rec.complete_oauth("good-code", "s").await.unwrap();
        assert_eq!(again.id, user.id);

        assert!(matches!(
            rec.complete_oauth("bad-code", "s").await.unwrap_err(),
            AppError::Internal(_)
        ));
    }

    #[tokio::test]
    async fn oauth_without_provider_is_not_found() {
        let rec = reconciler();
        assert!(matches!(
            rec.complete_oauth("code", "s").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
