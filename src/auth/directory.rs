use std::{future::Future, sync::Arc, time::Duration};

use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::auth::repo::{StoreError, StoreResult, UserStore};
use crate::auth::repo_types::{NewUser, Role, User, UserPatch, UserUpdate};

/// Single source of truth for user records.
///
/// Wraps a [`UserStore`] with the directory rules: owner promotion, the
/// credential invariants on create, bounded store latency and best-effort
/// sign-in timestamps.
#[derive(Clone)]
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    owner_open_id: Option<String>,
    timeout: Duration,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>, owner_open_id: Option<String>, timeout: Duration) -> Self {
        Self {
            store,
            owner_open_id,
            timeout,
        }
    }

    fn is_owner(&self, open_id: &str) -> bool {
        self.owner_open_id.as_deref() == Some(open_id)
    }

    async fn bounded<T>(&self, op: &'static str, fut: impl Future<Output = StoreResult<T>>) -> StoreResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "user store timed out");
                Err(StoreError::Unavailable(format!("{op} timed out")))
            }
        }
    }

    pub async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        self.bounded("find_by_id", self.store.find_by_id(id)).await
    }

    pub async fn find_by_open_id(&self, open_id: &str) -> StoreResult<Option<User>> {
        self.bounded("find_by_open_id", self.store.find_by_open_id(open_id)).await
    }

    pub async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.bounded("find_by_email", self.store.find_by_email(email)).await
    }

    pub async fn list_all(&self) -> StoreResult<Vec<User>> {
        self.bounded("list_all", self.store.list_all()).await
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.bounded("count", self.store.count()).await? == 0)
    }

    /// Create the row if absent, otherwise apply only the supplied fields.
    #[instrument(skip(self, patch), fields(open_id = %patch.open_id))]
    pub async fn upsert_by_open_id(&self, mut patch: UserPatch) -> StoreResult<User> {
        if patch.open_id.trim().is_empty() {
            return Err(StoreError::Invalid("open_id is required for upsert".into()));
        }
        if !patch.has_changes() {
            patch.last_signed_in = Some(OffsetDateTime::now_utc());
        }
        if patch.role.is_none() && self.is_owner(&patch.open_id) {
            patch.role = Some(Role::Admin);
        }
        let user = self.bounded("upsert", self.store.upsert(&patch)).await?;
        debug!(user_id = user.id, role = %user.role, "user upserted");
        Ok(user)
    }

    /// Explicit create; uniqueness on open id and email is enforced by the store.
    #[instrument(skip(self, user), fields(open_id = %user.open_id))]
    pub async fn create(&self, mut user: NewUser) -> StoreResult<User> {
        user.validate().map_err(StoreError::Invalid)?;
        if self.is_owner(&user.open_id) {
            user.role = Role::Admin;
        }
        let created = self.bounded("insert", self.store.insert(&user)).await?;
        info!(user_id = created.id, role = %created.role, method = created.login_method.as_str(), "user created");
        Ok(created)
    }

    /// Seed the first account; `Conflict` once any row exists.
    #[instrument(skip(self, user), fields(open_id = %user.open_id))]
    pub async fn create_first_admin(&self, mut user: NewUser) -> StoreResult<User> {
        user.validate().map_err(StoreError::Invalid)?;
        user.role = Role::Admin;
        match self.bounded("insert_if_empty", self.store.insert_if_empty(&user)).await? {
            Some(created) => {
                info!(user_id = created.id, "first admin seeded");
                Ok(created)
            }
            None => Err(StoreError::Conflict("Admin user already exists".into())),
        }
    }

    pub async fn update(&self, id: i64, update: &UserUpdate) -> StoreResult<User> {
        self.bounded("update", self.store.update(id, update)).await
    }

    pub async fn delete(&self, id: i64) -> StoreResult<()> {
        self.bounded("delete", self.store.delete(id)).await
    }

    /// Refresh `last_signed_in`; a failure is logged, never returned.
    pub async fn touch(&self, open_id: &str) {
        let now = OffsetDateTime::now_utc();
        if let Err(e) = self.bounded("touch", self.store.touch(open_id, now)).await {
            warn!(error = %e, open_id, "could not refresh last_signed_in");
        }
    }
}
