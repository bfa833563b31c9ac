use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::auth::repo::{StoreError, StoreResult, UserStore, EMAIL_TAKEN, OPEN_ID_TAKEN};
use crate::auth::repo_types::{LoginMethod, NewUser, User, UserPatch, UserUpdate};

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: Vec<User>,
}

impl Inner {
    fn email_taken(&self, email: &str, except: Option<i64>) -> bool {
        self.rows
            .iter()
            .any(|u| u.email.as_deref() == Some(email) && Some(u.id) != except)
    }

    fn push(&mut self, user: &NewUser) -> StoreResult<User> {
        if self.rows.iter().any(|u| u.open_id == user.open_id) {
            return Err(StoreError::Conflict(OPEN_ID_TAKEN.into()));
        }
        if let Some(email) = &user.email {
            if self.email_taken(email, None) {
                return Err(StoreError::Conflict(EMAIL_TAKEN.into()));
            }
        }
        self.next_id += 1;
        let now = OffsetDateTime::now_utc();
        let row = User {
            id: self.next_id,
            open_id: user.open_id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            credentials: user.credentials.clone(),
            login_method: user.login_method,
            role: user.role,
            last_signed_in: now,
            created_at: now,
            updated_at: now,
        };
        self.rows.push(row.clone());
        Ok(row)
    }
}

/// Process-local store used by tests and offline runs.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.rows.iter().find(|u| u.id == id).cloned())
    }

    async fn find_by_open_id(&self, open_id: &str) -> StoreResult<Option<User>> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.rows.iter().find(|u| u.open_id == open_id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn list_all(&self) -> StoreResult<Vec<User>> {
        self.check()?;
        let inner = self.inner.lock().await;
        let mut rows = inner.rows.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn count(&self) -> StoreResult<i64> {
        self.check()?;
        Ok(self.inner.lock().await.rows.len() as i64)
    }

    async fn insert(&self, user: &NewUser) -> StoreResult<User> {
        self.check()?;
        self.inner.lock().await.push(user)
    }

    async fn insert_if_empty(&self, user: &NewUser) -> StoreResult<Option<User>> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        if !inner.rows.is_empty() {
            return Ok(None);
        }
        inner.push(user).map(Some)
    }

    async fn upsert(&self, patch: &UserPatch) -> StoreResult<User> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        if let Some(email) = &patch.email {
            let owner = inner.rows.iter().find(|u| u.open_id == patch.open_id).map(|u| u.id);
            if inner.email_taken(email, owner) {
                return Err(StoreError::Conflict(EMAIL_TAKEN.into()));
            }
        }

        let now = OffsetDateTime::now_utc();
        if let Some(row) = inner.rows.iter_mut().find(|u| u.open_id == patch.open_id) {
            if let Some(name) = &patch.name {
                row.name = Some(name.clone());
            }
            if let Some(email) = &patch.email {
                row.email = Some(email.clone());
            }
            if let Some(method) = patch.login_method {
                row.login_method = method;
            }
            if let Some(role) = patch.role {
                row.role = role;
            }
            if let Some(at) = patch.last_signed_in {
                row.last_signed_in = at;
            }
            row.updated_at = now;
            return Ok(row.clone());
        }

        inner.next_id += 1;
        let row = User {
            id: inner.next_id,
            open_id: patch.open_id.clone(),
            name: patch.name.clone(),
            email: patch.email.clone(),
            credentials: None,
            login_method: patch.login_method.unwrap_or(LoginMethod::External),
            role: patch.role.unwrap_or_default(),
            last_signed_in: patch.last_signed_in.unwrap_or(now),
            created_at: now,
            updated_at: now,
        };
        inner.rows.push(row.clone());
        Ok(row)
    }

    async fn update(&self, id: i64, update: &UserUpdate) -> StoreResult<User> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        if let Some(email) = &update.email {
            if inner.email_taken(email, Some(id)) {
                return Err(StoreError::Conflict(EMAIL_TAKEN.into()));
            }
        }
        let row = inner
            .rows
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(name) = &update.name {
            row.name = Some(name.clone());
        }
        if let Some(email) = &update.email {
            row.email = Some(email.clone());
        }
        if let Some(role) = update.role {
            row.role = role;
        }
        row.updated_at = OffsetDateTime::now_utc();
        Ok(row.clone())
    }

    async fn touch(&self, open_id: &str, at: OffsetDateTime) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        if let Some(row) = inner.rows.iter_mut().find(|u| u.open_id == open_id) {
            row.last_signed_in = at;
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let before = inner.rows.len();
        inner.rows.retain(|u| u.id != id);
        if inner.rows.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
