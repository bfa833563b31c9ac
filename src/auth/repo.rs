use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use time::OffsetDateTime;

use crate::auth::repo_types::{LoginMethod, NewUser, User, UserPatch, UserRow, UserUpdate};

const USER_COLUMNS: &str = "id, open_id, name, email, password_hash, password_salt, \
                            login_method, role, last_signed_in, created_at, updated_at";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),
    #[error("user not found")]
    NotFound,
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) const EMAIL_TAKEN: &str = "An account with this email address already exists";
pub(crate) const OPEN_ID_TAKEN: &str = "An account with this identity already exists";

/// Persistence boundary for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>>;
    async fn find_by_open_id(&self, open_id: &str) -> StoreResult<Option<User>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Newest first.
    async fn list_all(&self) -> StoreResult<Vec<User>>;
    async fn count(&self) -> StoreResult<i64>;
    async fn insert(&self, user: &NewUser) -> StoreResult<User>;
    /// Insert only when no user rows exist; `None` otherwise.
    async fn insert_if_empty(&self, user: &NewUser) -> StoreResult<Option<User>>;
    async fn upsert(&self, patch: &UserPatch) -> StoreResult<User>;
    async fn update(&self, id: i64, update: &UserUpdate) -> StoreResult<User>;
    async fn touch(&self, open_id: &str, at: OffsetDateTime) -> StoreResult<()>;
    async fn delete(&self, id: i64) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_sqlx(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            let constraint = db.constraint().unwrap_or_default();
            if constraint.contains("email") {
                StoreError::Conflict(EMAIL_TAKEN.into())
            } else {
                StoreError::Conflict(OPEN_ID_TAKEN.into())
            }
        }
        sqlx::Error::Database(ref db) if db.is_check_violation() => {
            StoreError::Invalid(db.message().to_string())
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(e.to_string()),
        other => StoreError::Other(other.into()),
    }
}

fn into_user(row: UserRow) -> StoreResult<User> {
    User::try_from(row).map_err(StoreError::Invalid)
}

fn insert_query(user: &NewUser) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::new(
        "INSERT INTO users (open_id, name, email, password_hash, password_salt, login_method, role) VALUES (",
    );
    {
        let mut values = qb.separated(", ");
        values.push_bind(&user.open_id);
        values.push_bind(&user.name);
        values.push_bind(&user.email);
        values.push_bind(user.credentials.as_ref().map(|c| c.hash.as_str()));
        values.push_bind(user.credentials.as_ref().map(|c| c.salt.as_str()));
        values.push_bind(user.login_method.as_str());
        values.push_bind(user.role.as_str());
    }
    qb.push(") RETURNING ").push(USER_COLUMNS);
    qb
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)?;
        row.map(into_user).transpose()
    }

    async fn find_by_open_id(&self, open_id: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE open_id = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(open_id)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)?;
        row.map(into_user).transpose()
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1 LIMIT 1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)?;
        row.map(into_user).transpose()
    }

    async fn list_all(&self) -> StoreResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC");
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .fetch_all(&self.db)
            .await
            .map_err(map_sqlx)?;
        rows.into_iter().map(into_user).collect()
    }

    async fn count(&self) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.db)
            .await
            .map_err(map_sqlx)
    }

    async fn insert(&self, user: &NewUser) -> StoreResult<User> {
        let row = insert_query(user)
            .build_query_as::<UserRow>()
            .fetch_one(&self.db)
            .await
            .map_err(map_sqlx)?;
        into_user(row)
    }

    async fn insert_if_empty(&self, user: &NewUser) -> StoreResult<Option<User>> {
        let mut tx = self.db.begin().await.map_err(map_sqlx)?;

        // Serializes concurrent seeders; plain reads still proceed.
        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let seeded: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users)")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        if seeded {
            tx.rollback().await.map_err(map_sqlx)?;
            return Ok(None);
        }

        let row = insert_query(user)
            .build_query_as::<UserRow>()
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;
        into_user(row).map(Some)
    }

    async fn upsert(&self, patch: &UserPatch) -> StoreResult<User> {
        let inserted_at = patch.last_signed_in.unwrap_or_else(OffsetDateTime::now_utc);
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO users (open_id, name, email, login_method, role, last_signed_in) VALUES (",
        );
        {
            let mut values = qb.separated(", ");
            values.push_bind(&patch.open_id);
            values.push_bind(&patch.name);
            values.push_bind(&patch.email);
            values.push_bind(patch.login_method.unwrap_or(LoginMethod::External).as_str());
            values.push_bind(patch.role.unwrap_or_default().as_str());
            values.push_bind(inserted_at);
        }
        qb.push(") ON CONFLICT (open_id) DO UPDATE SET ");
        {
            let mut set = qb.separated(", ");
            if patch.name.is_some() {
                set.push("name = EXCLUDED.name");
            }
            if patch.email.is_some() {
                set.push("email = EXCLUDED.email");
            }
            if patch.login_method.is_some() {
                set.push("login_method = EXCLUDED.login_method");
            }
            if patch.role.is_some() {
                set.push("role = EXCLUDED.role");
            }
            if patch.last_signed_in.is_some() {
                set.push("last_signed_in = EXCLUDED.last_signed_in");
            }
            set.push("updated_at = now()");
        }
        qb.push(" RETURNING ").push(USER_COLUMNS);

        let row = qb
            .build_query_as::<UserRow>()
            .fetch_one(&self.db)
            .await
            .map_err(map_sqlx)?;
        into_user(row)
    }

    async fn update(&self, id: i64, update: &UserUpdate) -> StoreResult<User> {
        let sql = format!(
            "UPDATE users SET name = COALESCE($2, name), email = COALESCE($3, email), \
             role = COALESCE($4, role), updated_at = now() WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(&update.name)
            .bind(&update.email)
            .bind(update.role.map(|r| r.as_str()))
            .fetch_optional(&self.db)
            .await
            .map_err(map_sqlx)?
            .ok_or(StoreError::NotFound)?;
        into_user(row)
    }

    async fn touch(&self, open_id: &str, at: OffsetDateTime) -> StoreResult<()> {
        sqlx::query("UPDATE users SET last_signed_in = $2 WHERE open_id = $1")
            .bind(open_id)
            .bind(at)
            .execute(&self.db)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
