//! Database connection pool, migrations and the PostgreSQL user store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use roster_common::models::{NewUser, User, UserChanges};

use crate::store::{StoreError, UserStore};

/// Connect to PostgreSQL and return a connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await?;

    tracing::info!("connected to PostgreSQL");
    Ok(pool)
}

/// Run embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations complete");
    Ok(())
}

type UserRow = (String, String, DateTime<Utc>, DateTime<Utc>);

fn from_row((acct, fullname, created_at, updated_at): UserRow) -> User {
    User {
        acct,
        fullname,
        created_at,
        updated_at,
    }
}

/// [`UserStore`] backed by the `users` table.
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn list(&self, fullname: Option<&str>) -> Result<Vec<User>, StoreError> {
        let rows = match fullname {
            Some(needle) => {
                sqlx::query_as::<_, UserRow>(
                    "SELECT acct, fullname, created_at, updated_at FROM users \
                     WHERE lower(fullname) LIKE '%' || lower($1) || '%' ORDER BY acct",
                )
                .bind(needle)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, UserRow>(
                    "SELECT acct, fullname, created_at, updated_at FROM users ORDER BY acct",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(from_row).collect())
    }

    async fn get(&self, account: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT acct, fullname, created_at, updated_at FROM users WHERE acct = $1",
        )
        .bind(account)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "INSERT INTO users (acct, password_hash, fullname) VALUES ($1, $2, $3) \
             RETURNING acct, fullname, created_at, updated_at",
        )
        .bind(&user.acct)
        .bind(&user.password_hash)
        .bind(&user.fullname)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(user.acct.clone())
            }
            _ => StoreError::Database(e),
        })?;
        Ok(from_row(row))
    }

    async fn update(&self, account: &str, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "UPDATE users SET \
                 password_hash = COALESCE($2, password_hash), \
                 fullname = COALESCE($3, fullname), \
                 updated_at = now() \
             WHERE acct = $1 \
             RETURNING acct, fullname, created_at, updated_at",
        )
        .bind(account)
        .bind(changes.password_hash)
        .bind(changes.fullname)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(from_row))
    }

    async fn delete(&self, account: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE acct = $1")
            .bind(account)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn password_hash(&self, account: &str) -> Result<Option<String>, StoreError> {
        let hash = sqlx::query_scalar::<_, String>("SELECT password_hash FROM users WHERE acct = $1")
            .bind(account)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hash)
    }
}
