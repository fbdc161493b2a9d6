use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite};
use sqlx::SqlitePool;
use uuid::Uuid;

pub const OWNER_COOKIE: &str = "studymap_owner";
const OWNER_COOKIE_MAX_AGE_DAYS: i64 = 30;

/// Anonymous owner of study sessions, templates and preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Account {
    pub async fn create(pool: &SqlitePool) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query("INSERT INTO accounts (id, created_at, last_activity_at) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(now.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(pool)
            .await
            .context("Failed to create account")?;

        tracing::debug!(owner = %id, "account created");
        Ok(Self {
            id,
            created_at: now,
            last_activity_at: now,
        })
    }

    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>> {
        let row: Option<AccountRow> =
            sqlx::query_as("SELECT id, created_at, last_activity_at FROM accounts WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await
                .context("Failed to get account")?;

        Ok(row.map(|r| Self {
            id: r.id,
            created_at: r.created_at.parse().unwrap_or_else(|_| Utc::now()),
            last_activity_at: r.last_activity_at.parse().unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Loads the account named by the cookie, or creates a fresh one.
    /// The flag reports whether a new cookie has to be issued.
    pub async fn resolve(pool: &SqlitePool, cookie_owner: Option<&str>) -> Result<(Self, bool)> {
        if let Some(id) = cookie_owner {
            if let Some(account) = Self::get_by_id(pool, id).await? {
                account.touch(pool).await?;
                return Ok((account, false));
            }
        }
        Ok((Self::create(pool).await?, true))
    }

    pub async fn touch(&self, pool: &SqlitePool) -> Result<()> {
        sqlx::query("UPDATE accounts SET last_activity_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(&self.id)
            .execute(pool)
            .await
            .context("Failed to update account activity")?;
        Ok(())
    }

    pub async fn delete(&self, pool: &SqlitePool) -> Result<()> {
        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(&self.id)
            .execute(pool)
            .await
            .context("Failed to delete account")?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    created_at: String,
    last_activity_at: String,
}

pub fn owner_cookie(owner_id: &str) -> String {
    Cookie::build((OWNER_COOKIE, owner_id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::days(OWNER_COOKIE_MAX_AGE_DAYS))
        .build()
        .to_string()
}

pub fn clear_owner_cookie() -> String {
    Cookie::build((OWNER_COOKIE, ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
        .to_string()
}

/// Finds the owner id in a `Cookie` request header.
pub fn owner_from_cookie_header(header: &str) -> Option<String> {
    Cookie::split_parse(header)
        .filter_map(|cookie| cookie.ok())
        .find(|cookie| cookie.name() == OWNER_COOKIE && !cookie.value().is_empty())
        .map(|cookie| cookie.value().to_string())
}
