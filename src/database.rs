use anyhow::{Context, Result};
use directories::ProjectDirs;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;

const MAX_SESSIONS_DEFAULT: usize = 50;
const EXPIRATION_DAYS_DEFAULT: i64 = 30;
const DB_FILE_NAME: &str = "studymap.db";

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_sessions_per_owner: usize,
    pub expiration_days: i64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: std::env::var("STUDYMAP_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_db_path()),
            max_sessions_per_owner: std::env::var("STUDYMAP_MAX_SESSIONS")
                .unwrap_or_else(|_| MAX_SESSIONS_DEFAULT.to_string())
                .parse()
                .unwrap_or(MAX_SESSIONS_DEFAULT),
            expiration_days: std::env::var("STUDYMAP_EXPIRATION_DAYS")
                .unwrap_or_else(|_| EXPIRATION_DAYS_DEFAULT.to_string())
                .parse()
                .unwrap_or(EXPIRATION_DAYS_DEFAULT),
        }
    }
}

fn default_db_path() -> PathBuf {
    ProjectDirs::from("", "", "studymap")
        .map(|dirs| dirs.data_dir().join(DB_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME))
}

#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
    config: DatabaseConfig,
}

impl Database {
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory '{}'", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let db = Self {
            pool,
            config: config.clone(),
        };

        db.run_migrations().await?;
        tracing::info!(path = %config.path.display(), "database ready");
        Ok(db)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY NOT NULL,
                created_at TEXT NOT NULL,
                last_activity_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create accounts table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS study_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                mode TEXT NOT NULL,
                document TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (owner_id) REFERENCES accounts(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create study_sessions table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL,
                mode TEXT NOT NULL,
                instructions TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES accounts(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create templates table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                owner_id TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (owner_id) REFERENCES accounts(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create preferences table")?;

        sqlx::query(
            r#"CREATE INDEX IF NOT EXISTS idx_study_sessions_owner ON study_sessions(owner_id, updated_at DESC)"#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create study_sessions_owner index")?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_study_sessions_expire ON study_sessions(updated_at)"#)
            .execute(&self.pool)
            .await
            .context("Failed to create study_sessions_expire index")?;

        sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_templates_owner ON templates(owner_id)"#)
            .execute(&self.pool)
            .await
            .context("Failed to create templates_owner index")?;

        Ok(())
    }

    /// Removes study sessions and idle accounts older than the expiration window.
    /// Returns `(sessions_deleted, accounts_deleted)`.
    pub async fn cleanup_expired(&self) -> Result<(u64, u64)> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(self.config.expiration_days)).to_rfc3339();

        let sessions_deleted = sqlx::query(r#"DELETE FROM study_sessions WHERE updated_at < ?"#)
            .bind(&cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to cleanup expired study sessions")?
            .rows_affected();

        let accounts_deleted = sqlx::query(
            r#"DELETE FROM accounts WHERE id NOT IN (SELECT DISTINCT owner_id FROM study_sessions)
               AND last_activity_at < ?"#,
        )
        .bind(&cutoff)
        .execute(&self.pool)
        .await
        .context("Failed to cleanup idle accounts")?
        .rows_affected();

        if sessions_deleted > 0 || accounts_deleted > 0 {
            tracing::info!(sessions_deleted, accounts_deleted, "expired data removed");
        }

        Ok((sessions_deleted, accounts_deleted))
    }
}
