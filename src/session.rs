use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;

use crate::document::Document;
use crate::study::{GenerationMode, StudyContent};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("session limit of {max} reached; delete a study session first")]
pub struct SessionLimitReached {
    pub max: usize,
}

/// Generated study material persisted for one owner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: i64,
    #[serde(skip)]
    pub owner_id: String,
    pub title: String,
    pub mode: GenerationMode,
    #[serde(skip)]
    pub document: Document,
    pub content: StudyContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListItem {
    pub id: i64,
    pub title: String,
    pub mode: GenerationMode,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListResponse {
    pub sessions: Vec<SessionListItem>,
    pub max_sessions: usize,
    pub current_session_count: usize,
}

pub struct NewSession<'a> {
    pub owner_id: &'a str,
    pub title: &'a str,
    pub document: &'a Document,
    pub content: &'a StudyContent,
}

impl StudySession {
    pub async fn create(pool: &SqlitePool, new: NewSession<'_>, max_sessions: usize) -> Result<Self> {
        let current = Self::count_by_owner(pool, new.owner_id).await?;
        if current as usize >= max_sessions {
            return Err(SessionLimitReached { max: max_sessions }.into());
        }

        let title = new.title.trim();
        if title.is_empty() {
            bail!("session title must not be empty");
        }

        let mode = new.content.mode();
        let document_json = serde_json::to_string(new.document).context("Failed to encode document")?;
        let content_json = serde_json::to_string(new.content).context("Failed to encode study content")?;

        let now = Utc::now();
        let id = sqlx::query(
            r#"INSERT INTO study_sessions (owner_id, title, mode, document, content, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new.owner_id)
        .bind(title)
        .bind(mode.as_str())
        .bind(&document_json)
        .bind(&content_json)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(pool)
        .await
        .context("Failed to create study session")?
        .last_insert_rowid();

        tracing::info!(id, owner = new.owner_id, %mode, "study session created");

        Ok(Self {
            id,
            owner_id: new.owner_id.to_string(),
            title: title.to_string(),
            mode,
            document: new.document.clone(),
            content: new.content.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    pub async fn get_by_id(pool: &SqlitePool, id: i64, owner_id: &str) -> Result<Option<Self>> {
        let row: Option<StudySessionRow> = sqlx::query_as(
            "SELECT id, owner_id, title, mode, document, content, created_at, updated_at
             FROM study_sessions WHERE id = ? AND owner_id = ? AND is_deleted = 0",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get study session")?;

        row.map(StudySessionRow::into_session).transpose()
    }

    pub async fn list_by_owner(
        pool: &SqlitePool,
        owner_id: &str,
        expiration_days: i64,
    ) -> Result<Vec<SessionListItem>> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            title: String,
            mode: String,
            updated_at: String,
        }

        let rows: Vec<Row> = sqlx::query_as(
            "SELECT id, title, mode, updated_at FROM study_sessions
             WHERE owner_id = ? AND is_deleted = 0
             ORDER BY updated_at DESC, id DESC",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await
        .context("Failed to list study sessions")?;

        rows.into_iter()
            .map(|r| {
                let updated_at: DateTime<Utc> = r.updated_at.parse().unwrap_or_else(|_| Utc::now());
                Ok(SessionListItem {
                    id: r.id,
                    title: r.title,
                    mode: r.mode.parse()?,
                    updated_at,
                    expires_at: updated_at + chrono::Duration::days(expiration_days),
                })
            })
            .collect()
    }

    /// Replaces the stored content; the mode may not change.
    pub async fn update_content(&self, pool: &SqlitePool, content: StudyContent) -> Result<Self> {
        if content.mode() != self.mode {
            bail!(
                "cannot store {} content in a {} session",
                content.mode(),
                self.mode
            );
        }
        let content_json = serde_json::to_string(&content).context("Failed to encode study content")?;
        let now = Utc::now();
        sqlx::query("UPDATE study_sessions SET content = ?, updated_at = ? WHERE id = ?")
            .bind(&content_json)
            .bind(now.to_rfc3339())
            .bind(self.id)
            .execute(pool)
            .await
            .context("Failed to update study session")?;

        Ok(Self {
            content,
            updated_at: now,
            ..self.clone()
        })
    }

    pub async fn rename(&self, pool: &SqlitePool, title: &str) -> Result<Self> {
        let title = title.trim();
        if title.is_empty() {
            bail!("session title must not be empty");
        }
        let now = Utc::now();
        sqlx::query("UPDATE study_sessions SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(now.to_rfc3339())
            .bind(self.id)
            .execute(pool)
            .await
            .context("Failed to rename study session")?;

        Ok(Self {
            title: title.to_string(),
            updated_at: now,
            ..self.clone()
        })
    }

    pub async fn delete(&self, pool: &SqlitePool) -> Result<()> {
        sqlx::query("UPDATE study_sessions SET is_deleted = 1 WHERE id = ?")
            .bind(self.id)
            .execute(pool)
            .await
            .context("Failed to delete study session")?;
        Ok(())
    }

    pub async fn count_by_owner(pool: &SqlitePool, owner_id: &str) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM study_sessions WHERE owner_id = ? AND is_deleted = 0",
        )
        .bind(owner_id)
        .fetch_one(pool)
        .await
        .context("Failed to count study sessions")?;
        Ok(count)
    }

    /// Every live session of an owner with its content, oldest first.
    pub async fn all_by_owner(pool: &SqlitePool, owner_id: &str) -> Result<Vec<Self>> {
        let rows: Vec<StudySessionRow> = sqlx::query_as(
            "SELECT id, owner_id, title, mode, document, content, created_at, updated_at
             FROM study_sessions WHERE owner_id = ? AND is_deleted = 0
             ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await
        .context("Failed to load study sessions")?;

        rows.into_iter().map(StudySessionRow::into_session).collect()
    }
}

#[derive(sqlx::FromRow)]
struct StudySessionRow {
    id: i64,
    owner_id: String,
    title: String,
    mode: String,
    document: String,
    content: String,
    created_at: String,
    updated_at: String,
}

impl StudySessionRow {
    fn into_session(self) -> Result<StudySession> {
        let content: StudyContent = serde_json::from_str(&self.content)
            .with_context(|| format!("Stored content of study session {} is corrupt", self.id))?;
        let document: Document = serde_json::from_str(&self.document)
            .with_context(|| format!("Stored document of study session {} is corrupt", self.id))?;
        Ok(StudySession {
            id: self.id,
            owner_id: self.owner_id,
            title: self.title,
            mode: self.mode.parse()?,
            document,
            content,
            created_at: self.created_at.parse().unwrap_or_else(|_| Utc::now()),
            updated_at: self.updated_at.parse().unwrap_or_else(|_| Utc::now()),
        })
    }
}
