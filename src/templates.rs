use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::study::GenerationMode;

/// Named prompt instructions an owner can reuse when generating a mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: i64,
    pub name: String,
    pub mode: GenerationMode,
    pub instructions: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub mode: GenerationMode,
    pub instructions: String,
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: i64,
    name: String,
    mode: String,
    instructions: String,
    created_at: String,
}

impl TemplateRow {
    fn into_template(self) -> Result<Template> {
        Ok(Template {
            id: self.id,
            name: self.name,
            mode: self.mode.parse()?,
            instructions: self.instructions,
            created_at: self.created_at.parse().unwrap_or_else(|_| Utc::now()),
        })
    }
}

impl Template {
    pub async fn create(pool: &SqlitePool, owner_id: &str, request: &CreateTemplateRequest) -> Result<Self> {
        let name = request.name.trim();
        if name.is_empty() {
            bail!("template name must not be empty");
        }
        if request.instructions.trim().is_empty() {
            bail!("template instructions must not be empty");
        }

        let now = Utc::now();
        let id = sqlx::query(
            "INSERT INTO templates (owner_id, name, mode, instructions, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(owner_id)
        .bind(name)
        .bind(request.mode.as_str())
        .bind(&request.instructions)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await
        .context("Failed to create template")?
        .last_insert_rowid();

        Ok(Self {
            id,
            name: name.to_string(),
            mode: request.mode,
            instructions: request.instructions.clone(),
            created_at: now,
        })
    }

    pub async fn get_by_id(pool: &SqlitePool, id: i64, owner_id: &str) -> Result<Option<Self>> {
        let row: Option<TemplateRow> = sqlx::query_as(
            "SELECT id, name, mode, instructions, created_at FROM templates WHERE id = ? AND owner_id = ?",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get template")?;

        row.map(TemplateRow::into_template).transpose()
    }

    pub async fn list_by_owner(pool: &SqlitePool, owner_id: &str) -> Result<Vec<Self>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(
            "SELECT id, name, mode, instructions, created_at FROM templates
             WHERE owner_id = ? ORDER BY name, id",
        )
        .bind(owner_id)
        .fetch_all(pool)
        .await
        .context("Failed to list templates")?;

        rows.into_iter().map(TemplateRow::into_template).collect()
    }

    /// Returns whether a template was removed.
    pub async fn delete(pool: &SqlitePool, id: i64, owner_id: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM templates WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(pool)
            .await
            .context("Failed to delete template")?
            .rows_affected();
        Ok(deleted > 0)
    }
}
