use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::layout::Palette;
use crate::study::{ContentError, DEFAULT_QUESTION_COUNT, Difficulty, GenerationMode, GenerationOptions, MAX_QUESTION_COUNT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub default_mode: GenerationMode,
    pub question_count: u32,
    pub difficulty: Difficulty,
    /// Branch colors for mind maps; empty means the built-in palette.
    pub palette: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_mode: GenerationMode::GuidedStudy,
            question_count: DEFAULT_QUESTION_COUNT,
            difficulty: Difficulty::default(),
            palette: Vec::new(),
        }
    }
}

impl Preferences {
    pub fn validate(&self) -> Result<(), ContentError> {
        if !(1..=MAX_QUESTION_COUNT).contains(&self.question_count) {
            return Err(ContentError::QuestionCount(self.question_count));
        }
        if self.palette.iter().any(|color| color.trim().is_empty()) {
            return Err(ContentError::Empty("palette color"));
        }
        Ok(())
    }

    pub fn palette(&self) -> Palette {
        let default = Palette::default();
        Palette::new(self.palette.clone(), default.root()).unwrap_or(default)
    }

    /// Generation options seeded from these preferences.
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            question_count: self.question_count,
            difficulty: self.difficulty,
            instructions: None,
        }
    }

    pub async fn get(pool: &SqlitePool, owner_id: &str) -> Result<Self> {
        let data: Option<String> = sqlx::query_scalar("SELECT data FROM preferences WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_optional(pool)
            .await
            .context("Failed to load preferences")?;

        match data {
            Some(json) => serde_json::from_str(&json).context("Stored preferences are corrupt"),
            None => Ok(Self::default()),
        }
    }

    pub async fn put(&self, pool: &SqlitePool, owner_id: &str) -> Result<()> {
        let data = serde_json::to_string(self).context("Failed to encode preferences")?;
        sqlx::query(
            r#"INSERT INTO preferences (owner_id, data, updated_at) VALUES (?, ?, ?)
               ON CONFLICT(owner_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at"#,
        )
        .bind(owner_id)
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .context("Failed to save preferences")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Account;
    use crate::database::tests::test_database;
    use tempfile::TempDir;

    #[tokio::test]
    async fn defaults_until_saved_then_upserts() {
        let temp_dir = TempDir::new().unwrap();
        let db = test_database(&temp_dir).await;
        let pool = db.pool();
        let owner = Account::create(pool).await.unwrap();

        assert_eq!(Preferences::get(pool, &owner.id).await.unwrap(), Preferences::default());

        let mut prefs = Preferences {
            default_mode: GenerationMode::Quiz,
            question_count: 5,
            difficulty: Difficulty::Hard,
            palette: vec!["#ff0000".into(), "#00ff00".into()],
        };
        prefs.put(pool, &owner.id).await.unwrap();
        assert_eq!(Preferences::get(pool, &owner.id).await.unwrap(), prefs);

        prefs.question_count = 7;
        prefs.put(pool, &owner.id).await.unwrap();
        assert_eq!(Preferences::get(pool, &owner.id).await.unwrap().question_count, 7);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let prefs: Preferences = serde_json::from_str(r#"{"questionCount": 12}"#).unwrap();
        assert_eq!(prefs.question_count, 12);
        assert_eq!(prefs.default_mode, GenerationMode::GuidedStudy);
        assert_eq!(prefs.palette().len(), Palette::default().len());
    }

    #[test]
    fn custom_palette_keeps_root_color() {
        let prefs = Preferences {
            palette: vec!["#123456".into()],
            ..Preferences::default()
        };
        let palette = prefs.palette();
        assert_eq!(palette.colors(), ["#123456".to_string()]);
        assert_eq!(palette.root(), Palette::default().root());
        assert!(Preferences { question_count: 0, ..prefs }.validate().is_err());
    }
}
