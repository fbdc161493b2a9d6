use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::io::{Cursor, Write};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::layout::{Palette, layout_outline};
use crate::measure::TextMetrics;
use crate::render::{RenderOptions, render_svg};
use crate::session::StudySession;
use crate::utils::slugify;

/// Zips every live session of `owner_id`. Returns an empty buffer when there is nothing to export.
pub async fn export_sessions_zip(pool: &SqlitePool, owner_id: &str, palette: &Palette) -> Result<Vec<u8>> {
    let sessions = StudySession::all_by_owner(pool, owner_id)
        .await
        .context("Failed to fetch study sessions for export")?;

    if sessions.is_empty() {
        return Ok(Vec::new());
    }

    let mut cursor = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(&mut cursor);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644);

    let render_options = RenderOptions {
        palette: palette.clone(),
        ..RenderOptions::default()
    };

    for session in &sessions {
        let stem = format!("{}-{}", slugify(&session.title), session.id);

        zip.start_file(format!("{stem}.json"), options)
            .context("Failed to start zip file entry")?;
        zip.write_all(&export_session_json(session)?)
            .context("Failed to write session content")?;

        if let Some(outline) = session.content.mind_map() {
            let layout = layout_outline(outline, &render_options.metrics, &render_options.palette)
                .with_context(|| format!("Failed to lay out mind map of session {}", session.id))?;
            let svg = render_svg(&layout, &render_options)?;
            zip.start_file(format!("{stem}.mindmap.svg"), options)
                .context("Failed to start zip file entry")?;
            zip.write_all(svg.as_bytes())
                .context("Failed to write mind map SVG")?;
        }
    }

    zip.finish().context("Failed to finalize ZIP file")?;
    tracing::info!(owner = owner_id, sessions = sessions.len(), "exported study sessions");

    Ok(cursor.into_inner())
}

pub fn export_session_json(session: &StudySession) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(session).context("Failed to encode study session")
}
