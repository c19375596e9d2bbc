use std::path::Path;

use tracing::info;

use crate::errors::{AppError, ConfigError};
use crate::models::scene::Scene;

/// A submitted story: a title and its paragraphs in narrative order.
/// Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manuscript {
    title: String,
    paragraphs: Vec<String>,
}

impl Manuscript {
    /// Parses raw text. The first non-blank line is the title (`《》` removed),
    /// every following non-blank line is one paragraph. Returns `None` when the
    /// text has no non-blank line at all.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut lines = raw
            .trim_start_matches('\u{feff}')
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty());

        let title = lines.next()?.replace(['《', '》'], "").trim().to_string();
        let paragraphs = lines.map(str::to_string).collect();

        Some(Self { title, paragraphs })
    }

    /// Reads and parses a manuscript file.
    pub async fn load(path: &Path) -> Result<Self, AppError> {
        info!("Reading manuscript {}", path.display());
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::ManuscriptUnreadable {
                path: path.to_path_buf(),
                source,
            })?;

        let manuscript = Self::parse(&raw)
            .ok_or_else(|| ConfigError::EmptyManuscript(path.to_path_buf()))?;

        info!("Title: {}", manuscript.title);
        info!(
            "{} paragraphs, ~{} characters",
            manuscript.paragraphs.len(),
            manuscript.char_count()
        );
        Ok(manuscript)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn paragraphs(&self) -> &[String] {
        &self.paragraphs
    }

    /// Sum of paragraph lengths in characters.
    pub fn char_count(&self) -> usize {
        self.paragraphs.iter().map(|p| p.chars().count()).sum()
    }

    /// Paragraphs joined by blank lines.
    pub fn full_text(&self) -> String {
        self.paragraphs.join("\n\n")
    }

    /// Paragraphs prefixed with their 1-based number, e.g. `【3】...`.
    pub fn numbered_text(&self) -> String {
        self.paragraphs
            .iter()
            .enumerate()
            .map(|(i, p)| format!("【{}】{}", i + 1, p))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Only the paragraphs the scene covers, joined by blank lines.
    pub fn scene_text(&self, scene: &Scene) -> String {
        let start = scene.start.saturating_sub(1);
        let end = scene.end.min(self.paragraphs.len());
        self.paragraphs
            .get(start..end)
            .unwrap_or_default()
            .join("\n\n")
    }
}
