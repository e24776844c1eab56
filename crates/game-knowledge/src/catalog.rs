//! Game Catalog
//!
//! Loads games from a directory of JSON files (one game per file, the
//! file stem becomes the document id) and ingests them into a vector
//! index. The local retrieval source refuses to answer until ingestion ran.

use std::path::Path;
use std::sync::Arc;

use udaplay_core::{Embedder, VectorIndex};

use crate::error::{KnowledgeError, Result};
use crate::model::Game;

const SAMPLE_CATALOG: &str = include_str!("../data/sample_games.json");

/// A game with its document id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub game: Game,
}

#[derive(Clone, Debug, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Ids are assigned as `game-001`, `game-002`, ... in iteration order
    pub fn from_games(games: impl IntoIterator<Item = Game>) -> Self {
        let entries = games
            .into_iter()
            .enumerate()
            .map(|(i, game)| CatalogEntry {
                id: format!("game-{:03}", i + 1),
                game,
            })
            .collect();
        Self { entries }
    }

    /// The bundled sample catalog
    pub fn sample() -> Result<Self> {
        let games: Vec<Game> = serde_json::from_str(SAMPLE_CATALOG)?;
        Ok(Self::from_games(games))
    }

    /// Read every `*.json` file in `dir`, sorted by file name.
    ///
    /// A file that does not parse as a game fails the whole load.
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !tokio::fs::try_exists(dir).await? {
            return Err(KnowledgeError::CatalogNotFound(dir.display().to_string()));
        }

        let mut paths = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let file = path.display().to_string();
            let raw = tokio::fs::read_to_string(&path).await?;
            let game: Game = serde_json::from_str(&raw).map_err(|e| KnowledgeError::InvalidGame {
                file: file.clone(),
                reason: e.to_string(),
            })?;
            let missing = game.missing_fields();
            if !missing.is_empty() {
                return Err(KnowledgeError::InvalidGame {
                    file,
                    reason: format!("missing {}", missing.join(", ")),
                });
            }
            let id = path
                .file_stem()
                .map_or_else(|| format!("game-{:03}", entries.len() + 1), |s| s.to_string_lossy().into_owned());
            entries.push(CatalogEntry { id, game });
        }

        tracing::info!(dir = %dir.display(), games = entries.len(), "catalog loaded");
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Embed every game and upsert it into `index`.
///
/// Re-ingesting replaces documents with the same id.
pub async fn ingest(catalog: &Catalog, embedder: &Arc<dyn Embedder>, index: &Arc<dyn VectorIndex>) -> Result<usize> {
    if catalog.is_empty() {
        return Err(KnowledgeError::EmptyCatalog);
    }
    for entry in catalog.entries() {
        let document = entry.game.to_document();
        let embedding = embedder.embed(&document.text).await?;
        index.upsert(&entry.id, embedding, document).await?;
        tracing::debug!(id = %entry.id, game = %entry.game.name, "game ingested");
    }
    tracing::info!(games = catalog.len(), "catalog ingested");
    Ok(catalog.len())
}
