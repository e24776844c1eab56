//! Domain Models
//!
//! A game record as it appears in the catalog files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use udaplay_core::retrieval::IndexDocument;

/// A video game in the catalog
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Game {
    /// Title (e.g., "Super Mario 64")
    pub name: String,

    /// Platform it was released on (e.g., "Nintendo 64")
    pub platform: String,

    pub genre: String,

    pub publisher: String,

    pub description: String,

    /// Year of first release
    pub year_of_release: u16,
}

impl Game {
    /// Text that gets embedded and shown to the model as evidence
    pub fn document_text(&self) -> String {
        format!(
            "[{}] {} ({}) - {} Genre: {}. Publisher: {}.",
            self.platform, self.name, self.year_of_release, self.description, self.genre, self.publisher
        )
    }

    pub fn to_document(&self) -> IndexDocument {
        let metadata = BTreeMap::from([
            ("name".to_string(), self.name.clone()),
            ("platform".to_string(), self.platform.clone()),
            ("genre".to_string(), self.genre.clone()),
            ("publisher".to_string(), self.publisher.clone()),
            ("year_of_release".to_string(), self.year_of_release.to_string()),
        ]);
        IndexDocument {
            text: self.document_text(),
            metadata,
        }
    }

    /// Missing required fields, if any
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.trim().is_empty() {
            missing.push("Name");
        }
        if self.platform.trim().is_empty() {
            missing.push("Platform");
        }
        if self.year_of_release == 0 {
            missing.push("YearOfRelease");
        }
        missing
    }
}
