//! Story persistence.
//!
//! A finished story is saved as one pretty-printed JSON document holding
//! the episodes, the initial analysis and the final endings, plus a small
//! metadata block that can be read without loading the whole file.

use crate::story::Story;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Current story file version.
pub const STORY_VERSION: u32 = 1;

/// A saved story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryDocument {
    /// File format version for compatibility checking.
    pub version: u32,

    /// Unique id of this story.
    pub id: Uuid,

    /// When the document was created, in seconds since the Unix epoch.
    pub saved_at: String,

    pub metadata: StoryMetadata,

    #[serde(flatten)]
    pub story: Story,
}

/// Summary readable without loading the episodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMetadata {
    pub episode_count: usize,
    pub node_count: usize,
    pub gauges: Vec<String>,
    pub final_endings: usize,
    #[serde(default)]
    pub saved_at: String,
}

impl StoryDocument {
    pub fn new(story: Story) -> Self {
        let saved_at = unix_now();
        let metadata = StoryMetadata {
            episode_count: story.episodes.len(),
            node_count: story.node_count(),
            gauges: story.gauges.names().map(str::to_string).collect(),
            final_endings: story.final_endings.len(),
            saved_at: saved_at.clone(),
        };
        Self {
            version: STORY_VERSION,
            id: Uuid::new_v4(),
            saved_at,
            metadata,
            story,
        }
    }

    pub fn into_story(self) -> Story {
        self.story
    }

    /// Save to a JSON file.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Parse a document, rejecting other file versions.
    pub fn from_json(content: &str) -> Result<Self, PersistError> {
        check_version(content)?;
        Ok(serde_json::from_str(content)?)
    }

    /// Read only the metadata of a story file.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<StoryMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            metadata: StoryMetadata,
        }

        check_version(&content)?;
        let partial: Partial = serde_json::from_str(&content)?;
        Ok(partial.metadata)
    }
}

fn check_version(content: &str) -> Result<(), PersistError> {
    #[derive(Deserialize)]
    struct Versioned {
        version: u32,
    }

    let versioned: Versioned = serde_json::from_str(content)?;
    if versioned.version != STORY_VERSION {
        return Err(PersistError::VersionMismatch {
            expected: STORY_VERSION,
            found: versioned.version,
        });
    }
    Ok(())
}

/// Current time as seconds since the Unix epoch.
fn unix_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_story;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("story.json");

        let doc = StoryDocument::new(sample_story());
        doc.save_json(&path).await.unwrap();

        let loaded = StoryDocument::load_json(&path).await.unwrap();
        assert_eq!(loaded, doc);
        assert_eq!(loaded.metadata.episode_count, 2);
    }

    #[tokio::test]
    async fn test_layout_has_top_level_story_fields() {
        let doc = StoryDocument::new(sample_story());
        let value = serde_json::to_value(&doc).unwrap();
        assert!(value["episodes"].is_array());
        assert!(value["final_endings"].is_array());
        assert!(value["initial_analysis"].is_object());
        assert_eq!(value["final_endings"][0]["condition"], "hope >= 80");
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("old.json");

        let mut value = serde_json::to_value(StoryDocument::new(sample_story())).unwrap();
        value["version"] = serde_json::json!(99);
        tokio::fs::write(&path, value.to_string()).await.unwrap();

        assert!(matches!(
            StoryDocument::load_json(&path).await,
            Err(PersistError::VersionMismatch { expected: 1, found: 99 })
        ));
        assert!(matches!(
            StoryDocument::peek_metadata(&path).await,
            Err(PersistError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_out_of_range_depth_is_rejected_on_load() {
        let mut value = serde_json::to_value(StoryDocument::new(sample_story())).unwrap();
        assert_eq!(value["episodes"][0]["tree"]["max_depth"], 2);
        value["episodes"][0]["tree"]["max_depth"] = serde_json::json!(1);

        let err = StoryDocument::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::Json(_)));
        assert!(err.to_string().contains("max_depth"));
    }

    #[tokio::test]
    async fn test_peek_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("story.json");
        StoryDocument::new(sample_story()).save_json(&path).await.unwrap();

        let metadata = StoryDocument::peek_metadata(&path).await.unwrap();
        assert_eq!(metadata.gauges, vec!["hope".to_string()]);
        assert_eq!(metadata.final_endings, 2);
    }
}
