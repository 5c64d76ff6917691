//! Branching interactive stories generated from novel text.
//!
//! This crate provides:
//! - Gauges, tag-driven episode endings and gauge-driven final endings
//! - Breadth-first episode tree construction with concurrent fan-out per depth
//! - Static validation and seeded playthrough simulation
//! - Story persistence, blob storage and Markdown/HTML/JSON export
//!
//! # Quick Start
//!
//! ```ignore
//! use story_core::{Director, EngineConfig, StoryDocument};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env()?.with_episodes(2);
//!     let director = Director::from_config(config)?;
//!
//!     let novel = std::fs::read_to_string("novel.txt")?;
//!     let generated = director.generate_story(&novel, None).await?;
//!     for warning in &generated.warnings {
//!         println!("warning: {warning}");
//!     }
//!
//!     StoryDocument::new(generated.story).save_json("story.json").await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod condition;
pub mod config;
pub mod director;
pub mod ending;
pub mod export;
pub mod gauge;
pub mod generator;
pub mod payload;
pub mod persist;
pub mod prompts;
pub mod simulate;
pub mod storage;
pub mod story;
pub mod testing;
pub mod tree;
pub mod validate;
pub mod writer;

// Re-export for convenience
pub use story_macros::Schema;

// Primary public API
pub use builder::{BuildError, TreeBuilder};
pub use condition::{Condition, ConditionError};
pub use config::{ConfigError, EndingCategory, EndingMix, EngineConfig, SimulationConfig};
pub use director::{Director, DirectorError, GeneratedEpisode, GeneratedStory};
pub use ending::{Ending, EndingKind, EndingResolver, ResolveError};
pub use export::{ExportError, ExportFormat};
pub use gauge::{Gauge, GaugeError, GaugeModel, GaugeState};
pub use generator::{ContentGenerator, GenerationError, StoryPlanner};
pub use persist::{PersistError, StoryDocument, StoryMetadata};
pub use simulate::{PlaythroughSimulator, SimulationError};
pub use storage::{BlobStore, LocalBlobStore, StorageError};
pub use story::{CarriedState, Episode, InitialAnalysis, Story, StoryPlan};
pub use testing::{Fault, ScriptedWriter};
pub use tree::{Choice, Node, NodeType, StoryTree};
pub use validate::{TreeValidator, ValidationError, ValidationReport, ValidationWarning};
pub use writer::ClaudeWriter;

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    /// Rate how tense a scene is
    #[derive(Schema, Deserialize)]
    #[schema(name = "rate_tension")]
    struct RateTension {
        /// Tension from 0 to 10
        level: i64,
        /// Why the scene feels that way
        #[schema(optional)]
        reason: Option<String>,
    }

    #[test]
    fn test_schema_derive() {
        assert_eq!(RateTension::schema_name(), "rate_tension");
        assert_eq!(RateTension::schema_description(), "Rate how tense a scene is");
    }

    #[test]
    fn test_schema_shape() {
        let schema = RateTension::json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["level"]["type"], "integer");
        assert_eq!(schema["properties"]["reason"]["type"], "string");
        assert_eq!(schema["required"], serde_json::json!(["level"]));
    }

    #[test]
    fn test_as_tool() {
        let tool = RateTension::as_tool();
        assert_eq!(tool.name, "rate_tension");
        assert_eq!(tool.input_schema["type"], "object");
    }
}
