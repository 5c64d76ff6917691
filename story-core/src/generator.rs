//! Content-generation collaborators.
//!
//! The engine never talks to a model directly. Tree growth goes through a
//! [`ContentGenerator`], everything else (analysis, planning, endings)
//! through a [`StoryPlanner`]. Both are object safe so the
//! [`Director`](crate::director::Director) can hold them as trait objects.

use crate::condition::ConditionError;
use crate::config::EndingMix;
use crate::ending::Ending;
use crate::gauge::GaugeModel;
use crate::payload::{Character, EndingDraft, EpisodeOutline, GaugeDraft, NodePayload};
use crate::tree::{NodeId, NodeType};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// The collaborator failed, or returned data that does not fit the tree.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Backend error: {0}")]
    Backend(#[from] claude::Error),

    #[error("Malformed payload: {0}")]
    Schema(String),

    #[error("Non-terminal node returned no choices")]
    EmptyChoices,

    #[error("Ending node returned {0} choices")]
    UnexpectedChoices(usize),

    #[error("Unknown tag '{0}'")]
    UnknownTag(String),

    #[error("Unknown gauge '{0}'")]
    UnknownGauge(String),

    #[error("Delta {delta} for gauge '{gauge}' exceeds its range")]
    DeltaOutOfRange { gauge: String, delta: i32 },

    #[error("Payload has no text")]
    EmptyText,

    #[error("Invalid condition '{condition}': {source}")]
    InvalidCondition {
        condition: String,
        #[source]
        source: ConditionError,
    },
}

impl GenerationError {
    /// Whether the same call might succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Backend(e) if e.is_transient())
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(e: serde_json::Error) -> Self {
        GenerationError::Schema(e.to_string())
    }
}

/// Parse a structured model answer into a payload type.
pub fn parse_payload<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, GenerationError> {
    Ok(serde_json::from_value(value)?)
}

/// Everything shared by the node requests of one episode.
#[derive(Debug, Clone)]
pub struct EpisodeContext {
    pub novel_summary: String,
    pub characters: Vec<Character>,
    pub outline: EpisodeOutline,
    pub intro: String,
    pub gauges: GaugeModel,
    pub vocabulary: Vec<String>,
    /// Episode endings the tree is written towards.
    pub endings: Vec<Ending>,
    /// Summary of how the previous episode went, if any.
    pub previous_summary: Option<String>,
}

/// One step of the path leading to a requested node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub scene: String,
    pub choice: String,
}

/// A request for exactly one node.
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub context: Arc<EpisodeContext>,
    pub node_id: NodeId,
    pub depth: u8,
    pub max_depth: u8,
    pub node_type: NodeType,
    /// Parent id and the index of the parent's choice that leads here.
    pub parent: Option<(NodeId, usize)>,
    /// Scenes and choices from the root down to this node.
    pub path: Vec<PathStep>,
}

impl NodeRequest {
    pub fn is_terminal(&self) -> bool {
        self.node_type.is_terminal()
    }
}

/// Produces the text and choices of single nodes.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_node(&self, request: &NodeRequest) -> Result<NodePayload, GenerationError>;
}

/// Produces everything around the trees: analysis, plan and endings.
#[async_trait]
pub trait StoryPlanner: Send + Sync {
    /// Summarize one piece of the novel.
    async fn summarize(&self, text: &str) -> Result<String, GenerationError>;

    /// Merge chunk summaries into one.
    async fn merge_summaries(&self, summaries: &[String]) -> Result<String, GenerationError>;

    async fn extract_characters(&self, novel: &str) -> Result<Vec<Character>, GenerationError>;

    async fn suggest_gauges(&self, summary: &str) -> Result<Vec<GaugeDraft>, GenerationError>;

    async fn design_final_endings(
        &self,
        summary: &str,
        gauges: &GaugeModel,
        mix: &EndingMix,
    ) -> Result<Vec<EndingDraft>, GenerationError>;

    async fn split_episodes(
        &self,
        summary: &str,
        characters: &[Character],
        count: u32,
    ) -> Result<Vec<EpisodeOutline>, GenerationError>;

    async fn episode_intro(
        &self,
        outline: &EpisodeOutline,
        characters: &[Character],
        summary: &str,
    ) -> Result<String, GenerationError>;

    async fn design_episode_endings(
        &self,
        outline: &EpisodeOutline,
        gauges: &GaugeModel,
        vocabulary: &[String],
        count: u32,
    ) -> Result<Vec<EndingDraft>, GenerationError>;
}
