//! Structured payloads exchanged with the model.
//!
//! Every payload derives [`Schema`], so the writer can force the model to
//! answer through a tool whose input schema matches the struct. Payloads are
//! still untrusted: [`NodePayload::into_node`] checks them against the
//! episode's tag vocabulary and gauges before anything reaches a tree.

use crate::generator::{GenerationError, NodeRequest};
use crate::gauge::{Gauge, GaugeModel};
use crate::tree::{Choice, Node, NodeDetails};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use story_macros::Schema;

/// Range every model-designed gauge uses.
pub const DRAFT_GAUGE_MIN: i32 = 0;
pub const DRAFT_GAUGE_MAX: i32 = 100;

/// Write one scene of the interactive story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "write_node")]
pub struct NodePayload {
    /// Scene prose shown to the player
    pub text: String,
    /// Emotions, situation and relationship changes in this scene
    #[serde(default)]
    pub details: Option<NodeDetails>,
    /// Options offered to the player. Must be empty for an ending scene.
    #[serde(default)]
    #[schema(optional)]
    pub choices: Vec<ChoicePayload>,
}

/// One option offered to the player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "choice")]
pub struct ChoicePayload {
    /// What the player does
    pub text: String,
    /// Attitude tags from the allowed vocabulary
    #[serde(default)]
    pub tags: Vec<String>,
    /// Gauge changes caused by this choice, keyed by gauge name
    #[serde(default)]
    #[schema(optional)]
    pub gauge_deltas: BTreeMap<String, i32>,
    /// Immediate reaction of the other characters
    #[serde(default)]
    pub reaction: Option<String>,
}

impl NodePayload {
    /// Check the payload against the request and turn it into a node.
    pub fn into_node(self, request: &NodeRequest) -> Result<Node, GenerationError> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(GenerationError::EmptyText);
        }
        if request.is_terminal() && !self.choices.is_empty() {
            return Err(GenerationError::UnexpectedChoices(self.choices.len()));
        }
        if !request.is_terminal() && self.choices.is_empty() {
            return Err(GenerationError::EmptyChoices);
        }

        let context = &request.context;
        let vocabulary: BTreeSet<&str> = context.vocabulary.iter().map(String::as_str).collect();
        let choices = self
            .choices
            .into_iter()
            .enumerate()
            .map(|(i, choice)| {
                choice.into_choice(format!("{}-c{i}", request.node_id), &vocabulary, &context.gauges)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Node {
            id: request.node_id.clone(),
            depth: request.depth,
            parent_id: request.parent.as_ref().map(|(id, _)| id.clone()),
            choice_index: request.parent.as_ref().map(|(_, i)| *i),
            node_type: request.node_type,
            text: text.to_string(),
            details: self.details,
            choices,
            ending_id: None,
        })
    }
}

impl ChoicePayload {
    fn into_choice(
        self,
        id: String,
        vocabulary: &BTreeSet<&str>,
        gauges: &GaugeModel,
    ) -> Result<Choice, GenerationError> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(GenerationError::EmptyText);
        }

        let mut tags = BTreeSet::new();
        for tag in self.tags {
            let tag = tag.trim().to_lowercase();
            if !vocabulary.contains(tag.as_str()) {
                return Err(GenerationError::UnknownTag(tag));
            }
            tags.insert(tag);
        }

        check_deltas(&self.gauge_deltas, gauges)?;

        Ok(Choice {
            id,
            text: text.to_string(),
            tags,
            gauge_deltas: self.gauge_deltas,
            reaction: self.reaction.filter(|r| !r.trim().is_empty()),
        })
    }
}

/// Reject deltas naming an unknown gauge or moving one further than its span.
pub(crate) fn check_deltas(deltas: &BTreeMap<String, i32>, gauges: &GaugeModel) -> Result<(), GenerationError> {
    for (name, &delta) in deltas {
        let gauge = gauges
            .get(name)
            .ok_or_else(|| GenerationError::UnknownGauge(name.clone()))?;
        if !gauge.accepts_delta(delta) {
            return Err(GenerationError::DeltaOutOfRange {
                gauge: name.clone(),
                delta,
            });
        }
    }
    Ok(())
}

/// A character appearing in the novel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "character")]
pub struct Character {
    /// Name used most often in the text
    pub name: String,
    /// Other names, titles and nicknames
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Role in the story and personality
    #[serde(default)]
    pub description: String,
    /// Relationships with other characters
    #[serde(default)]
    pub relationships: Vec<String>,
}

/// Record every important character in the novel
#[derive(Debug, Clone, Serialize, Deserialize, Schema)]
#[schema(name = "record_characters")]
pub struct CharacterList {
    #[schema(min_items = 1)]
    pub characters: Vec<Character>,
}

/// A gauge proposed for the story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "gauge")]
pub struct GaugeDraft {
    /// Short lowercase identifier used in conditions, e.g. "hope"
    pub name: String,
    /// Display name
    #[serde(default)]
    pub label: String,
    /// What the gauge measures
    #[serde(default)]
    pub meaning: String,
    /// What a value of 0 means
    #[serde(default)]
    pub min_label: String,
    /// What a value of 100 means
    #[serde(default)]
    pub max_label: String,
    /// How the gauge shapes the story
    #[serde(default)]
    pub description: String,
    /// Starting value between 0 and 100 that fits the opening of the novel
    pub initial: i32,
}

impl GaugeDraft {
    /// Turn the draft into a gauge on the 0..=100 scale.
    pub fn into_gauge(self) -> Gauge {
        let name = self.name.trim().to_lowercase();
        let label = if self.label.trim().is_empty() {
            name.clone()
        } else {
            self.label
        };
        Gauge {
            name,
            label,
            meaning: self.meaning,
            min_label: self.min_label,
            max_label: self.max_label,
            description: self.description,
            min: DRAFT_GAUGE_MIN,
            max: DRAFT_GAUGE_MAX,
            initial: self.initial.clamp(DRAFT_GAUGE_MIN, DRAFT_GAUGE_MAX),
        }
    }
}

/// Propose gauges that track the state of the story
#[derive(Debug, Clone, Serialize, Deserialize, Schema)]
#[schema(name = "propose_gauges")]
pub struct GaugeList {
    #[schema(min_items = 1)]
    pub gauges: Vec<GaugeDraft>,
}

/// An ending with the condition that selects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "ending")]
pub struct EndingDraft {
    /// Short unique identifier
    pub id: String,
    pub title: String,
    /// Condition such as "hope >= 70 AND trust >= 50", or "default"
    pub condition: String,
    /// Ending prose
    pub text: String,
    /// Kind of ending, e.g. happy or tragic
    #[serde(default)]
    pub category: Option<String>,
    /// Gauge changes applied when this ending is reached
    #[serde(default)]
    #[schema(optional)]
    pub gauge_changes: BTreeMap<String, i32>,
}

/// Record the designed endings, most specific first
#[derive(Debug, Clone, Serialize, Deserialize, Schema)]
#[schema(name = "record_endings")]
pub struct EndingList {
    #[schema(min_items = 1)]
    pub endings: Vec<EndingDraft>,
}

/// One episode of the adapted story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "episode_outline")]
pub struct EpisodeOutline {
    pub id: String,
    pub title: String,
    /// Position in the story, starting at 1
    pub order: u32,
    /// What happens in this episode
    pub description: String,
    /// Central theme
    #[serde(default)]
    pub theme: String,
    /// Names of the characters that matter most here
    #[serde(default)]
    pub key_characters: Vec<String>,
}

/// Split the novel into episodes
#[derive(Debug, Clone, Serialize, Deserialize, Schema)]
#[schema(name = "record_episodes")]
pub struct EpisodeOutlineList {
    #[schema(min_items = 1)]
    pub episodes: Vec<EpisodeOutline>,
}

/// Sort outlines by their declared order and renumber them from 1.
pub fn renumber_outlines(mut outlines: Vec<EpisodeOutline>) -> Vec<EpisodeOutline> {
    outlines.sort_by_key(|o| o.order);
    for (i, outline) in outlines.iter_mut().enumerate() {
        outline.order = i as u32 + 1;
        if outline.id.trim().is_empty() {
            outline.id = format!("ep{}", outline.order);
        }
    }
    outlines
}
