//! Episodes, whole stories and the state carried between episodes.

use crate::condition::ValueRange;
use crate::ending::Ending;
use crate::gauge::{GaugeModel, GaugeState};
use crate::payload::{Character, EpisodeOutline, GaugeDraft};
use crate::simulate::PathOutcome;
use crate::tree::StoryTree;
use crate::validate::{initial_ranges, step_ranges};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One generated episode: its tree plus the endings its terminals resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub order: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub intro_text: String,
    pub tree: StoryTree,
    pub endings: Vec<Ending>,
}

impl Episode {
    pub fn from_outline(outline: &EpisodeOutline, intro_text: String, tree: StoryTree, endings: Vec<Ending>) -> Self {
        Self {
            id: outline.id.clone(),
            order: outline.order,
            title: outline.title.clone(),
            description: outline.description.clone(),
            theme: outline.theme.clone(),
            intro_text,
            tree,
            endings,
        }
    }

    pub fn max_depth(&self) -> u8 {
        self.tree.max_depth()
    }

    pub fn ending(&self, id: &str) -> Option<&Ending> {
        self.endings.iter().find(|e| e.id == id)
    }
}

/// What the analysis stage learned about the novel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialAnalysis {
    pub summary: String,
    pub characters: Vec<Character>,
    pub suggested_gauges: Vec<GaugeDraft>,
}

/// Decisions made before any episode is generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPlan {
    pub gauges: GaugeModel,
    pub final_endings: Vec<Ending>,
    pub outlines: Vec<EpisodeOutline>,
}

/// A complete story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub initial_analysis: InitialAnalysis,
    pub gauges: GaugeModel,
    pub final_endings: Vec<Ending>,
    pub episodes: Vec<Episode>,
}

impl Story {
    pub fn node_count(&self) -> usize {
        self.episodes.iter().map(|e| e.tree.len()).sum()
    }

    pub fn initial_state(&self) -> GaugeState {
        self.gauges.initial_state()
    }
}

/// State threaded from one episode into the next.
///
/// Immutable: [`advance`](Self::advance) returns a new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarriedState {
    /// Order of the next episode to generate.
    pub next_order: u32,
    /// Reachable range of every gauge after the episodes so far.
    pub gauge_ranges: BTreeMap<String, ValueRange>,
    /// Short account of the previous episode.
    pub previous_summary: Option<String>,
}

impl CarriedState {
    pub fn new(gauges: &GaugeModel) -> Self {
        Self {
            next_order: 1,
            gauge_ranges: initial_ranges(gauges),
            previous_summary: None,
        }
    }

    /// State after `episode`, given every outcome its tree allows.
    pub fn advance(&self, gauges: &GaugeModel, episode: &Episode, outcomes: &[PathOutcome]) -> Self {
        let mut endings: Vec<&str> = outcomes
            .iter()
            .filter_map(|o| episode.ending(&o.ending_id))
            .map(|e| e.title.as_str())
            .collect();
        endings.sort_unstable();
        endings.dedup();

        let mut summary = format!("Episode {} \"{}\": {}", episode.order, episode.title, episode.description);
        if !endings.is_empty() {
            summary.push_str(&format!(" Possible endings: {}.", endings.join(", ")));
        }

        Self {
            next_order: episode.order + 1,
            gauge_ranges: step_ranges(gauges, &self.gauge_ranges, outcomes),
            previous_summary: Some(summary),
        }
    }
}
