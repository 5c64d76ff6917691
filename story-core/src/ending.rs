//! Endings and their resolution.
//!
//! Candidates are checked in their declared priority order and the first
//! whose condition holds wins. There is no implicit fallback: a catch-all
//! ending must be declared explicitly, and [`order_by_priority`] keeps it
//! last.

use crate::condition::Condition;
use crate::config::EndingCategory;
use crate::gauge::{Deltas, GaugeModel, GaugeState};
use crate::generator::GenerationError;
use crate::payload::{check_deltas, EndingDraft};
use crate::tree::{StoryTree, TagCounts};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndingKind {
    /// Chosen at an episode's terminal nodes from tag counts.
    Episode,
    /// Chosen after the last episode from gauge values.
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ending {
    pub id: String,
    pub kind: EndingKind,
    pub title: String,
    pub condition: Condition,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<EndingCategory>,
    /// Applied to the running gauge state when an episode ends here.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gauge_changes: Deltas,
}

impl Ending {
    pub fn new(id: impl Into<String>, kind: EndingKind, title: impl Into<String>, condition: Condition) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            condition,
            text: String::new(),
            category: None,
            gauge_changes: Deltas::new(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_category(mut self, category: EndingCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_gauge_changes(mut self, changes: Deltas) -> Self {
        self.gauge_changes = changes;
        self
    }

    /// Check a model-designed ending and convert it.
    ///
    /// Final ending conditions may only name gauges. Gauge changes must
    /// always name gauges. Unknown categories are dropped.
    pub fn from_draft(draft: EndingDraft, kind: EndingKind, gauges: &GaugeModel) -> Result<Self, GenerationError> {
        let condition = Condition::parse(&draft.condition).map_err(|source| GenerationError::InvalidCondition {
            condition: draft.condition.clone(),
            source,
        })?;

        if kind == EndingKind::Final {
            if let Some(name) = condition.referenced_names().into_iter().find(|n| !gauges.contains(n)) {
                return Err(GenerationError::UnknownGauge(name));
            }
        }
        check_deltas(&draft.gauge_changes, gauges)?;

        let id = draft.id.trim();
        if id.is_empty() {
            return Err(GenerationError::Schema(format!("ending '{}' has no id", draft.title)));
        }

        Ok(Self {
            id: id.to_string(),
            kind,
            title: draft.title,
            condition,
            text: draft.text,
            category: draft.category.and_then(|c| c.parse().ok()),
            gauge_changes: draft.gauge_changes,
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No ending matches at {subject} (candidates: {})", .candidates.join(", "))]
    NoMatchingEnding { subject: String, candidates: Vec<String> },
}

/// Keep declared order but move catch-all endings to the end.
pub fn order_by_priority(endings: Vec<Ending>) -> Vec<Ending> {
    let (catch_all, specific): (Vec<_>, Vec<_>) = endings.into_iter().partition(|e| e.condition.is_catch_all());
    specific.into_iter().chain(catch_all).collect()
}

/// Picks the first candidate whose condition holds.
#[derive(Debug, Clone, Copy)]
pub struct EndingResolver<'a> {
    candidates: &'a [Ending],
}

impl<'a> EndingResolver<'a> {
    pub fn new(candidates: &'a [Ending]) -> Self {
        Self { candidates }
    }

    /// Resolve against arbitrary counters. `subject` names what is being
    /// resolved and only appears in errors.
    pub fn resolve<V>(&self, subject: &str, state: &BTreeMap<String, V>) -> Result<&'a Ending, ResolveError>
    where
        V: Copy + Into<i64>,
    {
        self.candidates
            .iter()
            .find(|ending| ending.condition.evaluate_map(state))
            .ok_or_else(|| ResolveError::NoMatchingEnding {
                subject: subject.to_string(),
                candidates: self.candidates.iter().map(|e| e.id.clone()).collect(),
            })
    }

    /// Episode ending for a terminal node's tag counts.
    pub fn resolve_tags(&self, node_id: &str, tags: &TagCounts) -> Result<&'a Ending, ResolveError> {
        self.resolve(node_id, tags)
    }

    /// Final ending for the gauge state after the last episode.
    pub fn resolve_gauges(&self, state: &GaugeState) -> Result<&'a Ending, ResolveError> {
        self.resolve("final gauges", state.as_map())
    }
}

/// Resolve an episode ending for every terminal node and record it on the
/// node. Terminals without a valid path from the root are left alone.
pub fn annotate_terminals(tree: &mut StoryTree, endings: &[Ending]) -> Result<(), ResolveError> {
    let resolver = EndingResolver::new(endings);
    let mut resolved = Vec::new();
    for terminal in tree.terminals() {
        let Some((tags, _)) = tree.accumulate(&terminal.id) else {
            continue;
        };
        let ending = resolver.resolve_tags(&terminal.id, &tags)?;
        debug!(node_id = %terminal.id, ending = %ending.id, "Ending resolved");
        resolved.push((terminal.id.clone(), ending.id.clone()));
    }

    for (node_id, ending_id) in resolved {
        if let Some(node) = tree.get_mut(&node_id) {
            node.ending_id = Some(ending_id);
        }
    }
    Ok(())
}
