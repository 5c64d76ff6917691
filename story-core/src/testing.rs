//! Testing utilities for the story engine.
//!
//! This module provides tools for tests that must not reach the API:
//! - [`ScriptedWriter`], a deterministic stand-in for both collaborator traits
//! - fixtures for contexts, episodes and whole stories

use crate::condition::Condition;
use crate::config::EndingMix;
use crate::ending::{Ending, EndingKind};
use crate::gauge::{Deltas, Gauge, GaugeModel};
use crate::generator::{ContentGenerator, EpisodeContext, GenerationError, NodeRequest, StoryPlanner};
use crate::payload::{Character, ChoicePayload, EndingDraft, EpisodeOutline, GaugeDraft, NodePayload};
use crate::story::{Episode, InitialAnalysis, Story};
use crate::tree::{Choice, Node, NodeType, StoryTree};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A failure the scripted writer can inject at a depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A transient backend error.
    Backend,
    /// A non-terminal node without choices.
    EmptyChoices,
    /// A choice tagged outside the vocabulary.
    UnknownTag,
}

/// Deterministic writer for tests.
///
/// Every non-terminal node gets `branching` choices. Choice `i` carries the
/// `i`-th vocabulary tag (wrapping), and the first choice also raises the
/// first gauge by 5. Faults fire for the first `n` requests at their depth.
pub struct ScriptedWriter {
    branching: usize,
    faults: Mutex<BTreeMap<u8, (Fault, usize)>>,
    node_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedWriter {
    pub fn new(branching: usize) -> Self {
        Self {
            branching: branching.max(1),
            faults: Mutex::new(BTreeMap::new()),
            node_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Inject `fault` into the next `times` requests at `depth`.
    pub fn with_fault(self, depth: u8, fault: Fault, times: usize) -> Self {
        if let Ok(mut faults) = self.faults.lock() {
            faults.insert(depth, (fault, times));
        }
        self
    }

    /// Number of node requests served so far.
    pub fn node_calls(&self) -> usize {
        self.node_calls.load(Ordering::SeqCst)
    }

    /// Most node requests that were in progress at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_fault(&self, depth: u8) -> Option<Fault> {
        let mut faults = self.faults.lock().ok()?;
        let (fault, remaining) = faults.get_mut(&depth)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(*fault)
    }

    fn script_node(&self, request: &NodeRequest) -> NodePayload {
        let context = &request.context;
        let text = format!("{}: scene {}", context.outline.title, request.node_id);
        if request.is_terminal() {
            return NodePayload {
                text,
                details: None,
                choices: Vec::new(),
            };
        }

        let first_gauge = context.gauges.names().next().map(str::to_string);
        let choices = (0..self.branching)
            .map(|i| {
                let tag = context
                    .vocabulary
                    .get(i % context.vocabulary.len().max(1))
                    .cloned()
                    .unwrap_or_else(|| "brave".to_string());
                let mut gauge_deltas = BTreeMap::new();
                if let (0, Some(gauge)) = (i, &first_gauge) {
                    gauge_deltas.insert(gauge.clone(), 5);
                }
                ChoicePayload {
                    text: format!("Option {i} at {}", request.node_id),
                    tags: vec![tag],
                    gauge_deltas,
                    reaction: Some(format!("Reaction {i}")),
                }
            })
            .collect();
        NodePayload {
            text,
            details: None,
            choices,
        }
    }
}

#[async_trait]
impl ContentGenerator for ScriptedWriter {
    async fn generate_node(&self, request: &NodeRequest) -> Result<NodePayload, GenerationError> {
        self.node_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut payload = self.script_node(request);
        match self.take_fault(request.depth) {
            None => Ok(payload),
            Some(Fault::Backend) => Err(GenerationError::Backend(claude::Error::Network(
                "scripted failure".to_string(),
            ))),
            Some(Fault::EmptyChoices) => {
                payload.choices.clear();
                Ok(payload)
            }
            Some(Fault::UnknownTag) => {
                for choice in &mut payload.choices {
                    choice.tags = vec!["not-a-tag".to_string()];
                }
                Ok(payload)
            }
        }
    }
}

#[async_trait]
impl StoryPlanner for ScriptedWriter {
    async fn summarize(&self, text: &str) -> Result<String, GenerationError> {
        let head: String = text.chars().take(40).collect();
        Ok(format!("Summary of '{}'", head.trim()))
    }

    async fn merge_summaries(&self, summaries: &[String]) -> Result<String, GenerationError> {
        Ok(summaries.join(" "))
    }

    async fn extract_characters(&self, _novel: &str) -> Result<Vec<Character>, GenerationError> {
        Ok(vec![character("Mara", "A lighthouse keeper"), character("Ilan", "A smuggler")])
    }

    async fn suggest_gauges(&self, _summary: &str) -> Result<Vec<GaugeDraft>, GenerationError> {
        Ok(vec![gauge_draft("hope", 50), gauge_draft("trust", 40)])
    }

    async fn design_final_endings(
        &self,
        _summary: &str,
        gauges: &GaugeModel,
        _mix: &EndingMix,
    ) -> Result<Vec<EndingDraft>, GenerationError> {
        let gauge = gauges.names().next().unwrap_or("hope");
        Ok(vec![
            ending_draft("default", "Quiet Shore", "default", "neutral", &[]),
            ending_draft("bright", "Bright Harbor", &format!("{gauge} >= 70"), "happy", &[]),
            ending_draft("fallen", "Dark Water", &format!("{gauge} <= 40"), "tragic", &[]),
        ])
    }

    async fn split_episodes(
        &self,
        _summary: &str,
        characters: &[Character],
        count: u32,
    ) -> Result<Vec<EpisodeOutline>, GenerationError> {
        Ok((1..=count)
            .rev()
            .map(|order| EpisodeOutline {
                id: format!("ep{order}"),
                title: format!("Chapter {order}"),
                order,
                description: format!("Events of chapter {order}"),
                theme: "loyalty".to_string(),
                key_characters: characters.iter().map(|c| c.name.clone()).collect(),
            })
            .collect())
    }

    async fn episode_intro(
        &self,
        outline: &EpisodeOutline,
        _characters: &[Character],
        _summary: &str,
    ) -> Result<String, GenerationError> {
        Ok(format!("{} begins.", outline.title))
    }

    async fn design_episode_endings(
        &self,
        _outline: &EpisodeOutline,
        gauges: &GaugeModel,
        vocabulary: &[String],
        _count: u32,
    ) -> Result<Vec<EndingDraft>, GenerationError> {
        let gauge = gauges.names().next().unwrap_or("hope");
        let first = vocabulary.first().map(String::as_str).unwrap_or("brave");
        let second = vocabulary.get(1).map(String::as_str).unwrap_or(first);
        Ok(vec![
            ending_draft(
                "bold",
                "Bold Stand",
                &format!("{first} >= 2 AND {second} == 0"),
                "happy",
                &[(gauge, 20)],
            ),
            ending_draft(
                "wary",
                "Careful Retreat",
                &format!("{second} >= 2 AND {first} == 0"),
                "bad",
                &[(gauge, -10)],
            ),
            ending_draft("default", "Middle Course", "default", "neutral", &[]),
        ])
    }
}

fn character(name: &str, description: &str) -> Character {
    Character {
        name: name.to_string(),
        aliases: Vec::new(),
        description: description.to_string(),
        relationships: Vec::new(),
    }
}

fn gauge_draft(name: &str, initial: i32) -> GaugeDraft {
    GaugeDraft {
        name: name.to_string(),
        label: name.to_string(),
        meaning: format!("How much {name} remains"),
        min_label: "none".to_string(),
        max_label: "full".to_string(),
        description: String::new(),
        initial,
    }
}

fn ending_draft(id: &str, title: &str, condition: &str, category: &str, changes: &[(&str, i32)]) -> EndingDraft {
    EndingDraft {
        id: id.to_string(),
        title: title.to_string(),
        condition: condition.to_string(),
        text: format!("{title}."),
        category: Some(category.to_string()),
        gauge_changes: changes.iter().map(|(g, d)| (g.to_string(), *d)).collect(),
    }
}

/// Context for building a tree with a `hope`/`trust` gauge set.
pub fn episode_context() -> Arc<EpisodeContext> {
    Arc::new(EpisodeContext {
        novel_summary: "A storm threatens a fishing village.".to_string(),
        characters: vec![character("Mara", "A lighthouse keeper")],
        outline: EpisodeOutline {
            id: "ep1".to_string(),
            title: "The Storm".to_string(),
            order: 1,
            description: "The storm arrives.".to_string(),
            theme: "courage".to_string(),
            key_characters: vec!["Mara".to_string()],
        },
        intro: "Wind rattles the shutters.".to_string(),
        gauges: GaugeModel::new(vec![Gauge::new("hope", 0, 100, 50), Gauge::new("trust", 0, 100, 40)])
            .expect("fixture gauges are valid"),
        vocabulary: vec!["brave".to_string(), "cautious".to_string(), "trusting".to_string()],
        endings: Vec::new(),
        previous_summary: None,
    })
}

fn fixture_choice(node_id: &str, index: usize, tag: &str, hope: i32) -> Choice {
    let mut gauge_deltas = Deltas::new();
    if hope != 0 {
        gauge_deltas.insert("hope".to_string(), hope);
    }
    Choice {
        id: format!("{node_id}-c{index}"),
        text: format!("{tag} move at {node_id}"),
        tags: [tag.to_string()].into_iter().collect(),
        gauge_deltas,
        reaction: None,
    }
}

fn fixture_node(id: &str, parent: Option<(&str, usize)>, choices: Vec<Choice>) -> Node {
    let depth = id.matches('.').count() as u8;
    Node {
        id: id.to_string(),
        depth,
        parent_id: parent.map(|(p, _)| p.to_string()),
        choice_index: parent.map(|(_, i)| i),
        node_type: NodeType::for_depth(depth, 2),
        text: format!("Scene {id}"),
        details: None,
        choices,
        ending_id: None,
    }
}

/// A depth-2 episode with two choices per node.
///
/// Choice 0 is `brave` (+5 hope), choice 1 is `cautious`. The `hero` ending
/// (`brave >= 2`, +30 hope) is only reached by `n0.0.0`; every other
/// terminal falls through to `default` (-10 hope).
pub fn sample_episode_with(id: &str, order: u32) -> Episode {
    let branch = |node_id: &str| {
        vec![
            fixture_choice(node_id, 0, "brave", 5),
            fixture_choice(node_id, 1, "cautious", 0),
        ]
    };
    let nodes = vec![
        fixture_node("n0", None, branch("n0")),
        fixture_node("n0.0", Some(("n0", 0)), branch("n0.0")),
        fixture_node("n0.1", Some(("n0", 1)), branch("n0.1")),
        fixture_node("n0.0.0", Some(("n0.0", 0)), vec![]),
        fixture_node("n0.0.1", Some(("n0.0", 1)), vec![]),
        fixture_node("n0.1.0", Some(("n0.1", 0)), vec![]),
        fixture_node("n0.1.1", Some(("n0.1", 1)), vec![]),
    ];
    let tree = StoryTree::from_nodes(2, nodes).expect("fixture depth is valid");

    let endings = vec![
        Ending::new("hero", EndingKind::Episode, "Hero", Condition::parse("brave >= 2").expect("fixture condition"))
            .with_text("The village cheers.")
            .with_gauge_changes([("hope".to_string(), 30)].into_iter().collect()),
        Ending::new("default", EndingKind::Episode, "Survivor", Condition::Always)
            .with_text("The night passes.")
            .with_gauge_changes([("hope".to_string(), -10)].into_iter().collect()),
    ];

    Episode {
        id: id.to_string(),
        order,
        title: format!("Night {order}"),
        description: "A long night.".to_string(),
        theme: "courage".to_string(),
        intro_text: "The lamps flicker.".to_string(),
        tree,
        endings,
    }
}

pub fn sample_episode() -> Episode {
    sample_episode_with("ep1", 1)
}

/// Two sample episodes with a single `hope` gauge starting at 50 and the
/// final endings `dawn` (`hope >= 80`) and `dusk` (catch-all).
pub fn sample_story() -> Story {
    let gauges = GaugeModel::new(vec![Gauge::new("hope", 0, 100, 50)]).expect("fixture gauges are valid");
    Story {
        initial_analysis: InitialAnalysis {
            summary: "A storm threatens a fishing village.".to_string(),
            characters: vec![character("Mara", "A lighthouse keeper")],
            suggested_gauges: vec![gauge_draft("hope", 50)],
        },
        gauges,
        final_endings: vec![
            Ending::new("dawn", EndingKind::Final, "Dawn", Condition::parse("hope >= 80").expect("fixture condition")),
            Ending::new("dusk", EndingKind::Final, "Dusk", Condition::Always),
        ],
        episodes: vec![sample_episode_with("ep1", 1), sample_episode_with("ep2", 2)],
    }
}
