//! Playthrough simulation.
//!
//! Walks episode trees from root to terminal and records which endings the
//! walks reach. Small trees are enumerated exhaustively; larger ones are
//! sampled with a seeded RNG so runs are reproducible. Every walk owns its
//! own accumulation state.

use crate::config::SimulationConfig;
use crate::ending::{EndingResolver, ResolveError};
use crate::gauge::{Deltas, Gauge, GaugeError, GaugeModel, GaugeState};
use crate::story::{Episode, Story};
use crate::tree::{accumulate_choices, Choice, Node, NodeId, StoryTree, TagCounts};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("Episode '{0}' has no root node")]
    MissingRoot(String),

    #[error("Walk broke off at node '{0}'")]
    BrokenPath(NodeId),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Gauge(#[from] GaugeError),
}

/// Result of one root-to-terminal walk through an episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOutcome {
    pub terminal_id: NodeId,
    /// Node ids from root to terminal.
    pub path: Vec<NodeId>,
    pub tags: TagCounts,
    /// Choice deltas along the path plus the ending's gauge changes.
    pub gauge_deltas: Deltas,
    /// The same changes one step at a time: each choice in path order, then
    /// the ending. Gauges clamp after every step.
    #[serde(default)]
    pub steps: Vec<Deltas>,
    pub ending_id: String,
}

impl PathOutcome {
    /// Value of `gauge` after this outcome when it starts at `start`,
    /// clamping after every step.
    pub fn settle(&self, gauge: &Gauge, start: i64) -> i32 {
        self.steps.iter().fold(gauge.clamp(start), |value, step| {
            let delta = step.get(&gauge.name).copied().unwrap_or(0);
            gauge.clamp(value as i64 + delta as i64)
        })
    }
}

/// Outcome of reaching `terminal` through `choices`.
fn outcome(episode: &Episode, path: Vec<&Node>, choices: Vec<&Choice>) -> Result<PathOutcome, SimulationError> {
    let Some(terminal) = path.last() else {
        return Err(SimulationError::MissingRoot(episode.id.clone()));
    };
    let (tags, mut gauge_deltas) = accumulate_choices(choices.iter().copied());
    let ending = EndingResolver::new(&episode.endings).resolve_tags(&terminal.id, &tags)?;
    for (gauge, delta) in &ending.gauge_changes {
        let total = gauge_deltas.entry(gauge.clone()).or_insert(0);
        *total = total.saturating_add(*delta);
    }
    let mut steps: Vec<Deltas> = choices.iter().map(|c| c.gauge_deltas.clone()).collect();
    steps.push(ending.gauge_changes.clone());
    Ok(PathOutcome {
        terminal_id: terminal.id.clone(),
        path: path.iter().map(|n| n.id.clone()).collect(),
        tags,
        gauge_deltas,
        steps,
        ending_id: ending.id.clone(),
    })
}

/// Walk an episode picking a choice at each node with `pick`.
fn walk<'a>(
    episode: &'a Episode,
    mut pick: impl FnMut(&Node) -> usize,
) -> Result<(Vec<&'a Node>, Vec<&'a Choice>), SimulationError> {
    let tree: &StoryTree = &episode.tree;
    let mut node = tree
        .root()
        .ok_or_else(|| SimulationError::MissingRoot(episode.id.clone()))?;
    let mut path = vec![node];
    let mut choices = Vec::new();

    while !node.choices.is_empty() {
        let index = pick(node).min(node.choices.len() - 1);
        choices.push(&node.choices[index]);
        node = tree
            .child(node, index)
            .ok_or_else(|| SimulationError::BrokenPath(node.id.clone()))?;
        path.push(node);
    }
    if !node.node_type.is_terminal() {
        return Err(SimulationError::BrokenPath(node.id.clone()));
    }
    Ok((path, choices))
}

/// Follow the given choice indices from the root.
///
/// Out-of-range indices pick the first choice; once the indices run out the
/// walk keeps taking the first choice until it reaches a terminal.
pub fn simulate_path(episode: &Episode, choice_indices: &[usize]) -> Result<PathOutcome, SimulationError> {
    let mut remaining = choice_indices.iter();
    let (path, choices) = walk(episode, |node| match remaining.next() {
        Some(&i) if i < node.choices.len() => i,
        _ => 0,
    })?;
    outcome(episode, path, choices)
}

/// Every root-to-terminal outcome of an episode, in node-id order.
pub fn enumerate_outcomes(episode: &Episode) -> Result<Vec<PathOutcome>, SimulationError> {
    episode
        .tree
        .terminals()
        .map(|terminal| {
            let path = episode
                .tree
                .path_to(&terminal.id)
                .ok_or_else(|| SimulationError::BrokenPath(terminal.id.clone()))?;
            let choices = episode
                .tree
                .path_choices(&terminal.id)
                .ok_or_else(|| SimulationError::BrokenPath(terminal.id.clone()))?;
            outcome(episode, path, choices)
        })
        .collect()
}

/// How an episode was covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Exhaustive,
    Sampled,
}

/// Which endings an episode's walks reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeSimulation {
    pub episode_id: String,
    pub coverage: Coverage,
    pub walks: usize,
    /// Hits per declared ending, zero when never reached.
    pub ending_hits: BTreeMap<String, usize>,
}

impl EpisodeSimulation {
    pub fn unreached(&self) -> impl Iterator<Item = &str> {
        self.ending_hits
            .iter()
            .filter(|(_, hits)| **hits == 0)
            .map(|(id, _)| id.as_str())
    }
}

/// One full-game walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPlaythrough {
    pub episodes: Vec<PathOutcome>,
    pub final_state: GaugeState,
    pub final_ending_id: String,
}

/// Final endings reached by sampled full-game walks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySimulation {
    pub seed: u64,
    pub walks: usize,
    pub final_hits: BTreeMap<String, usize>,
    pub episodes: Vec<EpisodeSimulation>,
}

impl StorySimulation {
    pub fn unreached(&self) -> impl Iterator<Item = &str> {
        self.final_hits
            .iter()
            .filter(|(_, hits)| **hits == 0)
            .map(|(id, _)| id.as_str())
    }
}

/// Apply a path's choices, then its ending's gauge changes, one step at a
/// time so clamping happens after every step.
fn apply_outcome(
    gauges: &GaugeModel,
    state: GaugeState,
    episode: &Episode,
    choices: &[&Choice],
    ending_id: &str,
) -> Result<GaugeState, GaugeError> {
    let mut state = state;
    for choice in choices {
        state = gauges.apply(&state, &choice.gauge_deltas)?;
    }
    if let Some(ending) = episode.ending(ending_id) {
        state = gauges.apply(&state, &ending.gauge_changes)?;
    }
    Ok(state)
}

/// Play a whole story with fixed choices per episode.
///
/// Episodes without an entry in `episode_choices` take the first choice
/// everywhere.
pub fn play_story(story: &Story, episode_choices: &[Vec<usize>]) -> Result<StoryPlaythrough, SimulationError> {
    let mut state = story.initial_state();
    let mut outcomes = Vec::with_capacity(story.episodes.len());
    for (i, episode) in story.episodes.iter().enumerate() {
        let indices = episode_choices.get(i).map(Vec::as_slice).unwrap_or(&[]);
        let mut remaining = indices.iter();
        let (path, choices) = walk(episode, |node| match remaining.next() {
            Some(&idx) if idx < node.choices.len() => idx,
            _ => 0,
        })?;
        let result = outcome(episode, path, choices.clone())?;
        state = apply_outcome(&story.gauges, state, episode, &choices, &result.ending_id)?;
        outcomes.push(result);
    }
    let ending = EndingResolver::new(&story.final_endings).resolve_gauges(&state)?;
    Ok(StoryPlaythrough {
        episodes: outcomes,
        final_ending_id: ending.id.clone(),
        final_state: state,
    })
}

/// Runs playthroughs according to a [`SimulationConfig`].
#[derive(Debug, Clone)]
pub struct PlaythroughSimulator {
    config: SimulationConfig,
}

impl PlaythroughSimulator {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Record which endings of an episode are reached.
    pub fn simulate_episode(&self, episode: &Episode) -> Result<EpisodeSimulation, SimulationError> {
        let mut ending_hits: BTreeMap<String, usize> = episode.endings.iter().map(|e| (e.id.clone(), 0)).collect();
        let terminals = episode.tree.terminals().count();

        let (coverage, walks) = if terminals < self.config.exhaustive_cap {
            let outcomes = enumerate_outcomes(episode)?;
            for result in &outcomes {
                *ending_hits.entry(result.ending_id.clone()).or_insert(0) += 1;
            }
            (Coverage::Exhaustive, outcomes.len())
        } else {
            let mut rng = StdRng::seed_from_u64(self.config.seed);
            for _ in 0..self.config.walk_budget {
                let (path, choices) = walk(episode, |node| rng.gen_range(0..node.choices.len()))?;
                let result = outcome(episode, path, choices)?;
                *ending_hits.entry(result.ending_id).or_insert(0) += 1;
            }
            (Coverage::Sampled, self.config.walk_budget)
        };

        debug!(episode = %episode.id, ?coverage, walks, "Episode simulated");
        Ok(EpisodeSimulation {
            episode_id: episode.id.clone(),
            coverage,
            walks,
            ending_hits,
        })
    }

    /// Sample full-game walks and count the final endings they reach.
    pub fn simulate_story(&self, story: &Story) -> Result<StorySimulation, SimulationError> {
        let episodes = story
            .episodes
            .iter()
            .map(|e| self.simulate_episode(e))
            .collect::<Result<Vec<_>, _>>()?;

        let resolver = EndingResolver::new(&story.final_endings);
        let mut final_hits: BTreeMap<String, usize> =
            story.final_endings.iter().map(|e| (e.id.clone(), 0)).collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        for _ in 0..self.config.walk_budget {
            let mut state = story.initial_state();
            for episode in &story.episodes {
                let (path, choices) = walk(episode, |node| rng.gen_range(0..node.choices.len()))?;
                let result = outcome(episode, path, choices.clone())?;
                state = apply_outcome(&story.gauges, state, episode, &choices, &result.ending_id)?;
            }
            let ending = resolver.resolve_gauges(&state)?;
            *final_hits.entry(ending.id.clone()).or_insert(0) += 1;
        }

        info!(
            walks = self.config.walk_budget,
            reached = final_hits.values().filter(|h| **h > 0).count(),
            declared = story.final_endings.len(),
            "Story simulated"
        );
        Ok(StorySimulation {
            seed: self.config.seed,
            walks: self.config.walk_budget,
            final_hits,
            episodes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_episode, sample_story};

    #[test]
    fn test_simulate_path_follows_indices() {
        let episode = sample_episode();
        let outcome = simulate_path(&episode, &[1, 0]).unwrap();
        assert_eq!(outcome.path, vec!["n0", "n0.1", "n0.1.0"]);
        assert_eq!(outcome.terminal_id, "n0.1.0");
    }

    #[test]
    fn test_simulate_path_defaults_to_first_choice() {
        let episode = sample_episode();
        let outcome = simulate_path(&episode, &[9]).unwrap();
        assert_eq!(outcome.path, vec!["n0", "n0.0", "n0.0.0"]);
    }

    #[test]
    fn test_enumerate_outcomes_covers_every_terminal() {
        let episode = sample_episode();
        let outcomes = enumerate_outcomes(&episode).unwrap();
        assert_eq!(outcomes.len(), episode.tree.terminals().count());
        // Two brave choices reach the hero ending.
        let hero = outcomes.iter().find(|o| o.terminal_id == "n0.0.0").unwrap();
        assert_eq!(hero.ending_id, "hero");
        assert_eq!(hero.tags.get("brave"), Some(&2));
    }

    #[test]
    fn test_exhaustive_and_sampled_agree_on_reachability() {
        let episode = sample_episode();
        let exhaustive = PlaythroughSimulator::new(SimulationConfig::default())
            .simulate_episode(&episode)
            .unwrap();
        assert_eq!(exhaustive.coverage, Coverage::Exhaustive);
        assert_eq!(exhaustive.walks, 4);

        let sampled = PlaythroughSimulator::new(SimulationConfig {
            seed: 7,
            walk_budget: 200,
            exhaustive_cap: 0,
        })
        .simulate_episode(&episode)
        .unwrap();
        assert_eq!(sampled.coverage, Coverage::Sampled);
        assert_eq!(sampled.walks, 200);

        let reached = |s: &EpisodeSimulation| s.unreached().map(str::to_string).collect::<Vec<_>>();
        assert_eq!(reached(&exhaustive), reached(&sampled));
    }

    #[test]
    fn test_exhaustive_cap_is_exclusive() {
        let episode = sample_episode();
        let simulate = |exhaustive_cap| {
            PlaythroughSimulator::new(SimulationConfig {
                seed: 3,
                walk_budget: 20,
                exhaustive_cap,
            })
            .simulate_episode(&episode)
            .unwrap()
            .coverage
        };
        // Four terminals.
        assert_eq!(simulate(4), Coverage::Sampled);
        assert_eq!(simulate(5), Coverage::Exhaustive);
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let story = sample_story();
        let simulator = PlaythroughSimulator::new(SimulationConfig {
            seed: 11,
            walk_budget: 50,
            exhaustive_cap: 0,
        });
        let a = simulator.simulate_story(&story).unwrap();
        let b = simulator.simulate_story(&story).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.final_hits.values().sum::<usize>(), 50);
    }

    #[test]
    fn test_play_story_chains_gauges() {
        let story = sample_story();
        // First choice everywhere: brave, brave -> hero ending (+30 hope) twice.
        let run = play_story(&story, &[]).unwrap();
        assert_eq!(run.final_state.get("hope"), 100);
        assert_eq!(run.final_ending_id, "dawn");
        for outcome in &run.episodes {
            assert_eq!(outcome.ending_id, "hero");
        }
    }
}
