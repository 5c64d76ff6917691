//! Static checks on finished trees and stories.
//!
//! Checks run cheapest and most fatal first: dead ends, then structure and
//! reachability, then gauge balance. The first two reject the tree outright;
//! gauge balance only produces [`ValidationWarning`]s.

use crate::condition::ValueRange;
use crate::ending::{EndingKind, EndingResolver, ResolveError};
use crate::gauge::GaugeModel;
use crate::simulate::{enumerate_outcomes, PathOutcome, SimulationError};
use crate::story::{Episode, Story};
use crate::tree::{NodeId, NodeType, StoryTree};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

/// A defect that rejects the tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Node '{node_id}' is not an ending but has no choices")]
    DeadEnd { node_id: NodeId },

    #[error("Node '{node_id}' is not reachable from the root")]
    UnreachableNode { node_id: NodeId },

    #[error("Tree has no root")]
    MissingRoot,

    #[error("Tree has several roots: {}", .0.join(", "))]
    MultipleRoots(Vec<NodeId>),

    #[error("Node '{node_id}' sits at depth {found}, expected {expected}")]
    DepthMismatch { node_id: NodeId, expected: u8, found: u8 },

    #[error("Node '{node_id}' is {found}, expected {expected}")]
    NodeTypeMismatch {
        node_id: NodeId,
        expected: NodeType,
        found: NodeType,
    },

    #[error("Node '{node_id}' has {choices} choices but {children} children")]
    ChildCountMismatch {
        node_id: NodeId,
        choices: usize,
        children: usize,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Playthrough failed: {0}")]
    Simulation(SimulationError),
}

impl From<SimulationError> for ValidationError {
    fn from(e: SimulationError) -> Self {
        match e {
            SimulationError::Resolve(e) => ValidationError::Resolve(e),
            other => ValidationError::Simulation(other),
        }
    }
}

/// A problem worth reviewing that does not reject the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationWarning {
    /// No path can reach this ending.
    UnreachableEnding { ending_id: String, ending_kind: EndingKind },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::UnreachableEnding { ending_id, ending_kind } => {
                let kind = match ending_kind {
                    EndingKind::Episode => "episode",
                    EndingKind::Final => "final",
                };
                write!(f, "{kind} ending '{ending_id}' cannot be reached")
            }
        }
    }
}

/// Result of validating one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub episode_id: String,
    pub terminals: usize,
    /// Number of terminals resolving to each declared ending.
    pub ending_hits: BTreeMap<String, usize>,
    pub warnings: Vec<ValidationWarning>,
}

/// Which choice tags the episode ending conditions actually read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagCoverage {
    pub all_tags: BTreeSet<String>,
    pub used_in_conditions: BTreeSet<String>,
    pub unused_tags: BTreeSet<String>,
    pub coverage_rate: f64,
}

/// Result of validating a whole story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub episodes: Vec<EpisodeReport>,
    /// Every warning, episode warnings included.
    pub warnings: Vec<ValidationWarning>,
    /// Reachable range of every gauge after the last episode.
    pub gauge_ranges: BTreeMap<String, ValueRange>,
    pub tag_coverage: TagCoverage,
}

impl ValidationReport {
    pub fn is_balanced(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Ranges holding only each gauge's initial value.
pub fn initial_ranges(gauges: &GaugeModel) -> BTreeMap<String, ValueRange> {
    gauges
        .gauges()
        .iter()
        .map(|g| (g.name.clone(), ValueRange::point(g.initial as i64)))
        .collect()
}

/// Range of every gauge after one more episode, given every outcome that
/// episode allows.
///
/// Each outcome is replayed step by step from both ends of the current
/// range, clamping after every step. Replaying is monotone in the starting
/// value, so the two ends bound everything in between.
pub fn step_ranges(
    gauges: &GaugeModel,
    ranges: &BTreeMap<String, ValueRange>,
    outcomes: &[PathOutcome],
) -> BTreeMap<String, ValueRange> {
    gauges
        .gauges()
        .iter()
        .map(|gauge| {
            let current = ranges
                .get(&gauge.name)
                .copied()
                .unwrap_or_else(|| ValueRange::point(gauge.initial as i64));
            let low = outcomes.iter().map(|o| o.settle(gauge, current.min)).min();
            let high = outcomes.iter().map(|o| o.settle(gauge, current.max)).max();
            let range = match (low, high) {
                (Some(low), Some(high)) => ValueRange::new(low as i64, high as i64),
                _ => current,
            };
            (gauge.name.clone(), range)
        })
        .collect()
}

/// Final endings whose conditions cannot hold anywhere within `ranges`.
pub fn unreachable_final_endings(story: &Story, ranges: &BTreeMap<String, ValueRange>) -> Vec<ValidationWarning> {
    story
        .final_endings
        .iter()
        .filter(|e| !e.condition.satisfiable_within(ranges))
        .map(|e| ValidationWarning::UnreachableEnding {
            ending_id: e.id.clone(),
            ending_kind: EndingKind::Final,
        })
        .collect()
}

/// Read-only checks over trees and stories.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeValidator;

impl TreeValidator {
    pub fn new() -> Self {
        Self
    }

    /// Every non-ending node has at least one choice.
    pub fn check_dead_ends(&self, tree: &StoryTree) -> Result<(), ValidationError> {
        match tree
            .nodes()
            .find(|n| n.node_type != NodeType::Ending && n.choices.is_empty())
        {
            Some(node) => Err(ValidationError::DeadEnd {
                node_id: node.id.clone(),
            }),
            None => Ok(()),
        }
    }

    /// One root, every node reachable through parent links, depths and node
    /// types consistent, and exactly one child per choice.
    pub fn check_reachability(&self, tree: &StoryTree) -> Result<(), ValidationError> {
        let roots: Vec<&str> = tree.roots().map(|n| n.id.as_str()).collect();
        let root = match roots.as_slice() {
            [] => return Err(ValidationError::MissingRoot),
            [root] => *root,
            _ => return Err(ValidationError::MultipleRoots(roots.iter().map(|r| r.to_string()).collect())),
        };

        let max_depth = tree.max_depth();
        for node in tree.nodes() {
            let unreachable = || ValidationError::UnreachableNode {
                node_id: node.id.clone(),
            };

            let path = tree.path_to(&node.id).ok_or_else(unreachable)?;
            if path.first().map(|n| n.id.as_str()) != Some(root) {
                return Err(unreachable());
            }
            let expected_depth = (path.len() - 1) as u8;
            if node.depth != expected_depth || node.depth > max_depth {
                return Err(ValidationError::DepthMismatch {
                    node_id: node.id.clone(),
                    expected: expected_depth.min(max_depth),
                    found: node.depth,
                });
            }

            if let Some(parent_id) = &node.parent_id {
                let parent = tree.get(parent_id).ok_or_else(unreachable)?;
                match node.choice_index {
                    Some(i) if i < parent.choices.len() => {}
                    _ => return Err(unreachable()),
                }
            }

            let expected_type = NodeType::for_depth(node.depth, max_depth);
            if node.node_type != expected_type {
                return Err(ValidationError::NodeTypeMismatch {
                    node_id: node.id.clone(),
                    expected: expected_type,
                    found: node.node_type,
                });
            }

            let children = tree.children_of(&node.id).count();
            let linked = (0..node.choices.len())
                .filter(|i| tree.child(node, *i).is_some())
                .count();
            if children != node.choices.len() || linked != node.choices.len() {
                return Err(ValidationError::ChildCountMismatch {
                    node_id: node.id.clone(),
                    choices: node.choices.len(),
                    children,
                });
            }
        }
        Ok(())
    }

    /// Every terminal resolves to an ending, and every declared ending is
    /// reached by at least one terminal.
    pub fn check_episode_endings(&self, episode: &Episode) -> Result<EpisodeReport, ValidationError> {
        let resolver = EndingResolver::new(&episode.endings);
        let mut ending_hits: BTreeMap<String, usize> =
            episode.endings.iter().map(|e| (e.id.clone(), 0)).collect();

        let mut terminals = 0;
        for terminal in episode.tree.terminals() {
            let (tags, _) = episode
                .tree
                .accumulate(&terminal.id)
                .ok_or_else(|| ValidationError::UnreachableNode {
                    node_id: terminal.id.clone(),
                })?;
            let ending = resolver.resolve_tags(&terminal.id, &tags)?;
            *ending_hits.entry(ending.id.clone()).or_insert(0) += 1;
            terminals += 1;
        }

        let warnings: Vec<_> = episode
            .endings
            .iter()
            .filter(|e| ending_hits.get(&e.id).copied().unwrap_or(0) == 0)
            .map(|e| ValidationWarning::UnreachableEnding {
                ending_id: e.id.clone(),
                ending_kind: EndingKind::Episode,
            })
            .collect();
        for warning in &warnings {
            warn!(episode = %episode.id, "{warning}");
        }

        Ok(EpisodeReport {
            episode_id: episode.id.clone(),
            terminals,
            ending_hits,
            warnings,
        })
    }

    /// All episode checks, in order.
    pub fn validate_episode(&self, episode: &Episode) -> Result<EpisodeReport, ValidationError> {
        self.check_dead_ends(&episode.tree)?;
        self.check_reachability(&episode.tree)?;
        self.check_episode_endings(episode)
    }

    /// Validate every episode, then check final endings against the gauge
    /// ranges the episodes allow.
    pub fn validate_story(&self, story: &Story) -> Result<ValidationReport, ValidationError> {
        let mut episodes = Vec::with_capacity(story.episodes.len());
        let mut warnings = Vec::new();
        let mut ranges = initial_ranges(&story.gauges);

        for episode in &story.episodes {
            let report = self.validate_episode(episode)?;
            warnings.extend(report.warnings.iter().cloned());
            episodes.push(report);

            let outcomes = enumerate_outcomes(episode)?;
            ranges = step_ranges(&story.gauges, &ranges, &outcomes);
        }

        let finals = unreachable_final_endings(story, &ranges);
        for warning in &finals {
            warn!("{warning}");
        }
        warnings.extend(finals);

        Ok(ValidationReport {
            episodes,
            warnings,
            gauge_ranges: ranges,
            tag_coverage: tag_coverage(story),
        })
    }
}

/// Tags used by choices versus tags read by episode ending conditions.
pub fn tag_coverage(story: &Story) -> TagCoverage {
    let mut all_tags = BTreeSet::new();
    let mut referenced = BTreeSet::new();
    for episode in &story.episodes {
        for node in episode.tree.nodes() {
            for choice in &node.choices {
                all_tags.extend(choice.tags.iter().cloned());
            }
        }
        for ending in &episode.endings {
            referenced.extend(ending.condition.referenced_names());
        }
    }

    let used_in_conditions: BTreeSet<String> = all_tags.intersection(&referenced).cloned().collect();
    let unused_tags: BTreeSet<String> = all_tags.difference(&used_in_conditions).cloned().collect();
    let coverage_rate = if all_tags.is_empty() {
        1.0
    } else {
        used_in_conditions.len() as f64 / all_tags.len() as f64
    };

    TagCoverage {
        all_tags,
        used_in_conditions,
        unused_tags,
        coverage_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::ending::Ending;
    use crate::testing::{sample_episode, sample_story};

    #[test]
    fn test_sample_episode_is_valid() {
        let episode = sample_episode();
        let report = TreeValidator::new().validate_episode(&episode).unwrap();
        assert_eq!(report.terminals, 4);
        assert!(report.warnings.is_empty());
        assert_eq!(report.ending_hits.values().sum::<usize>(), 4);
    }

    #[test]
    fn test_dead_end_detected_first() {
        let mut episode = sample_episode();
        // Strip the choices of a climax node: it is now a dead end, and its
        // children would also make the structure check fail.
        let node = episode.tree.get_mut("n0.1").unwrap();
        node.choices.clear();
        assert_eq!(
            TreeValidator::new().validate_episode(&episode),
            Err(ValidationError::DeadEnd {
                node_id: "n0.1".to_string()
            })
        );
    }

    #[test]
    fn test_orphan_is_unreachable() {
        let mut episode = sample_episode();
        let mut orphan = episode.tree.get("n0.0.0").unwrap().clone();
        orphan.id = "stray".to_string();
        orphan.parent_id = Some("ghost".to_string());
        episode.tree.insert(orphan);
        assert_eq!(
            TreeValidator::new().check_reachability(&episode.tree),
            Err(ValidationError::UnreachableNode {
                node_id: "stray".to_string()
            })
        );
    }

    #[test]
    fn test_missing_child_is_rejected() {
        let mut episode = sample_episode();
        let tree = &episode.tree;
        let nodes: Vec<_> = tree.nodes().filter(|n| n.id != "n0.1.1").cloned().collect();
        episode.tree = StoryTree::from_nodes(tree.max_depth(), nodes).unwrap();
        assert!(matches!(
            TreeValidator::new().check_reachability(&episode.tree),
            Err(ValidationError::ChildCountMismatch { ref node_id, choices: 2, children: 1 }) if node_id == "n0.1"
        ));
    }

    #[test]
    fn test_wrong_node_type_is_rejected() {
        let mut episode = sample_episode();
        episode.tree.get_mut("n0.0").unwrap().node_type = NodeType::Normal;
        assert!(matches!(
            TreeValidator::new().check_reachability(&episode.tree),
            Err(ValidationError::NodeTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_unreachable_episode_ending_is_a_warning() {
        let mut episode = sample_episode();
        episode.endings.insert(
            0,
            Ending::new("legend", EndingKind::Episode, "Legend", "brave >= 9".parse().unwrap()),
        );
        let report = TreeValidator::new().validate_episode(&episode).unwrap();
        assert_eq!(
            report.warnings,
            vec![ValidationWarning::UnreachableEnding {
                ending_id: "legend".to_string(),
                ending_kind: EndingKind::Episode,
            }]
        );
    }

    #[test]
    fn test_no_matching_ending_is_fatal() {
        let mut episode = sample_episode();
        episode.endings.retain(|e| !e.condition.is_catch_all());
        assert!(matches!(
            TreeValidator::new().validate_episode(&episode),
            Err(ValidationError::Resolve(ResolveError::NoMatchingEnding { .. }))
        ));
    }

    #[test]
    fn test_story_ranges_and_final_warnings() {
        let mut story = sample_story();
        story.final_endings.insert(
            0,
            Ending::new("abyss", EndingKind::Final, "Abyss", Condition::compare("hope", crate::condition::CmpOp::Lt, 0)),
        );
        let report = TreeValidator::new().validate_story(&story).unwrap();

        let hope = report.gauge_ranges["hope"];
        assert_eq!(hope.max, 100);
        assert!(hope.min < 50);
        assert_eq!(
            report.warnings,
            vec![ValidationWarning::UnreachableEnding {
                ending_id: "abyss".to_string(),
                ending_kind: EndingKind::Final,
            }]
        );
        assert!(!report.is_balanced());
    }

    /// Story whose single episode adds `up` to hope and then `down`, whatever the player picks.
    fn swing_story(up: i32, down: i32) -> Story {
        let mut story = sample_story();
        let mut episode = story.episodes.remove(0);
        let nodes: Vec<_> = episode
            .tree
            .nodes()
            .cloned()
            .map(|mut node| {
                let delta = if node.depth == 0 { up } else { down };
                for choice in &mut node.choices {
                    choice.gauge_deltas = [("hope".to_string(), delta)].into_iter().collect();
                }
                node
            })
            .collect();
        episode.tree = StoryTree::from_nodes(2, nodes).unwrap();
        episode.endings.retain(|e| e.condition.is_catch_all());
        episode.endings[0].gauge_changes.clear();

        story.episodes = vec![episode];
        story.final_endings.insert(
            0,
            Ending::new("low", EndingKind::Final, "Low", "hope < 45".parse().unwrap()),
        );
        story
    }

    #[test]
    fn test_ranges_clamp_after_every_choice() {
        let story = swing_story(60, -60);

        // 50 + 60 clamps to 100, then 100 - 60 leaves 40.
        let played = crate::simulate::play_story(&story, &[vec![0, 0]]).unwrap();
        assert_eq!(played.final_state.get("hope"), 40);
        assert_eq!(played.final_ending_id, "low");

        let report = TreeValidator::new().validate_story(&story).unwrap();
        assert_eq!(report.gauge_ranges["hope"], ValueRange::new(40, 40));
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn test_extreme_deltas_do_not_overflow() {
        let story = swing_story(2_000_000_000, 2_000_000_000);
        let report = TreeValidator::new().validate_story(&story).unwrap();
        assert_eq!(report.gauge_ranges["hope"], ValueRange::point(100));
    }

    #[test]
    fn test_simulation_errors_keep_their_kind() {
        let resolve = ResolveError::NoMatchingEnding {
            subject: "n0.0.0".to_string(),
            candidates: vec![],
        };
        assert!(matches!(
            ValidationError::from(SimulationError::Resolve(resolve)),
            ValidationError::Resolve(_)
        ));
        assert!(matches!(
            ValidationError::from(SimulationError::BrokenPath("n0.1".to_string())),
            ValidationError::Simulation(SimulationError::BrokenPath(id)) if id == "n0.1"
        ));
    }

    #[test]
    fn test_tag_coverage() {
        let story = sample_story();
        let coverage = tag_coverage(&story);
        assert!(coverage.all_tags.contains("cautious"));
        assert!(coverage.used_in_conditions.contains("brave"));
        assert!(coverage.unused_tags.contains("cautious"));
        assert!(coverage.coverage_rate > 0.0 && coverage.coverage_rate < 1.0);
    }
}
