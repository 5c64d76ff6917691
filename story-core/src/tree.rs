//! Episode story trees.
//!
//! Nodes are kept in a flat map keyed by id and linked through
//! `parent_id` / `choice_index`. Ids are deterministic: the root is `n0`
//! and the child reached through choice `i` of node `p` is `p.i`.

use crate::config::{validate_max_depth, ConfigError};
use crate::gauge::Deltas;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use story_macros::Schema;

pub type NodeId = String;

/// Per-tag occurrence counts along a path.
pub type TagCounts = BTreeMap<String, u32>;

/// Id of an episode root.
pub const ROOT_ID: &str = "n0";

/// Id of the child reached through `choice_index` of `parent`.
pub fn child_id(parent: &str, choice_index: usize) -> NodeId {
    format!("{parent}.{choice_index}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Normal,
    Climax,
    Ending,
}

impl NodeType {
    /// The node type every node at `depth` must have in a tree of `max_depth`.
    pub fn for_depth(depth: u8, max_depth: u8) -> Self {
        if depth >= max_depth {
            NodeType::Ending
        } else if depth + 1 == max_depth {
            NodeType::Climax
        } else {
            NodeType::Normal
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeType::Ending)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeType::Normal => "normal",
            NodeType::Climax => "climax",
            NodeType::Ending => "ending",
        };
        f.write_str(s)
    }
}

/// An option offered at a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Gauge deltas applied when the choice is taken.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub gauge_deltas: Deltas,
    /// Immediate reaction shown after choosing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
}

/// Emotions, situation and relationship changes in a scene
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Schema)]
#[schema(name = "node_details")]
pub struct NodeDetails {
    /// Emotion of each present character, keyed by name
    #[serde(default)]
    #[schema(optional)]
    pub npc_emotions: BTreeMap<String, String>,
    /// One sentence on where things stand
    #[serde(default)]
    #[schema(optional)]
    pub situation: String,
    /// How relationships shifted, keyed by character name
    #[serde(default)]
    #[schema(optional)]
    pub relations_update: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub depth: u8,
    pub parent_id: Option<NodeId>,
    /// Index of the parent's choice that leads here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice_index: Option<usize>,
    pub node_type: NodeType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<NodeDetails>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    /// Episode ending resolved for this terminal node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ending_id: Option<String>,
}

impl Node {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// The branching tree of one episode.
///
/// Deserialization rejects a `max_depth` outside `[2, 5]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTree")]
pub struct StoryTree {
    max_depth: u8,
    nodes: BTreeMap<NodeId, Node>,
}

#[derive(Deserialize)]
struct RawTree {
    max_depth: u8,
    #[serde(default)]
    nodes: BTreeMap<NodeId, Node>,
}

impl TryFrom<RawTree> for StoryTree {
    type Error = ConfigError;

    fn try_from(raw: RawTree) -> Result<Self, Self::Error> {
        validate_max_depth(raw.max_depth)?;
        Ok(Self {
            max_depth: raw.max_depth,
            nodes: raw.nodes,
        })
    }
}

impl StoryTree {
    pub fn new(max_depth: u8) -> Result<Self, ConfigError> {
        validate_max_depth(max_depth)?;
        Ok(Self {
            max_depth,
            nodes: BTreeMap::new(),
        })
    }

    /// Assemble a tree from arbitrary nodes. No structural checks are made;
    /// run the validator before trusting the result.
    pub fn from_nodes(max_depth: u8, nodes: impl IntoIterator<Item = Node>) -> Result<Self, ConfigError> {
        let mut tree = Self::new(max_depth)?;
        for node in nodes {
            tree.insert(node);
        }
        Ok(tree)
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Insert or replace a node.
    pub fn insert(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root node, if exactly the canonical root exists.
    pub fn root(&self) -> Option<&Node> {
        self.nodes.get(ROOT_ID).filter(|n| n.is_root())
    }

    pub fn roots(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.is_root())
    }

    pub fn nodes_at_depth(&self, depth: u8) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.depth == depth)
    }

    /// Deepest depth that has any node.
    pub fn current_depth(&self) -> Option<u8> {
        self.nodes.values().map(|n| n.depth).max()
    }

    /// The child reached through a choice.
    pub fn child(&self, parent: &Node, choice_index: usize) -> Option<&Node> {
        self.nodes
            .get(&child_id(&parent.id, choice_index))
            .filter(|c| c.parent_id.as_deref() == Some(parent.id.as_str()))
    }

    /// Nodes whose parent link points at `parent_id`.
    pub fn children_of<'a>(&'a self, parent_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .values()
            .filter(move |n| n.parent_id.as_deref() == Some(parent_id))
    }

    /// Ending nodes.
    pub fn terminals(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.node_type.is_terminal())
    }

    /// Nodes from the root down to `id`, following parent links.
    ///
    /// Returns `None` if a link is broken or loops.
    pub fn path_to(&self, id: &str) -> Option<Vec<&Node>> {
        let mut path = Vec::new();
        let mut current = self.nodes.get(id)?;
        loop {
            if path.len() > self.nodes.len() {
                return None;
            }
            path.push(current);
            match &current.parent_id {
                Some(parent) => current = self.nodes.get(parent)?,
                None => break,
            }
        }
        path.reverse();
        Some(path)
    }

    /// The choices taken from the root to reach `id`.
    pub fn path_choices(&self, id: &str) -> Option<Vec<&Choice>> {
        let path = self.path_to(id)?;
        path.windows(2)
            .map(|pair| {
                let index = pair[1].choice_index?;
                pair[0].choices.get(index)
            })
            .collect()
    }

    /// Tag counts and summed gauge deltas along the path to `id`.
    pub fn accumulate(&self, id: &str) -> Option<(TagCounts, Deltas)> {
        let choices = self.path_choices(id)?;
        Some(accumulate_choices(choices))
    }
}

/// Count tags and sum gauge deltas over a sequence of choices. Sums
/// saturate instead of overflowing.
pub fn accumulate_choices<'a>(choices: impl IntoIterator<Item = &'a Choice>) -> (TagCounts, Deltas) {
    let mut tags = TagCounts::new();
    let mut deltas = Deltas::new();
    for choice in choices {
        for tag in &choice.tags {
            let count = tags.entry(tag.clone()).or_insert(0);
            *count = count.saturating_add(1);
        }
        for (gauge, delta) in &choice.gauge_deltas {
            let total = deltas.entry(gauge.clone()).or_insert(0);
            *total = total.saturating_add(*delta);
        }
    }
    (tags, deltas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice(id: &str, tags: &[&str]) -> Choice {
        Choice {
            id: id.to_string(),
            text: format!("choice {id}"),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            gauge_deltas: Deltas::new(),
            reaction: None,
        }
    }

    fn node(id: &str, depth: u8, parent: Option<(&str, usize)>, max_depth: u8, choices: Vec<Choice>) -> Node {
        Node {
            id: id.to_string(),
            depth,
            parent_id: parent.map(|(p, _)| p.to_string()),
            choice_index: parent.map(|(_, i)| i),
            node_type: NodeType::for_depth(depth, max_depth),
            text: format!("scene {id}"),
            details: None,
            choices,
            ending_id: None,
        }
    }

    #[test]
    fn test_node_type_for_depth() {
        assert_eq!(NodeType::for_depth(0, 3), NodeType::Normal);
        assert_eq!(NodeType::for_depth(1, 3), NodeType::Normal);
        assert_eq!(NodeType::for_depth(2, 3), NodeType::Climax);
        assert_eq!(NodeType::for_depth(3, 3), NodeType::Ending);

        assert_eq!(NodeType::for_depth(0, 2), NodeType::Normal);
        assert_eq!(NodeType::for_depth(1, 2), NodeType::Climax);
        assert_eq!(NodeType::for_depth(2, 2), NodeType::Ending);
    }

    #[test]
    fn test_tree_rejects_bad_depth() {
        assert_eq!(StoryTree::new(1), Err(ConfigError::InvalidMaxDepth(1)));
        assert!(StoryTree::new(6).is_err());
    }

    #[test]
    fn test_path_and_accumulation() {
        let tree = StoryTree::from_nodes(
            2,
            vec![
                node("n0", 0, None, 2, vec![choice("a", &["brave"]), choice("b", &["fearful"])]),
                node("n0.0", 1, Some(("n0", 0)), 2, vec![choice("c", &["brave", "rational"])]),
                node("n0.1", 1, Some(("n0", 1)), 2, vec![choice("d", &["brave"])]),
                node("n0.0.0", 2, Some(("n0.0", 0)), 2, vec![]),
                node("n0.1.0", 2, Some(("n0.1", 0)), 2, vec![]),
            ],
        )
        .unwrap();

        assert_eq!(tree.root().unwrap().id, "n0");
        assert_eq!(tree.terminals().count(), 2);

        let ids: Vec<_> = tree.path_to("n0.0.0").unwrap().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n0", "n0.0", "n0.0.0"]);

        let (tags, _) = tree.accumulate("n0.0.0").unwrap();
        assert_eq!(tags.get("brave"), Some(&2));
        assert_eq!(tags.get("rational"), Some(&1));
        assert_eq!(tags.get("fearful"), None);

        let root = tree.root().unwrap();
        assert_eq!(tree.child(root, 1).unwrap().id, "n0.1");
        assert!(tree.child(root, 2).is_none());
    }

    #[test]
    fn test_deserialize_rejects_bad_depth() {
        assert!(serde_json::from_str::<StoryTree>(r#"{"max_depth":1,"nodes":{}}"#).is_err());
        assert!(serde_json::from_str::<StoryTree>(r#"{"max_depth":6,"nodes":{}}"#).is_err());

        let tree: StoryTree = serde_json::from_str(r#"{"max_depth":3,"nodes":{}}"#).unwrap();
        assert_eq!(tree.max_depth(), 3);
    }

    #[test]
    fn test_accumulated_deltas_saturate() {
        let mut a = choice("a", &["brave"]);
        a.gauge_deltas.insert("hope".to_string(), 2_000_000_000);
        let mut b = choice("b", &["brave"]);
        b.gauge_deltas.insert("hope".to_string(), 2_000_000_000);

        let (tags, deltas) = accumulate_choices([&a, &b]);
        assert_eq!(tags.get("brave"), Some(&2));
        assert_eq!(deltas.get("hope"), Some(&i32::MAX));
    }

    #[test]
    fn test_path_to_detects_broken_links() {
        let tree = StoryTree::from_nodes(2, vec![node("x", 1, Some(("missing", 0)), 2, vec![])]).unwrap();
        assert!(tree.path_to("x").is_none());
    }
}
