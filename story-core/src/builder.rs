//! Breadth-first episode tree construction.
//!
//! [`TreeBuilder`] grows a [`StoryTree`] one depth at a time. Every node of
//! a depth is requested from the [`ContentGenerator`] concurrently; the
//! level is committed only when all of them succeed, so a failed level
//! leaves the tree exactly as it was before the attempt.

use crate::config::ConfigError;
use crate::generator::{ContentGenerator, EpisodeContext, GenerationError, NodeRequest, PathStep};
use crate::tree::{child_id, Node, NodeType, StoryTree, ROOT_ID};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Generation failed for node {node_id} at depth {depth}: {source}")]
    Generation {
        node_id: String,
        depth: u8,
        #[source]
        source: GenerationError,
    },

    #[error("Tree is already complete")]
    AlreadyComplete,

    #[error("Tree has not reached depth {max_depth}")]
    Incomplete { max_depth: u8 },
}

impl BuildError {
    /// The generation error behind this failure, if any.
    pub fn generation_error(&self) -> Option<&GenerationError> {
        match self {
            BuildError::Generation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Grows one episode tree.
pub struct TreeBuilder {
    context: Arc<EpisodeContext>,
    tree: StoryTree,
    max_concurrency: usize,
}

impl TreeBuilder {
    /// Create a builder. `max_depth` outside `[2, 5]` is rejected.
    pub fn new(context: Arc<EpisodeContext>, max_depth: u8) -> Result<Self, ConfigError> {
        Ok(Self {
            context,
            tree: StoryTree::new(max_depth)?,
            max_concurrency: 8,
        })
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn tree(&self) -> &StoryTree {
        &self.tree
    }

    /// Depth the next call to [`grow_level`](Self::grow_level) will build.
    pub fn next_depth(&self) -> Option<u8> {
        match self.tree.current_depth() {
            None => Some(0),
            Some(d) if d < self.tree.max_depth() => Some(d + 1),
            Some(_) => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next_depth().is_none()
    }

    /// Generate and commit every node of the next depth.
    ///
    /// On error nothing from this depth is kept and in-flight requests are
    /// dropped. Returns the depth that was built.
    pub async fn grow_level<G>(&mut self, generator: &G) -> Result<u8, BuildError>
    where
        G: ContentGenerator + ?Sized,
    {
        let depth = self.next_depth().ok_or(BuildError::AlreadyComplete)?;
        let requests = self.requests_for(depth);
        info!(
            episode = %self.context.outline.id,
            depth,
            nodes = requests.len(),
            "Growing tree level"
        );

        let nodes: Vec<Node> = stream::iter(requests)
            .map(|request| async move {
                let node_id = request.node_id.clone();
                let fail = |source| BuildError::Generation {
                    node_id: node_id.clone(),
                    depth,
                    source,
                };
                let payload = generator.generate_node(&request).await.map_err(fail)?;
                let node = payload.into_node(&request).map_err(fail)?;
                debug!(node_id = %node.id, choices = node.choices.len(), "Node generated");
                Ok::<_, BuildError>(node)
            })
            .buffer_unordered(self.max_concurrency)
            .try_collect()
            .await?;

        for node in nodes {
            self.tree.insert(node);
        }
        Ok(depth)
    }

    /// Grow every remaining level and return the finished tree.
    pub async fn build<G>(mut self, generator: &G) -> Result<StoryTree, BuildError>
    where
        G: ContentGenerator + ?Sized,
    {
        while !self.is_complete() {
            self.grow_level(generator).await?;
        }
        self.finish()
    }

    /// Hand out the tree once every level has been built.
    pub fn finish(self) -> Result<StoryTree, BuildError> {
        if self.is_complete() {
            Ok(self.tree)
        } else {
            Err(BuildError::Incomplete {
                max_depth: self.tree.max_depth(),
            })
        }
    }

    fn requests_for(&self, depth: u8) -> Vec<NodeRequest> {
        let max_depth = self.tree.max_depth();
        let node_type = NodeType::for_depth(depth, max_depth);
        let request = |node_id: String, parent: Option<(String, usize)>, path: Vec<PathStep>| NodeRequest {
            context: Arc::clone(&self.context),
            node_id,
            depth,
            max_depth,
            node_type,
            parent,
            path,
        };

        if depth == 0 {
            return vec![request(ROOT_ID.to_string(), None, Vec::new())];
        }

        let mut requests = Vec::new();
        for parent in self.tree.nodes_at_depth(depth - 1) {
            let prefix = self.path_steps(&parent.id);
            for (i, choice) in parent.choices.iter().enumerate() {
                let mut path = prefix.clone();
                path.push(PathStep {
                    scene: parent.text.clone(),
                    choice: choice.text.clone(),
                });
                requests.push(request(child_id(&parent.id, i), Some((parent.id.clone(), i)), path));
            }
        }
        requests
    }

    /// Scenes and choices leading down to `id`, excluding `id` itself.
    fn path_steps(&self, id: &str) -> Vec<PathStep> {
        let Some(path) = self.tree.path_to(id) else {
            return Vec::new();
        };
        path.windows(2)
            .filter_map(|pair| {
                let choice = pair[0].choices.get(pair[1].choice_index?)?;
                Some(PathStep {
                    scene: pair[0].text.clone(),
                    choice: choice.text.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{episode_context, Fault, ScriptedWriter};

    #[tokio::test]
    async fn test_builds_full_tree() {
        let writer = ScriptedWriter::new(2);
        let tree = TreeBuilder::new(episode_context(), 3)
            .unwrap()
            .build(&writer)
            .await
            .unwrap();

        // 1 + 2 + 4 + 8
        assert_eq!(tree.len(), 15);
        for node in tree.nodes() {
            assert_eq!(node.node_type, NodeType::for_depth(node.depth, 3));
            assert_eq!(node.choices.is_empty(), node.depth == 3);
        }
        assert_eq!(tree.terminals().count(), 8);
    }

    #[tokio::test]
    async fn test_rejects_depth_below_two() {
        assert!(matches!(
            TreeBuilder::new(episode_context(), 1),
            Err(ConfigError::InvalidMaxDepth(1))
        ));
    }

    #[tokio::test]
    async fn test_empty_choices_abort_level() {
        let writer = ScriptedWriter::new(2).with_fault(1, Fault::EmptyChoices, 1);
        let mut builder = TreeBuilder::new(episode_context(), 3).unwrap();

        assert_eq!(builder.grow_level(&writer).await.unwrap(), 0);
        let err = builder.grow_level(&writer).await.unwrap_err();
        assert!(matches!(
            err.generation_error(),
            Some(GenerationError::EmptyChoices)
        ));

        // The failed level left no nodes behind and can be attempted again.
        assert_eq!(builder.tree().len(), 1);
        assert_eq!(builder.next_depth(), Some(1));
        assert_eq!(builder.grow_level(&writer).await.unwrap(), 1);
        assert_eq!(builder.tree().len(), 3);
    }

    #[tokio::test]
    async fn test_build_surfaces_failure_without_tree() {
        let writer = ScriptedWriter::new(3).with_fault(2, Fault::Backend, 1);
        let result = TreeBuilder::new(episode_context(), 3)
            .unwrap()
            .with_max_concurrency(2)
            .build(&writer)
            .await;
        assert!(matches!(result, Err(BuildError::Generation { depth: 2, .. })));
    }

    #[tokio::test]
    async fn test_children_see_their_path() {
        let writer = ScriptedWriter::new(2);
        let mut builder = TreeBuilder::new(episode_context(), 2).unwrap();
        builder.grow_level(&writer).await.unwrap();
        builder.grow_level(&writer).await.unwrap();

        let requests = builder.requests_for(2);
        assert_eq!(requests.len(), 4);
        let deepest = requests.iter().find(|r| r.node_id == "n0.1.0").unwrap();
        assert_eq!(deepest.path.len(), 2);
        assert_eq!(deepest.parent, Some(("n0.1".to_string(), 0)));
        assert!(deepest.is_terminal());
    }

    #[test]
    fn test_finish_requires_complete_tree() {
        let builder = TreeBuilder::new(episode_context(), 2).unwrap();
        assert!(matches!(builder.finish(), Err(BuildError::Incomplete { max_depth: 2 })));
    }
}
