//! The story pipeline.
//!
//! [`Director`] runs analysis, planning and then one episode at a time:
//! intro, endings, tree build, ending resolution, validation and an optional
//! simulation. Each episode receives the [`CarriedState`] returned by the
//! previous one; a failed episode yields no tree at all.

use crate::builder::{BuildError, TreeBuilder};
use crate::config::{ConfigError, EngineConfig};
use crate::ending::{annotate_terminals, order_by_priority, Ending, EndingKind, ResolveError};
use crate::gauge::GaugeModel;
use crate::generator::{ContentGenerator, EpisodeContext, GenerationError, StoryPlanner};
use crate::payload::{renumber_outlines, EndingDraft, EpisodeOutline, GaugeDraft};
use crate::simulate::{enumerate_outcomes, EpisodeSimulation, PlaythroughSimulator, SimulationError, StorySimulation};
use crate::story::{CarriedState, Episode, InitialAnalysis, Story, StoryPlan};
use crate::tree::StoryTree;
use crate::validate::{unreachable_final_endings, EpisodeReport, TreeValidator, ValidationError, ValidationWarning};
use crate::writer::ClaudeWriter;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum DirectorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Simulation failed: {0}")]
    Simulation(#[from] SimulationError),

    #[error("Unreachable endings in {scope}: {}", .endings.join(", "))]
    UnreachableEndings { scope: String, endings: Vec<String> },
}

/// An accepted episode and what was learned while checking it.
#[derive(Debug, Clone)]
pub struct GeneratedEpisode {
    pub episode: Episode,
    pub report: EpisodeReport,
    pub simulation: Option<EpisodeSimulation>,
    /// State to hand to the next episode.
    pub carried: CarriedState,
}

/// A finished story plus the non-fatal findings gathered on the way.
#[derive(Debug, Clone)]
pub struct GeneratedStory {
    pub story: Story,
    pub reports: Vec<EpisodeReport>,
    pub warnings: Vec<ValidationWarning>,
    pub simulation: Option<StorySimulation>,
}

/// Drives generation from novel text to a validated [`Story`].
pub struct Director {
    generator: Arc<dyn ContentGenerator>,
    planner: Arc<dyn StoryPlanner>,
    config: EngineConfig,
    validator: TreeValidator,
    simulator: PlaythroughSimulator,
}

impl Director {
    /// Create a director. The config is validated here, before any call is made.
    pub fn new(
        generator: Arc<dyn ContentGenerator>,
        planner: Arc<dyn StoryPlanner>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            generator,
            planner,
            simulator: PlaythroughSimulator::new(config.simulation),
            validator: TreeValidator::new(),
            config,
        })
    }

    /// Use one value for both collaborator roles.
    pub fn with_writer<W>(writer: W, config: EngineConfig) -> Result<Self, ConfigError>
    where
        W: ContentGenerator + StoryPlanner + 'static,
    {
        let writer = Arc::new(writer);
        Self::new(writer.clone(), writer, config)
    }

    /// A director backed by the Claude API.
    pub fn from_config(config: EngineConfig) -> Result<Self, DirectorError> {
        if config.api_key.is_none() {
            return Err(ConfigError::MissingApiKey.into());
        }
        let writer = ClaudeWriter::from_config(&config).map_err(GenerationError::from)?;
        Ok(Self::with_writer(writer, config)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Summarize the novel, extract its characters and suggest gauges.
    #[instrument(skip_all, fields(chars = novel.chars().count()))]
    pub async fn analyze(&self, novel: &str) -> Result<InitialAnalysis, DirectorError> {
        let summary = self.summarize(novel).await?;

        let characters = self.planner.extract_characters(novel).await?;
        if characters.is_empty() {
            return Err(GenerationError::Schema("no characters found".to_string()).into());
        }

        let suggested_gauges = self.planner.suggest_gauges(&summary).await?;
        if suggested_gauges.is_empty() {
            return Err(GenerationError::Schema("no gauges suggested".to_string()).into());
        }

        info!(
            characters = characters.len(),
            gauges = suggested_gauges.len(),
            "Novel analyzed"
        );
        Ok(InitialAnalysis {
            summary,
            characters,
            suggested_gauges,
        })
    }

    async fn summarize(&self, novel: &str) -> Result<String, GenerationError> {
        let chunks = split_chunks(novel, self.config.summary_chunk_chars);
        if chunks.len() <= 1 {
            return self.planner.summarize(novel).await;
        }

        info!(chunks = chunks.len(), "Summarizing long text in chunks");
        let planner = self.planner.as_ref();
        let summaries: Vec<String> = stream::iter(chunks)
            .map(|chunk| planner.summarize(chunk))
            .buffered(self.config.max_concurrency)
            .try_collect()
            .await?;
        self.planner.merge_summaries(&summaries).await
    }

    /// Fix the gauge set, design final endings and split the novel into
    /// episodes.
    ///
    /// `selection` picks suggested gauges by name; `None` keeps them all.
    #[instrument(skip_all)]
    pub async fn plan(
        &self,
        analysis: &InitialAnalysis,
        selection: Option<&[String]>,
    ) -> Result<StoryPlan, DirectorError> {
        let gauges = select_gauges(&analysis.suggested_gauges, selection)?;

        let drafts = self
            .planner
            .design_final_endings(&analysis.summary, &gauges, &self.config.ending_mix)
            .await?;
        let final_endings = convert_endings(drafts, EndingKind::Final, &gauges)?;

        let outlines = self
            .planner
            .split_episodes(&analysis.summary, &analysis.characters, self.config.num_episodes)
            .await?;
        if outlines.is_empty() {
            return Err(GenerationError::Schema("no episodes planned".to_string()).into());
        }
        let outlines = renumber_outlines(outlines);

        info!(
            gauges = gauges.gauges().len(),
            final_endings = final_endings.len(),
            episodes = outlines.len(),
            "Story planned"
        );
        Ok(StoryPlan {
            gauges,
            final_endings,
            outlines,
        })
    }

    /// Generate, check and accept one episode.
    #[instrument(skip_all, fields(episode = %outline.id, order = outline.order))]
    pub async fn generate_episode(
        &self,
        analysis: &InitialAnalysis,
        plan: &StoryPlan,
        outline: &EpisodeOutline,
        carried: &CarriedState,
    ) -> Result<GeneratedEpisode, DirectorError> {
        let intro = self
            .planner
            .episode_intro(outline, &analysis.characters, &analysis.summary)
            .await?;

        let drafts = self
            .planner
            .design_episode_endings(
                outline,
                &plan.gauges,
                &self.config.tag_vocabulary,
                self.config.episode_endings,
            )
            .await?;
        let endings = convert_endings(drafts, EndingKind::Episode, &plan.gauges)?;
        if let Some(tag) = endings
            .iter()
            .flat_map(|e| e.condition.referenced_names())
            .find(|name| !self.config.tag_vocabulary.contains(name))
        {
            return Err(GenerationError::UnknownTag(tag).into());
        }

        let context = Arc::new(EpisodeContext {
            novel_summary: analysis.summary.clone(),
            characters: analysis.characters.clone(),
            outline: outline.clone(),
            intro: intro.clone(),
            gauges: plan.gauges.clone(),
            vocabulary: self.config.tag_vocabulary.clone(),
            endings: endings.clone(),
            previous_summary: carried.previous_summary.clone(),
        });
        let mut tree = self.build_tree(context).await?;
        annotate_terminals(&mut tree, &endings)?;

        let episode = Episode::from_outline(outline, intro, tree, endings);
        let report = self.validator.validate_episode(&episode)?;
        self.enforce_strict(&episode.id, &report.warnings)?;

        let simulation = if self.config.simulate {
            Some(self.simulator.simulate_episode(&episode)?)
        } else {
            None
        };

        let outcomes = enumerate_outcomes(&episode)?;
        let carried = carried.advance(&plan.gauges, &episode, &outcomes);
        info!(
            nodes = episode.tree.len(),
            terminals = report.terminals,
            warnings = report.warnings.len(),
            "Episode accepted"
        );
        Ok(GeneratedEpisode {
            episode,
            report,
            simulation,
            carried,
        })
    }

    /// Grow the tree level by level, retrying a failed level up to
    /// `depth_retries` times.
    async fn build_tree(&self, context: Arc<EpisodeContext>) -> Result<StoryTree, DirectorError> {
        let episode = context.outline.id.clone();
        let mut builder =
            TreeBuilder::new(context, self.config.max_depth)?.with_max_concurrency(self.config.max_concurrency);

        while let Some(depth) = builder.next_depth() {
            let mut attempt = 0;
            loop {
                match builder.grow_level(self.generator.as_ref()).await {
                    Ok(_) => break,
                    Err(e @ BuildError::Generation { .. }) if attempt < self.config.depth_retries => {
                        attempt += 1;
                        warn!(episode = %episode, depth, attempt, error = %e, "Retrying tree level");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            debug!(episode = %episode, depth, nodes = builder.tree().len(), "Level committed");
        }
        Ok(builder.finish()?)
    }

    fn enforce_strict(&self, scope: &str, warnings: &[ValidationWarning]) -> Result<(), DirectorError> {
        if !self.config.strict_endings || warnings.is_empty() {
            return Ok(());
        }
        let endings = warnings
            .iter()
            .map(|w| match w {
                ValidationWarning::UnreachableEnding { ending_id, .. } => ending_id.clone(),
            })
            .collect();
        Err(DirectorError::UnreachableEndings {
            scope: scope.to_string(),
            endings,
        })
    }

    /// Generate every planned episode in order and check the final endings
    /// against the gauge ranges the episodes allow.
    #[instrument(skip_all)]
    pub async fn generate_from_analysis(
        &self,
        analysis: InitialAnalysis,
        selection: Option<&[String]>,
    ) -> Result<GeneratedStory, DirectorError> {
        let plan = self.plan(&analysis, selection).await?;

        let mut carried = CarriedState::new(&plan.gauges);
        let mut episodes = Vec::with_capacity(plan.outlines.len());
        let mut reports = Vec::with_capacity(plan.outlines.len());
        let mut warnings = Vec::new();

        for outline in &plan.outlines {
            let generated = self.generate_episode(&analysis, &plan, outline, &carried).await?;
            warnings.extend(generated.report.warnings.iter().cloned());
            reports.push(generated.report);
            carried = generated.carried;
            episodes.push(generated.episode);
        }

        let story = Story {
            initial_analysis: analysis,
            gauges: plan.gauges,
            final_endings: plan.final_endings,
            episodes,
        };

        let finals = unreachable_final_endings(&story, &carried.gauge_ranges);
        for warning in &finals {
            warn!("{warning}");
        }
        self.enforce_strict("final endings", &finals)?;
        warnings.extend(finals);

        let simulation = if self.config.simulate {
            Some(self.simulator.simulate_story(&story)?)
        } else {
            None
        };

        info!(
            episodes = story.episodes.len(),
            nodes = story.node_count(),
            warnings = warnings.len(),
            "Story generated"
        );
        Ok(GeneratedStory {
            story,
            reports,
            warnings,
            simulation,
        })
    }

    /// Analyze `novel` and generate the whole story.
    pub async fn generate_story(
        &self,
        novel: &str,
        selection: Option<&[String]>,
    ) -> Result<GeneratedStory, DirectorError> {
        let analysis = self.analyze(novel).await?;
        self.generate_from_analysis(analysis, selection).await
    }
}

/// Build the gauge model from the suggestions named in `selection`.
pub fn select_gauges(suggested: &[GaugeDraft], selection: Option<&[String]>) -> Result<GaugeModel, ConfigError> {
    let drafts: Vec<GaugeDraft> = match selection {
        None => suggested.to_vec(),
        Some(names) => names
            .iter()
            .map(|name| {
                suggested
                    .iter()
                    .find(|g| g.name.trim().eq_ignore_ascii_case(name.trim()))
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownGauge(name.clone()))
            })
            .collect::<Result<_, _>>()?,
    };
    GaugeModel::new(drafts.into_iter().map(GaugeDraft::into_gauge).collect())
}

fn convert_endings(
    drafts: Vec<EndingDraft>,
    kind: EndingKind,
    gauges: &GaugeModel,
) -> Result<Vec<Ending>, GenerationError> {
    let endings = drafts
        .into_iter()
        .map(|d| Ending::from_draft(d, kind, gauges))
        .collect::<Result<Vec<_>, _>>()?;
    if endings.is_empty() {
        return Err(GenerationError::Schema("no endings designed".to_string()));
    }
    Ok(order_by_priority(endings))
}

/// Split `text` into pieces of at most `max_chars` characters.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (i, _) in text.char_indices() {
        if count == max_chars {
            chunks.push(&text[start..i]);
            start = i;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, ScriptedWriter};

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_max_depth(2)
            .with_episodes(2)
            .with_tag_vocabulary(["brave", "cautious"])
    }

    #[test]
    fn test_split_chunks_respects_char_boundaries() {
        assert_eq!(split_chunks("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(split_chunks("가나다라", 3), vec!["가나다", "라"]);
        assert!(split_chunks("", 3).is_empty());
    }

    #[test]
    fn test_new_validates_config() {
        let result = Director::with_writer(ScriptedWriter::new(2), config().with_max_depth(9));
        assert!(matches!(result, Err(ConfigError::InvalidMaxDepth(9))));
    }

    #[test]
    fn test_from_config_requires_api_key() {
        assert!(matches!(
            Director::from_config(config()),
            Err(DirectorError::Config(ConfigError::MissingApiKey))
        ));
    }

    #[test]
    fn test_select_gauges() {
        let suggested = vec![
            GaugeDraft {
                name: "hope".to_string(),
                label: "Hope".to_string(),
                meaning: String::new(),
                min_label: String::new(),
                max_label: String::new(),
                description: String::new(),
                initial: 50,
            },
            GaugeDraft {
                name: "trust".to_string(),
                label: "Trust".to_string(),
                meaning: String::new(),
                min_label: String::new(),
                max_label: String::new(),
                description: String::new(),
                initial: 40,
            },
        ];
        let all = select_gauges(&suggested, None).unwrap();
        assert_eq!(all.names().collect::<Vec<_>>(), vec!["hope", "trust"]);

        let picked = select_gauges(&suggested, Some(&["Trust".to_string()])).unwrap();
        assert_eq!(picked.names().collect::<Vec<_>>(), vec!["trust"]);

        assert!(matches!(
            select_gauges(&suggested, Some(&["fear".to_string()])),
            Err(ConfigError::UnknownGauge(_))
        ));
    }

    #[tokio::test]
    async fn test_long_novels_are_summarized_in_chunks() {
        let director = Director::with_writer(ScriptedWriter::new(2), EngineConfig {
            summary_chunk_chars: 10,
            ..config()
        })
        .unwrap();
        let summary = director.summarize("0123456789abcdefghij").await.unwrap();
        assert_eq!(summary, "Summary of '0123456789' Summary of 'abcdefghij'");
    }

    #[tokio::test]
    async fn test_plan_orders_catch_all_last() {
        let director = Director::with_writer(ScriptedWriter::new(2), config()).unwrap();
        let analysis = director.analyze("A storm comes.").await.unwrap();
        let plan = director.plan(&analysis, None).await.unwrap();

        let ids: Vec<&str> = plan.final_endings.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["bright", "fallen", "default"]);
        let orders: Vec<u32> = plan.outlines.iter().map(|o| o.order).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_depth_failure_is_retried() {
        let writer = Arc::new(ScriptedWriter::new(2).with_fault(1, Fault::Backend, 1));
        let director = Director::new(writer.clone(), writer.clone(), config().with_depth_retries(1)).unwrap();
        let story = director.generate_story("A storm comes.", None).await.unwrap();

        assert_eq!(story.story.episodes.len(), 2);
        assert!(story.story.episodes.iter().all(|e| e.tree.len() == 7));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_episode() {
        let writer = ScriptedWriter::new(2).with_fault(1, Fault::EmptyChoices, 3);
        let director = Director::with_writer(writer, config().with_depth_retries(1)).unwrap();
        let err = director.generate_story("A storm comes.", None).await.unwrap_err();
        assert!(matches!(
            err,
            DirectorError::Build(BuildError::Generation { depth: 1, .. })
        ));
    }
}
