//! Engine configuration.
//!
//! Everything the engine needs is carried in an explicit [`EngineConfig`]
//! handed to the [`Director`](crate::director::Director) at construction.
//! Nothing is read from the environment after that point.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Smallest allowed episode tree depth.
pub const MIN_DEPTH: u8 = 2;
/// Largest allowed episode tree depth.
pub const MAX_DEPTH: u8 = 5;

/// Tags offered to the model when no vocabulary is configured.
pub const DEFAULT_TAGS: &[&str] = &[
    "cooperative",
    "aggressive",
    "cautious",
    "trusting",
    "doubtful",
    "brave",
    "fearful",
    "rational",
    "emotional",
];

/// Invalid configuration, rejected before any generation starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_depth must be between 2 and 5, got {0}")]
    InvalidMaxDepth(u8),

    #[error("Invalid gauge '{name}': {reason}")]
    InvalidGauge { name: String, reason: String },

    #[error("Gauge '{0}' is defined more than once")]
    DuplicateGauge(String),

    #[error("At least one gauge is required")]
    EmptyGaugeSet,

    #[error("Unknown gauge '{0}'")]
    UnknownGauge(String),

    #[error("Invalid ending mix: {0}")]
    InvalidEndingMix(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("No API key configured - set ANTHROPIC_API_KEY environment variable")]
    MissingApiKey,
}

/// Kind of final ending requested from the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndingCategory {
    Happy,
    Tragic,
    Neutral,
    Open,
    Bad,
    Bittersweet,
}

impl EndingCategory {
    pub const ALL: [EndingCategory; 6] = [
        EndingCategory::Happy,
        EndingCategory::Tragic,
        EndingCategory::Neutral,
        EndingCategory::Open,
        EndingCategory::Bad,
        EndingCategory::Bittersweet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndingCategory::Happy => "happy",
            EndingCategory::Tragic => "tragic",
            EndingCategory::Neutral => "neutral",
            EndingCategory::Open => "open",
            EndingCategory::Bad => "bad",
            EndingCategory::Bittersweet => "bittersweet",
        }
    }

    /// Short guidance passed to the model for this kind of ending.
    pub fn guidance(&self) -> &'static str {
        match self {
            EndingCategory::Happy => "hopeful resolution, the goal is reached",
            EndingCategory::Tragic => "ruin, death or failure",
            EndingCategory::Neutral => "an unremarkable close, little changes",
            EndingCategory::Open => "open to interpretation, unfinished",
            EndingCategory::Bad => "an unhappy outcome with real losses",
            EndingCategory::Bittersweet => "success bought with sacrifice",
        }
    }
}

impl fmt::Display for EndingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndingCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        EndingCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidEndingMix(format!("unknown ending type '{s}'")))
    }
}

/// How many final endings of each category to design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndingMix(BTreeMap<EndingCategory, u32>);

impl EndingMix {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, category: EndingCategory, count: u32) -> Self {
        self.0.insert(category, count);
        self
    }

    /// Total number of endings requested.
    pub fn total(&self) -> Result<u32, ConfigError> {
        self.0.values().try_fold(0u32, |sum, n| {
            sum.checked_add(*n)
                .ok_or_else(|| ConfigError::InvalidEndingMix("too many endings requested".to_string()))
        })
    }

    /// Categories with a non-zero count, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (EndingCategory, u32)> + '_ {
        self.0.iter().filter(|(_, n)| **n > 0).map(|(c, n)| (*c, *n))
    }
}

impl Default for EndingMix {
    fn default() -> Self {
        Self::new()
            .with(EndingCategory::Happy, 2)
            .with(EndingCategory::Tragic, 1)
            .with(EndingCategory::Neutral, 1)
            .with(EndingCategory::Open, 1)
    }
}

impl FromStr for EndingMix {
    type Err = ConfigError;

    /// Parse `"happy:2,tragic:1"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mix = EndingMix::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, count) = part
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidEndingMix(format!("expected type:count, got '{part}'")))?;
            let category: EndingCategory = name.parse()?;
            let count: u32 = count
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEndingMix(format!("bad count in '{part}'")))?;
            mix = mix.with(category, count);
        }
        if mix.total()? == 0 {
            return Err(ConfigError::InvalidEndingMix("no endings requested".to_string()));
        }
        Ok(mix)
    }
}

/// Playthrough simulation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Seed for sampled walks, so runs are reproducible.
    pub seed: u64,
    /// Number of random walks when a tree is too large to enumerate.
    pub walk_budget: usize,
    /// Enumerate every path when the tree has fewer terminals than this;
    /// otherwise sample `walk_budget` walks.
    pub exhaustive_cap: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            walk_budget: 2_000,
            exhaustive_cap: 4_096,
        }
    }
}

/// Configuration for the story engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Anthropic API key (only needed for the Claude-backed writer).
    pub api_key: Option<String>,

    /// Model to use. Defaults to the client's model.
    pub model: Option<String>,

    /// Maximum tokens per model response.
    pub max_tokens: usize,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Depth of each episode tree; ending nodes sit at this depth.
    pub max_depth: u8,

    /// Number of episodes to split the novel into.
    pub num_episodes: u32,

    /// Number of endings designed per episode.
    pub episode_endings: u32,

    /// Final endings to design, by category.
    pub ending_mix: EndingMix,

    /// Tags choices may carry.
    pub tag_vocabulary: Vec<String>,

    /// Extra attempts for a failed tree depth before the episode fails.
    pub depth_retries: u32,

    /// Concurrent node generations within one depth.
    pub max_concurrency: usize,

    /// Treat statically unreachable endings as fatal.
    pub strict_endings: bool,

    /// Run the playthrough simulator on each accepted episode.
    pub simulate: bool,

    /// Playthrough simulation settings.
    pub simulation: SimulationConfig,

    /// Novels longer than this many characters are summarized in chunks.
    pub summary_chunk_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            max_tokens: 4096,
            temperature: Some(0.7),
            max_depth: 3,
            num_episodes: 3,
            episode_endings: 3,
            ending_mix: EndingMix::default(),
            tag_vocabulary: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
            depth_retries: 2,
            max_concurrency: 8,
            strict_endings: false,
            simulate: true,
            simulation: SimulationConfig::default(),
            summary_chunk_chars: 20_000,
        }
    }
}

impl EngineConfig {
    /// Build a config from the environment (and `.env`, if present).
    ///
    /// Reads `ANTHROPIC_API_KEY`, `STORY_MODEL`, `STORY_MAX_DEPTH` and
    /// `STORY_EPISODES`. The result is validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.api_key = std::env::var("ANTHROPIC_API_KEY").ok();
        config.model = std::env::var("STORY_MODEL").ok();

        if let Ok(depth) = std::env::var("STORY_MAX_DEPTH") {
            config.max_depth = depth.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "STORY_MAX_DEPTH",
                reason: format!("not a number: '{depth}'"),
            })?;
        }
        if let Ok(episodes) = std::env::var("STORY_EPISODES") {
            config.num_episodes = episodes.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "STORY_EPISODES",
                reason: format!("not a number: '{episodes}'"),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_depth(mut self, depth: u8) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_episodes(mut self, count: u32) -> Self {
        self.num_episodes = count;
        self
    }

    pub fn with_episode_endings(mut self, count: u32) -> Self {
        self.episode_endings = count;
        self
    }

    pub fn with_ending_mix(mut self, mix: EndingMix) -> Self {
        self.ending_mix = mix;
        self
    }

    pub fn with_tag_vocabulary<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_vocabulary = tags.into_iter().map(|t| normalize_tag(&Into::<String>::into(t))).collect();
        self
    }

    pub fn with_depth_retries(mut self, retries: u32) -> Self {
        self.depth_retries = retries;
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_strict_endings(mut self, strict: bool) -> Self {
        self.strict_endings = strict;
        self
    }

    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }

    pub fn without_simulation(mut self) -> Self {
        self.simulate = false;
        self
    }

    /// Check every field that would otherwise fail mid-generation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_max_depth(self.max_depth)?;

        if self.num_episodes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "num_episodes",
                reason: "at least one episode is required".to_string(),
            });
        }
        if self.episode_endings == 0 {
            return Err(ConfigError::InvalidValue {
                field: "episode_endings",
                reason: "at least one ending per episode is required".to_string(),
            });
        }
        if self.ending_mix.total()? == 0 {
            return Err(ConfigError::InvalidEndingMix("no endings requested".to_string()));
        }
        if self.tag_vocabulary.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tag_vocabulary",
                reason: "at least one tag is required".to_string(),
            });
        }
        if let Some(tag) = self.tag_vocabulary.iter().find(|t| t.is_empty() || normalize_tag(t) != **t) {
            return Err(ConfigError::InvalidValue {
                field: "tag_vocabulary",
                reason: format!("tag '{tag}' must be non-empty, trimmed and lowercase"),
            });
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.summary_chunk_chars == 0 {
            return Err(ConfigError::InvalidValue {
                field: "summary_chunk_chars",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Canonical form of a choice tag: trimmed and lowercase.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Reject tree depths outside `[MIN_DEPTH, MAX_DEPTH]`.
pub fn validate_max_depth(max_depth: u8) -> Result<(), ConfigError> {
    if (MIN_DEPTH..=MAX_DEPTH).contains(&max_depth) {
        Ok(())
    } else {
        Err(ConfigError::InvalidMaxDepth(max_depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.tag_vocabulary.len(), DEFAULT_TAGS.len());
    }

    #[test]
    fn test_max_depth_bounds() {
        assert_eq!(validate_max_depth(1), Err(ConfigError::InvalidMaxDepth(1)));
        assert_eq!(validate_max_depth(6), Err(ConfigError::InvalidMaxDepth(6)));
        assert!(validate_max_depth(2).is_ok());
        assert!(validate_max_depth(5).is_ok());

        let config = EngineConfig::default().with_max_depth(1);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMaxDepth(1))));
    }

    #[test]
    fn test_ending_mix_parsing() {
        let mix: EndingMix = "happy:2, tragic:1,bittersweet:0".parse().unwrap();
        assert_eq!(mix.total(), Ok(3));
        let kinds: Vec<_> = mix.iter().collect();
        assert_eq!(kinds, vec![(EndingCategory::Happy, 2), (EndingCategory::Tragic, 1)]);

        assert!("happy".parse::<EndingMix>().is_err());
        assert!("joyful:1".parse::<EndingMix>().is_err());
        assert!("happy:0".parse::<EndingMix>().is_err());
    }

    #[test]
    fn test_default_mix_matches_five_endings() {
        assert_eq!(EndingMix::default().total(), Ok(5));
    }

    #[test]
    fn test_ending_mix_total_overflow_is_rejected() {
        assert!(matches!(
            "happy:4294967295,tragic:1".parse::<EndingMix>(),
            Err(ConfigError::InvalidEndingMix(_))
        ));

        let config = EngineConfig::default().with_ending_mix(
            EndingMix::new()
                .with(EndingCategory::Happy, u32::MAX)
                .with(EndingCategory::Open, 2),
        );
        assert!(matches!(config.validate(), Err(ConfigError::InvalidEndingMix(_))));
    }

    #[test]
    fn test_tag_vocabulary_is_normalized() {
        let config = EngineConfig::default().with_tag_vocabulary([" Brave", "CAUTIOUS "]);
        assert_eq!(config.tag_vocabulary, vec!["brave", "cautious"]);
        assert!(config.validate().is_ok());

        let config = EngineConfig {
            tag_vocabulary: vec!["Brave".to_string()],
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "tag_vocabulary", .. })
        ));
    }

    #[test]
    fn test_builder_and_validation_errors() {
        let config = EngineConfig::default()
            .with_episodes(0)
            .with_tag_vocabulary(["hero"]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "num_episodes", .. })
        ));

        let config = EngineConfig::default().with_max_concurrency(0);
        assert!(config.validate().is_err());
    }
}
