//! Claude-backed content generation.

use crate::config::{EndingMix, EngineConfig};
use crate::gauge::GaugeModel;
use crate::generator::{parse_payload, ContentGenerator, GenerationError, NodeRequest, StoryPlanner};
use crate::payload::{
    Character, CharacterList, EndingDraft, EndingList, EpisodeOutline, EpisodeOutlineList, GaugeDraft, GaugeList,
    NodePayload,
};
use crate::prompts;
use async_trait::async_trait;
use claude::{Claude, Request, Tool};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Writes every part of a story through the Claude API.
///
/// Structured answers (nodes, characters, gauges, endings, outlines) are
/// forced through a tool call derived from the payload type. Summaries and
/// intros are plain text.
#[derive(Clone)]
pub struct ClaudeWriter {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeWriter {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 4096,
            temperature: None,
        }
    }

    /// Build a client from the API key, model and sampling settings in `config`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, claude::Error> {
        let api_key = config.api_key.as_deref().ok_or(claude::Error::NoApiKey)?;
        let mut client = Claude::new(api_key)?;
        if let Some(model) = &config.model {
            client = client.with_model(model);
        }
        Ok(Self {
            client,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn client(&self) -> &Claude {
        &self.client
    }

    fn request(&self, prompt: String) -> Request {
        let request = Request::prompt(prompt).with_max_tokens(self.max_tokens);
        match self.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        }
    }

    async fn text(&self, prompt: String) -> Result<String, GenerationError> {
        let response = self.client.complete(&self.request(prompt)).await?;
        let text = response.text();
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyText);
        }
        Ok(text.trim().to_string())
    }

    async fn structured<T: DeserializeOwned>(&self, request: Request, tool: Tool) -> Result<T, GenerationError> {
        let name = tool.name.clone();
        let value = self.client.extract(&request, tool).await?;
        debug!(tool = %name, "Structured answer received");
        parse_payload(value)
    }
}

#[async_trait]
impl ContentGenerator for ClaudeWriter {
    async fn generate_node(&self, request: &NodeRequest) -> Result<NodePayload, GenerationError> {
        let prompt = self
            .request(prompts::node_prompt(request))
            .with_system(prompts::node_system(request));
        self.structured(prompt, NodePayload::as_tool()).await
    }
}

#[async_trait]
impl StoryPlanner for ClaudeWriter {
    async fn summarize(&self, text: &str) -> Result<String, GenerationError> {
        self.text(prompts::summarize(text)).await
    }

    async fn merge_summaries(&self, summaries: &[String]) -> Result<String, GenerationError> {
        self.text(prompts::merge_summaries(summaries)).await
    }

    async fn extract_characters(&self, novel: &str) -> Result<Vec<Character>, GenerationError> {
        let list: CharacterList = self
            .structured(self.request(prompts::extract_characters(novel)), CharacterList::as_tool())
            .await?;
        Ok(list.characters)
    }

    async fn suggest_gauges(&self, summary: &str) -> Result<Vec<GaugeDraft>, GenerationError> {
        let list: GaugeList = self
            .structured(self.request(prompts::suggest_gauges(summary)), GaugeList::as_tool())
            .await?;
        Ok(list.gauges)
    }

    async fn design_final_endings(
        &self,
        summary: &str,
        gauges: &GaugeModel,
        mix: &EndingMix,
    ) -> Result<Vec<EndingDraft>, GenerationError> {
        let prompt = prompts::design_final_endings(summary, gauges, mix);
        let list: EndingList = self.structured(self.request(prompt), EndingList::as_tool()).await?;
        Ok(list.endings)
    }

    async fn split_episodes(
        &self,
        summary: &str,
        characters: &[Character],
        count: u32,
    ) -> Result<Vec<EpisodeOutline>, GenerationError> {
        let prompt = prompts::split_episodes(summary, characters, count);
        let list: EpisodeOutlineList = self
            .structured(self.request(prompt), EpisodeOutlineList::as_tool())
            .await?;
        Ok(list.episodes)
    }

    async fn episode_intro(
        &self,
        outline: &EpisodeOutline,
        characters: &[Character],
        summary: &str,
    ) -> Result<String, GenerationError> {
        self.text(prompts::episode_intro(outline, characters, summary)).await
    }

    async fn design_episode_endings(
        &self,
        outline: &EpisodeOutline,
        gauges: &GaugeModel,
        vocabulary: &[String],
        count: u32,
    ) -> Result<Vec<EndingDraft>, GenerationError> {
        let prompt = prompts::design_episode_endings(outline, gauges, vocabulary, count);
        let list: EndingList = self.structured(self.request(prompt), EndingList::as_tool()).await?;
        Ok(list.endings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_key() {
        let config = EngineConfig::default();
        assert!(matches!(ClaudeWriter::from_config(&config), Err(claude::Error::NoApiKey)));
    }

    #[test]
    fn test_from_config_applies_model() {
        let config = EngineConfig::default()
            .with_api_key("test-key")
            .with_model("claude-test");
        let writer = ClaudeWriter::from_config(&config).unwrap();
        assert_eq!(writer.client().model(), "claude-test");
        assert_eq!(writer.temperature, Some(0.7));
    }

    #[test]
    fn test_payload_tools_are_distinct() {
        let names = [
            NodePayload::as_tool().name,
            CharacterList::as_tool().name,
            GaugeList::as_tool().name,
            EndingList::as_tool().name,
            EpisodeOutlineList::as_tool().name,
        ];
        let unique: std::collections::BTreeSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
