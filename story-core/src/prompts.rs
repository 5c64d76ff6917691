//! Prompt text for the Claude-backed writer.
//!
//! Prompts are plain functions of their inputs so they can be inspected in
//! tests without a client.

use crate::config::{EndingCategory, EndingMix};
use crate::ending::Ending;
use crate::gauge::GaugeModel;
use crate::generator::NodeRequest;
use crate::payload::{Character, EpisodeOutline};
use crate::tree::NodeType;
use std::fmt::Write;

/// Novels longer than this many lines are sampled for character extraction.
pub const SAMPLE_THRESHOLD: usize = 1000;
const SAMPLE_HEAD: usize = 400;
const SAMPLE_MIDDLE: usize = 200;
const SAMPLE_TAIL: usize = 400;

pub const WRITER_SYSTEM: &str = "You are an interactive fiction writer adapting a novel into a \
branching story. Stay faithful to the novel's characters, tone and setting. Write vivid prose \
with dialogue and concrete action.";

/// Number every line, keeping the head, middle and tail of long texts.
pub fn sample_lines(novel: &str) -> String {
    let lines: Vec<&str> = novel.lines().collect();
    let selected: Vec<(usize, &str)> = if lines.len() <= SAMPLE_THRESHOLD {
        lines.iter().copied().enumerate().collect()
    } else {
        let mid_start = lines.len() / 2 - SAMPLE_MIDDLE / 2;
        let tail_start = lines.len() - SAMPLE_TAIL;
        (0..SAMPLE_HEAD)
            .chain(mid_start..mid_start + SAMPLE_MIDDLE)
            .chain(tail_start..lines.len())
            .map(|i| (i, lines[i]))
            .collect()
    };

    let mut out = String::new();
    for (i, line) in selected {
        let _ = writeln!(out, "[{}] {}", i + 1, line);
    }
    out
}

pub fn summarize(text: &str) -> String {
    format!(
        "Summarize the following part of a novel in about 200 words. Cover the main events, \
what the characters do and the conflicts between them.\n\n[Text]\n{text}"
    )
}

pub fn merge_summaries(summaries: &[String]) -> String {
    let mut parts = String::new();
    for (i, summary) in summaries.iter().enumerate() {
        let _ = writeln!(parts, "[Part {}] {}\n", i + 1, summary);
    }
    format!(
        "Below are summaries of consecutive parts of one novel. Merge them into a single summary \
of about 400 words covering plot, themes, central conflict and resolution.\n\n{parts}"
    )
}

pub fn extract_characters(novel: &str) -> String {
    format!(
        "You are a literary analyst. Extract the main characters from the novel below. Lines are \
numbered; cite supporting lines as [cite: N].\n\n\
For each character give the name, other names the text uses for them, a description covering \
appearance, personality, key actions and how they change, and their relationships with other \
characters tied to concrete scenes.\n\n[Novel]\n{}",
        sample_lines(novel)
    )
}

pub fn suggest_gauges(summary: &str) -> String {
    format!(
        "Design a gauge system for an interactive version of this novel. A gauge is a number \
from 0 to 100 that tracks something at the heart of the story's conflict and theme, and that \
the player's choices push up or down over several episodes.\n\n\
Suggest 3 to 5 gauges. Give each a short lowercase identifier, a display label, what it \
measures, what its minimum and maximum mean, and a starting value.\n\n[Summary]\n{summary}"
    )
}

fn describe_gauges(gauges: &GaugeModel) -> String {
    let mut out = String::new();
    for g in gauges.gauges() {
        let _ = writeln!(
            out,
            "- {} ({}): {} [{}..{}, starts at {}; {} = {}, {} = {}]",
            g.name, g.label, g.meaning, g.min, g.max, g.initial, g.min, g.min_label, g.max, g.max_label
        );
    }
    out
}

fn describe_mix(mix: &EndingMix) -> String {
    let mut out = String::new();
    for (category, count) in mix.iter() {
        let _ = writeln!(out, "- {count} x {}: {}", category.as_str(), category.guidance());
    }
    out
}

fn describe_characters<'a>(characters: impl IntoIterator<Item = &'a Character>) -> String {
    let mut out = String::new();
    for c in characters {
        let _ = write!(out, "- {}", c.name);
        if !c.aliases.is_empty() {
            let _ = write!(out, " (also: {})", c.aliases.join(", "));
        }
        let _ = writeln!(out, ": {}", c.description);
    }
    out
}

pub fn design_final_endings(summary: &str, gauges: &GaugeModel, mix: &EndingMix) -> String {
    let categories: Vec<&str> = EndingCategory::ALL.iter().map(EndingCategory::as_str).collect();

    format!(
        "Design the final endings of the whole story. Which one the player reaches depends only \
on the gauge values after the last episode.\n\n[Summary]\n{summary}\n\n[Gauges]\n{}\n\
[Endings to write]\n{}\n\
Write each condition as comparisons of gauge names against integers using >=, <=, ==, !=, > or \
<, joined with AND or OR (AND binds loosest), for example `hope >= 70 AND trust >= 50`. Exactly \
one ending must have the condition `default` and catches everything else. The category of each \
ending must be one of: {}.",
        describe_gauges(gauges),
        describe_mix(mix),
        categories.join(", ")
    )
}

pub fn split_episodes(summary: &str, characters: &[Character], count: u32) -> String {
    format!(
        "Split this novel into {count} self-contained episodes that follow its plot in order. \
Each episode needs a short id, a title, its position starting at 1, what happens in it, its \
theme and the characters at its center.\n\n[Summary]\n{summary}\n\n[Characters]\n{}",
        describe_characters(characters)
    )
}

pub fn episode_intro(outline: &EpisodeOutline, characters: &[Character], summary: &str) -> String {
    let featured = characters
        .iter()
        .filter(|c| outline.key_characters.iter().any(|k| k == &c.name));
    format!(
        "Write the opening of the episode \"{}\" in two or three paragraphs. Set the scene and \
bring in the characters, but leave the first decision to the player.\n\n\
[Episode]\n{}\nTheme: {}\n\n[Characters]\n{}\n[Novel]\n{summary}",
        outline.title,
        outline.description,
        outline.theme,
        describe_characters(featured)
    )
}

pub fn design_episode_endings(
    outline: &EpisodeOutline,
    gauges: &GaugeModel,
    vocabulary: &[String],
    count: u32,
) -> String {
    format!(
        "Design {count} endings for the episode \"{}\". The player reaches an ending through the \
tags of the choices they made in this episode, and each ending then shifts the gauges.\n\n\
[Episode]\n{}\n\n[Tags]\n{}\n\n[Gauges]\n{}\n\
Write each condition as comparisons of tag counts against integers using >=, <=, ==, !=, > or \
<, joined with AND or OR (AND binds loosest), for example `brave >= 2 AND fearful == 0`. Use \
only the tags listed. Exactly one ending must have the condition `default`. Give each ending \
gauge changes between -30 and 30 naming only the gauges listed.",
        outline.title,
        outline.description,
        vocabulary.join(", "),
        describe_gauges(gauges)
    )
}

fn describe_endings(endings: &[Ending]) -> String {
    let mut out = String::new();
    for e in endings {
        let _ = writeln!(out, "- {} [{}]", e.title, e.condition);
    }
    out
}

/// System prompt shared by every node of an episode.
pub fn node_system(request: &NodeRequest) -> String {
    let context = &request.context;
    let mut system = format!(
        "{WRITER_SYSTEM}\n\n[Novel]\n{}\n\n[Characters]\n{}\n[Gauges]\n{}\n[Episode: {}]\n{}\n\n[Opening]\n{}",
        context.novel_summary,
        describe_characters(&context.characters),
        describe_gauges(&context.gauges),
        context.outline.title,
        context.outline.description,
        context.intro,
    );
    if let Some(previous) = &context.previous_summary {
        let _ = write!(system, "\n\n[Previously]\n{previous}");
    }
    if !context.endings.is_empty() {
        let _ = write!(system, "\n\n[Possible endings]\n{}", describe_endings(&context.endings));
    }
    system
}

/// User prompt for one node, built from its place in the tree.
pub fn node_prompt(request: &NodeRequest) -> String {
    let mut prompt = String::new();
    if request.path.is_empty() {
        prompt.push_str("Write the first scene of the episode.\n\n");
    } else {
        prompt.push_str("[Story so far]\n");
        for step in &request.path {
            let _ = writeln!(prompt, "{}\n> {}\n", step.scene, step.choice);
        }
        prompt.push_str("Continue the story from the player's last choice.\n\n");
    }

    let _ = writeln!(
        prompt,
        "Depth {} of {}. Write 150 to 300 words, note how the other characters feel, sum up the \
situation in one line and record any change in their relationships.",
        request.depth, request.max_depth
    );

    match request.node_type {
        NodeType::Ending => prompt.push_str(
            "This scene ends the episode. Bring it to a close and offer no choices.",
        ),
        NodeType::Climax | NodeType::Normal => {
            if request.node_type == NodeType::Climax {
                prompt.push_str("This is the climax of the episode. Raise the stakes.\n");
            }
            let _ = write!(
                prompt,
                "Offer 2 to 4 first-person choices. Tag each with one or two of: {}. A choice may \
shift gauges by small amounts (-10 to 10), naming only the gauges listed.",
                request.context.vocabulary.join(", ")
            );
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::PathStep;
    use crate::testing::episode_context;

    fn request(depth: u8, node_type: NodeType, path: Vec<PathStep>) -> NodeRequest {
        NodeRequest {
            context: episode_context(),
            node_id: "n0".to_string(),
            depth,
            max_depth: 3,
            node_type,
            parent: None,
            path,
        }
    }

    #[test]
    fn test_short_novels_are_numbered_whole() {
        let sampled = sample_lines("first\nsecond");
        assert_eq!(sampled, "[1] first\n[2] second\n");
    }

    #[test]
    fn test_long_novels_are_sampled() {
        let novel: Vec<String> = (1..=2000).map(|i| format!("line {i}")).collect();
        let sampled = sample_lines(&novel.join("\n"));
        assert_eq!(sampled.lines().count(), 1000);
        assert!(sampled.starts_with("[1] line 1\n"));
        assert!(sampled.contains("[400] line 400\n"));
        assert!(!sampled.contains("[401] line 401\n"));
        assert!(sampled.contains("[901] line 901\n"));
        assert!(sampled.ends_with("[2000] line 2000\n"));
    }

    #[test]
    fn test_ending_node_asks_for_no_choices() {
        let prompt = node_prompt(&request(3, NodeType::Ending, Vec::new()));
        assert!(prompt.contains("offer no choices"));
        assert!(!prompt.contains("Tag each"));
    }

    #[test]
    fn test_node_prompt_lists_vocabulary_and_path() {
        let path = vec![PathStep {
            scene: "The tide rises.".to_string(),
            choice: "I climb the tower.".to_string(),
        }];
        let prompt = node_prompt(&request(1, NodeType::Normal, path));
        assert!(prompt.contains("brave, cautious, trusting"));
        assert!(prompt.contains("> I climb the tower."));
    }

    #[test]
    fn test_final_endings_prompt_lists_mix() {
        let context = episode_context();
        let prompt = design_final_endings("summary", &context.gauges, &EndingMix::default());
        assert!(prompt.contains("hope (hope)"));
        assert!(prompt.contains("`default`"));
    }
}
