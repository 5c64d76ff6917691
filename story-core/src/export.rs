//! Rendering finished stories for people and game engines.

use crate::ending::Ending;
use crate::gauge::{Deltas, Gauge};
use crate::story::{Episode, Story};
use crate::tree::child_id;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown export format '{0}' (expected md, html or json)")]
    UnknownFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Html,
    /// Simplified JSON for game engines.
    GameJson,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::Html => "html",
            ExportFormat::GameJson => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "html" => Ok(ExportFormat::Html),
            "json" | "game" => Ok(ExportFormat::GameJson),
            other => Err(ExportError::UnknownFormat(other.to_string())),
        }
    }
}

/// Render a story in the given format.
pub fn render(story: &Story, format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Markdown => Ok(to_markdown(story)),
        ExportFormat::Html => Ok(to_html(story)),
        ExportFormat::GameJson => to_game_json(story),
    }
}

/// Render and write to `path`.
pub async fn write_export(story: &Story, format: ExportFormat, path: impl AsRef<Path>) -> Result<(), ExportError> {
    let content = render(story, format)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

fn format_changes(changes: &Deltas) -> String {
    changes
        .iter()
        .map(|(gauge, delta)| format!("{gauge}: {delta:+}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn category_label(ending: &Ending) -> &'static str {
    ending.category.map(|c| c.as_str()).unwrap_or("ending")
}

pub fn to_markdown(story: &Story) -> String {
    let mut out = String::new();
    let gauges: Vec<&str> = story.gauges.names().collect();

    let _ = writeln!(out, "# Interactive Story\n");
    let _ = writeln!(out, "- Episodes: {}", story.episodes.len());
    let _ = writeln!(out, "- Nodes: {}", story.node_count());
    let _ = writeln!(out, "- Gauges: {}\n", gauges.join(", "));

    let _ = writeln!(out, "## Final Endings");
    for ending in &story.final_endings {
        let _ = writeln!(out, "\n### [{}] {}", category_label(ending), ending.title);
        let _ = writeln!(out, "- Condition: `{}`", ending.condition);
        if !ending.text.is_empty() {
            let _ = writeln!(out, "- {}", ending.text);
        }
    }

    for episode in &story.episodes {
        let _ = writeln!(out, "\n## Episode {}: {}", episode.order, episode.title);
        if !episode.theme.is_empty() {
            let _ = writeln!(out, "\n**Theme**: {}", episode.theme);
        }
        if !episode.description.is_empty() {
            let _ = writeln!(out, "\n**Description**: {}", episode.description);
        }
        if !episode.intro_text.is_empty() {
            let _ = writeln!(out, "\n### Introduction\n\n{}", episode.intro_text);
        }

        let _ = writeln!(out, "\n### Scenes");
        for node in episode.tree.nodes() {
            let _ = writeln!(out, "\n#### `{}` ({})\n\n{}", node.id, node.node_type, node.text);
            for (i, choice) in node.choices.iter().enumerate() {
                let tags: Vec<&str> = choice.tags.iter().map(String::as_str).collect();
                let _ = writeln!(
                    out,
                    "- {} [{}] -> `{}`",
                    choice.text,
                    tags.join(", "),
                    child_id(&node.id, i)
                );
            }
            if let Some(ending) = node.ending_id.as_deref().and_then(|id| episode.ending(id)) {
                let _ = writeln!(out, "- Ending: {}", ending.title);
            }
        }

        let _ = writeln!(out, "\n### Episode Endings");
        for ending in &episode.endings {
            let _ = writeln!(out, "\n#### {}", ending.title);
            let _ = writeln!(out, "- Condition: `{}`", ending.condition);
            if !ending.gauge_changes.is_empty() {
                let _ = writeln!(out, "- Gauges: {}", format_changes(&ending.gauge_changes));
            }
            if !ending.text.is_empty() {
                let _ = writeln!(out, "- {}", ending.text);
            }
        }
    }
    out
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn paragraphs(text: &str) -> String {
    escape_html(text).replace('\n', "<br>")
}

pub fn to_html(story: &Story) -> String {
    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html><head>\n<meta charset='utf-8'>\n<title>Interactive Story</title>\n");
    out.push_str(
        "<style>\n\
         body { font-family: sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; }\n\
         .episode { border: 1px solid #ddd; margin: 20px 0; padding: 20px; border-radius: 8px; }\n\
         .intro { background: #f5f5f5; padding: 15px; border-radius: 5px; }\n\
         .node { margin: 10px 0; }\n\
         .ending { background: #e8f4e8; padding: 10px; margin: 10px 0; border-radius: 5px; }\n\
         .gauge { color: #666; font-size: 0.9em; }\n\
         </style>\n</head><body>\n",
    );

    let _ = writeln!(out, "<h1>Interactive Story</h1>");
    let _ = writeln!(
        out,
        "<p>Episodes: {} | Nodes: {}</p>",
        story.episodes.len(),
        story.node_count()
    );

    let _ = writeln!(out, "<h2>Final Endings</h2>");
    for ending in &story.final_endings {
        write_html_ending(&mut out, ending);
    }

    for episode in &story.episodes {
        write_html_episode(&mut out, episode);
    }

    out.push_str("</body></html>\n");
    out
}

fn write_html_episode(out: &mut String, episode: &Episode) {
    let _ = writeln!(out, "<div class='episode' id='{}'>", escape_html(&episode.id));
    let _ = writeln!(
        out,
        "<h2>Episode {}: {}</h2>",
        episode.order,
        escape_html(&episode.title)
    );
    if !episode.theme.is_empty() {
        let _ = writeln!(out, "<p><strong>Theme:</strong> {}</p>", escape_html(&episode.theme));
    }
    if !episode.intro_text.is_empty() {
        let _ = writeln!(
            out,
            "<div class='intro'><h3>Introduction</h3><p>{}</p></div>",
            paragraphs(&episode.intro_text)
        );
    }

    for node in episode.tree.nodes() {
        let _ = writeln!(
            out,
            "<div class='node' id='{}-{}'><p>{}</p>",
            escape_html(&episode.id),
            escape_html(&node.id),
            paragraphs(&node.text)
        );
        if !node.choices.is_empty() {
            out.push_str("<ul>\n");
            for (i, choice) in node.choices.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "<li><a href='#{}-{}'>{}</a></li>",
                    escape_html(&episode.id),
                    escape_html(&child_id(&node.id, i)),
                    escape_html(&choice.text)
                );
            }
            out.push_str("</ul>\n");
        }
        out.push_str("</div>\n");
    }

    let _ = writeln!(out, "<h3>Endings</h3>");
    for ending in &episode.endings {
        write_html_ending(out, ending);
    }
    out.push_str("</div>\n");
}

fn write_html_ending(out: &mut String, ending: &Ending) {
    let _ = writeln!(out, "<div class='ending'>");
    let _ = writeln!(out, "<strong>{}</strong>", escape_html(&ending.title));
    let mut gauge_line = format!("Condition: {}", escape_html(&ending.condition.to_string()));
    if !ending.gauge_changes.is_empty() {
        gauge_line.push_str(" | ");
        gauge_line.push_str(&escape_html(&format_changes(&ending.gauge_changes)));
    }
    let _ = writeln!(out, "<p class='gauge'>{gauge_line}</p>");
    if !ending.text.is_empty() {
        let _ = writeln!(out, "<p>{}</p>", paragraphs(&ending.text));
    }
    out.push_str("</div>\n");
}

#[derive(Serialize)]
struct GameExport<'a> {
    gauges: &'a [Gauge],
    final_endings: &'a [Ending],
    episodes: Vec<GameEpisode<'a>>,
}

#[derive(Serialize)]
struct GameEpisode<'a> {
    id: &'a str,
    title: &'a str,
    order: u32,
    intro_text: &'a str,
    endings: &'a [Ending],
    nodes: Vec<GameNode<'a>>,
}

#[derive(Serialize)]
struct GameNode<'a> {
    id: &'a str,
    parent_id: Option<&'a str>,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ending_id: Option<&'a str>,
    choices: Vec<GameChoice<'a>>,
}

#[derive(Serialize)]
struct GameChoice<'a> {
    text: &'a str,
    tags: Vec<&'a str>,
    next: String,
}

pub fn to_game_json(story: &Story) -> Result<String, ExportError> {
    let episodes = story
        .episodes
        .iter()
        .map(|episode| GameEpisode {
            id: &episode.id,
            title: &episode.title,
            order: episode.order,
            intro_text: &episode.intro_text,
            endings: &episode.endings,
            nodes: episode
                .tree
                .nodes()
                .map(|node| GameNode {
                    id: &node.id,
                    parent_id: node.parent_id.as_deref(),
                    text: &node.text,
                    ending_id: node.ending_id.as_deref(),
                    choices: node
                        .choices
                        .iter()
                        .enumerate()
                        .map(|(i, choice)| GameChoice {
                            text: &choice.text,
                            tags: choice.tags.iter().map(String::as_str).collect(),
                            next: child_id(&node.id, i),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    let export = GameExport {
        gauges: story.gauges.gauges(),
        final_endings: &story.final_endings,
        episodes,
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_story;

    #[test]
    fn test_markdown_lists_episodes_and_endings() {
        let md = to_markdown(&sample_story());
        assert!(md.starts_with("# Interactive Story"));
        assert!(md.contains("## Episode 1:"));
        assert!(md.contains("## Episode 2:"));
        assert!(md.contains("- Condition: `brave >= 2`"));
        assert!(md.contains("- Gauges: hope: +30"));
    }

    #[test]
    fn test_html_is_escaped() {
        let mut story = sample_story();
        story.episodes[0].title = "<script>alert('x')</script>".to_string();
        let html = to_html(&story);
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;"));
    }

    #[test]
    fn test_game_json_shape() {
        let json = to_game_json(&sample_story()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["gauges"][0]["name"], "hope");
        let nodes = value["episodes"][0]["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 7);
        assert_eq!(nodes[0]["choices"][1]["next"], "n0.1");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert_eq!("HTML".parse::<ExportFormat>().unwrap(), ExportFormat::Html);
        assert_eq!("json".parse::<ExportFormat>().unwrap().extension(), "json");
        assert!("pdf".parse::<ExportFormat>().is_err());
    }

    #[tokio::test]
    async fn test_write_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("story.md");
        write_export(&sample_story(), ExportFormat::Markdown, &path).await.unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("Final Endings"));
    }
}
