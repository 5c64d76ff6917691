//! Interactive story generator CLI.
//!
//! ```bash
//! story analyze novel.txt
//! story generate novel.txt --gauges hope,trust --episodes 3 --depth 3 --out story.json
//! story validate story.json
//! story export story.json --format html --out story.html
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use story_core::export::write_export;
use story_core::{
    BlobStore, Director, EndingMix, EngineConfig, ExportFormat, InitialAnalysis, LocalBlobStore,
    PlaythroughSimulator, SimulationConfig, Story, StoryDocument, TreeValidator,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "story")]
#[command(about = "Turn a novel into a branching interactive story")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize a novel, list its characters and suggest gauges
    Analyze {
        novel: PathBuf,

        /// Save the analysis as JSON for a later `generate --analysis`
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Generate a complete story
    Generate {
        novel: PathBuf,

        /// Comma-separated gauge names to keep from the suggestions
        #[arg(long, value_delimiter = ',')]
        gauges: Option<Vec<String>>,

        #[arg(long)]
        episodes: Option<u32>,

        /// Tree depth per episode (2 to 5)
        #[arg(long)]
        depth: Option<u8>,

        /// Final ending mix, e.g. "happy:2,tragic:1,open:1"
        #[arg(long)]
        endings: Option<String>,

        /// Reuse a saved analysis instead of analyzing again
        #[arg(long)]
        analysis: Option<PathBuf>,

        /// Fail when an ending cannot be reached
        #[arg(long)]
        strict: bool,

        #[arg(long, default_value = "story.json")]
        out: PathBuf,
    },

    /// Check a saved story
    Validate { story: PathBuf },

    /// Play random walks through a saved story
    Simulate {
        story: PathBuf,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        #[arg(long, default_value_t = 2000)]
        walks: usize,
    },

    /// Render a saved story as Markdown, HTML or game JSON
    Export {
        story: PathBuf,

        /// md, html or json
        #[arg(long, default_value = "md")]
        format: String,

        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Copy a file into a local blob store
    Upload {
        file: PathBuf,

        #[arg(long, default_value = "blobs")]
        root: PathBuf,

        #[arg(long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("story=info,story_core=info")),
        )
        .init();

    let args = Args::parse();
    match args.command {
        Command::Analyze { novel, out } => analyze(&novel, out.as_deref()).await,
        Command::Generate {
            novel,
            gauges,
            episodes,
            depth,
            endings,
            analysis,
            strict,
            out,
        } => {
            let mut config = EngineConfig::from_env()?.with_strict_endings(strict);
            if let Some(n) = episodes {
                config = config.with_episodes(n);
            }
            if let Some(d) = depth {
                config = config.with_max_depth(d);
            }
            if let Some(mix) = endings {
                config = config.with_ending_mix(mix.parse::<EndingMix>()?);
            }
            generate(config, &novel, gauges.as_deref(), analysis.as_deref(), &out).await
        }
        Command::Validate { story } => validate(&story).await,
        Command::Simulate { story, seed, walks } => simulate(&story, seed, walks).await,
        Command::Export { story, format, out } => export(&story, &format, out).await,
        Command::Upload { file, root, key } => upload(&file, root, key).await,
    }
}

async fn read_novel(path: &Path) -> Result<String> {
    let novel = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    if novel.trim().is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(novel)
}

async fn load_story(path: &Path) -> Result<Story> {
    let document = StoryDocument::load_json(path)
        .await
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(document.into_story())
}

async fn analyze(novel: &Path, out: Option<&Path>) -> Result<()> {
    let text = read_novel(novel).await?;
    let director = Director::from_config(EngineConfig::from_env()?)?;
    let analysis = director.analyze(&text).await?;

    println!("Summary\n-------\n{}\n", analysis.summary);
    println!("Characters\n----------");
    for character in &analysis.characters {
        println!("- {}: {}", character.name, character.description);
    }
    println!("\nSuggested gauges\n----------------");
    for gauge in &analysis.suggested_gauges {
        println!(
            "- {} ({}): {} [starts at {}]",
            gauge.name, gauge.label, gauge.meaning, gauge.initial
        );
    }

    if let Some(out) = out {
        tokio::fs::write(out, serde_json::to_string_pretty(&analysis)?).await?;
        info!(path = %out.display(), "Analysis saved");
    }
    Ok(())
}

async fn generate(
    config: EngineConfig,
    novel: &Path,
    gauges: Option<&[String]>,
    analysis: Option<&Path>,
    out: &Path,
) -> Result<()> {
    let director = Director::from_config(config)?;

    let generated = match analysis {
        Some(path) => {
            let saved = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let analysis: InitialAnalysis = serde_json::from_str(&saved)?;
            director.generate_from_analysis(analysis, gauges).await?
        }
        None => {
            let text = read_novel(novel).await?;
            director.generate_story(&text, gauges).await?
        }
    };

    for warning in &generated.warnings {
        println!("warning: {warning}");
    }
    if let Some(simulation) = &generated.simulation {
        for id in simulation.unreached() {
            println!("warning: final ending '{id}' was never reached in {} walks", simulation.walks);
        }
    }

    let document = StoryDocument::new(generated.story);
    document.save_json(out).await?;
    println!(
        "Saved {} episodes ({} nodes) to {}",
        document.metadata.episode_count,
        document.metadata.node_count,
        out.display()
    );
    Ok(())
}

async fn validate(path: &Path) -> Result<()> {
    let story = load_story(path).await?;
    let report = TreeValidator::new().validate_story(&story)?;

    for episode in &report.episodes {
        println!("{}: {} terminals", episode.episode_id, episode.terminals);
        for (ending, hits) in &episode.ending_hits {
            println!("  {ending}: {hits}");
        }
    }
    println!("\nGauge ranges after the last episode:");
    for (gauge, range) in &report.gauge_ranges {
        println!("  {gauge}: {}..={}", range.min, range.max);
    }
    let coverage = &report.tag_coverage;
    println!(
        "\nTag coverage: {:.0}% (unused: {})",
        coverage.coverage_rate * 100.0,
        coverage.unused_tags.iter().cloned().collect::<Vec<_>>().join(", ")
    );

    if report.is_balanced() {
        println!("\nNo warnings.");
    } else {
        println!();
        for warning in &report.warnings {
            println!("warning: {warning}");
        }
    }
    Ok(())
}

async fn simulate(path: &Path, seed: u64, walks: usize) -> Result<()> {
    let story = load_story(path).await?;
    let simulator = PlaythroughSimulator::new(SimulationConfig {
        seed,
        walk_budget: walks,
        ..SimulationConfig::default()
    });
    let result = simulator.simulate_story(&story)?;

    for episode in &result.episodes {
        println!("{} ({:?}, {} walks)", episode.episode_id, episode.coverage, episode.walks);
        for (ending, hits) in &episode.ending_hits {
            println!("  {ending}: {hits}");
        }
    }
    println!("\nFinal endings over {} walks (seed {}):", result.walks, result.seed);
    for (ending, hits) in &result.final_hits {
        println!("  {ending}: {hits}");
    }
    Ok(())
}

async fn export(path: &Path, format: &str, out: Option<PathBuf>) -> Result<()> {
    let story = load_story(path).await?;
    let format: ExportFormat = format.parse()?;
    let out = out.unwrap_or_else(|| path.with_extension(format.extension()));
    write_export(&story, format, &out).await?;
    println!("Exported to {}", out.display());
    Ok(())
}

async fn upload(file: &Path, root: PathBuf, key: Option<String>) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let key = match key {
        Some(key) => key,
        None => file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("file has no name")?,
    };

    let store = LocalBlobStore::new(root);
    let url = store.upload(&bytes, &key).await?;
    println!("{url}");
    Ok(())
}
