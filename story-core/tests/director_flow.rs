//! End-to-end pipeline tests with the scripted writer.
//!
//! Nothing here reaches the network; every collaborator call is answered by
//! `ScriptedWriter`.

use std::sync::Arc;
use story_core::export::{to_game_json, to_markdown};
use story_core::simulate::play_story;
use story_core::{
    CarriedState, Director, DirectorError, EndingKind, EngineConfig, Fault, ScriptedWriter, SimulationConfig,
    StoryDocument, TreeValidator, ValidationWarning,
};
use tempfile::TempDir;

const NOVEL: &str = "The storm reached the village at dusk.\nMara lit the lamp.\nIlan waited by the boats.";

fn config() -> EngineConfig {
    EngineConfig::default()
        .with_max_depth(3)
        .with_episodes(3)
        .with_tag_vocabulary(["brave", "cautious"])
        .with_simulation(SimulationConfig {
            seed: 7,
            walk_budget: 1000,
            exhaustive_cap: 4096,
        })
}

#[tokio::test]
async fn test_full_story_generation() {
    let director = Director::with_writer(ScriptedWriter::new(2), config()).unwrap();
    let generated = director.generate_story(NOVEL, None).await.unwrap();
    let story = &generated.story;

    assert_eq!(story.episodes.len(), 3);
    assert_eq!(story.initial_analysis.characters.len(), 2);
    assert_eq!(story.gauges.names().collect::<Vec<_>>(), vec!["hope", "trust"]);

    for (i, episode) in story.episodes.iter().enumerate() {
        assert_eq!(episode.order, i as u32 + 1);
        // 1 + 2 + 4 + 8
        assert_eq!(episode.tree.len(), 15);
        assert!(episode.tree.terminals().all(|n| n.ending_id.is_some()));
        assert_eq!(episode.endings.last().unwrap().id, "default");
    }

    assert!(generated.warnings.is_empty(), "{:?}", generated.warnings);
    let simulation = generated.simulation.expect("simulation is on by default");
    assert_eq!(simulation.walks, 1000);
    assert_eq!(simulation.unreached().count(), 0);

    let report = TreeValidator::new().validate_story(story).unwrap();
    assert!(report.is_balanced());
    assert_eq!(report.gauge_ranges["hope"].min, 20);
    assert_eq!(report.gauge_ranges["hope"].max, 100);
}

#[tokio::test]
async fn test_carried_state_reaches_next_episode() {
    let director = Director::with_writer(ScriptedWriter::new(2), config()).unwrap();
    let analysis = director.analyze(NOVEL).await.unwrap();
    let plan = director.plan(&analysis, Some(&["hope".to_string()])).await.unwrap();

    let start = CarriedState::new(&plan.gauges);
    let first = director
        .generate_episode(&analysis, &plan, &plan.outlines[0], &start)
        .await
        .unwrap();

    assert_eq!(first.carried.next_order, 2);
    let summary = first.carried.previous_summary.as_deref().unwrap();
    assert!(summary.contains("Chapter 1"));
    assert!(summary.contains("Bold Stand"));
    assert_eq!(first.carried.gauge_ranges["hope"].min, 40);
    assert_eq!(first.carried.gauge_ranges["hope"].max, 85);

    // The earlier state is untouched.
    assert_eq!(start.next_order, 1);
    assert!(start.previous_summary.is_none());
}

#[tokio::test]
async fn test_single_branch_story_reports_unreachable_endings() {
    let director = Director::with_writer(ScriptedWriter::new(1), config().with_episodes(2)).unwrap();
    let generated = director.generate_story(NOVEL, None).await.unwrap();

    let unreachable: Vec<(&str, EndingKind)> = generated
        .warnings
        .iter()
        .map(|w| match w {
            ValidationWarning::UnreachableEnding { ending_id, ending_kind } => (ending_id.as_str(), *ending_kind),
        })
        .collect();
    assert!(unreachable.contains(&("wary", EndingKind::Episode)));
    assert!(unreachable.contains(&("fallen", EndingKind::Final)));
    assert!(!unreachable.contains(&("bright", EndingKind::Final)));
}

#[tokio::test]
async fn test_strict_endings_reject_the_episode() {
    let director = Director::with_writer(ScriptedWriter::new(1), config().with_strict_endings(true)).unwrap();
    let err = director.generate_story(NOVEL, None).await.unwrap_err();
    match err {
        DirectorError::UnreachableEndings { scope, endings } => {
            assert_eq!(scope, "ep1");
            assert!(endings.contains(&"wary".to_string()));
        }
        other => panic!("expected unreachable endings, got {other}"),
    }
}

#[tokio::test]
async fn test_failed_episode_returns_no_story() {
    let writer = Arc::new(ScriptedWriter::new(2).with_fault(2, Fault::UnknownTag, 10));
    let director = Director::new(writer.clone(), writer.clone(), config().with_depth_retries(2)).unwrap();

    let err = director.generate_story(NOVEL, None).await.unwrap_err();
    assert!(matches!(err, DirectorError::Build(_)));
    // Root and depth 1 once, then three attempts at depth 2.
    assert!(writer.node_calls() >= 3 + 3);
}

#[tokio::test]
async fn test_fan_out_is_bounded() {
    let writer = Arc::new(ScriptedWriter::new(3));
    let director = Director::new(
        writer.clone(),
        writer.clone(),
        config().with_episodes(1).with_max_concurrency(4).without_simulation(),
    )
    .unwrap();
    director.generate_story(NOVEL, None).await.unwrap();

    assert!(writer.max_in_flight() > 1);
    assert!(writer.max_in_flight() <= 4);
}

#[tokio::test]
async fn test_generated_story_round_trips_and_exports() {
    let director = Director::with_writer(ScriptedWriter::new(2), config().with_episodes(2)).unwrap();
    let story = director.generate_story(NOVEL, None).await.unwrap().story;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("story.json");
    StoryDocument::new(story.clone()).save_json(&path).await.unwrap();
    let loaded = StoryDocument::load_json(&path).await.unwrap().into_story();
    assert_eq!(loaded, story);

    let markdown = to_markdown(&loaded);
    assert!(markdown.contains("Chapter 1"));
    assert!(markdown.contains("Bold Stand"));

    let game: serde_json::Value = serde_json::from_str(&to_game_json(&loaded).unwrap()).unwrap();
    assert_eq!(game["episodes"].as_array().unwrap().len(), 2);

    // Always taking the first choice is the all-brave path in every episode.
    let playthrough = play_story(&loaded, &[vec![], vec![]]).unwrap();
    assert!(playthrough.episodes.iter().all(|o| o.ending_id == "bold"));
    assert_eq!(playthrough.final_ending_id, "bright");
}
