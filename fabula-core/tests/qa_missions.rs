//! QA tests for missions and the storyline gate.
//!
//! These tests verify:
//! - A blocking story mission refuses the main loop end to end
//! - Submission completes via any satisfied path and pays exactly once
//! - Abandonment clears the block without granting anything
//! - The story-mission policy honors the cooldown and forcing windows
//!
//! Run with: `cargo test -p fabula-core --test qa_missions`

use fabula_core::testing::TestHarness;
use fabula_core::{
    CompletionPath, MissionDef, MissionReward, MissionStatus, MissionType, PathRequirements,
    SubmissionOutcome, TurnEvent,
};

fn blocking_mission() -> MissionDef {
    MissionDef::new(
        "Recover the seal",
        "The ducal seal lies somewhere in the crypt.",
        MissionType::Story,
    )
    .blocking()
    .with_path(CompletionPath::new(
        "fetch",
        "Bring the seal back",
        PathRequirements::new().with_item("seal", 1),
    ))
    .with_path(CompletionPath::new(
        "persuade",
        "Convince the duke he never needed it",
        PathRequirements::new().with_relationship("duke", 3),
    ))
    .with_reward(MissionReward::currency(50))
}

#[tokio::test]
async fn test_blocking_mission_refuses_the_main_loop() {
    let mut harness = TestHarness::new("gate").await;
    let mission = harness
        .session
        .missions
        .create(blocking_mission())
        .expect("create")
        .clone();

    let (outcome, events) = harness.run_turn("I go shopping", &["unused"]).await;

    assert!(outcome.blocked.is_some());
    assert!(outcome.text.contains("Recover the seal"));
    assert!(outcome.steps.is_empty());
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::Blocked { .. })));
    // The model was never consulted: no transcript entry for this turn.
    assert!(harness.transcript().is_empty());

    // Resolving the mission reopens the loop.
    harness.session.missions.abandon(mission.id).expect("abandon");
    let (outcome, _) = harness
        .run_turn("I go shopping", &["[NARRATION: The market is busy.]"])
        .await;
    assert!(outcome.blocked.is_none());
    assert_eq!(harness.transcript().len(), 1);
}

#[tokio::test]
async fn test_submission_completes_via_any_path() {
    let mut harness = TestHarness::new("paths").await;
    let mission = harness
        .session
        .missions
        .create(blocking_mission())
        .expect("create")
        .clone();

    // Satisfy the second path only.
    *harness
        .session
        .player
        .relationships
        .entry("duke".to_string())
        .or_insert(0) = 3;

    let player = harness.session.player.clone();
    let outcome = harness
        .session
        .missions
        .submit(mission.id, &player)
        .expect("submit");

    match outcome {
        SubmissionOutcome::Completed { path_id, reward } => {
            assert_eq!(path_id, "persuade");
            assert_eq!(reward.currency, 50);
        }
        other => panic!("expected completion, got {other:?}"),
    }

    let stored = harness.session.missions.get(mission.id).expect("mission");
    assert_eq!(stored.status, MissionStatus::Completed);
    assert_eq!(stored.completed_path.as_deref(), Some("persuade"));
    // The gate is open again.
    assert!(harness.session.missions.blocking_mission().is_none());
}

#[tokio::test]
async fn test_incomplete_submission_reports_all_paths() {
    let mut harness = TestHarness::new("paths").await;
    let mission = harness
        .session
        .missions
        .create(blocking_mission())
        .expect("create")
        .clone();

    let player = harness.session.player.clone();
    let outcome = harness
        .session
        .missions
        .submit(mission.id, &player)
        .expect("submit");

    match outcome {
        SubmissionOutcome::Incomplete { missing } => {
            assert_eq!(missing.len(), 2);
            assert_eq!(missing[0].0, "fetch");
            assert_eq!(missing[1].0, "persuade");
            assert!(!missing[0].1.is_empty());
        }
        other => panic!("expected incomplete, got {other:?}"),
    }

    // Still active, still blocking.
    let stored = harness.session.missions.get(mission.id).expect("mission");
    assert_eq!(stored.status, MissionStatus::Active);
    assert_eq!(stored.attempted_submissions, 1);
    assert!(harness.session.missions.blocking_mission().is_some());
}

#[tokio::test]
async fn test_abandonment_grants_nothing() {
    let mut harness = TestHarness::new("abandon").await;
    let mission = harness
        .session
        .missions
        .create(blocking_mission())
        .expect("create")
        .clone();

    harness.session.missions.abandon(mission.id).expect("abandon");

    let stored = harness.session.missions.get(mission.id).expect("mission");
    assert_eq!(stored.status, MissionStatus::Abandoned);
    assert_eq!(harness.player().currency, 0);
    assert!(harness.session.missions.blocking_mission().is_none());
}

#[tokio::test]
async fn test_story_mission_cooldown_and_forcing() {
    let mut harness = TestHarness::new("policy").await;

    // Marker too early: inside the cooldown window, nothing fires.
    let (outcome, _) = harness
        .run_turn("act", &["[NARRATION: Calm.] [NEW_MISSION]"])
        .await;
    assert!(!outcome.story_mission_requested);

    // Marker after the cooldown: the policy fires.
    let (outcome, _) = harness.run_turn("act", &["[NARRATION: Quiet.]"]).await;
    assert!(!outcome.story_mission_requested);
    let (outcome, events) = harness
        .run_turn("act", &["[NARRATION: Now.] [NEW_MISSION]"])
        .await;
    assert!(outcome.story_mission_requested);
    assert!(events
        .iter()
        .any(|e| matches!(e, TurnEvent::StoryMissionRequested)));
}

#[tokio::test]
async fn test_story_mission_forced_without_marker() {
    let mut harness = TestHarness::new("policy").await;

    let mut requested = false;
    for _ in 0..10 {
        let (outcome, _) = harness
            .run_turn("wander", &["[NARRATION: Nothing happens.]"])
            .await;
        requested = outcome.story_mission_requested;
    }
    assert!(requested, "policy must force a mission by the tenth turn");
}

#[tokio::test]
async fn test_policy_silent_while_blocked_then_fires_after_resolution() {
    let mut harness = TestHarness::new("policy").await;
    let mission = harness
        .session
        .missions
        .create(blocking_mission())
        .expect("create")
        .clone();

    // Blocked turns never request a mission, however long the block lasts.
    for _ in 0..12 {
        let (outcome, _) = harness.run_turn("wander", &["unused"]).await;
        assert!(outcome.blocked.is_some());
        assert!(!outcome.story_mission_requested);
    }

    // The window elapsed during the block, so the first real turn after
    // resolution asks for a new mission.
    harness.session.missions.abandon(mission.id).expect("abandon");
    let (outcome, _) = harness
        .run_turn("wander", &["[NARRATION: Free at last.]"])
        .await;
    assert!(outcome.story_mission_requested);
}

#[tokio::test]
async fn test_second_story_mission_rejected_while_one_active() {
    let mut harness = TestHarness::new("single").await;
    harness
        .session
        .missions
        .create(blocking_mission())
        .expect("first");

    let err = harness
        .session
        .missions
        .create(blocking_mission())
        .unwrap_err();
    assert!(matches!(
        err,
        fabula_core::MissionError::StoryMissionActive
    ));
}
