use super::*;
use crate::test_support::*;

use anyhow::Result;
use async_trait::async_trait;
use replicate_integration::{GenerationRequest, ImageGenerator};
use shared::domain::SessionUser;
use tokio::sync::Notify;

fn alice() -> UserId {
    UserId::from("alice-uuid")
}

fn dashboard(harness: &Harness) -> Dashboard {
    Dashboard::new(Arc::new(harness.pipeline()))
}

/// Holds every generation until released.
struct GatedGenerator {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl ImageGenerator for GatedGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> Result<Vec<String>> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(vec!["https://replicate.delivery/slow.png".to_string()])
    }
}

#[tokio::test]
async fn identity_loads_history_and_sign_out_clears_it() {
    let harness = Harness::working();
    harness.records.seed("alice-uuid", 3).await;
    let dashboard = dashboard(&harness);

    dashboard.on_identity(Some(alice())).await;
    let state = dashboard.snapshot().await;
    assert_eq!(state.identity, Some(alice()));
    assert_eq!(state.history.len(), 3);
    assert!(!state.history_loading);

    dashboard.on_identity(None).await;
    let state = dashboard.snapshot().await;
    assert_eq!(state.identity, None);
    assert!(state.history.is_empty());
    assert!(state.current.is_none());
}

#[tokio::test]
async fn repeated_identity_does_not_requery() {
    let harness = Harness::working();
    let dashboard = dashboard(&harness);

    dashboard.on_identity(Some(alice())).await;
    dashboard.on_identity(Some(alice())).await;
    assert_eq!(
        harness
            .records
            .selects
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[tokio::test]
async fn successful_submit_shows_design_and_prepends_history() {
    let harness = Harness::working();
    harness.records.seed("alice-uuid", 2).await;
    let dashboard = dashboard(&harness);
    dashboard.on_identity(Some(alice())).await;
    dashboard.set_draft("a dragon").await;

    let design = dashboard
        .submit("a dragon", StyleKey::NeoTraditional)
        .await
        .expect("submit");

    let state = dashboard.snapshot().await;
    assert!(!state.loading);
    assert_eq!(state.error, None);
    assert_eq!(state.current, Some(design.clone()));
    assert_eq!(state.history.len(), 3);
    assert_eq!(state.history[0], design);
    assert!(state.draft.is_empty());
}

#[tokio::test]
async fn local_validation_sets_error_without_calls() {
    let harness = Harness::working();
    let dashboard = dashboard(&harness);

    let err = dashboard
        .submit("a dragon", StyleKey::Traditional)
        .await
        .expect_err("signed out");
    assert_eq!(err, PipelineError::AuthRequired);
    assert_eq!(
        dashboard.snapshot().await.error.as_deref(),
        Some("Please sign in to generate images")
    );

    dashboard.on_identity(Some(alice())).await;
    let err = dashboard
        .submit("  ", StyleKey::Traditional)
        .await
        .expect_err("empty");
    assert_eq!(err, PipelineError::EmptyPrompt);
    assert_eq!(
        dashboard.snapshot().await.error.as_deref(),
        Some("Please enter a prompt")
    );
    assert!(harness.generator.requests.lock().await.is_empty());
}

#[tokio::test]
async fn failure_is_shown_and_loading_cleared() {
    let harness = Harness::with(
        FakeGenerator::default(),
        FakeImages::default(),
        FakeBlobs::default(),
        FakeRecords::default(),
    );
    let dashboard = dashboard(&harness);
    dashboard.on_identity(Some(alice())).await;
    dashboard.set_draft("a dragon").await;

    dashboard
        .submit("a dragon", StyleKey::Traditional)
        .await
        .expect_err("no output");

    let state = dashboard.snapshot().await;
    assert!(!state.loading);
    assert_eq!(
        state.error.as_deref(),
        Some("Failed to generate image: No image was generated")
    );
    assert!(state.current.is_none());
    assert_eq!(state.draft, "a dragon");
}

#[tokio::test]
async fn second_submit_while_loading_is_rejected() {
    let harness = Harness::working();
    let generator = Arc::new(GatedGenerator {
        started: Notify::new(),
        release: Notify::new(),
    });
    let pipeline = DesignPipeline::new(
        generator.clone(),
        harness.images.clone(),
        harness.blobs.clone(),
        harness.records.clone(),
    );
    let dashboard = Dashboard::new(Arc::new(pipeline));
    dashboard.on_identity(Some(alice())).await;

    let first = {
        let dashboard = dashboard.clone();
        tokio::spawn(async move { dashboard.submit("a koi", StyleKey::Irezumi).await })
    };
    generator.started.notified().await;
    assert!(dashboard.snapshot().await.loading);

    let err = dashboard
        .submit("a koi", StyleKey::Irezumi)
        .await
        .expect_err("in flight");
    assert_eq!(err, PipelineError::SubmissionInFlight);

    generator.release.notify_one();
    first.await.expect("join").expect("first submit");
    assert!(!dashboard.snapshot().await.loading);
    assert_eq!(harness.upload_count().await, 1);
}

#[tokio::test]
async fn follows_session_changes_until_closed() {
    let harness = Harness::working();
    harness.records.seed("alice-uuid", 2).await;
    let dashboard = dashboard(&harness);
    let session = SessionCell::init(None);
    let mut watcher = session.subscribe();

    let task = dashboard.follow(&session);
    session.set(SessionUser {
        id: alice(),
        email: None,
    });
    watcher.changed().await.expect("changed");

    for _ in 0..50 {
        if dashboard.snapshot().await.history.len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(dashboard.snapshot().await.identity, Some(alice()));
    assert_eq!(dashboard.snapshot().await.history.len(), 2);

    drop(watcher);
    drop(session);
    task.await.expect("follow task ends");
}

#[tokio::test]
async fn signing_out_during_history_load_clears_loading_flag() {
    let harness = Harness::working();
    let dashboard = dashboard(&harness);

    let rows = harness.records.rows.lock().await;
    let loading = {
        let dashboard = dashboard.clone();
        tokio::spawn(async move { dashboard.on_identity(Some(alice())).await })
    };
    for _ in 0..50 {
        if dashboard.snapshot().await.history_loading {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(dashboard.snapshot().await.history_loading);

    dashboard.on_identity(None).await;
    assert!(!dashboard.snapshot().await.history_loading);

    drop(rows);
    loading.await.expect("stale load finishes");
    let state = dashboard.snapshot().await;
    assert_eq!(state.identity, None);
    assert!(!state.history_loading);
    assert!(state.history.is_empty());
}

#[tokio::test]
async fn follower_applies_identity_from_a_dropped_cell() {
    let harness = Harness::working();
    harness.records.seed("alice-uuid", 1).await;
    let dashboard = dashboard(&harness);
    let session = SessionCell::init(Some(SessionUser {
        id: alice(),
        email: None,
    }));

    let task = dashboard.follow(&session);
    drop(session);
    task.await.expect("follow task ends");

    let state = dashboard.snapshot().await;
    assert_eq!(state.identity, Some(alice()));
    assert_eq!(state.history.len(), 1);
}
