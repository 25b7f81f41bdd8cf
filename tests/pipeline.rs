mod support;

use siteforge::db;
use siteforge::events::{Event, EventBus};
use siteforge::model::{BuildMode, BuildStage, BuildStatus, SiteStatus};
use siteforge::pipeline::{Executor, Settings};
use std::sync::Arc;
use support::*;

fn executor(
    pool: &sqlx::SqlitePool,
    blob: Arc<RecordingBlob>,
    deploy: Arc<RecordingDeploy>,
    toolchain: Arc<dyn siteforge::pipeline::Toolchain>,
    events: EventBus,
    work_root: &std::path::Path,
) -> Executor {
    Executor::new(
        pool.clone(),
        Arc::new(StubCatalog),
        blob,
        deploy,
        toolchain,
        events,
        Settings {
            work_root: work_root.to_path_buf(),
            bucket: "site-artifacts".to_string(),
        },
    )
}

#[tokio::test]
async fn successful_build_walks_all_stages_and_uploads() {
    let pool = setup_pool().await;
    db::create_site(
        &pool,
        "s1",
        "t1",
        Some("Corner Shop"),
        SiteStatus::Published,
        Some(r##"{"tokens":{"color-primary":"#112233"}}"##),
        false,
    )
    .await
    .unwrap();

    let events = EventBus::new(64);
    let mut rx = events.subscribe();
    let blob = Arc::new(RecordingBlob::with_existing_site_files());
    let deploy = Arc::new(RecordingDeploy::default());
    let work_root = tempfile::tempdir().unwrap();
    let executor = executor(
        &pool,
        blob.clone(),
        deploy.clone(),
        Arc::new(FakeToolchain),
        events,
        work_root.path(),
    );

    let build_id = db::create_build_job(&pool, "t1", "s1", BuildMode::Production, "publish")
        .await
        .unwrap();
    assert!(db::mark_job_running(&pool, &build_id).await.unwrap());

    let outcome = executor
        .run("t1", "s1", &build_id, BuildMode::Production)
        .await
        .unwrap();
    assert!(outcome.artifact_url.contains(&build_id));

    // Six progress events, the published event, then the final checkpoint.
    let mut stages = Vec::new();
    let mut percents = Vec::new();
    let mut published_url = None;
    for _ in 0..8 {
        match rx.recv().await.unwrap() {
            Event::BuildProgress { stage, percent, .. } => {
                stages.push(stage);
                percents.push(percent);
            }
            Event::BuildPublished { artifact_url, build_id: id, .. } => {
                assert_eq!(id, build_id);
                published_url = Some(artifact_url);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(stages, BuildStage::ALL.to_vec());
    assert_eq!(percents, vec![10, 25, 40, 70, 80, 90, 100]);
    assert_eq!(published_url.as_deref(), Some(outcome.artifact_url.as_str()));

    let view = db::get_build_status(&pool, &build_id).await.unwrap().unwrap();
    assert_eq!(view.status, BuildStatus::Uploaded);
    assert_eq!(view.stage, Some(BuildStage::Deploy));
    assert_eq!(view.percent, 100);
    assert!(view.error.is_none());
    assert!(view.started_at.is_some());
    assert!(view.completed_at.is_some());

    // Stale site files were cleared before the fresh upload.
    assert_eq!(blob.removed_prefixes(), vec!["sites/s1".to_string()]);
    let uploads = blob.uploads();
    assert!(uploads.contains(&"sites/s1/index.html".to_string()));
    assert!(uploads.contains(&"sites/s1/assets/app.css".to_string()));
    assert_eq!(
        uploads.last().map(String::as_str),
        Some(format!("builds/{build_id}/site.zip").as_str())
    );

    assert_eq!(deploy.deploys(), vec!["s1".to_string()]);

    // The per-build work directory is gone.
    let mut entries = tokio::fs::read_dir(work_root.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn empty_site_prefix_is_not_cleared() {
    let pool = setup_pool().await;
    db::create_site(&pool, "s1", "t1", None, SiteStatus::Published, None, false)
        .await
        .unwrap();

    let blob = Arc::new(RecordingBlob::default());
    let work_root = tempfile::tempdir().unwrap();
    let executor = executor(
        &pool,
        blob.clone(),
        Arc::new(RecordingDeploy::default()),
        Arc::new(FakeToolchain),
        EventBus::new(64),
        work_root.path(),
    );

    let build_id = db::create_build_job(&pool, "t1", "s1", BuildMode::Production, "publish")
        .await
        .unwrap();
    assert!(db::mark_job_running(&pool, &build_id).await.unwrap());
    executor
        .run("t1", "s1", &build_id, BuildMode::Production)
        .await
        .unwrap();

    assert!(blob.removed_prefixes().is_empty());
}

#[tokio::test]
async fn failed_stage_aborts_the_remainder_and_cleans_up() {
    let pool = setup_pool().await;
    db::create_site(&pool, "s1", "t1", None, SiteStatus::Published, None, false)
        .await
        .unwrap();

    let blob = Arc::new(RecordingBlob::default());
    let deploy = Arc::new(RecordingDeploy::default());
    let work_root = tempfile::tempdir().unwrap();
    let executor = executor(
        &pool,
        blob.clone(),
        deploy.clone(),
        Arc::new(BrokenToolchain),
        EventBus::new(64),
        work_root.path(),
    );

    let build_id = db::create_build_job(&pool, "t1", "s1", BuildMode::Production, "publish")
        .await
        .unwrap();
    assert!(db::mark_job_running(&pool, &build_id).await.unwrap());

    let failure = executor
        .run("t1", "s1", &build_id, BuildMode::Production)
        .await
        .unwrap_err();
    assert_eq!(failure.stage, BuildStage::AstroBuild);

    // Nothing reached the blob store or the deploy service.
    assert!(blob.uploads().is_empty());
    assert!(blob.removed_prefixes().is_empty());
    assert!(deploy.deploys().is_empty());

    let mut entries = tokio::fs::read_dir(work_root.path()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn job_rows_only_move_forward() {
    let pool = setup_pool().await;
    let build_id = db::create_build_job(&pool, "t1", "s1", BuildMode::Production, "publish")
        .await
        .unwrap();

    // Failing a job that never started does nothing.
    assert!(!db::mark_job_failed(&pool, &build_id, None, "boom").await.unwrap());
    assert!(db::job_is_pending(&pool, &build_id).await.unwrap());

    assert!(db::mark_job_running(&pool, &build_id).await.unwrap());
    assert!(!db::mark_job_running(&pool, &build_id).await.unwrap());

    // Percent is monotonic even when reports land out of order.
    db::update_job_progress(&pool, &build_id, BuildStage::FetchData, 40, "data")
        .await
        .unwrap();
    db::update_job_progress(&pool, &build_id, BuildStage::Merge, 10, "late")
        .await
        .unwrap();
    let view = db::get_build_status(&pool, &build_id).await.unwrap().unwrap();
    assert_eq!(view.percent, 40);

    assert!(
        db::mark_job_uploaded(&pool, &build_id, "http://blob.test/a.zip", "b", "sites/s1")
            .await
            .unwrap()
    );
    // Terminal rows reject further transitions and progress writes.
    assert!(!db::mark_job_failed(&pool, &build_id, None, "late failure").await.unwrap());
    db::update_job_progress(&pool, &build_id, BuildStage::Merge, 10, "stray")
        .await
        .unwrap();

    let view = db::get_build_status(&pool, &build_id).await.unwrap().unwrap();
    assert_eq!(view.status, BuildStatus::Uploaded);
    assert_eq!(view.percent, 100);
    assert!(view.error.is_none());
}
