//! End-to-end engine behavior against the in-memory log and scripted
//! collaborators, driven synchronously one poll at a time.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use lumina_events::{AggregateType, EventKind};
use lumina_saga::{
    DetectorConfig, EngineConfig, SagaEngine, SagaRegistry, SagaStatus, SagaStore, StepStatus,
    StuckSagaDetector, workflows,
};
use lumina_store::OffsetStore;
use lumina_testing::{InMemoryEventLog, ScriptedAlbum, ScriptedMediaCommand, ScriptedNotifications};

struct Harness {
    log: Arc<InMemoryEventLog>,
    store: SagaStore,
    offsets: OffsetStore,
    registry: Arc<SagaRegistry>,
    config: EngineConfig,
    engine: Arc<SagaEngine<InMemoryEventLog>>,
    media: Arc<ScriptedMediaCommand>,
    album: Arc<ScriptedAlbum>,
    notifications: Arc<ScriptedNotifications>,
}

impl Harness {
    async fn new() -> Self {
        let pool = lumina_store::connect_in_memory().await.unwrap();
        let store = SagaStore::new(pool.clone()).await.unwrap();
        let offsets = OffsetStore::new(pool).await.unwrap();
        let log = Arc::new(InMemoryEventLog::new());

        let media = Arc::new(ScriptedMediaCommand::new());
        let album = Arc::new(ScriptedAlbum::new());
        let notifications = Arc::new(ScriptedNotifications::new());

        let mut registry = SagaRegistry::new();
        registry
            .register(workflows::media_upload(
                media.clone(),
                album.clone(),
                notifications.clone(),
            ))
            .unwrap();
        let registry = Arc::new(registry);

        // Millisecond backoff keeps the retry discipline observable
        // without slowing the suite down.
        let config = EngineConfig {
            backoff_base: Duration::from_millis(1),
            step_timeout: Duration::from_secs(1),
            ..EngineConfig::default()
        };

        let engine = Arc::new(SagaEngine::new(
            log.clone(),
            store.clone(),
            registry.clone(),
            offsets.clone(),
            config.clone(),
        ));

        Self {
            log,
            store,
            offsets,
            registry,
            config,
            engine,
            media,
            album,
            notifications,
        }
    }

    fn detector(&self, threshold: Duration) -> StuckSagaDetector {
        StuckSagaDetector::new(
            self.store.clone(),
            self.registry.clone(),
            DetectorConfig {
                interval: Duration::from_secs(60),
                threshold,
            },
            self.config.clone(),
        )
    }

    async fn append_upload(&self, aggregate_id: &str) {
        self.log
            .append_event(
                aggregate_id,
                AggregateType::Media,
                EventKind::MediaUploaded,
                json!({
                    "user_id": "u1",
                    "filename": "p.jpg",
                    "content_type": "image/jpeg",
                    "size": 64,
                    "storage_path": format!("/m/{aggregate_id}.jpg"),
                }),
            )
            .await;
    }

    async fn append_processed(&self, aggregate_id: &str) {
        self.log
            .append_event(
                aggregate_id,
                AggregateType::Media,
                EventKind::MediaProcessed,
                json!({"thumbnail_path": "/t/p.jpg", "width": 640, "height": 480}),
            )
            .await;
    }

    async fn append_processing_failed(&self, aggregate_id: &str, reason: &str) {
        self.log
            .append_event(
                aggregate_id,
                AggregateType::Media,
                EventKind::MediaProcessingFailed,
                json!({"reason": reason}),
            )
            .await;
    }

    async fn append_added_to_album(&self, media_aggregate_id: &str) {
        self.log
            .append_event(
                "album-default",
                AggregateType::Album,
                EventKind::MediaAddedToAlbum,
                json!({"media_id": media_aggregate_id}),
            )
            .await;
    }

    async fn append_notification_sent(&self, media_aggregate_id: &str) {
        self.log
            .append_event(
                "user-u1",
                AggregateType::User,
                EventKind::NotificationSent,
                json!({
                    "user_id": "u1",
                    "title": "Upload complete",
                    "message": "done",
                    "media_id": media_aggregate_id,
                }),
            )
            .await;
    }

    async fn only_saga(&self) -> lumina_saga::SagaInstance {
        let mut all = self.store.list_active().await.unwrap();
        assert_eq!(all.len(), 1, "expected exactly one active saga");
        all.remove(0)
    }
}

#[tokio::test]
async fn happy_path_runs_all_steps_to_completion() {
    let h = Harness::new().await;

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();

    let saga = h.only_saga().await;
    assert_eq!(saga.saga_type, "media_upload");
    assert_eq!(saga.current_step, "process_media");
    assert_eq!(saga.status, SagaStatus::InProgress);
    assert_eq!(h.media.process_calls(), vec!["media-a".to_string()]);

    h.append_processed("media-a").await;
    h.engine.poll_once().await.unwrap();
    assert_eq!(h.only_saga().await.current_step, "add_to_album");
    assert_eq!(h.album.add_calls(), vec!["media-a user=u1".to_string()]);

    h.append_added_to_album("media-a").await;
    h.engine.poll_once().await.unwrap();
    assert_eq!(h.only_saga().await.current_step, "send_notification");
    assert_eq!(h.notifications.send_calls().len(), 1);

    h.append_notification_sent("media-a").await;
    h.engine.poll_once().await.unwrap();

    assert!(h.store.list_active().await.unwrap().is_empty());
    let saga = h.store.get_saga(&saga.id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
    assert!(saga.completed_at.is_some());

    let steps = h.store.list_steps(&saga.id).await.unwrap();
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(
        steps.iter().map(|s| s.step_name.as_str()).collect::<Vec<_>>(),
        vec!["process_media", "add_to_album", "send_notification"]
    );
}

#[tokio::test]
async fn processing_failure_triggers_compensation() {
    let h = Harness::new().await;

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();
    let saga_id = h.only_saga().await.id;

    h.append_processing_failed("media-a", "decode").await;
    h.engine.poll_once().await.unwrap();

    let saga = h.store.get_saga(&saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    assert_eq!(saga.current_step, "compensate");

    // The compensate endpoint was called with the saga id and a reason.
    let compensations = h.media.compensate_calls();
    assert_eq!(compensations.len(), 1);
    assert!(compensations[0].contains("media-a"));
    assert!(compensations[0].contains(&format!("saga={saga_id}")));
    assert!(compensations[0].contains("reason="));

    let steps = h.store.list_steps(&saga_id).await.unwrap();
    let forward = steps.iter().find(|s| s.step_name == "process_media").unwrap();
    assert_eq!(forward.status, StepStatus::Failed);
    assert_eq!(forward.last_error.as_deref(), Some("decode"));

    let compensation = steps
        .iter()
        .find(|s| s.step_name == "compensate_process_media")
        .unwrap();
    assert_eq!(compensation.status, StepStatus::Completed);
}

#[tokio::test]
async fn transient_step_failures_retry_with_recorded_attempts() {
    let h = Harness::new().await;
    h.media.fail_process(2, 503);

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();

    // Two 503s, then success on the third attempt.
    assert_eq!(h.media.process_calls().len(), 3);

    let saga = h.only_saga().await;
    let step = h
        .store
        .find_step(&saga.id, "process_media")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(step.retry_count, 2);
    assert!(step.last_error.as_deref().unwrap_or("").contains("503"));

    // The step settles to completed when its success trigger arrives, and
    // the saga proceeds to add_to_album.
    h.append_processed("media-a").await;
    h.engine.poll_once().await.unwrap();

    let step = h
        .store
        .find_step(&saga.id, "process_media")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(step.status, StepStatus::Completed);
    assert_eq!(step.retry_count, 2);
    assert_eq!(h.only_saga().await.current_step, "add_to_album");
}

#[tokio::test]
async fn permanent_step_failure_compensates_without_retrying() {
    let h = Harness::new().await;
    h.media.fail_process(3, 404);

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();

    // A 4xx other than 409 is permanent: exactly one attempt.
    assert_eq!(h.media.process_calls().len(), 1);

    let sagas = h.store.list_active().await.unwrap();
    assert!(sagas.is_empty());
    assert_eq!(h.media.compensate_calls().len(), 1);
}

#[tokio::test]
async fn mid_workflow_failure_unwinds_completed_steps_in_reverse() {
    let h = Harness::new().await;
    h.album.fail_add(3, 503);

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();
    let saga_id = h.only_saga().await.id;

    h.append_processed("media-a").await;
    h.engine.poll_once().await.unwrap();

    // add_to_album exhausted its retries and compensation walked back:
    // the failed step's own undo first, then the completed process_media.
    assert_eq!(h.album.add_calls().len(), 3);
    assert_eq!(h.album.remove_calls(), vec!["media-a".to_string()]);
    assert_eq!(h.media.compensate_calls().len(), 1);

    let saga = h.store.get_saga(&saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);

    let steps = h.store.list_steps(&saga_id).await.unwrap();
    let process = steps.iter().find(|s| s.step_name == "process_media").unwrap();
    assert_eq!(process.status, StepStatus::Compensated);
    let add = steps.iter().find(|s| s.step_name == "add_to_album").unwrap();
    assert_eq!(add.status, StepStatus::Failed);
    assert_eq!(add.retry_count, 3);
}

#[tokio::test]
async fn replayed_start_trigger_does_not_duplicate_the_saga() {
    let h = Harness::new().await;

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();

    // Redeliver everything by resetting the durable watermark and
    // restarting the engine.
    h.offsets
        .save("saga-engine", chrono::DateTime::UNIX_EPOCH)
        .await
        .unwrap();
    let restarted = SagaEngine::new(
        h.log.clone(),
        h.store.clone(),
        h.registry.clone(),
        h.offsets.clone(),
        h.config.clone(),
    );
    restarted.poll_once().await.unwrap();

    assert_eq!(h.store.list_active().await.unwrap().len(), 1);
    assert_eq!(h.media.process_calls().len(), 1);
}

#[tokio::test]
async fn restart_resumes_from_the_durable_watermark() {
    let h = Harness::new().await;

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();

    let restarted = SagaEngine::new(
        h.log.clone(),
        h.store.clone(),
        h.registry.clone(),
        h.offsets.clone(),
        h.config.clone(),
    );
    assert_eq!(restarted.poll_once().await.unwrap(), 0);

    // New events still advance the resumed engine.
    h.append_processed("media-a").await;
    assert_eq!(restarted.poll_once().await.unwrap(), 1);
    assert_eq!(h.only_saga().await.current_step, "add_to_album");
}

#[tokio::test]
async fn stuck_in_progress_saga_is_forced_failed() {
    let h = Harness::new().await;

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();
    let saga_id = h.only_saga().await.id;

    h.store
        .touch_at(&saga_id, chrono::Utc::now() - chrono::Duration::minutes(10))
        .await
        .unwrap();

    let terminated = h
        .detector(Duration::from_secs(300))
        .run_once()
        .await
        .unwrap();
    assert_eq!(terminated, 1);

    let saga = h.store.get_saga(&saga_id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);
    assert!(saga.completed_at.is_some());
}

#[tokio::test]
async fn stuck_compensating_saga_gets_one_final_pass_then_fails() {
    let h = Harness::new().await;

    // A saga abandoned mid-compensation: its forward step completed but
    // the unwind never finished.
    let saga = h
        .store
        .create_saga(
            "media_upload",
            "process_media",
            json!({
                "media_aggregate_id": "media-a",
                "upload_data": {
                    "user_id": "u1",
                    "filename": "p.jpg",
                    "content_type": "image/jpeg",
                    "size": 1,
                    "storage_path": "/m/p.jpg"
                }
            }),
        )
        .await
        .unwrap();
    let step = h.store.create_step(&saga.id, "process_media").await.unwrap();
    h.store
        .set_step_status(&step.id, StepStatus::Completed)
        .await
        .unwrap();
    h.store
        .set_step(&saga.id, "compensate", SagaStatus::Compensating)
        .await
        .unwrap();
    h.store
        .touch_at(&saga.id, chrono::Utc::now() - chrono::Duration::minutes(10))
        .await
        .unwrap();

    let terminated = h
        .detector(Duration::from_secs(300))
        .run_once()
        .await
        .unwrap();
    assert_eq!(terminated, 1);

    // The retry pass actually invoked the compensating action.
    assert_eq!(h.media.compensate_calls().len(), 1);

    let saga = h.store.get_saga(&saga.id).await.unwrap().unwrap();
    assert_eq!(saga.status, SagaStatus::Failed);

    let steps = h.store.list_steps(&saga.id).await.unwrap();
    let forward = steps.iter().find(|s| s.step_name == "process_media").unwrap();
    assert_eq!(forward.status, StepStatus::Compensated);
}

#[tokio::test]
async fn fresh_detector_leaves_recently_active_sagas_alone() {
    let h = Harness::new().await;

    h.append_upload("media-a").await;
    h.engine.poll_once().await.unwrap();

    let terminated = h
        .detector(Duration::from_secs(300))
        .run_once()
        .await
        .unwrap();
    assert_eq!(terminated, 0);
    assert_eq!(h.only_saga().await.status, SagaStatus::InProgress);
}
