#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use molt_core::config::RenderBounds;
use molt_core::{
    AssetPayload, FsObjectStore, GatewayError, GenerationGateway, PeriodType, ProductionScheduler,
    ProductionWorker, RenderOutput, RenderRequest, SchedulerConfig, StudioStore, Submission,
    VotingPeriod, VotingPeriodManager, WorkerConfig,
};
use tempfile::TempDir;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn open_store(dir: &TempDir) -> StudioStore {
    let store = StudioStore::new(dir.path().join("studio.sqlite")).unwrap();
    store.initialize().unwrap();
    store
}

pub fn scheduler(pilot_variants: u32, follow_on_episodes: u32) -> ProductionScheduler {
    ProductionScheduler::new(SchedulerConfig {
        pilot_variants,
        follow_on_episodes,
        ..SchedulerConfig::default()
    })
}

pub fn worker_config() -> WorkerConfig {
    let bounds = RenderBounds {
        min_duration_seconds: 180.0,
        max_duration_seconds: 360.0,
        aspect_ratio: "16:9".into(),
    };
    WorkerConfig {
        batch_size: 8,
        max_concurrent_jobs: 2,
        max_retries: 3,
        max_manual_retries: 5,
        stale_after: Duration::minutes(10),
        backoff_base: Duration::seconds(60),
        backoff_cap: Duration::seconds(600),
        backoff_jitter: Duration::zero(),
        gateway_timeout: StdDuration::from_secs(5),
        auto_publish: false,
        fps: 24,
        width: 1280,
        height: 720,
        negative_prompt: None,
        video: bounds.clone(),
        audio: bounds,
    }
}

pub fn clip(duration_seconds: f64) -> Result<RenderOutput, GatewayError> {
    Ok(RenderOutput {
        asset: AssetPayload::Bytes(format!("clip-{duration_seconds}").into_bytes()),
        duration_seconds,
        width: Some(1280),
        height: Some(720),
        seed: Some(7),
        model: Some("test-model".into()),
    })
}

/// Gateway that replays scripted responses, then falls back to a valid clip.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<RenderOutput, GatewayError>>>,
    calls: AtomicUsize,
    keys: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn with(script: Vec<Result<RenderOutput, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
            keys: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Idempotency keys in call order.
    pub fn keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(request.idempotency_key.clone());
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| clip(240.0))
    }
}

pub fn worker(
    dir: &TempDir,
    store: &StudioStore,
    gateway: Arc<ScriptedGateway>,
    config: WorkerConfig,
) -> ProductionWorker {
    let objects = FsObjectStore::new(dir.path().join("assets"), "https://cdn.test/assets").unwrap();
    ProductionWorker::new(store.clone(), gateway, Arc::new(objects), config)
}

pub fn insert_submission(
    store: &StudioStore,
    id: &str,
    period_id: &str,
    category: &str,
    score: i64,
    submitted_at: DateTime<Utc>,
) {
    let mut submission = Submission::new(id, format!("agent-{id}"), format!("creator-{id}"), category, submitted_at);
    submission.title = format!("Title {id}");
    submission.script = format!("Script for {id}");
    submission.voting_period_id = Some(period_id.to_string());
    submission.score = score;
    store.insert_submission(&submission).unwrap();
}

/// Agent vote that ended at `t0` with a single submission, plus an open clip
/// vote ending three days later.
pub fn seed_pilot_pipeline(store: &StudioStore) {
    let now = t0();
    store
        .insert_period(&VotingPeriod::new(
            "agents-1",
            PeriodType::AgentVoting,
            now - Duration::days(7),
            now,
        ))
        .unwrap();
    store
        .insert_period(&VotingPeriod::new(
            "humans-1",
            PeriodType::HumanVoting,
            now,
            now + Duration::days(3),
        ))
        .unwrap();
    insert_submission(store, "sub-1", "agents-1", "drama", 9, now - Duration::days(3));
}

/// Closes the agent vote and returns the new series id.
pub fn select_winner(store: &StudioStore, scheduler: &ProductionScheduler) -> String {
    let manager = VotingPeriodManager::new(store.clone(), scheduler.clone(), 16);
    let report = manager.close_expired(t0() + Duration::minutes(1)).unwrap();
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    store
        .fetch_submission("sub-1")
        .unwrap()
        .unwrap()
        .series_id
        .expect("winner carries a series")
}
