mod common;

use chrono::Duration;
use molt_core::{
    EpisodeStatus, GatewayError, IntegrityAuditor, IntegrityKind, JobStatus, PilotStatus,
    ProductionError, SeriesStatus, Submission,
};
use rusqlite::{params, Connection};
use tempfile::tempdir;

use common::{
    clip, open_store, scheduler, seed_pilot_pipeline, select_winner, t0, worker, worker_config,
    ScriptedGateway,
};

#[tokio::test]
async fn rendered_pilot_variants_open_the_clip_vote() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    seed_pilot_pipeline(&store);
    let series_id = select_winner(&store, &scheduler(2, 2));

    let gateway = ScriptedGateway::with(Vec::new());
    let worker = worker(&dir, &store, gateway.clone(), worker_config());
    let report = worker.tick(t0() + Duration::minutes(2)).await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.completed, 2);
    assert_eq!(gateway.calls(), 2);

    let series = store.fetch_series(&series_id).unwrap().unwrap();
    assert_eq!(series.status, SeriesStatus::HumanVoting);
    assert_eq!(series.clip_voting_period_id.as_deref(), Some("humans-1"));
    assert_eq!(
        store.fetch_submission("sub-1").unwrap().unwrap().pilot_status,
        PilotStatus::HumanVoting
    );

    let pilot = &store.list_episodes(&series_id).unwrap()[0];
    assert_eq!(pilot.status, EpisodeStatus::Review);
    let variants = store.list_variants(&pilot.id).unwrap();
    assert_eq!(variants.len(), 2);
    for variant in &variants {
        let url = variant.asset_url.as_deref().unwrap();
        assert!(url.starts_with(&format!("https://cdn.test/assets/series/{series_id}/ep1/")));
    }

    let idle = worker.tick(t0() + Duration::minutes(3)).await.unwrap();
    assert_eq!(idle.claimed, 0);
}

#[tokio::test]
async fn out_of_bounds_renders_retry_then_fail() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    seed_pilot_pipeline(&store);
    let series_id = select_winner(&store, &scheduler(1, 0));
    let gateway = ScriptedGateway::with(vec![clip(170.0), clip(170.0), clip(170.0)]);
    let worker = worker(&dir, &store, gateway.clone(), worker_config());
    let pilot_id = store.list_episodes(&series_id).unwrap()[0].id.clone();

    let first = t0() + Duration::minutes(2);
    let report = worker.tick(first).await.unwrap();
    assert_eq!(report.retried, 1);
    let episode = store.fetch_episode(&pilot_id).unwrap().unwrap();
    assert_eq!(episode.retry_count, 1);
    assert_eq!(episode.status, EpisodeStatus::Pending);
    assert!(episode
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("duration out of bounds"));
    let job = &store.list_jobs(&pilot_id).unwrap()[0];
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.next_attempt_at, Some(first + Duration::seconds(60)));

    let early = worker.tick(first + Duration::seconds(30)).await.unwrap();
    assert_eq!(early.claimed, 0);

    let second = first + Duration::seconds(61);
    assert_eq!(worker.tick(second).await.unwrap().retried, 1);
    assert_eq!(store.fetch_episode(&pilot_id).unwrap().unwrap().retry_count, 2);

    let third = second + Duration::seconds(121);
    assert_eq!(worker.tick(third).await.unwrap().failed, 1);
    let episode = store.fetch_episode(&pilot_id).unwrap().unwrap();
    assert_eq!(episode.status, EpisodeStatus::Failed);
    assert_eq!(episode.retry_count, 3);
    assert_eq!(store.list_jobs(&pilot_id).unwrap()[0].status, JobStatus::Failed);

    let after = worker.tick(third + Duration::hours(2)).await.unwrap();
    assert_eq!(after.claimed, 0);
    assert_eq!(gateway.calls(), 3);
    let job_id = store.list_jobs(&pilot_id).unwrap()[0].id.clone();
    assert_eq!(
        gateway.keys(),
        vec![job_id.clone(), format!("{job_id}:0.1"), format!("{job_id}:0.2")]
    );

    let rearmed = worker.retry_episode(&pilot_id, third + Duration::hours(3)).unwrap();
    assert_eq!(rearmed.status, EpisodeStatus::Pending);
    assert_eq!(rearmed.retry_count, 0);
    assert_eq!(rearmed.manual_retry_count, 1);

    let report = worker.tick(third + Duration::hours(3)).await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(gateway.keys().last(), Some(&format!("{job_id}:1.0")));
    assert_eq!(
        store.fetch_series(&series_id).unwrap().unwrap().status,
        SeriesStatus::HumanVoting
    );
}

#[tokio::test]
async fn variant_failures_in_one_tick_spend_separate_budgets() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    seed_pilot_pipeline(&store);
    let series_id = select_winner(&store, &scheduler(4, 0));
    let down = || Err(GatewayError::Transport("down".into()));
    let gateway = ScriptedGateway::with(vec![down(), down(), down(), down()]);
    let worker = worker(&dir, &store, gateway.clone(), worker_config());
    let pilot_id = store.list_episodes(&series_id).unwrap()[0].id.clone();

    let first = t0() + Duration::minutes(2);
    let report = worker.tick(first).await.unwrap();
    assert_eq!(report.claimed, 4);
    assert_eq!(report.retried, 4);
    assert_eq!(report.failed, 0);
    let episode = store.fetch_episode(&pilot_id).unwrap().unwrap();
    assert_eq!(episode.status, EpisodeStatus::Pending);
    assert_eq!(episode.retry_count, 1);
    assert!(store
        .list_jobs(&pilot_id)
        .unwrap()
        .iter()
        .all(|job| job.status == JobStatus::Pending && job.failures == 1));

    let report = worker.tick(first + Duration::seconds(61)).await.unwrap();
    assert_eq!(report.claimed, 4);
    assert_eq!(report.completed, 4);
    assert_eq!(gateway.calls(), 8);
    assert_eq!(
        store.fetch_episode(&pilot_id).unwrap().unwrap().status,
        EpisodeStatus::Review
    );
    assert_eq!(
        store.fetch_series(&series_id).unwrap().unwrap().status,
        SeriesStatus::HumanVoting
    );
}

#[tokio::test]
async fn gateway_errors_store_a_generic_reason() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    seed_pilot_pipeline(&store);
    let series_id = select_winner(&store, &scheduler(1, 0));
    let gateway = ScriptedGateway::with(vec![Err(GatewayError::Transport(
        "connection refused at 10.0.0.7:8188".into(),
    ))]);
    let worker = worker(&dir, &store, gateway, worker_config());

    worker.tick(t0() + Duration::minutes(2)).await.unwrap();
    let pilot = &store.list_episodes(&series_id).unwrap()[0];
    let reason = pilot.failure_reason.as_deref().unwrap();
    assert_eq!(reason, "generation service unavailable");
    assert!(!reason.contains("10.0.0.7"));
}

#[tokio::test]
async fn stale_claims_are_reclaimed() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    seed_pilot_pipeline(&store);
    let series_id = select_winner(&store, &scheduler(1, 0));
    let pilot_id = store.list_episodes(&series_id).unwrap()[0].id.clone();
    let now = t0() + Duration::hours(1);

    let conn = Connection::open(store.path()).unwrap();
    conn.execute(
        "UPDATE production_jobs SET status = 'generating', claim_token = 'lost-worker',
             claimed_at = ?2
         WHERE episode_id = ?1",
        params![&pilot_id, (now - Duration::minutes(30)).naive_utc()],
    )
    .unwrap();
    conn.execute(
        "UPDATE episodes SET status = 'generating' WHERE id = ?1",
        [&pilot_id],
    )
    .unwrap();

    let gateway = ScriptedGateway::with(Vec::new());
    let worker = worker(&dir, &store, gateway.clone(), worker_config());
    let report = worker.tick(now).await.unwrap();
    assert_eq!(report.reclaimed, 1);
    let job_id = store.list_jobs(&pilot_id).unwrap()[0].id.clone();
    assert_eq!(gateway.keys(), vec![job_id]);
    assert_eq!(report.completed, 1);
    assert_eq!(
        store.fetch_episode(&pilot_id).unwrap().unwrap().status,
        EpisodeStatus::Review
    );
}

#[test]
fn abandon_refuses_live_renders() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    seed_pilot_pipeline(&store);
    let series_id = select_winner(&store, &scheduler(1, 0));
    let pilot_id = store.list_episodes(&series_id).unwrap()[0].id.clone();
    let now = t0() + Duration::hours(1);

    let conn = Connection::open(store.path()).unwrap();
    conn.execute(
        "UPDATE production_jobs SET status = 'generating', claim_token = 'busy', claimed_at = ?2
         WHERE episode_id = ?1",
        params![&pilot_id, (now - Duration::minutes(1)).naive_utc()],
    )
    .unwrap();

    let worker = worker(&dir, &store, ScriptedGateway::with(Vec::new()), worker_config());
    let err = worker.abandon_episode(&pilot_id, "bad prompt", now).unwrap_err();
    assert!(matches!(err, ProductionError::EpisodeInFlight { .. }));

    let later = now + Duration::minutes(20);
    let episode = worker.abandon_episode(&pilot_id, "bad prompt", later).unwrap();
    assert_eq!(episode.status, EpisodeStatus::Failed);
    assert!(!episode.auto_retry_enabled);
    assert_eq!(episode.failure_reason.as_deref(), Some("bad prompt"));
    assert!(store
        .list_jobs(&pilot_id)
        .unwrap()
        .iter()
        .all(|job| job.status == JobStatus::Failed));

    let err = worker.retry_episode("ep-missing", later).unwrap_err();
    assert!(matches!(err, ProductionError::Store(_)));
}

#[test]
fn manual_retries_are_capped() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    seed_pilot_pipeline(&store);
    let series_id = select_winner(&store, &scheduler(1, 0));
    let pilot_id = store.list_episodes(&series_id).unwrap()[0].id.clone();
    let mut config = worker_config();
    config.max_manual_retries = 1;
    let worker = worker(&dir, &store, ScriptedGateway::with(Vec::new()), config);
    let now = t0() + Duration::hours(1);

    worker.abandon_episode(&pilot_id, "first", now).unwrap();
    worker.retry_episode(&pilot_id, now).unwrap();
    worker.abandon_episode(&pilot_id, "second", now).unwrap();
    let err = worker.retry_episode(&pilot_id, now).unwrap_err();
    assert!(matches!(err, ProductionError::ManualRetryLimit { limit: 1, .. }));
}

#[test]
fn orphaned_submission_is_reported_and_recovered() {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    let now = t0();
    let mut orphan = Submission::new("sub-orphan", "agent-9", "creator-9", "drama", now);
    orphan.pilot_status = PilotStatus::Selected;
    store.insert_submission(&orphan).unwrap();

    let auditor = IntegrityAuditor::new(store.clone(), Duration::minutes(10));
    let findings = auditor.audit(now).unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].kind, IntegrityKind::OrphanedSubmission);

    let scheduled = scheduler(2, 0).recover_orphan(&store, "sub-orphan", now).unwrap();
    assert_eq!(scheduled.jobs_enqueued, 2);
    assert!(auditor.audit(now).unwrap().is_empty());
}
