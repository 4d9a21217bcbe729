use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{GenerationSection, RenderBounds, StudioConfig};
use crate::generation::{
    validate_render, AssetPayload, GatewayError, GenerationGateway, RenderConstraints,
    RenderOutput, RenderRequest,
};
use crate::models::{
    Episode, EpisodeStatus, JobStatus, PilotStatus, ProductionJob, RenderKind, SeriesStatus,
};
use crate::storage::{asset_key, ObjectStore};
use crate::store::{
    list_episode_jobs, list_series_episodes, load_episode, load_series, StoreError, StudioStore,
};

use super::error::{FailureKind, ProductionError, ProductionResult, RenderFailure};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: usize,
    pub max_concurrent_jobs: usize,
    pub max_retries: u32,
    pub max_manual_retries: u32,
    pub stale_after: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub backoff_jitter: Duration,
    pub gateway_timeout: StdDuration,
    pub auto_publish: bool,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub negative_prompt: Option<String>,
    pub video: RenderBounds,
    pub audio: RenderBounds,
}

impl WorkerConfig {
    pub fn from_config(config: &StudioConfig) -> Self {
        let production = &config.production;
        let generation: &GenerationSection = &config.generation;
        Self {
            batch_size: production.batch_size.max(1),
            max_concurrent_jobs: production.max_concurrent_jobs.max(1),
            max_retries: production.max_retries,
            max_manual_retries: production.max_manual_retries,
            stale_after: Duration::minutes(production.stale_after_minutes),
            backoff_base: Duration::seconds(production.backoff_base_seconds),
            backoff_cap: Duration::seconds(production.backoff_cap_seconds),
            backoff_jitter: Duration::seconds(production.backoff_jitter_seconds),
            gateway_timeout: StdDuration::from_secs(generation.timeout_seconds),
            auto_publish: production.auto_publish,
            fps: generation.fps,
            width: generation.width,
            height: generation.height,
            negative_prompt: generation.negative_prompt.clone(),
            video: generation.video.clone(),
            audio: generation.audio.clone(),
        }
    }

    fn bounds(&self, kind: RenderKind) -> &RenderBounds {
        match kind {
            RenderKind::Video => &self.video,
            RenderKind::Audio => &self.audio,
        }
    }

    /// Exponential backoff after the `failures`-th failure, capped, plus jitter.
    pub fn backoff(&self, failures: i64) -> Duration {
        let exponent = (failures.max(1) - 1).min(20) as u32;
        let base = self.backoff_base.num_seconds().max(0);
        let scaled = base.saturating_mul(1_i64 << exponent);
        let capped = scaled.min(self.backoff_cap.num_seconds().max(base));
        let jitter = self.backoff_jitter.num_seconds();
        let jitter = if jitter > 0 {
            rand::thread_rng().gen_range(0..=jitter)
        } else {
            0
        };
        Duration::seconds(capped + jitter)
    }
}

/// Summary of one worker tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TickReport {
    pub claimed: usize,
    pub reclaimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub discarded: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
struct ClaimedJob {
    job: ProductionJob,
    token: String,
    series_id: String,
    episode_number: i64,
    is_pilot: bool,
    manual_retries: i64,
    reclaimed: bool,
}

impl ClaimedJob {
    /// Idempotency key for this attempt. Stable across stale reclaims, new
    /// after every recorded failure or manual retry.
    fn attempt_key(&self) -> String {
        attempt_key(&self.job.id, self.manual_retries, self.job.failures)
    }
}

fn attempt_key(job_id: &str, manual_retries: i64, failures: i64) -> String {
    if manual_retries == 0 && failures == 0 {
        job_id.to_string()
    } else {
        format!("{job_id}:{manual_retries}.{failures}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Completed,
    Retried,
    Failed,
    Discarded,
}

pub struct ProductionWorker {
    store: StudioStore,
    gateway: Arc<dyn GenerationGateway>,
    objects: Arc<dyn ObjectStore>,
    config: WorkerConfig,
}

impl ProductionWorker {
    pub fn new(
        store: StudioStore,
        gateway: Arc<dyn GenerationGateway>,
        objects: Arc<dyn ObjectStore>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            objects,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claims a bounded batch, renders it and records the outcomes. Safe to
    /// run concurrently with itself: each job is owned by exactly one claim.
    pub async fn tick(&self, now: DateTime<Utc>) -> ProductionResult<TickReport> {
        let claimed = self.claim_batch(now)?;
        let mut report = TickReport {
            claimed: claimed.len(),
            reclaimed: claimed.iter().filter(|claim| claim.reclaimed).count(),
            ..TickReport::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }

        let outcomes = stream::iter(claimed)
            .map(|claim| async move {
                let job_id = claim.job.id.clone();
                (job_id, self.run_job(claim, now).await)
            })
            .buffer_unordered(self.config.max_concurrent_jobs)
            .collect::<Vec<_>>()
            .await;

        for (job_id, outcome) in outcomes {
            match outcome {
                Ok(JobOutcome::Completed) => report.completed += 1,
                Ok(JobOutcome::Retried) => report.retried += 1,
                Ok(JobOutcome::Failed) => report.failed += 1,
                Ok(JobOutcome::Discarded) => report.discarded += 1,
                Err(err) => {
                    error!(job_id = %job_id, error = %err, "failed to record render outcome");
                    report.errors += 1;
                }
            }
        }
        info!(
            claimed = report.claimed,
            completed = report.completed,
            retried = report.retried,
            failed = report.failed,
            "production tick finished"
        );
        Ok(report)
    }

    fn claim_batch(&self, now: DateTime<Utc>) -> ProductionResult<Vec<ClaimedJob>> {
        let stale_cutoff = now - self.config.stale_after;
        let batch_size = self.config.batch_size;
        self.store.with_write_tx(|conn| {
            let candidates = {
                let mut stmt = conn.prepare(
                    "SELECT j.* FROM production_jobs j
                     JOIN episodes e ON e.id = j.episode_id
                     WHERE e.status IN ('pending', 'generating')
                       AND ((j.status = 'pending'
                             AND (j.next_attempt_at IS NULL OR j.next_attempt_at <= ?1))
                         OR (j.status = 'generating' AND j.claimed_at <= ?2))
                     ORDER BY j.created_at ASC, j.variant_number ASC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    params![now.naive_utc(), stale_cutoff.naive_utc(), batch_size as i64],
                    ProductionJob::from_row,
                )?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let mut claimed = Vec::with_capacity(candidates.len());
            for job in candidates {
                let token = Uuid::new_v4().to_string();
                let affected = conn.execute(
                    "UPDATE production_jobs
                     SET status = 'generating', claim_token = ?1, claimed_at = ?2,
                         attempts = attempts + 1, updated_at = ?2
                     WHERE id = ?3 AND status = ?4 AND claim_token IS ?5",
                    params![
                        &token,
                        now.naive_utc(),
                        &job.id,
                        job.status.as_str(),
                        &job.claim_token,
                    ],
                )?;
                if affected != 1 {
                    debug!(job_id = %job.id, "job claimed elsewhere");
                    continue;
                }
                let reclaimed = job.status == JobStatus::Generating;
                if reclaimed {
                    warn!(
                        job_id = %job.id,
                        claimed_at = ?job.claimed_at,
                        "reclaiming stale render job"
                    );
                }

                let episode = load_episode(conn, &job.episode_id)?
                    .ok_or_else(|| StoreError::not_found("episode", &job.episode_id))?;
                if episode.status == EpisodeStatus::Pending {
                    conn.execute(
                        "UPDATE episodes SET status = 'generating', updated_at = ?2
                         WHERE id = ?1 AND status = 'pending'",
                        params![&episode.id, now.naive_utc()],
                    )?;
                }
                if episode.is_pilot {
                    conn.execute(
                        "UPDATE submissions SET pilot_status = 'producing', updated_at = ?2
                         WHERE series_id = ?1 AND pilot_status = 'selected'",
                        params![&episode.series_id, now.naive_utc()],
                    )?;
                }

                claimed.push(ClaimedJob {
                    job,
                    token,
                    series_id: episode.series_id,
                    episode_number: episode.episode_number,
                    is_pilot: episode.is_pilot,
                    manual_retries: episode.manual_retry_count,
                    reclaimed,
                });
            }
            Ok(claimed)
        })
    }

    async fn run_job(&self, claim: ClaimedJob, now: DateTime<Utc>) -> ProductionResult<JobOutcome> {
        let constraints = RenderConstraints::from(self.config.bounds(claim.job.kind));
        let request = RenderRequest {
            job_id: claim.job.id.clone(),
            idempotency_key: claim.attempt_key(),
            kind: claim.job.kind,
            prompt: claim.job.prompt.clone(),
            negative_prompt: self.config.negative_prompt.clone(),
            audio_text: (claim.job.kind == RenderKind::Audio).then(|| claim.job.prompt.clone()),
            fps: self.config.fps,
            width: self.config.width,
            height: self.config.height,
            seed: None,
            constraints: constraints.clone(),
        };

        let rendered = match timeout(self.config.gateway_timeout, self.gateway.render(&request)).await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.config.gateway_timeout)),
        };

        let output = match rendered {
            Ok(output) => output,
            Err(err) => {
                warn!(job_id = %claim.job.id, error = %err, "render attempt failed");
                return self.record_failure(&claim, RenderFailure::from(&err), now);
            }
        };

        if let Err(reason) = validate_render(claim.job.kind, &output, &constraints) {
            warn!(job_id = %claim.job.id, reason = %reason, "render output rejected");
            return self.record_failure(&claim, RenderFailure::validation(reason), now);
        }

        let asset_url = match self.persist_asset(&claim, &output).await {
            Ok(url) => url,
            Err(failure) => return self.record_failure(&claim, failure, now),
        };
        self.record_success(&claim, &asset_url, output.duration_seconds, now)
    }

    async fn persist_asset(
        &self,
        claim: &ClaimedJob,
        output: &RenderOutput,
    ) -> Result<String, RenderFailure> {
        let stored = match &output.asset {
            AssetPayload::Bytes(bytes) => {
                let key = asset_key(
                    &claim.series_id,
                    claim.episode_number,
                    claim.job.variant_number,
                    claim.job.kind,
                    bytes,
                );
                self.objects.put(&key, bytes).await
            }
            AssetPayload::Reference(reference) => {
                if reference.starts_with("http://") || reference.starts_with("https://") {
                    Ok(reference.clone())
                } else {
                    self.objects.get_url(reference)
                }
            }
        };
        stored.map_err(|err| {
            warn!(job_id = %claim.job.id, error = %err, "failed to store rendered asset");
            RenderFailure::new(FailureKind::Transport, "asset storage unavailable")
        })
    }

    fn record_success(
        &self,
        claim: &ClaimedJob,
        asset_url: &str,
        duration_seconds: f64,
        now: DateTime<Utc>,
    ) -> ProductionResult<JobOutcome> {
        self.store.with_write_tx(|conn| {
            let affected = conn.execute(
                "UPDATE production_jobs
                 SET status = 'completed', asset_url = ?3, duration_seconds = ?4,
                     failure_kind = NULL, failure_reason = NULL, claim_token = NULL,
                     next_attempt_at = NULL, updated_at = ?5
                 WHERE id = ?1 AND status = 'generating' AND claim_token = ?2",
                params![
                    &claim.job.id,
                    &claim.token,
                    asset_url,
                    duration_seconds,
                    now.naive_utc(),
                ],
            )?;
            if affected != 1 {
                info!(job_id = %claim.job.id, "discarding late result for reclaimed job");
                return Ok(JobOutcome::Discarded);
            }

            if claim.is_pilot {
                conn.execute(
                    "INSERT INTO clip_variants (
                        id, episode_id, variant_number, asset_url, duration_seconds,
                        vote_count, is_selected, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6)
                    ON CONFLICT(episode_id, variant_number) DO UPDATE SET
                        asset_url = excluded.asset_url,
                        duration_seconds = excluded.duration_seconds",
                    params![
                        format!("var-{}", Uuid::new_v4()),
                        &claim.job.episode_id,
                        claim.job.variant_number,
                        asset_url,
                        duration_seconds,
                        now.naive_utc(),
                    ],
                )?;
            }

            let episode = load_episode(conn, &claim.job.episode_id)?
                .ok_or_else(|| StoreError::not_found("episode", &claim.job.episode_id))?;
            if episode.status != EpisodeStatus::Generating {
                debug!(episode_id = %episode.id, status = %episode.status, "episode no longer rendering");
                return Ok(JobOutcome::Completed);
            }

            let jobs = list_episode_jobs(conn, &episode.id)?;
            if jobs.iter().all(|job| job.status == JobStatus::Completed) {
                self.finish_episode(conn, &episode, &jobs, now)?;
            }
            info!(job_id = %claim.job.id, episode_id = %episode.id, "render committed");
            Ok(JobOutcome::Completed)
        })
    }

    fn finish_episode(
        &self,
        conn: &Connection,
        episode: &Episode,
        jobs: &[ProductionJob],
        now: DateTime<Utc>,
    ) -> ProductionResult<()> {
        let status = if self.config.auto_publish && !episode.is_pilot {
            EpisodeStatus::Published
        } else {
            EpisodeStatus::Review
        };
        let asset_url = if episode.is_pilot {
            None
        } else {
            jobs.first().and_then(|job| job.asset_url.clone())
        };
        conn.execute(
            "UPDATE episodes
             SET status = ?2, asset_url = COALESCE(?3, asset_url), failure_reason = NULL,
                 updated_at = ?4
             WHERE id = ?1 AND status = 'generating'",
            params![&episode.id, status.as_str(), asset_url, now.naive_utc()],
        )?;
        info!(episode_id = %episode.id, status = %status, "episode rendered");

        let series = load_series(conn, &episode.series_id)?
            .ok_or_else(|| StoreError::not_found("series", &episode.series_id))?;
        if episode.is_pilot {
            open_clip_vote(conn, &series.id, now)?;
        } else if series.status == SeriesStatus::InProduction {
            let episodes = list_series_episodes(conn, &series.id)?;
            if episodes.iter().all(|ep| ep.status.rendered()) {
                complete_series(conn, &series.id, &series.submission_id, now)?;
            }
        }
        Ok(())
    }

    fn record_failure(
        &self,
        claim: &ClaimedJob,
        failure: RenderFailure,
        now: DateTime<Utc>,
    ) -> ProductionResult<JobOutcome> {
        self.store.with_write_tx(|conn| {
            let owned: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM production_jobs
                               WHERE id = ?1 AND status = 'generating' AND claim_token = ?2)",
                params![&claim.job.id, &claim.token],
                |row| row.get(0),
            )?;
            if !owned {
                info!(job_id = %claim.job.id, "discarding late failure for reclaimed job");
                return Ok(JobOutcome::Discarded);
            }

            let episode = load_episode(conn, &claim.job.episode_id)?
                .ok_or_else(|| StoreError::not_found("episode", &claim.job.episode_id))?;
            if episode.status == EpisodeStatus::Failed {
                mark_job_failed(conn, &claim.job.id, &failure, now)?;
                return Ok(JobOutcome::Failed);
            }

            // Each variant job spends its own budget; the episode reports the
            // worst one.
            let failures = claim.job.failures + 1;
            let retry_count = episode.retry_count.max(failures);
            let retryable =
                failures < i64::from(self.config.max_retries) && episode.auto_retry_enabled;
            if retryable {
                let next_attempt_at = now + self.config.backoff(failures);
                conn.execute(
                    "UPDATE production_jobs
                     SET status = 'pending', claim_token = NULL, next_attempt_at = ?2,
                         failures = ?3, failure_kind = ?4, failure_reason = ?5, updated_at = ?6
                     WHERE id = ?1",
                    params![
                        &claim.job.id,
                        next_attempt_at.naive_utc(),
                        failures,
                        failure.kind.as_str(),
                        &failure.reason,
                        now.naive_utc(),
                    ],
                )?;
                conn.execute(
                    "UPDATE episodes
                     SET retry_count = ?2, last_failed_at = ?3, failure_reason = ?4,
                         status = CASE
                             WHEN EXISTS(SELECT 1 FROM production_jobs
                                         WHERE episode_id = ?1 AND status = 'generating')
                             THEN status ELSE 'pending' END,
                         updated_at = ?3
                     WHERE id = ?1",
                    params![&episode.id, retry_count, now.naive_utc(), &failure.reason],
                )?;
                warn!(
                    job_id = %claim.job.id,
                    episode_id = %episode.id,
                    failures,
                    kind = %failure.kind,
                    next_attempt_at = %next_attempt_at,
                    "render failed, retry scheduled"
                );
                return Ok(JobOutcome::Retried);
            }

            mark_job_failed(conn, &claim.job.id, &failure, now)?;
            conn.execute(
                "UPDATE production_jobs SET failures = ?2 WHERE id = ?1",
                params![&claim.job.id, failures],
            )?;
            conn.execute(
                "UPDATE production_jobs
                 SET status = 'failed', claim_token = NULL, failure_kind = ?2,
                     failure_reason = 'episode failed', updated_at = ?3
                 WHERE episode_id = ?1 AND status = 'pending'",
                params![&episode.id, failure.kind.as_str(), now.naive_utc()],
            )?;
            conn.execute(
                "UPDATE episodes
                 SET status = 'failed', retry_count = ?2, last_failed_at = ?3,
                     failure_reason = ?4, updated_at = ?3
                 WHERE id = ?1",
                params![&episode.id, retry_count, now.naive_utc(), &failure.reason],
            )?;
            error!(
                job_id = %claim.job.id,
                episode_id = %episode.id,
                retry_count,
                reason = %failure.reason,
                "episode failed"
            );
            Ok(JobOutcome::Failed)
        })
    }

    /// Re-arms a failed episode. Consumes one manual retry and restarts the
    /// automatic retry budget.
    pub fn retry_episode(&self, episode_id: &str, now: DateTime<Utc>) -> ProductionResult<Episode> {
        let limit = self.config.max_manual_retries;
        self.store.with_write_tx(|conn| {
            let episode = load_episode(conn, episode_id)?
                .ok_or_else(|| StoreError::not_found("episode", episode_id))?;
            if episode.status != EpisodeStatus::Failed {
                return Err(ProductionError::invalid_status("episode", episode_id, episode.status));
            }
            if episode.manual_retry_count >= i64::from(limit) {
                return Err(ProductionError::ManualRetryLimit {
                    episode_id: episode_id.to_string(),
                    limit,
                });
            }
            conn.execute(
                "UPDATE episodes
                 SET status = 'pending', retry_count = 0,
                     manual_retry_count = manual_retry_count + 1, auto_retry_enabled = 1,
                     failure_reason = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![episode_id, now.naive_utc()],
            )?;
            conn.execute(
                "UPDATE production_jobs
                 SET status = 'pending', claim_token = NULL, claimed_at = NULL,
                     next_attempt_at = NULL, failures = 0, updated_at = ?2
                 WHERE episode_id = ?1 AND status = 'failed'",
                params![episode_id, now.naive_utc()],
            )?;
            info!(episode_id, manual_retry = episode.manual_retry_count + 1, "episode re-armed");
            load_episode(conn, episode_id)?
                .ok_or_else(|| ProductionError::from(StoreError::not_found("episode", episode_id)))
        })
    }

    /// Marks an episode failed by hand. Refused while a render is inside a
    /// gateway call that has not gone stale.
    pub fn abandon_episode(
        &self,
        episode_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ProductionResult<Episode> {
        let stale_cutoff = now - self.config.stale_after;
        self.store.with_write_tx(|conn| {
            let episode = load_episode(conn, episode_id)?
                .ok_or_else(|| StoreError::not_found("episode", episode_id))?;
            if episode.status.rendered() || episode.status == EpisodeStatus::Failed {
                return Err(ProductionError::invalid_status("episode", episode_id, episode.status));
            }
            let in_flight: Option<String> = conn
                .query_row(
                    "SELECT id FROM production_jobs
                     WHERE episode_id = ?1 AND status = 'generating' AND claimed_at > ?2
                     LIMIT 1",
                    params![episode_id, stale_cutoff.naive_utc()],
                    |row| row.get(0),
                )
                .optional()?;
            if in_flight.is_some() {
                return Err(ProductionError::EpisodeInFlight {
                    episode_id: episode_id.to_string(),
                });
            }
            conn.execute(
                "UPDATE production_jobs
                 SET status = 'failed', claim_token = NULL, failure_reason = ?2, updated_at = ?3
                 WHERE episode_id = ?1 AND status IN ('pending', 'generating')",
                params![episode_id, reason, now.naive_utc()],
            )?;
            conn.execute(
                "UPDATE episodes
                 SET status = 'failed', auto_retry_enabled = 0, failure_reason = ?2,
                     last_failed_at = ?3, updated_at = ?3
                 WHERE id = ?1",
                params![episode_id, reason, now.naive_utc()],
            )?;
            warn!(episode_id, reason, "episode abandoned");
            load_episode(conn, episode_id)?
                .ok_or_else(|| ProductionError::from(StoreError::not_found("episode", episode_id)))
        })
    }
}

fn mark_job_failed(
    conn: &Connection,
    job_id: &str,
    failure: &RenderFailure,
    now: DateTime<Utc>,
) -> ProductionResult<()> {
    conn.execute(
        "UPDATE production_jobs
         SET status = 'failed', claim_token = NULL, failure_kind = ?2, failure_reason = ?3,
             updated_at = ?4
         WHERE id = ?1",
        params![job_id, failure.kind.as_str(), &failure.reason, now.naive_utc()],
    )?;
    Ok(())
}

/// Moves a series whose pilot variants are all rendered into the human vote
/// and attaches it to the earliest open clip voting period.
fn open_clip_vote(conn: &Connection, series_id: &str, now: DateTime<Utc>) -> ProductionResult<()> {
    let period_id: Option<String> = conn
        .query_row(
            "SELECT id FROM voting_periods
             WHERE period_type = 'human_voting' AND is_active = 1 AND is_processed = 0
               AND ends_at > ?1
             ORDER BY ends_at ASC, id ASC
             LIMIT 1",
            [now.naive_utc()],
            |row| row.get(0),
        )
        .optional()?;
    conn.execute(
        "UPDATE series
         SET status = ?2, clip_voting_period_id = COALESCE(clip_voting_period_id, ?3),
             updated_at = ?4
         WHERE id = ?1 AND status = 'pilot_producing'",
        params![
            series_id,
            SeriesStatus::HumanVoting.as_str(),
            &period_id,
            now.naive_utc(),
        ],
    )?;
    conn.execute(
        "UPDATE submissions SET pilot_status = ?2, updated_at = ?3
         WHERE series_id = ?1 AND pilot_status IN ('selected', 'producing')",
        params![series_id, PilotStatus::HumanVoting.as_str(), now.naive_utc()],
    )?;
    match &period_id {
        Some(period_id) => info!(series_id, period_id = %period_id, "pilot opened for clip voting"),
        None => warn!(series_id, "pilot rendered but no open clip voting period; finalize manually"),
    }
    Ok(())
}

fn complete_series(
    conn: &Connection,
    series_id: &str,
    submission_id: &str,
    now: DateTime<Utc>,
) -> ProductionResult<()> {
    conn.execute(
        "UPDATE series SET status = 'completed', updated_at = ?2
         WHERE id = ?1 AND status = 'in_production'",
        params![series_id, now.naive_utc()],
    )?;
    conn.execute(
        "UPDATE submissions SET pilot_status = 'completed', updated_at = ?2
         WHERE id = ?1 AND pilot_status = 'greenlit'",
        params![submission_id, now.naive_utc()],
    )?;
    info!(series_id, "series completed");
    Ok(())
}
