use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ProductionSection;
use crate::models::{PilotStatus, RenderKind, SeriesStatus, Submission};
use crate::store::{load_series, load_submission, StoreError, StudioStore};

use super::error::{ProductionError, ProductionResult};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub pilot_variants: u32,
    pub follow_on_episodes: u32,
    pub schedule_follow_ons_with_pilot: bool,
    pub pilot_kind: RenderKind,
    pub follow_on_kind: RenderKind,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&ProductionSection::default())
    }
}

impl From<&ProductionSection> for SchedulerConfig {
    fn from(section: &ProductionSection) -> Self {
        Self {
            pilot_variants: section.pilot_variants,
            follow_on_episodes: section.follow_on_episodes,
            schedule_follow_ons_with_pilot: section.schedule_follow_ons_with_pilot,
            pilot_kind: section.pilot_kind,
            follow_on_kind: section.follow_on_kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduledSeries {
    pub series_id: String,
    pub submission_id: String,
    pub episode_ids: Vec<String>,
    pub jobs_enqueued: usize,
}

/// Turns a winning submission into a series, its episodes and their jobs.
///
/// Every method takes the caller's connection so the writes land in the
/// caller's transaction; the tally that picked the winner and the series it
/// produces commit or roll back together.
#[derive(Debug, Clone, Default)]
pub struct ProductionScheduler {
    config: SchedulerConfig,
}

impl ProductionScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Creates the series for a submission the tally just marked `selected`.
    pub fn schedule_winner(
        &self,
        conn: &Connection,
        submission_id: &str,
        now: DateTime<Utc>,
    ) -> ProductionResult<ScheduledSeries> {
        let submission = load_submission(conn, submission_id)?
            .ok_or_else(|| StoreError::not_found("submission", submission_id))?;
        if submission.pilot_status != PilotStatus::Selected {
            return Err(ProductionError::invalid_status(
                "submission",
                &submission.id,
                submission.pilot_status,
            ));
        }
        self.create_series(conn, &submission, now)
    }

    /// Re-runs series creation for a submission stranded in `selected` (or a
    /// later status) without a series. Anything else is refused.
    pub fn recover_orphan(
        &self,
        store: &StudioStore,
        submission_id: &str,
        now: DateTime<Utc>,
    ) -> ProductionResult<ScheduledSeries> {
        store.with_write_tx(|conn| {
            let submission = load_submission(conn, submission_id)?
                .ok_or_else(|| StoreError::not_found("submission", submission_id))?;
            if !submission.pilot_status.requires_series() || submission.series_id.is_some() {
                return Err(ProductionError::invalid_status(
                    "submission",
                    &submission.id,
                    format!(
                        "{} (series {})",
                        submission.pilot_status,
                        submission.series_id.as_deref().unwrap_or("none")
                    ),
                ));
            }
            warn!(
                submission_id = %submission.id,
                pilot_status = %submission.pilot_status,
                "recovering orphaned submission"
            );
            self.create_series(conn, &submission, now)
        })
    }

    fn create_series(
        &self,
        conn: &Connection,
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> ProductionResult<ScheduledSeries> {
        let series_id = format!("ser-{}", Uuid::new_v4());
        conn.execute(
            "INSERT INTO series (
                id, submission_id, title, category, status, episode_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)",
            params![
                &series_id,
                &submission.id,
                &submission.title,
                &submission.category,
                SeriesStatus::PilotProducing.as_str(),
                now.naive_utc(),
            ],
        )?;

        let stamped = conn.execute(
            "UPDATE submissions SET series_id = ?2, updated_at = ?3
             WHERE id = ?1 AND series_id IS NULL",
            params![&submission.id, &series_id, now.naive_utc()],
        )?;
        if stamped != 1 {
            return Err(ProductionError::Integrity(format!(
                "submission {} already carries a series",
                submission.id
            )));
        }

        let pilot_id = insert_episode(
            conn,
            &series_id,
            1,
            true,
            self.config.pilot_variants,
            now,
        )?;
        let mut episode_ids = vec![pilot_id.clone()];
        let mut jobs_enqueued = 0;
        for variant in 1..=self.config.pilot_variants {
            insert_job(
                conn,
                &pilot_id,
                variant,
                self.config.pilot_kind,
                &pilot_prompt(submission, variant),
                now,
            )?;
            jobs_enqueued += 1;
        }

        if self.config.schedule_follow_ons_with_pilot {
            let (ids, jobs) = self.insert_follow_ons(conn, &series_id, submission, now)?;
            episode_ids.extend(ids);
            jobs_enqueued += jobs;
        }
        refresh_episode_count(conn, &series_id, now)?;

        info!(
            submission_id = %submission.id,
            series_id = %series_id,
            episodes = episode_ids.len(),
            jobs = jobs_enqueued,
            "series scheduled"
        );
        Ok(ScheduledSeries {
            series_id,
            submission_id: submission.id.clone(),
            episode_ids,
            jobs_enqueued,
        })
    }

    /// Enqueues the follow-on episodes that do not exist yet. Returns the
    /// number of episodes created; a second call is a no-op.
    pub fn schedule_follow_ons(
        &self,
        conn: &Connection,
        series_id: &str,
        now: DateTime<Utc>,
    ) -> ProductionResult<usize> {
        let series = load_series(conn, series_id)?
            .ok_or_else(|| StoreError::not_found("series", series_id))?;
        let submission = load_submission(conn, &series.submission_id)?
            .ok_or_else(|| StoreError::not_found("submission", &series.submission_id))?;
        let (ids, _) = self.insert_follow_ons(conn, series_id, &submission, now)?;
        refresh_episode_count(conn, series_id, now)?;
        Ok(ids.len())
    }

    fn insert_follow_ons(
        &self,
        conn: &Connection,
        series_id: &str,
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> ProductionResult<(Vec<String>, usize)> {
        let mut created = Vec::new();
        for offset in 1..=self.config.follow_on_episodes {
            let episode_number = 1 + offset as i64;
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM episodes WHERE series_id = ?1 AND episode_number = ?2)",
                params![series_id, episode_number],
                |row| row.get(0),
            )?;
            if exists {
                continue;
            }
            let episode_id = insert_episode(conn, series_id, episode_number, false, 1, now)?;
            insert_job(
                conn,
                &episode_id,
                1,
                self.config.follow_on_kind,
                &follow_on_prompt(submission, episode_number),
                now,
            )?;
            created.push(episode_id);
        }
        let jobs = created.len();
        Ok((created, jobs))
    }
}

fn insert_episode(
    conn: &Connection,
    series_id: &str,
    episode_number: i64,
    is_pilot: bool,
    variants_required: u32,
    now: DateTime<Utc>,
) -> ProductionResult<String> {
    let episode_id = format!("ep-{}", Uuid::new_v4());
    conn.execute(
        "INSERT INTO episodes (
            id, series_id, episode_number, is_pilot, status, variants_required,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?6)",
        params![
            &episode_id,
            series_id,
            episode_number,
            is_pilot,
            variants_required,
            now.naive_utc(),
        ],
    )?;
    Ok(episode_id)
}

fn insert_job(
    conn: &Connection,
    episode_id: &str,
    variant_number: u32,
    kind: RenderKind,
    prompt: &str,
    now: DateTime<Utc>,
) -> ProductionResult<()> {
    conn.execute(
        "INSERT INTO production_jobs (
            id, episode_id, variant_number, kind, prompt, status, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
        params![
            format!("job-{}", Uuid::new_v4()),
            episode_id,
            variant_number,
            kind.as_str(),
            prompt,
            now.naive_utc(),
        ],
    )?;
    Ok(())
}

fn refresh_episode_count(
    conn: &Connection,
    series_id: &str,
    now: DateTime<Utc>,
) -> ProductionResult<()> {
    conn.execute(
        "UPDATE series
         SET episode_count = (SELECT COUNT(*) FROM episodes WHERE series_id = ?1),
             updated_at = ?2
         WHERE id = ?1",
        params![series_id, now.naive_utc()],
    )?;
    Ok(())
}

fn pilot_prompt(submission: &Submission, variant: u32) -> String {
    format!(
        "{}\n\n{}\n\n[pilot variant {variant}]",
        submission.title, submission.script
    )
}

fn follow_on_prompt(submission: &Submission, episode_number: i64) -> String {
    format!(
        "{}\n\n{}\n\n[episode {episode_number}]",
        submission.title, submission.script
    )
}
