use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

use crate::models::{
    ClipVariant, ClipVote, Episode, Payout, PayoutStatus, PayoutWallet, ProductionJob, Series,
    Submission, UnclaimedFunds, VotingPeriod,
};
use crate::sqlite::configure_connection;

const STUDIO_SCHEMA: &str = include_str!("../../sql/studio.sql");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open studio database {path}: {source}")]
    Open {
        source: rusqlite::Error,
        path: PathBuf,
    },
    #[error("failed to execute statement on studio database: {0}")]
    Execute(#[from] rusqlite::Error),
    #[error("studio database path not configured")]
    MissingStore,
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct StudioStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for StudioStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl StudioStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<StudioStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(StudioStore { path, flags })
    }
}

/// Handle to the studio database. Cheap to clone; every operation opens its
/// own connection so worker ticks never share connection state.
#[derive(Debug, Clone)]
pub struct StudioStore {
    path: PathBuf,
    flags: OpenFlags,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub submissions: HashMap<String, i64>,
    pub series: HashMap<String, i64>,
    pub episodes: HashMap<String, i64>,
    pub jobs: HashMap<String, i64>,
    pub payouts: HashMap<String, i64>,
    pub open_unclaimed_cents: i64,
    pub pending_periods: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PayoutFilter {
    pub status: Option<PayoutStatus>,
    pub clip_vote_id: Option<String>,
    pub limit: Option<usize>,
}

impl StudioStore {
    pub fn builder() -> StudioStoreBuilder {
        StudioStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        StudioStoreBuilder::new().path(path).build()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    /// Runs `work` inside an IMMEDIATE transaction, committing only on `Ok`.
    /// SQLite grants the writer lock up front, so two ticks racing on the same
    /// rows serialize here instead of failing halfway through.
    pub(crate) fn with_write_tx<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.open().map_err(E::from)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| E::from(StoreError::from(err)))?;
        let value = work(&*tx)?;
        tx.commit().map_err(|err| E::from(StoreError::from(err)))?;
        Ok(value)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(STUDIO_SCHEMA)?;
        Ok(())
    }

    pub fn insert_period(&self, period: &VotingPeriod) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO voting_periods (
                id, period_type, starts_at, ends_at, is_active, is_processed, processed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &period.id,
                period.period_type.as_str(),
                period.starts_at.naive_utc(),
                period.ends_at.naive_utc(),
                period.is_active,
                period.is_processed,
                period.processed_at.map(|dt| dt.naive_utc()),
            ],
        )?;
        Ok(())
    }

    pub fn insert_submission(&self, submission: &Submission) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO submissions (
                id, agent_id, creator_id, category, title, script, pilot_status,
                voting_period_id, score, series_id, submitted_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &submission.id,
                &submission.agent_id,
                &submission.creator_id,
                &submission.category,
                &submission.title,
                &submission.script,
                submission.pilot_status.as_str(),
                &submission.voting_period_id,
                submission.score,
                &submission.series_id,
                submission.submitted_at.naive_utc(),
                submission.updated_at.map(|dt| dt.naive_utc()),
            ],
        )?;
        Ok(())
    }

    pub fn update_score(&self, submission_id: &str, score: i64) -> StoreResult<()> {
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE submissions SET score = ?2, updated_at = CURRENT_TIMESTAMP WHERE id = ?1",
            params![submission_id, score],
        )?;
        if affected == 0 {
            return Err(StoreError::not_found("submission", submission_id));
        }
        Ok(())
    }

    pub fn fetch_period(&self, id: &str) -> StoreResult<Option<VotingPeriod>> {
        load_period(&self.open()?, id)
    }

    pub fn fetch_submission(&self, id: &str) -> StoreResult<Option<Submission>> {
        load_submission(&self.open()?, id)
    }

    pub fn fetch_series(&self, id: &str) -> StoreResult<Option<Series>> {
        load_series(&self.open()?, id)
    }

    pub fn fetch_episode(&self, id: &str) -> StoreResult<Option<Episode>> {
        load_episode(&self.open()?, id)
    }

    pub fn fetch_job(&self, id: &str) -> StoreResult<Option<ProductionJob>> {
        load_job(&self.open()?, id)
    }

    pub fn fetch_variant(&self, id: &str) -> StoreResult<Option<ClipVariant>> {
        load_variant(&self.open()?, id)
    }

    pub fn fetch_vote(&self, id: &str) -> StoreResult<Option<ClipVote>> {
        load_vote(&self.open()?, id)
    }

    pub fn fetch_wallet(&self, owner_id: &str) -> StoreResult<Option<PayoutWallet>> {
        load_wallet(&self.open()?, owner_id)
    }

    pub fn list_episodes(&self, series_id: &str) -> StoreResult<Vec<Episode>> {
        list_series_episodes(&self.open()?, series_id)
    }

    pub fn list_jobs(&self, episode_id: &str) -> StoreResult<Vec<ProductionJob>> {
        list_episode_jobs(&self.open()?, episode_id)
    }

    pub fn list_variants(&self, episode_id: &str) -> StoreResult<Vec<ClipVariant>> {
        list_episode_variants(&self.open()?, episode_id)
    }

    pub fn list_payouts(&self, filter: &PayoutFilter) -> StoreResult<Vec<Payout>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM payouts
             WHERE (?1 IS NULL OR status = ?1)
               AND (?2 IS NULL OR clip_vote_id = ?2)
             ORDER BY created_at ASC, recipient_type ASC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(
                params![
                    filter.status.as_ref().map(PayoutStatus::as_str),
                    &filter.clip_vote_id,
                    filter.limit.map(|limit| limit as i64).unwrap_or(-1),
                ],
                Payout::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_unclaimed(&self, open_only: bool) -> StoreResult<Vec<UnclaimedFunds>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM unclaimed_funds
             WHERE (?1 = 0 OR (claimed_at IS NULL AND swept_to_treasury_at IS NULL))
             ORDER BY expires_at ASC",
        )?;
        let rows = stmt
            .query_map([open_only], UnclaimedFunds::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn status_counts(&self, now: DateTime<Utc>) -> StoreResult<StatusCounts> {
        let conn = self.open()?;
        let mut counts = StatusCounts {
            submissions: group_counts(&conn, "submissions", "pilot_status")?,
            series: group_counts(&conn, "series", "status")?,
            episodes: group_counts(&conn, "episodes", "status")?,
            jobs: group_counts(&conn, "production_jobs", "status")?,
            payouts: group_counts(&conn, "payouts", "status")?,
            ..StatusCounts::default()
        };
        counts.open_unclaimed_cents = conn.query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM unclaimed_funds
             WHERE claimed_at IS NULL AND swept_to_treasury_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        counts.pending_periods = conn.query_row(
            "SELECT COUNT(*) FROM voting_periods
             WHERE is_active = 1 AND is_processed = 0 AND ends_at <= ?1",
            [now.naive_utc()],
            |row| row.get(0),
        )?;
        Ok(counts)
    }
}

fn group_counts(conn: &Connection, table: &str, column: &str) -> StoreResult<HashMap<String, i64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM {table} GROUP BY {column}"
    ))?;
    let mut map = HashMap::new();
    for row in stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })? {
        let (status, count) = row?;
        map.insert(status, count);
    }
    Ok(map)
}

pub(crate) fn load_period(conn: &Connection, id: &str) -> StoreResult<Option<VotingPeriod>> {
    Ok(conn
        .query_row(
            "SELECT * FROM voting_periods WHERE id = ?1",
            [id],
            VotingPeriod::from_row,
        )
        .optional()?)
}

pub(crate) fn load_submission(conn: &Connection, id: &str) -> StoreResult<Option<Submission>> {
    Ok(conn
        .query_row(
            "SELECT * FROM submissions WHERE id = ?1",
            [id],
            Submission::from_row,
        )
        .optional()?)
}

pub(crate) fn load_series(conn: &Connection, id: &str) -> StoreResult<Option<Series>> {
    Ok(conn
        .query_row("SELECT * FROM series WHERE id = ?1", [id], Series::from_row)
        .optional()?)
}

pub(crate) fn load_episode(conn: &Connection, id: &str) -> StoreResult<Option<Episode>> {
    Ok(conn
        .query_row("SELECT * FROM episodes WHERE id = ?1", [id], Episode::from_row)
        .optional()?)
}

pub(crate) fn load_job(conn: &Connection, id: &str) -> StoreResult<Option<ProductionJob>> {
    Ok(conn
        .query_row(
            "SELECT * FROM production_jobs WHERE id = ?1",
            [id],
            ProductionJob::from_row,
        )
        .optional()?)
}

pub(crate) fn load_variant(conn: &Connection, id: &str) -> StoreResult<Option<ClipVariant>> {
    Ok(conn
        .query_row(
            "SELECT * FROM clip_variants WHERE id = ?1",
            [id],
            ClipVariant::from_row,
        )
        .optional()?)
}

pub(crate) fn load_vote(conn: &Connection, id: &str) -> StoreResult<Option<ClipVote>> {
    Ok(conn
        .query_row(
            "SELECT * FROM clip_votes WHERE id = ?1",
            [id],
            ClipVote::from_row,
        )
        .optional()?)
}

pub(crate) fn load_wallet(conn: &Connection, owner_id: &str) -> StoreResult<Option<PayoutWallet>> {
    Ok(conn
        .query_row(
            "SELECT * FROM payout_wallets WHERE owner_id = ?1",
            [owner_id],
            PayoutWallet::from_row,
        )
        .optional()?)
}

pub(crate) fn list_series_episodes(conn: &Connection, series_id: &str) -> StoreResult<Vec<Episode>> {
    let mut stmt =
        conn.prepare("SELECT * FROM episodes WHERE series_id = ?1 ORDER BY episode_number ASC")?;
    let rows = stmt
        .query_map([series_id], Episode::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn list_episode_jobs(conn: &Connection, episode_id: &str) -> StoreResult<Vec<ProductionJob>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM production_jobs WHERE episode_id = ?1 ORDER BY variant_number ASC",
    )?;
    let rows = stmt
        .query_map([episode_id], ProductionJob::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn list_episode_variants(
    conn: &Connection,
    episode_id: &str,
) -> StoreResult<Vec<ClipVariant>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM clip_variants WHERE episode_id = ?1 ORDER BY variant_number ASC",
    )?;
    let rows = stmt
        .query_map([episode_id], ClipVariant::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
