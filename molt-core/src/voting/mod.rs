//! Closes expired voting periods.
//!
//! Each period is processed in its own IMMEDIATE transaction. For an agent
//! vote that transaction covers the tally, the winner's promotion and the
//! creation of its series, so a selected submission never exists without one.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::clips::{finalize_period_in_tx, ClipError, SelectionOutcome};
use crate::models::{PeriodType, Submission, VotingPeriod};
use crate::production::{ProductionError, ProductionScheduler};
use crate::store::{load_period, StoreError, StudioStore};

#[derive(Debug, Error)]
pub enum VotingError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Production(#[from] ProductionError),
    #[error(transparent)]
    Clip(#[from] ClipError),
    #[error("voting period {period_id} ends at {ends_at}; refusing to close it at {now}")]
    PrematureClose {
        period_id: String,
        ends_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    #[error("voting period {period_id} changed while closing")]
    ConcurrentClose { period_id: String },
}

impl From<rusqlite::Error> for VotingError {
    fn from(error: rusqlite::Error) -> Self {
        VotingError::Store(StoreError::Execute(error))
    }
}

pub type VotingResult<T> = std::result::Result<T, VotingError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryResult {
    pub category: String,
    pub winner_id: String,
    pub winner_score: i64,
    pub series_id: String,
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodResolution {
    Tally { categories: Vec<CategoryResult> },
    ClipSelection { series: Vec<SelectionOutcome> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodOutcome {
    pub period_id: String,
    pub period_type: PeriodType,
    pub resolution: PeriodResolution,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CloseReport {
    pub processed: Vec<PeriodOutcome>,
    pub failed: Vec<(String, String)>,
}

pub struct VotingPeriodManager {
    store: StudioStore,
    scheduler: ProductionScheduler,
    batch_limit: usize,
}

impl VotingPeriodManager {
    pub fn new(store: StudioStore, scheduler: ProductionScheduler, batch_limit: usize) -> Self {
        Self {
            store,
            scheduler,
            batch_limit: batch_limit.max(1),
        }
    }

    /// Processes every due period. A failing period rolls back alone and stays
    /// eligible for the next invocation.
    pub fn close_expired(&self, now: DateTime<Utc>) -> VotingResult<CloseReport> {
        let due = self.due_period_ids(now)?;
        let mut report = CloseReport::default();
        for period_id in due {
            match self.close_period(&period_id, now) {
                Ok(Some(outcome)) => report.processed.push(outcome),
                Ok(None) => debug!(period_id = %period_id, "period already closed"),
                Err(err) => {
                    error!(period_id = %period_id, error = %err, "failed to close voting period");
                    report.failed.push((period_id, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    fn due_period_ids(&self, now: DateTime<Utc>) -> VotingResult<Vec<String>> {
        let conn = self.store.open()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM voting_periods
             WHERE is_active = 1 AND is_processed = 0 AND ends_at <= ?1
             ORDER BY ends_at ASC, id ASC
             LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![now.naive_utc(), self.batch_limit as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Closes one period. Returns `None` when another worker already did.
    /// A period that has not ended yet is refused, whatever selected it.
    pub fn close_period(
        &self,
        period_id: &str,
        now: DateTime<Utc>,
    ) -> VotingResult<Option<PeriodOutcome>> {
        self.store.with_write_tx(|conn| {
            let period = load_period(conn, period_id)?
                .ok_or_else(|| StoreError::not_found("voting period", period_id))?;
            if !period.is_active || period.is_processed {
                return Ok(None);
            }
            if period.ends_at > now {
                return Err(VotingError::PrematureClose {
                    period_id: period.id,
                    ends_at: period.ends_at,
                    now,
                });
            }

            let resolution = match period.period_type {
                PeriodType::AgentVoting => PeriodResolution::Tally {
                    categories: self.tally(conn, &period, now)?,
                },
                PeriodType::HumanVoting => PeriodResolution::ClipSelection {
                    series: finalize_period_in_tx(conn, &self.scheduler, &period.id, now)?,
                },
            };

            let closed = conn.execute(
                "UPDATE voting_periods
                 SET is_processed = 1, is_active = 0, processed_at = ?2
                 WHERE id = ?1 AND is_processed = 0 AND ends_at <= ?2",
                params![&period.id, now.naive_utc()],
            )?;
            if closed != 1 {
                return Err(VotingError::ConcurrentClose {
                    period_id: period.id,
                });
            }
            info!(
                period_id = %period.id,
                period_type = %period.period_type,
                "voting period closed"
            );
            Ok(Some(PeriodOutcome {
                period_id: period.id,
                period_type: period.period_type,
                resolution,
            }))
        })
    }

    /// Highest score wins each category; ties go to the earliest submission,
    /// then the smallest id.
    fn tally(
        &self,
        conn: &Connection,
        period: &VotingPeriod,
        now: DateTime<Utc>,
    ) -> VotingResult<Vec<CategoryResult>> {
        let candidates = {
            let mut stmt = conn.prepare(
                "SELECT * FROM submissions
                 WHERE voting_period_id = ?1 AND pilot_status IN ('submitted', 'voting')
                 ORDER BY category ASC, score DESC, submitted_at ASC, id ASC",
            )?;
            let rows = stmt.query_map([&period.id], Submission::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut by_category: BTreeMap<String, Vec<Submission>> = BTreeMap::new();
        for submission in candidates {
            by_category
                .entry(submission.category.clone())
                .or_default()
                .push(submission);
        }

        let mut results = Vec::with_capacity(by_category.len());
        for (category, ranked) in by_category {
            let mut ranked = ranked.into_iter();
            let Some(winner) = ranked.next() else {
                continue;
            };
            conn.execute(
                "UPDATE submissions SET pilot_status = 'selected', updated_at = ?2
                 WHERE id = ?1 AND pilot_status IN ('submitted', 'voting')",
                params![&winner.id, now.naive_utc()],
            )?;
            let scheduled = self.scheduler.schedule_winner(conn, &winner.id, now)?;

            let mut rejected = Vec::new();
            for loser in ranked {
                conn.execute(
                    "UPDATE submissions SET pilot_status = 'rejected', updated_at = ?2
                     WHERE id = ?1 AND pilot_status IN ('submitted', 'voting')",
                    params![&loser.id, now.naive_utc()],
                )?;
                rejected.push(loser.id);
            }

            info!(
                period_id = %period.id,
                category = %category,
                winner_id = %winner.id,
                score = winner.score,
                series_id = %scheduled.series_id,
                rejected = rejected.len(),
                "category winner selected"
            );
            results.push(CategoryResult {
                category,
                winner_id: winner.id,
                winner_score: winner.score,
                series_id: scheduled.series_id,
                rejected,
            });
        }
        Ok(results)
    }
}
