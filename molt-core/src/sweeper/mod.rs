//! Moves expired unclaimed shares into the treasury.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::models::UnclaimedFunds;
use crate::store::{StoreError, StudioStore};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("treasury sink rejected credit: {0}")]
    Sink(String),
}

impl From<rusqlite::Error> for SweepError {
    fn from(error: rusqlite::Error) -> Self {
        SweepError::Store(StoreError::Execute(error))
    }
}

pub type SweepResult<T> = std::result::Result<T, SweepError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreasuryCredit {
    pub unclaimed_id: String,
    pub clip_vote_id: String,
    pub amount_cents: i64,
    pub reason: String,
    pub proof: String,
    pub credited_at: DateTime<Utc>,
}

/// Receives treasury credits after they are committed. Delivery is best
/// effort; the `treasury_credits` table is the record of truth.
#[async_trait]
pub trait TreasurySink: Send + Sync {
    async fn credit(&self, credit: &TreasuryCredit) -> SweepResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LoggingTreasury;

#[async_trait]
impl TreasurySink for LoggingTreasury {
    async fn credit(&self, credit: &TreasuryCredit) -> SweepResult<()> {
        info!(
            unclaimed_id = %credit.unclaimed_id,
            amount_cents = credit.amount_cents,
            reason = %credit.reason,
            proof = %credit.proof,
            "treasury credited"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub credits: Vec<TreasuryCredit>,
    pub total_cents: i64,
    pub skipped: usize,
    pub errors: usize,
}

pub struct UnclaimedFundsSweeper {
    store: StudioStore,
    treasury: Arc<dyn TreasurySink>,
    batch_size: usize,
}

impl UnclaimedFundsSweeper {
    pub fn new(store: StudioStore, treasury: Arc<dyn TreasurySink>, batch_size: usize) -> Self {
        Self {
            store,
            treasury,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepResult<SweepReport> {
        let due = self.due_rows(now)?;
        let mut report = SweepReport::default();
        for held in due {
            match self.sweep_row(&held, now) {
                Ok(Some(credit)) => {
                    if let Err(err) = self.treasury.credit(&credit).await {
                        warn!(
                            unclaimed_id = %credit.unclaimed_id,
                            error = %err,
                            "treasury sink did not acknowledge credit"
                        );
                    }
                    report.total_cents += credit.amount_cents;
                    report.credits.push(credit);
                }
                Ok(None) => report.skipped += 1,
                Err(err) => {
                    error!(unclaimed_id = %held.id, error = %err, "failed to sweep unclaimed share");
                    report.errors += 1;
                }
            }
        }
        if !report.credits.is_empty() {
            info!(
                swept = report.credits.len(),
                total_cents = report.total_cents,
                "unclaimed funds swept"
            );
        }
        Ok(report)
    }

    fn due_rows(&self, now: DateTime<Utc>) -> SweepResult<Vec<UnclaimedFunds>> {
        let conn = self.store.open()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM unclaimed_funds
             WHERE claimed_at IS NULL AND swept_to_treasury_at IS NULL AND expires_at <= ?1
             ORDER BY expires_at ASC, id ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                params![now.naive_utc(), self.batch_size as i64],
                UnclaimedFunds::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stamps one row and writes its treasury credit in a single transaction.
    /// Returns `None` when a claim or another sweep got there first.
    fn sweep_row(
        &self,
        held: &UnclaimedFunds,
        now: DateTime<Utc>,
    ) -> SweepResult<Option<TreasuryCredit>> {
        self.store.with_write_tx(|conn| {
            let stamped = conn.execute(
                "UPDATE unclaimed_funds SET swept_to_treasury_at = ?2
                 WHERE id = ?1 AND claimed_at IS NULL AND swept_to_treasury_at IS NULL
                   AND expires_at <= ?2",
                params![&held.id, now.naive_utc()],
            )?;
            if stamped != 1 {
                return Ok(None);
            }
            let reason = format!(
                "unclaimed {} share of clip vote {} expired: {}",
                held.recipient_type, held.clip_vote_id, held.reason
            );
            let proof = compute_proof(&held.id, held.amount_cents, &reason, now);
            conn.execute(
                "INSERT INTO treasury_credits (unclaimed_id, amount_cents, reason, proof, credited_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![&held.id, held.amount_cents, &reason, &proof, now.naive_utc()],
            )?;
            Ok(Some(TreasuryCredit {
                unclaimed_id: held.id.clone(),
                clip_vote_id: held.clip_vote_id.clone(),
                amount_cents: held.amount_cents,
                reason,
                proof,
                credited_at: now,
            }))
        })
    }
}

fn compute_proof(unclaimed_id: &str, amount_cents: i64, reason: &str, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(unclaimed_id.as_bytes());
    hasher.update(amount_cents.to_string().as_bytes());
    hasher.update(reason.as_bytes());
    hasher.update(at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn proof_depends_on_every_field() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let base = compute_proof("unc-1", 20, "expired", at);
        assert_eq!(base.len(), 64);
        assert_eq!(base, compute_proof("unc-1", 20, "expired", at));
        assert_ne!(base, compute_proof("unc-2", 20, "expired", at));
        assert_ne!(base, compute_proof("unc-1", 21, "expired", at));
        assert_ne!(base, compute_proof("unc-1", 20, "expired", at + chrono::Duration::seconds(1)));
    }
}
