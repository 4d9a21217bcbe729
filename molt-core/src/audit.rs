use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::store::{StoreError, StudioStore};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for AuditError {
    fn from(error: rusqlite::Error) -> Self {
        AuditError::Store(StoreError::Execute(error))
    }
}

pub type AuditResult<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityKind {
    OrphanedSubmission,
    PrematurePeriodClose,
    DoubleSettlement,
    SplitMismatch,
    MissingShare,
    StuckJob,
    ExpiredUnswept,
}

impl IntegrityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrityKind::OrphanedSubmission => "orphaned_submission",
            IntegrityKind::PrematurePeriodClose => "premature_period_close",
            IntegrityKind::DoubleSettlement => "double_settlement",
            IntegrityKind::SplitMismatch => "split_mismatch",
            IntegrityKind::MissingShare => "missing_share",
            IntegrityKind::StuckJob => "stuck_job",
            IntegrityKind::ExpiredUnswept => "expired_unswept",
        }
    }

    /// Violations of a pipeline invariant, as opposed to work that is late.
    pub fn is_violation(&self) -> bool {
        !matches!(self, IntegrityKind::StuckJob | IntegrityKind::ExpiredUnswept)
    }
}

impl fmt::Display for IntegrityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IntegrityFinding {
    pub kind: IntegrityKind,
    pub entity_id: String,
    pub note: String,
}

/// Read-only checks of the pipeline invariants. Findings are reported, never
/// repaired; orphans go through the scheduler's recovery path.
pub struct IntegrityAuditor {
    store: StudioStore,
    stale_after: Duration,
}

impl IntegrityAuditor {
    pub fn new(store: StudioStore, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    pub fn audit(&self, now: DateTime<Utc>) -> AuditResult<Vec<IntegrityFinding>> {
        let conn = self.store.open()?;
        let mut findings = Vec::new();
        orphaned_submissions(&conn, &mut findings)?;
        premature_closes(&conn, &mut findings)?;
        double_settlements(&conn, &mut findings)?;
        settlement_totals(&conn, &mut findings)?;
        stuck_jobs(&conn, now - self.stale_after, &mut findings)?;
        expired_unswept(&conn, now, &mut findings)?;

        for finding in &findings {
            if finding.kind.is_violation() {
                error!(kind = %finding.kind, entity_id = %finding.entity_id, note = %finding.note, "integrity violation");
            } else {
                warn!(kind = %finding.kind, entity_id = %finding.entity_id, note = %finding.note, "pipeline lagging");
            }
        }
        Ok(findings)
    }
}

fn collect_pairs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> AuditResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn orphaned_submissions(conn: &Connection, findings: &mut Vec<IntegrityFinding>) -> AuditResult<()> {
    for (id, status) in collect_pairs(
        conn,
        "SELECT id, pilot_status FROM submissions
         WHERE series_id IS NULL
           AND pilot_status IN ('selected', 'producing', 'human_voting', 'greenlit', 'completed')",
        [],
    )? {
        findings.push(IntegrityFinding {
            kind: IntegrityKind::OrphanedSubmission,
            entity_id: id,
            note: format!("submission is {status} without a series"),
        });
    }
    Ok(())
}

fn premature_closes(conn: &Connection, findings: &mut Vec<IntegrityFinding>) -> AuditResult<()> {
    for (id, ends_at) in collect_pairs(
        conn,
        "SELECT id, CAST(ends_at AS TEXT) FROM voting_periods
         WHERE is_processed = 1 AND (processed_at IS NULL OR processed_at < ends_at)",
        [],
    )? {
        findings.push(IntegrityFinding {
            kind: IntegrityKind::PrematurePeriodClose,
            entity_id: id,
            note: format!("processed before its end at {ends_at}"),
        });
    }
    Ok(())
}

fn double_settlements(conn: &Connection, findings: &mut Vec<IntegrityFinding>) -> AuditResult<()> {
    for (vote_id, recipient) in collect_pairs(
        conn,
        "SELECT p.clip_vote_id, p.recipient_type FROM payouts p
         JOIN unclaimed_funds u
           ON u.clip_vote_id = p.clip_vote_id AND u.recipient_type = p.recipient_type
         WHERE u.claimed_at IS NULL",
        [],
    )? {
        findings.push(IntegrityFinding {
            kind: IntegrityKind::DoubleSettlement,
            entity_id: vote_id,
            note: format!("{recipient} share is both paid and held"),
        });
    }
    Ok(())
}

/// Every confirmed paid vote carries three shares summing to the tip. A
/// claimed unclaimed row is counted through the payout it became.
fn settlement_totals(conn: &Connection, findings: &mut Vec<IntegrityFinding>) -> AuditResult<()> {
    let mut stmt = conn.prepare(
        "SELECT v.id, v.tip_amount_cents,
                (SELECT COUNT(*) FROM payouts p WHERE p.clip_vote_id = v.id)
                  + (SELECT COUNT(*) FROM unclaimed_funds u
                     WHERE u.clip_vote_id = v.id AND u.claimed_at IS NULL) AS shares,
                (SELECT COALESCE(SUM(amount_cents), 0) FROM payouts p WHERE p.clip_vote_id = v.id)
                  + (SELECT COALESCE(SUM(amount_cents), 0) FROM unclaimed_funds u
                     WHERE u.clip_vote_id = v.id AND u.claimed_at IS NULL) AS settled
         FROM clip_votes v
         WHERE v.payment_status = 'confirmed' AND v.tip_amount_cents > 0",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (vote_id, tip, shares, settled) in rows {
        if shares < 3 {
            findings.push(IntegrityFinding {
                kind: IntegrityKind::MissingShare,
                entity_id: vote_id.clone(),
                note: format!("{shares} of 3 shares recorded"),
            });
        }
        if shares > 0 && settled != tip {
            findings.push(IntegrityFinding {
                kind: IntegrityKind::SplitMismatch,
                entity_id: vote_id,
                note: format!("shares sum to {settled} cents, tip was {tip}"),
            });
        }
    }
    Ok(())
}

fn stuck_jobs(
    conn: &Connection,
    stale_cutoff: DateTime<Utc>,
    findings: &mut Vec<IntegrityFinding>,
) -> AuditResult<()> {
    for (id, episode_id) in collect_pairs(
        conn,
        "SELECT id, episode_id FROM production_jobs
         WHERE status = 'generating' AND claimed_at <= ?1",
        params![stale_cutoff.naive_utc()],
    )? {
        findings.push(IntegrityFinding {
            kind: IntegrityKind::StuckJob,
            entity_id: id,
            note: format!("render for episode {episode_id} past the stale threshold"),
        });
    }
    Ok(())
}

fn expired_unswept(
    conn: &Connection,
    now: DateTime<Utc>,
    findings: &mut Vec<IntegrityFinding>,
) -> AuditResult<()> {
    for (id, vote_id) in collect_pairs(
        conn,
        "SELECT id, clip_vote_id FROM unclaimed_funds
         WHERE claimed_at IS NULL AND swept_to_treasury_at IS NULL AND expires_at <= ?1",
        params![now.naive_utc()],
    )? {
        findings.push(IntegrityFinding {
            kind: IntegrityKind::ExpiredUnswept,
            entity_id: id,
            note: format!("expired share of clip vote {vote_id} awaiting sweep"),
        });
    }
    Ok(())
}
