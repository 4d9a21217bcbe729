//! Second-stage voting on rendered pilot variants.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ClipVariant, ClipVote, PaymentStatus, Series, SeriesStatus, VoterType};
use crate::payouts::{PayoutEngine, PayoutError, SettlementReport};
use crate::production::{ProductionError, ProductionScheduler};
use crate::store::{
    load_episode, load_period, load_series, load_variant, load_vote, StoreError, StudioStore,
};

#[derive(Debug, Error)]
pub enum ClipError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Production(#[from] ProductionError),
    #[error(transparent)]
    Payout(#[from] PayoutError),
    #[error("{voter_identity} already voted on clip variant {clip_variant_id}")]
    DuplicateVote {
        clip_variant_id: String,
        voter_identity: String,
    },
    #[error("clip voting is closed for series {series_id} ({status})")]
    VotingClosed { series_id: String, status: String },
    #[error("invalid tip: {0}")]
    InvalidTip(String),
}

impl From<rusqlite::Error> for ClipError {
    fn from(error: rusqlite::Error) -> Self {
        ClipError::Store(StoreError::Execute(error))
    }
}

pub type ClipResult<T> = std::result::Result<T, ClipError>;

#[derive(Debug, Clone)]
pub struct NewClipVote {
    pub clip_variant_id: String,
    pub voter_type: VoterType,
    pub voter_identity: String,
    pub tip_amount_cents: i64,
    /// Present when the payment rail already confirmed the tip.
    pub payer_reference: Option<String>,
}

impl NewClipVote {
    pub fn free(
        clip_variant_id: impl Into<String>,
        voter_type: VoterType,
        voter_identity: impl Into<String>,
    ) -> Self {
        Self {
            clip_variant_id: clip_variant_id.into(),
            voter_type,
            voter_identity: voter_identity.into(),
            tip_amount_cents: 0,
            payer_reference: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VoteReceipt {
    pub vote: ClipVote,
    pub settlement: Option<SettlementReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionOutcome {
    pub series_id: String,
    pub selected_variant_id: Option<String>,
    pub vote_count: i64,
    pub follow_ons_scheduled: usize,
    pub series_status: SeriesStatus,
}

#[derive(Clone)]
pub struct ClipSelector {
    store: StudioStore,
    payouts: PayoutEngine,
    scheduler: ProductionScheduler,
}

impl ClipSelector {
    pub fn new(store: StudioStore, payouts: PayoutEngine, scheduler: ProductionScheduler) -> Self {
        Self {
            store,
            payouts,
            scheduler,
        }
    }

    /// Records one vote per `(variant, voter)`. A confirmed paid vote is
    /// settled in the same transaction that records it.
    pub fn cast_vote(&self, vote: &NewClipVote, now: DateTime<Utc>) -> ClipResult<VoteReceipt> {
        if vote.tip_amount_cents < 0 {
            return Err(ClipError::InvalidTip(format!(
                "negative amount {}",
                vote.tip_amount_cents
            )));
        }
        if vote.tip_amount_cents > 0 && vote.voter_type != VoterType::Human {
            return Err(ClipError::InvalidTip("only human votes carry tips".into()));
        }

        self.store.with_write_tx(|conn| {
            let variant = load_variant(conn, &vote.clip_variant_id)?
                .ok_or_else(|| StoreError::not_found("clip variant", &vote.clip_variant_id))?;
            let series = series_for_variant(conn, &variant)?;
            if series.status != SeriesStatus::HumanVoting {
                return Err(ClipError::VotingClosed {
                    series_id: series.id,
                    status: series.status.to_string(),
                });
            }
            if let Some(period_id) = &series.clip_voting_period_id {
                let period = load_period(conn, period_id)?
                    .ok_or_else(|| StoreError::not_found("voting period", period_id))?;
                if period.is_processed || now >= period.ends_at {
                    return Err(ClipError::VotingClosed {
                        series_id: series.id,
                        status: format!("window ended {}", period.ends_at.to_rfc3339()),
                    });
                }
            }

            let payment_status = match (vote.tip_amount_cents, &vote.payer_reference) {
                (0, _) => PaymentStatus::None,
                (_, Some(_)) => PaymentStatus::Confirmed,
                (_, None) => PaymentStatus::Pending,
            };
            let vote_id = format!("vote-{}", Uuid::new_v4());
            let inserted = conn.execute(
                "INSERT INTO clip_votes (
                    id, clip_variant_id, voter_type, voter_identity, tip_amount_cents,
                    payment_status, payer_reference, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(clip_variant_id, voter_identity) DO NOTHING",
                params![
                    &vote_id,
                    &vote.clip_variant_id,
                    vote.voter_type.as_str(),
                    &vote.voter_identity,
                    vote.tip_amount_cents,
                    payment_status.as_str(),
                    &vote.payer_reference,
                    now.naive_utc(),
                ],
            )?;
            if inserted == 0 {
                return Err(ClipError::DuplicateVote {
                    clip_variant_id: vote.clip_variant_id.clone(),
                    voter_identity: vote.voter_identity.clone(),
                });
            }
            conn.execute(
                "UPDATE clip_variants SET vote_count = vote_count + 1 WHERE id = ?1",
                [&variant.id],
            )?;

            let recorded = load_vote(conn, &vote_id)?
                .ok_or_else(|| StoreError::not_found("clip vote", &vote_id))?;
            let settlement = if recorded.is_paid() {
                Some(self.payouts.settle_in_tx(conn, &recorded.id, now)?)
            } else {
                None
            };
            info!(
                vote_id = %recorded.id,
                clip_variant_id = %variant.id,
                tip_amount_cents = recorded.tip_amount_cents,
                payment_status = %recorded.payment_status,
                "clip vote recorded"
            );
            Ok(VoteReceipt {
                vote: recorded,
                settlement,
            })
        })
    }

    /// Finalizes a series directly, for clip votes run without a period.
    pub fn finalize_series(
        &self,
        series_id: &str,
        now: DateTime<Utc>,
    ) -> ClipResult<SelectionOutcome> {
        self.store.with_write_tx(|conn| {
            let series = load_series(conn, series_id)?
                .ok_or_else(|| StoreError::not_found("series", series_id))?;
            finalize_series_in_tx(conn, &self.scheduler, &series, now)
        })
    }
}

fn series_for_variant(conn: &Connection, variant: &ClipVariant) -> ClipResult<Series> {
    let episode = load_episode(conn, &variant.episode_id)?
        .ok_or_else(|| StoreError::not_found("episode", &variant.episode_id))?;
    Ok(load_series(conn, &episode.series_id)?
        .ok_or_else(|| StoreError::not_found("series", &episode.series_id))?)
}

/// Closes the clip vote of every series attached to `period_id`.
pub(crate) fn finalize_period_in_tx(
    conn: &Connection,
    scheduler: &ProductionScheduler,
    period_id: &str,
    now: DateTime<Utc>,
) -> ClipResult<Vec<SelectionOutcome>> {
    let series = {
        let mut stmt = conn.prepare(
            "SELECT * FROM series
             WHERE clip_voting_period_id = ?1 AND status = 'human_voting'
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([period_id], Series::from_row)?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    series
        .iter()
        .map(|series| finalize_series_in_tx(conn, scheduler, series, now))
        .collect()
}

/// Picks the winning variant (most votes, then earliest rendered), greenlights
/// the series and schedules its follow-on episodes.
pub(crate) fn finalize_series_in_tx(
    conn: &Connection,
    scheduler: &ProductionScheduler,
    series: &Series,
    now: DateTime<Utc>,
) -> ClipResult<SelectionOutcome> {
    if series.status != SeriesStatus::HumanVoting {
        return Err(ClipError::VotingClosed {
            series_id: series.id.clone(),
            status: series.status.to_string(),
        });
    }

    let winner: Option<ClipVariant> = conn
        .query_row(
            "SELECT v.* FROM clip_variants v
             JOIN episodes e ON e.id = v.episode_id
             WHERE e.series_id = ?1 AND e.is_pilot = 1 AND v.asset_url IS NOT NULL
             ORDER BY v.vote_count DESC, v.created_at ASC, v.variant_number ASC
             LIMIT 1",
            [&series.id],
            ClipVariant::from_row,
        )
        .optional()?;

    let Some(winner) = winner else {
        conn.execute(
            "UPDATE series SET status = 'cancelled', updated_at = ?2 WHERE id = ?1",
            params![&series.id, now.naive_utc()],
        )?;
        conn.execute(
            "UPDATE submissions SET pilot_status = 'rejected', updated_at = ?2 WHERE id = ?1",
            params![&series.submission_id, now.naive_utc()],
        )?;
        warn!(series_id = %series.id, "clip vote closed without rendered variants; series cancelled");
        return Ok(SelectionOutcome {
            series_id: series.id.clone(),
            selected_variant_id: None,
            vote_count: 0,
            follow_ons_scheduled: 0,
            series_status: SeriesStatus::Cancelled,
        });
    };

    conn.execute(
        "UPDATE clip_variants SET is_selected = 1
         WHERE id = ?1
           AND NOT EXISTS (SELECT 1 FROM clip_variants WHERE episode_id = ?2 AND is_selected = 1)",
        params![&winner.id, &winner.episode_id],
    )?;
    conn.execute(
        "UPDATE episodes SET status = 'published', asset_url = ?2, updated_at = ?3
         WHERE id = ?1 AND status = 'review'",
        params![&winner.episode_id, &winner.asset_url, now.naive_utc()],
    )?;
    conn.execute(
        "UPDATE submissions SET pilot_status = 'greenlit', updated_at = ?2
         WHERE id = ?1 AND pilot_status = 'human_voting'",
        params![&series.submission_id, now.naive_utc()],
    )?;

    let follow_ons_scheduled = scheduler.schedule_follow_ons(conn, &series.id, now)?;
    let pending_follow_ons: i64 = conn.query_row(
        "SELECT COUNT(*) FROM episodes
         WHERE series_id = ?1 AND is_pilot = 0 AND status NOT IN ('review', 'published')",
        [&series.id],
        |row| row.get(0),
    )?;
    let series_status = if pending_follow_ons > 0 {
        SeriesStatus::InProduction
    } else {
        conn.execute(
            "UPDATE submissions SET pilot_status = 'completed', updated_at = ?2
             WHERE id = ?1 AND pilot_status = 'greenlit'",
            params![&series.submission_id, now.naive_utc()],
        )?;
        SeriesStatus::Completed
    };
    conn.execute(
        "UPDATE series SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![&series.id, series_status.as_str(), now.naive_utc()],
    )?;

    info!(
        series_id = %series.id,
        variant_id = %winner.id,
        vote_count = winner.vote_count,
        follow_ons_scheduled,
        status = %series_status,
        "clip variant selected"
    );
    Ok(SelectionOutcome {
        series_id: series.id.clone(),
        selected_variant_id: Some(winner.id),
        vote_count: winner.vote_count,
        follow_ons_scheduled,
        series_status,
    })
}
