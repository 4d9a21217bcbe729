//! Revenue split and the payout ledger.
//!
//! Settlement is exactly-once per `(clip_vote_id, recipient_type)`: each share
//! lands either in `payouts` or in `unclaimed_funds`, never both, and a second
//! settlement of the same vote inserts nothing.

mod ledger;
mod split;
mod transfer;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PayoutsSection;
use crate::models::{
    ClipVote, Payout, PaymentStatus, PayoutStatus, PayoutWallet, RecipientType, UnclaimedFunds,
};
use crate::store::{
    load_episode, load_series, load_submission, load_variant, load_vote, load_wallet, StoreError,
    StudioStore,
};

pub use ledger::{LedgerExport, LedgerTotals};
pub use split::{RevenueSplit, SplitAllocation};
pub use transfer::{
    HttpTransferClient, TransferClient, TransferError, TransferReceipt, TransferRequest,
    UnconfiguredTransferClient,
};

#[derive(Debug, Error)]
pub enum PayoutError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("clip vote {clip_vote_id} is not settleable: {reason}")]
    NotSettleable {
        clip_vote_id: String,
        reason: String,
    },
    #[error("tip for clip vote {clip_vote_id} does not match: recorded {recorded} cents, received {received}")]
    TipMismatch {
        clip_vote_id: String,
        recorded: i64,
        received: i64,
    },
    #[error("no verified wallet registered for {owner_id}")]
    WalletUnverified { owner_id: String },
    #[error("invalid payout configuration: {0}")]
    InvalidConfig(String),
}

impl From<rusqlite::Error> for PayoutError {
    fn from(error: rusqlite::Error) -> Self {
        PayoutError::Store(StoreError::Execute(error))
    }
}

pub type PayoutResult<T> = std::result::Result<T, PayoutError>;

#[derive(Debug, Clone)]
pub struct PayoutConfig {
    pub split: RevenueSplit,
    pub platform_wallet: Option<String>,
    pub holding_period: Duration,
    pub max_transfer_retries: u32,
    pub transfer_batch_size: usize,
    pub stale_transfer_after: Duration,
}

impl PayoutConfig {
    pub fn from_section(section: &PayoutsSection) -> PayoutResult<Self> {
        let split = RevenueSplit::from_config(section).map_err(PayoutError::InvalidConfig)?;
        Ok(Self {
            split,
            platform_wallet: section
                .platform_wallet
                .clone()
                .filter(|wallet| !wallet.trim().is_empty()),
            holding_period: Duration::days(section.unclaimed_holding_days),
            max_transfer_retries: section.max_transfer_retries.max(1),
            transfer_batch_size: section.transfer_batch_size.max(1),
            stale_transfer_after: Duration::minutes(section.stale_transfer_minutes),
        })
    }
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            split: RevenueSplit::default(),
            platform_wallet: None,
            holding_period: Duration::days(30),
            max_transfer_retries: 5,
            transfer_batch_size: 32,
            stale_transfer_after: Duration::minutes(10),
        }
    }
}

/// Verified payment event delivered by the payment rail.
#[derive(Debug, Clone, PartialEq)]
pub struct TipEvent {
    pub clip_vote_id: String,
    pub amount_cents: i64,
    pub payer_reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareDisposition {
    Payout,
    Unclaimed,
    AlreadySettled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShareOutcome {
    pub recipient_type: RecipientType,
    pub amount_cents: i64,
    pub disposition: ShareDisposition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementReport {
    pub clip_vote_id: String,
    pub amount_cents: i64,
    pub shares: Vec<ShareOutcome>,
}

impl SettlementReport {
    /// True when this call inserted nothing.
    pub fn is_noop(&self) -> bool {
        self.shares
            .iter()
            .all(|share| share.disposition == ShareDisposition::AlreadySettled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub claimed: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
    pub deferred: usize,
    /// Rows whose outcome could not be recorded; their claims go stale and
    /// are picked up again.
    pub errors: usize,
}

enum TransferStep {
    Completed,
    Retried,
    Failed,
    Deferred,
}

struct Recipient {
    recipient_type: RecipientType,
    owner_id: Option<String>,
}

#[derive(Clone)]
pub struct PayoutEngine {
    store: StudioStore,
    config: PayoutConfig,
    transfers: Arc<dyn TransferClient>,
}

impl PayoutEngine {
    pub fn new(store: StudioStore, config: PayoutConfig, transfers: Arc<dyn TransferClient>) -> Self {
        Self {
            store,
            config,
            transfers,
        }
    }

    pub fn config(&self) -> &PayoutConfig {
        &self.config
    }

    pub fn store(&self) -> &StudioStore {
        &self.store
    }

    /// Settles a confirmed paid vote. Safe to call any number of times.
    pub fn settle(&self, clip_vote_id: &str, now: DateTime<Utc>) -> PayoutResult<SettlementReport> {
        self.store
            .with_write_tx(|conn| self.settle_in_tx(conn, clip_vote_id, now))
    }

    /// Applies a confirmation from the payment rail and settles the vote.
    pub fn handle_tip(&self, event: &TipEvent, now: DateTime<Utc>) -> PayoutResult<SettlementReport> {
        self.store.with_write_tx(|conn| {
            let vote = load_vote(conn, &event.clip_vote_id)?
                .ok_or_else(|| StoreError::not_found("clip vote", &event.clip_vote_id))?;
            if vote.tip_amount_cents != event.amount_cents {
                return Err(PayoutError::TipMismatch {
                    clip_vote_id: vote.id,
                    recorded: vote.tip_amount_cents,
                    received: event.amount_cents,
                });
            }
            if vote.payment_status != PaymentStatus::Confirmed {
                conn.execute(
                    "UPDATE clip_votes
                     SET payment_status = 'confirmed',
                         payer_reference = COALESCE(payer_reference, ?2)
                     WHERE id = ?1 AND payment_status != 'confirmed'",
                    params![&vote.id, &event.payer_reference],
                )?;
            }
            self.settle_in_tx(conn, &vote.id, now)
        })
    }

    /// Settlement inside the caller's transaction.
    pub(crate) fn settle_in_tx(
        &self,
        conn: &Connection,
        clip_vote_id: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<SettlementReport> {
        let vote = load_vote(conn, clip_vote_id)?
            .ok_or_else(|| StoreError::not_found("clip vote", clip_vote_id))?;
        if !vote.is_paid() {
            return Err(PayoutError::NotSettleable {
                clip_vote_id: vote.id,
                reason: format!(
                    "tip {} cents with payment {}",
                    vote.tip_amount_cents, vote.payment_status
                ),
            });
        }
        let (source_agent_id, recipients) = self.recipients_for(conn, &vote)?;
        let allocation = self.config.split.allocate(vote.tip_amount_cents);

        let mut shares = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let amount_cents = allocation.share(recipient.recipient_type);
            let disposition =
                self.settle_share(conn, &vote, &source_agent_id, &recipient, amount_cents, now)?;
            shares.push(ShareOutcome {
                recipient_type: recipient.recipient_type,
                amount_cents,
                disposition,
            });
        }

        let report = SettlementReport {
            clip_vote_id: vote.id.clone(),
            amount_cents: vote.tip_amount_cents,
            shares,
        };
        if report.is_noop() {
            debug!(clip_vote_id = %vote.id, "vote already settled");
        } else {
            info!(
                clip_vote_id = %vote.id,
                amount_cents = vote.tip_amount_cents,
                creator = allocation.creator,
                platform = allocation.platform,
                agent = allocation.agent,
                "tip settled"
            );
        }
        Ok(report)
    }

    fn recipients_for(
        &self,
        conn: &Connection,
        vote: &ClipVote,
    ) -> PayoutResult<(String, Vec<Recipient>)> {
        let variant = load_variant(conn, &vote.clip_variant_id)?
            .ok_or_else(|| StoreError::not_found("clip variant", &vote.clip_variant_id))?;
        let episode = load_episode(conn, &variant.episode_id)?
            .ok_or_else(|| StoreError::not_found("episode", &variant.episode_id))?;
        let series = load_series(conn, &episode.series_id)?
            .ok_or_else(|| StoreError::not_found("series", &episode.series_id))?;
        let submission = load_submission(conn, &series.submission_id)?
            .ok_or_else(|| StoreError::not_found("submission", &series.submission_id))?;
        let recipients = vec![
            Recipient {
                recipient_type: RecipientType::Creator,
                owner_id: Some(submission.creator_id.clone()),
            },
            Recipient {
                recipient_type: RecipientType::Platform,
                owner_id: None,
            },
            Recipient {
                recipient_type: RecipientType::Agent,
                owner_id: Some(submission.agent_id.clone()),
            },
        ];
        Ok((submission.agent_id, recipients))
    }

    fn settle_share(
        &self,
        conn: &Connection,
        vote: &ClipVote,
        source_agent_id: &str,
        recipient: &Recipient,
        amount_cents: i64,
        now: DateTime<Utc>,
    ) -> PayoutResult<ShareDisposition> {
        let settled: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM payouts WHERE clip_vote_id = ?1 AND recipient_type = ?2)
                 OR EXISTS(SELECT 1 FROM unclaimed_funds
                           WHERE clip_vote_id = ?1 AND recipient_type = ?2)",
            params![&vote.id, recipient.recipient_type.as_str()],
            |row| row.get(0),
        )?;
        if settled {
            return Ok(ShareDisposition::AlreadySettled);
        }

        let split_bps = self.config.split.bps(recipient.recipient_type);
        let wallet = match (&recipient.owner_id, recipient.recipient_type) {
            (_, RecipientType::Platform) => self.config.platform_wallet.clone(),
            (Some(owner_id), _) => load_wallet(conn, owner_id)?
                .filter(PayoutWallet::is_verified)
                .map(|wallet| wallet.wallet_address),
            (None, _) => None,
        };

        match wallet {
            Some(wallet_address) => {
                let inserted = conn.execute(
                    "INSERT INTO payouts (
                        id, source_agent_id, recipient_type, recipient_agent_id, clip_vote_id,
                        split_bps, amount_cents, wallet_address, status, retry_count, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0, ?9)
                    ON CONFLICT(clip_vote_id, recipient_type) DO NOTHING",
                    params![
                        format!("pay-{}", Uuid::new_v4()),
                        source_agent_id,
                        recipient.recipient_type.as_str(),
                        &recipient.owner_id,
                        &vote.id,
                        split_bps,
                        amount_cents,
                        &wallet_address,
                        now.naive_utc(),
                    ],
                )?;
                Ok(if inserted == 1 {
                    ShareDisposition::Payout
                } else {
                    ShareDisposition::AlreadySettled
                })
            }
            None => {
                let reason = match &recipient.owner_id {
                    Some(owner_id) => format!(
                        "no verified payout wallet for {} {owner_id}",
                        recipient.recipient_type
                    ),
                    None => "platform wallet not configured".to_string(),
                };
                let expires_at = now + self.config.holding_period;
                let inserted = conn.execute(
                    "INSERT INTO unclaimed_funds (
                        id, clip_vote_id, source_agent_id, recipient_type, recipient_agent_id,
                        amount_cents, split_bps, reason, created_at, expires_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                    ON CONFLICT(clip_vote_id, recipient_type) DO NOTHING",
                    params![
                        format!("unc-{}", Uuid::new_v4()),
                        &vote.id,
                        source_agent_id,
                        recipient.recipient_type.as_str(),
                        &recipient.owner_id,
                        amount_cents,
                        split_bps,
                        &reason,
                        now.naive_utc(),
                        expires_at.naive_utc(),
                    ],
                )?;
                if inserted == 1 {
                    info!(
                        clip_vote_id = %vote.id,
                        recipient_type = %recipient.recipient_type,
                        amount_cents,
                        expires_at = %expires_at,
                        "share held as unclaimed funds"
                    );
                    Ok(ShareDisposition::Unclaimed)
                } else {
                    Ok(ShareDisposition::AlreadySettled)
                }
            }
        }
    }

    /// Registers or replaces a payout wallet. Only verified wallets receive
    /// payouts.
    pub fn register_wallet(
        &self,
        owner_id: &str,
        wallet_address: &str,
        verified: bool,
        now: DateTime<Utc>,
    ) -> PayoutResult<PayoutWallet> {
        if wallet_address.trim().is_empty() {
            return Err(PayoutError::WalletUnverified {
                owner_id: owner_id.to_string(),
            });
        }
        self.store.with_write_tx(|conn| {
            let verified_at = verified.then(|| now.naive_utc());
            conn.execute(
                "INSERT INTO payout_wallets (owner_id, wallet_address, verified_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(owner_id) DO UPDATE SET
                     wallet_address = excluded.wallet_address,
                     verified_at = excluded.verified_at,
                     updated_at = excluded.updated_at",
                params![owner_id, wallet_address.trim(), verified_at, now.naive_utc()],
            )?;
            Ok(load_wallet(conn, owner_id)?
                .ok_or_else(|| StoreError::not_found("wallet", owner_id))?)
        })
    }

    /// Converts the owner's unexpired unclaimed shares into pending payouts.
    /// A row already swept, claimed or expired is left untouched.
    pub fn claim_unclaimed(&self, owner_id: &str, now: DateTime<Utc>) -> PayoutResult<Vec<Payout>> {
        self.store.with_write_tx(|conn| {
            let wallet = load_wallet(conn, owner_id)?
                .filter(PayoutWallet::is_verified)
                .ok_or_else(|| PayoutError::WalletUnverified {
                    owner_id: owner_id.to_string(),
                })?;

            let open = {
                let mut stmt = conn.prepare(
                    "SELECT * FROM unclaimed_funds
                     WHERE recipient_agent_id = ?1 AND claimed_at IS NULL
                       AND swept_to_treasury_at IS NULL AND expires_at > ?2
                     ORDER BY created_at ASC",
                )?;
                let rows = stmt.query_map(params![owner_id, now.naive_utc()], UnclaimedFunds::from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let mut payouts = Vec::with_capacity(open.len());
            for held in open {
                let claimed = conn.execute(
                    "UPDATE unclaimed_funds SET claimed_at = ?2
                     WHERE id = ?1 AND claimed_at IS NULL AND swept_to_treasury_at IS NULL
                       AND expires_at > ?2",
                    params![&held.id, now.naive_utc()],
                )?;
                if claimed != 1 {
                    continue;
                }
                let payout_id = format!("pay-{}", Uuid::new_v4());
                let inserted = conn.execute(
                    "INSERT INTO payouts (
                        id, source_agent_id, recipient_type, recipient_agent_id, clip_vote_id,
                        split_bps, amount_cents, wallet_address, status, retry_count, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending', 0, ?9)
                    ON CONFLICT(clip_vote_id, recipient_type) DO NOTHING",
                    params![
                        &payout_id,
                        &held.source_agent_id,
                        held.recipient_type.as_str(),
                        owner_id,
                        &held.clip_vote_id,
                        held.split_bps,
                        held.amount_cents,
                        &wallet.wallet_address,
                        now.naive_utc(),
                    ],
                )?;
                if inserted == 0 {
                    debug!(unclaimed_id = %held.id, "payout for claimed share already exists");
                    continue;
                }
                let payout = conn.query_row(
                    "SELECT * FROM payouts WHERE id = ?1",
                    [&payout_id],
                    Payout::from_row,
                )?;
                info!(
                    unclaimed_id = %held.id,
                    payout_id = %payout.id,
                    amount_cents = payout.amount_cents,
                    "unclaimed share claimed"
                );
                payouts.push(payout);
            }
            Ok(payouts)
        })
    }

    /// Pushes pending payouts to the transfer rail. Zero-cent shares complete
    /// without a transfer.
    pub async fn dispatch_transfers(&self, now: DateTime<Utc>) -> PayoutResult<TransferReport> {
        let claimed = self.claim_transfers(now)?;
        let mut report = TransferReport {
            claimed: claimed.len(),
            ..TransferReport::default()
        };

        for (payout, token) in claimed {
            match self.dispatch_one(&payout, &token, now).await {
                Ok(TransferStep::Completed) => report.completed += 1,
                Ok(TransferStep::Retried) => report.retried += 1,
                Ok(TransferStep::Failed) => report.failed += 1,
                Ok(TransferStep::Deferred) => report.deferred += 1,
                Err(err) => {
                    error!(payout_id = %payout.id, error = %err, "failed to record transfer outcome");
                    report.errors += 1;
                }
            }
        }
        if report.deferred > 0 {
            warn!(deferred = report.deferred, "transfer rail not configured; payouts left pending");
        }
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        payout: &Payout,
        token: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<TransferStep> {
        if payout.amount_cents == 0 {
            self.complete_transfer(payout, token, "zero-amount", now)?;
            return Ok(TransferStep::Completed);
        }
        let request = TransferRequest {
            idempotency_key: payout.id.clone(),
            wallet_address: payout.wallet_address.clone(),
            amount_cents: payout.amount_cents,
            memo: format!("{} share of clip vote {}", payout.recipient_type, payout.clip_vote_id),
        };
        match self.transfers.transfer(&request).await {
            Ok(receipt) => {
                self.complete_transfer(payout, token, &receipt.reference, now)?;
                Ok(TransferStep::Completed)
            }
            Err(TransferError::NotConfigured) => {
                self.release_transfer(payout, token)?;
                Ok(TransferStep::Deferred)
            }
            Err(err) => Ok(if self.fail_transfer(payout, token, &err.to_string())? {
                TransferStep::Failed
            } else {
                TransferStep::Retried
            }),
        }
    }

    fn claim_transfers(&self, now: DateTime<Utc>) -> PayoutResult<Vec<(Payout, String)>> {
        let stale_cutoff = now - self.config.stale_transfer_after;
        let limit = self.config.transfer_batch_size as i64;
        self.store.with_write_tx(|conn| {
            let candidates = {
                let mut stmt = conn.prepare(
                    "SELECT * FROM payouts
                     WHERE status = 'pending' AND (claimed_at IS NULL OR claimed_at <= ?1)
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![stale_cutoff.naive_utc(), limit], Payout::from_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            let mut claimed = Vec::with_capacity(candidates.len());
            for payout in candidates {
                let token = Uuid::new_v4().to_string();
                let affected = conn.execute(
                    "UPDATE payouts SET claim_token = ?2, claimed_at = ?3
                     WHERE id = ?1 AND status = 'pending'
                       AND (claimed_at IS NULL OR claimed_at <= ?4)",
                    params![&payout.id, &token, now.naive_utc(), stale_cutoff.naive_utc()],
                )?;
                if affected == 1 {
                    claimed.push((payout, token));
                }
            }
            Ok(claimed)
        })
    }

    fn complete_transfer(
        &self,
        payout: &Payout,
        token: &str,
        reference: &str,
        now: DateTime<Utc>,
    ) -> PayoutResult<()> {
        let affected = self.store.with_write_tx(|conn| {
            Ok::<_, PayoutError>(conn.execute(
                "UPDATE payouts
                 SET status = 'completed', transfer_reference = ?3, completed_at = ?4,
                     claim_token = NULL, failure_reason = NULL
                 WHERE id = ?1 AND status = 'pending' AND claim_token = ?2",
                params![&payout.id, token, reference, now.naive_utc()],
            )?)
        })?;
        if affected == 1 {
            info!(payout_id = %payout.id, amount_cents = payout.amount_cents, reference, "payout completed");
        } else {
            warn!(payout_id = %payout.id, reference, "transfer succeeded after claim was lost");
        }
        Ok(())
    }

    fn release_transfer(&self, payout: &Payout, token: &str) -> PayoutResult<()> {
        self.store.with_write_tx(|conn| {
            conn.execute(
                "UPDATE payouts SET claim_token = NULL, claimed_at = NULL
                 WHERE id = ?1 AND claim_token = ?2",
                params![&payout.id, token],
            )?;
            Ok(())
        })
    }

    /// Records a failed transfer. Returns true once retries are exhausted and
    /// the payout needs manual reconciliation.
    fn fail_transfer(
        &self,
        payout: &Payout,
        token: &str,
        reason: &str,
    ) -> PayoutResult<bool> {
        let retry_count = payout.retry_count + 1;
        let exhausted = retry_count >= i64::from(self.config.max_transfer_retries);
        let status = if exhausted {
            PayoutStatus::Failed
        } else {
            PayoutStatus::Pending
        };
        self.store.with_write_tx(|conn| {
            conn.execute(
                "UPDATE payouts
                 SET status = ?3, retry_count = ?4, failure_reason = ?5,
                     claim_token = NULL, claimed_at = NULL
                 WHERE id = ?1 AND claim_token = ?2",
                params![&payout.id, token, status.as_str(), retry_count, reason],
            )?;
            Ok::<_, PayoutError>(())
        })?;
        if exhausted {
            error!(
                payout_id = %payout.id,
                amount_cents = payout.amount_cents,
                retry_count,
                reason,
                "payout failed; manual reconciliation required"
            );
        } else {
            warn!(payout_id = %payout.id, retry_count, reason, "transfer failed, will retry");
        }
        Ok(exhausted)
    }

    pub fn export_ledger<P: AsRef<std::path::Path>>(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        output_dir: P,
        generated_at: DateTime<Utc>,
    ) -> PayoutResult<LedgerExport> {
        ledger::export_ledger(&self.store, start, end, output_dir.as_ref(), generated_at)
    }
}
