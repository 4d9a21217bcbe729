use std::str::FromStr;

use molt_core::{LedgerExport, Payout, PayoutFilter, PayoutStatus, PayoutWallet, UnclaimedFunds};
use serde::Serialize;

use super::DisplayFallback;
use crate::{AppContext, AppError, PayoutListArgs, Result};

#[derive(Debug, Serialize)]
pub struct PayoutList {
    pub rows: Vec<Payout>,
}

#[derive(Debug, Serialize)]
pub struct UnclaimedList {
    pub rows: Vec<UnclaimedFunds>,
}

impl AppContext {
    pub(crate) fn payout_list(&self, args: &PayoutListArgs) -> Result<PayoutList> {
        let status = args
            .status
            .as_deref()
            .map(PayoutStatus::from_str)
            .transpose()
            .map_err(AppError::InvalidArgument)?;
        let filter = PayoutFilter {
            status,
            clip_vote_id: args.vote.clone(),
            limit: Some(args.limit),
        };
        Ok(PayoutList {
            rows: self.store.list_payouts(&filter)?,
        })
    }

    pub(crate) fn unclaimed_list(&self, open_only: bool) -> Result<UnclaimedList> {
        Ok(UnclaimedList {
            rows: self.store.list_unclaimed(open_only)?,
        })
    }
}

impl DisplayFallback for PayoutList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No payouts".to_string();
        }
        self.rows
            .iter()
            .map(|payout| {
                let mut line = format!(
                    "{} {} {}c -> {} [{}] vote={}",
                    payout.id,
                    payout.recipient_type,
                    payout.amount_cents,
                    payout.wallet_address,
                    payout.status,
                    payout.clip_vote_id
                );
                if let Some(reference) = &payout.transfer_reference {
                    line.push_str(&format!(" ref={reference}"));
                }
                if let Some(reason) = &payout.failure_reason {
                    line.push_str(&format!(" reason={reason}"));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for UnclaimedList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No unclaimed funds".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                let state = match (row.claimed_at, row.swept_to_treasury_at) {
                    (Some(at), _) => format!("claimed {}", at.to_rfc3339()),
                    (None, Some(at)) => format!("swept {}", at.to_rfc3339()),
                    (None, None) => format!("expires {}", row.expires_at.to_rfc3339()),
                };
                format!(
                    "{} {} {}c owner={} ({})",
                    row.id,
                    row.recipient_type,
                    row.amount_cents,
                    row.recipient_agent_id.as_deref().unwrap_or("-"),
                    state
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for PayoutWallet {
    fn display(&self) -> String {
        match self.verified_at {
            Some(at) => format!(
                "{} -> {} (verified {})",
                self.owner_id,
                self.wallet_address,
                at.to_rfc3339()
            ),
            None => format!("{} -> {} (unverified)", self.owner_id, self.wallet_address),
        }
    }
}

impl DisplayFallback for LedgerExport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("CSV: {}", self.csv_path.display()),
            format!("Manifest: {}", self.manifest_path.display()),
            format!("SHA-256: {}", self.checksum),
            format!(
                "{} payout(s), {} cents; treasury {} cents",
                self.totals.payouts, self.totals.total_cents, self.totals.treasury_cents
            ),
        ];
        for (status, cents) in &self.totals.by_status {
            lines.push(format!("  - {status}: {cents}"));
        }
        lines.join("\n")
    }
}
