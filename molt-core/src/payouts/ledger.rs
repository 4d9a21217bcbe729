use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::Payout;
use crate::store::StudioStore;

use super::PayoutResult;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LedgerTotals {
    pub by_status: BTreeMap<String, i64>,
    pub by_recipient: BTreeMap<String, i64>,
    pub total_cents: i64,
    pub payouts: usize,
    pub treasury_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerExport {
    pub csv_path: PathBuf,
    pub manifest_path: PathBuf,
    pub checksum: String,
    pub totals: LedgerTotals,
}

#[derive(Debug, Clone, Serialize)]
struct LedgerManifest {
    version: String,
    generated_at: DateTime<Utc>,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    checksum: String,
    totals: LedgerTotals,
}

pub(super) fn export_ledger(
    store: &StudioStore,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    output_dir: &Path,
    generated_at: DateTime<Utc>,
) -> PayoutResult<LedgerExport> {
    let conn = store.open()?;
    let payouts = {
        let mut stmt = conn.prepare(
            "SELECT * FROM payouts
             WHERE created_at >= ?1 AND created_at < ?2
             ORDER BY created_at ASC, clip_vote_id ASC, recipient_type ASC",
        )?;
        let rows = stmt.query_map(params(start, end), Payout::from_row)?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    let treasury_cents: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM treasury_credits
         WHERE credited_at >= ?1 AND credited_at < ?2",
        params(start, end),
        |row| row.get(0),
    )?;

    fs::create_dir_all(output_dir)?;
    let stem = format!("payouts_{}_{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"));
    let csv_path = output_dir.join(format!("{stem}.csv"));
    let manifest_path = output_dir.join(format!("{stem}.manifest.json"));

    let mut file = File::create(&csv_path)?;
    writeln!(
        file,
        "created_at,payout_id,clip_vote_id,recipient_type,recipient,amount_cents,split_bps,status,wallet_address,transfer_reference,completed_at"
    )?;
    let mut totals = LedgerTotals {
        treasury_cents,
        ..LedgerTotals::default()
    };
    for payout in &payouts {
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{},{}",
            payout.created_at.to_rfc3339(),
            payout.id,
            payout.clip_vote_id,
            payout.recipient_type,
            escape_field(payout.recipient_agent_id.as_deref().unwrap_or("")),
            payout.amount_cents,
            payout.split_bps,
            payout.status,
            escape_field(&payout.wallet_address),
            escape_field(payout.transfer_reference.as_deref().unwrap_or("")),
            payout
                .completed_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_default(),
        )?;
        *totals
            .by_status
            .entry(payout.status.to_string())
            .or_default() += payout.amount_cents;
        *totals
            .by_recipient
            .entry(payout.recipient_type.to_string())
            .or_default() += payout.amount_cents;
        totals.total_cents += payout.amount_cents;
        totals.payouts += 1;
    }
    file.flush()?;
    drop(file);

    let checksum = file_checksum(&csv_path)?;
    let manifest = LedgerManifest {
        version: "v1".to_string(),
        generated_at,
        period_start: start,
        period_end: end,
        checksum: checksum.clone(),
        totals: totals.clone(),
    };
    let serialized = serde_json::to_string_pretty(&manifest)?;
    fs::write(&manifest_path, serialized)?;

    Ok(LedgerExport {
        csv_path,
        manifest_path,
        checksum,
        totals,
    })
}

fn params(start: DateTime<Utc>, end: DateTime<Utc>) -> [chrono::NaiveDateTime; 2] {
    [start.naive_utc(), end.naive_utc()]
}

fn file_checksum(path: &Path) -> PayoutResult<String> {
    let content = fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&content)))
}

fn escape_field(value: &str) -> String {
    if value.contains(['"', ',', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
