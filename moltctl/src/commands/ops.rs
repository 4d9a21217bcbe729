use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use molt_core::{
    CloseReport, Episode, IntegrityFinding, ScheduledSeries, SelectionOutcome, StatusCounts,
    SweepReport, TickReport, TransferReport,
};
use serde::Serialize;
use tracing::info;

use super::DisplayFallback;
use crate::{AppContext, Result, StatusArgs, TickTarget};

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub counts: StatusCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayCheck>,
}

#[derive(Debug, Serialize)]
pub struct GatewayCheck {
    pub endpoint: String,
    pub healthy: bool,
    pub detail: String,
}

#[derive(Debug, Default, Serialize)]
pub struct TickSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voting: Option<CloseReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub production: Option<TickReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfers: Option<TransferReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepReport>,
}

#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub findings: Vec<IntegrityFinding>,
}

impl AuditReport {
    pub fn violations(&self) -> usize {
        self.findings
            .iter()
            .filter(|finding| finding.kind.is_violation())
            .count()
    }
}

impl AppContext {
    pub(crate) async fn status(&self, args: &StatusArgs, now: DateTime<Utc>) -> Result<StatusReport> {
        let counts = self.store.status_counts(now)?;
        let gateway = if args.gateway {
            let gateway = self.gateway()?;
            let endpoint = gateway.endpoint().to_string();
            Some(match gateway.health().await {
                Ok(health) => GatewayCheck {
                    endpoint,
                    healthy: health.status == "ok",
                    detail: match health.model {
                        Some(model) => format!("{} ({model})", health.status),
                        None => health.status,
                    },
                },
                Err(err) => GatewayCheck {
                    endpoint,
                    healthy: false,
                    detail: err.to_string(),
                },
            })
        } else {
            None
        };
        Ok(StatusReport {
            database: self.store.path().display().to_string(),
            counts,
            gateway,
        })
    }

    /// Runs the selected jobs in pipeline order: votes close before renders
    /// are claimed, and payouts move before expired funds are swept.
    pub(crate) async fn tick(&self, target: TickTarget, now: DateTime<Utc>) -> Result<TickSummary> {
        let runs = |job: TickTarget| target == job || target == TickTarget::All;
        let mut summary = TickSummary::default();
        if runs(TickTarget::Voting) {
            summary.voting = Some(self.voting().close_expired(now)?);
        }
        if runs(TickTarget::Production) {
            summary.production = Some(self.worker()?.tick(now).await?);
        }
        if runs(TickTarget::Transfers) {
            summary.transfers = Some(self.payouts.dispatch_transfers(now).await?);
        }
        if runs(TickTarget::Sweep) {
            summary.sweep = Some(self.sweeper().sweep(now).await?);
        }
        info!(job = ?target, "tick finished");
        Ok(summary)
    }

    pub(crate) fn audit(&self, now: DateTime<Utc>) -> Result<AuditReport> {
        Ok(AuditReport {
            findings: self.auditor().audit(now)?,
        })
    }
}

fn push_counts(lines: &mut Vec<String>, label: &str, counts: &HashMap<String, i64>) {
    if counts.is_empty() {
        return;
    }
    lines.push(format!("{label}:"));
    let sorted: BTreeMap<_, _> = counts.iter().collect();
    for (status, count) in sorted {
        lines.push(format!("  - {status}: {count}"));
    }
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let mut lines = vec![format!("Database: {}", self.database)];
        push_counts(&mut lines, "Submissions", &self.counts.submissions);
        push_counts(&mut lines, "Series", &self.counts.series);
        push_counts(&mut lines, "Episodes", &self.counts.episodes);
        push_counts(&mut lines, "Jobs", &self.counts.jobs);
        push_counts(&mut lines, "Payouts", &self.counts.payouts);
        lines.push(format!("Periods due: {}", self.counts.pending_periods));
        lines.push(format!(
            "Open unclaimed: {} cents",
            self.counts.open_unclaimed_cents
        ));
        if let Some(check) = &self.gateway {
            let state = if check.healthy { "up" } else { "down" };
            lines.push(format!("Gateway {state}: {} ({})", check.endpoint, check.detail));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for TickSummary {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        if let Some(voting) = &self.voting {
            lines.push(format!(
                "voting: {} closed, {} failed",
                voting.processed.len(),
                voting.failed.len()
            ));
            for (period_id, reason) in &voting.failed {
                lines.push(format!("  ! {period_id}: {reason}"));
            }
        }
        if let Some(report) = &self.production {
            lines.push(format!(
                "production: claimed={} reclaimed={} completed={} retried={} failed={} discarded={} errors={}",
                report.claimed,
                report.reclaimed,
                report.completed,
                report.retried,
                report.failed,
                report.discarded,
                report.errors
            ));
        }
        if let Some(report) = &self.transfers {
            lines.push(format!(
                "transfers: claimed={} completed={} retried={} failed={} deferred={} errors={}",
                report.claimed,
                report.completed,
                report.retried,
                report.failed,
                report.deferred,
                report.errors
            ));
        }
        if let Some(report) = &self.sweep {
            lines.push(format!(
                "sweep: {} credits, {} cents, {} skipped, {} errors",
                report.credits.len(),
                report.total_cents,
                report.skipped,
                report.errors
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for AuditReport {
    fn display(&self) -> String {
        if self.findings.is_empty() {
            return "No findings".to_string();
        }
        self.findings
            .iter()
            .map(|finding| {
                let level = if finding.kind.is_violation() { "VIOLATION" } else { "LAG" };
                format!(
                    "[{level}] {} {}: {}",
                    finding.kind, finding.entity_id, finding.note
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl DisplayFallback for ScheduledSeries {
    fn display(&self) -> String {
        format!(
            "series {} for submission {}: {} episode(s), {} job(s) enqueued",
            self.series_id,
            self.submission_id,
            self.episode_ids.len(),
            self.jobs_enqueued
        )
    }
}

impl DisplayFallback for Episode {
    fn display(&self) -> String {
        let mut line = format!(
            "{} (series {} ep{}) status={} retries={} manual={}",
            self.id,
            self.series_id,
            self.episode_number,
            self.status,
            self.retry_count,
            self.manual_retry_count
        );
        if let Some(reason) = &self.failure_reason {
            line.push_str(&format!(" reason={reason}"));
        }
        line
    }
}

impl DisplayFallback for SelectionOutcome {
    fn display(&self) -> String {
        match &self.selected_variant_id {
            Some(variant) => format!(
                "series {} selected {variant} with {} vote(s); {} follow-on(s) scheduled; status={}",
                self.series_id, self.vote_count, self.follow_ons_scheduled, self.series_status
            ),
            None => format!(
                "series {} closed without a winner; status={}",
                self.series_id, self.series_status
            ),
        }
    }
}
