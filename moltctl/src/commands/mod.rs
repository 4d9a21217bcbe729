mod ledger;
mod ops;

pub use ledger::{PayoutList, UnclaimedList};
pub use ops::{AuditReport, GatewayCheck, StatusReport, TickSummary};

/// Plain-text rendering used by `--format text`.
pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}
