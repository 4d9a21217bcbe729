pub mod audit;
pub mod clips;
pub mod config;
pub mod error;
pub mod generation;
pub mod models;
pub mod payouts;
pub mod production;
pub mod sqlite;
pub mod storage;
pub mod store;
pub mod sweeper;
pub mod voting;

pub use audit::{AuditError, AuditResult, IntegrityAuditor, IntegrityFinding, IntegrityKind};
pub use clips::{ClipError, ClipResult, ClipSelector, NewClipVote, SelectionOutcome, VoteReceipt};
pub use config::{load_studio_config, RenderBounds, StudioConfig};
pub use error::{ConfigError, Result};
pub use generation::{
    validate_render, AssetPayload, GatewayError, GatewayHealth, GenerationGateway,
    HttpGenerationGateway, RenderConstraints, RenderOutput, RenderRequest,
};
pub use models::{
    ClipVariant, ClipVote, Episode, EpisodeStatus, JobStatus, PaymentStatus, PeriodType,
    PilotStatus, Payout, PayoutStatus, PayoutWallet, ProductionJob, RecipientType, RenderKind,
    Series, SeriesStatus, Submission, UnclaimedFunds, VoterType, VotingPeriod,
};
pub use payouts::{
    HttpTransferClient, LedgerExport, LedgerTotals, PayoutConfig, PayoutEngine, PayoutError,
    PayoutResult, RevenueSplit, SettlementReport, ShareDisposition, ShareOutcome,
    SplitAllocation, TipEvent, TransferClient, TransferError, TransferReceipt, TransferReport,
    TransferRequest, UnconfiguredTransferClient,
};
pub use production::{
    FailureKind, ProductionError, ProductionResult, ProductionScheduler, ProductionWorker,
    RenderFailure, ScheduledSeries, SchedulerConfig, TickReport, WorkerConfig,
};
pub use storage::{asset_key, FsObjectStore, ObjectStore, ObjectStoreError, ObjectStoreResult};
pub use store::{PayoutFilter, StatusCounts, StoreError, StoreResult, StudioStore, StudioStoreBuilder};
pub use sweeper::{
    LoggingTreasury, SweepError, SweepReport, SweepResult, TreasuryCredit, TreasurySink,
    UnclaimedFundsSweeper,
};
pub use voting::{
    CategoryResult, CloseReport, PeriodOutcome, PeriodResolution, VotingError, VotingPeriodManager,
    VotingResult,
};
