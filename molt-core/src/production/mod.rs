//! Production pipeline: the scheduler enqueues render jobs as rows, the
//! worker claims and drives them through the generation gateway.

mod error;
mod scheduler;
mod worker;

pub use error::{FailureKind, ProductionError, ProductionResult, RenderFailure};
pub use scheduler::{ProductionScheduler, ScheduledSeries, SchedulerConfig};
pub use worker::{ProductionWorker, TickReport, WorkerConfig};
