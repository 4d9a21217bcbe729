use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::generation::GatewayError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ProductionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{entity} {id} in unexpected status: {status}")]
    InvalidStatus {
        entity: &'static str,
        id: String,
        status: String,
    },
    #[error("episode {episode_id} has a render in flight; retry after it finishes or goes stale")]
    EpisodeInFlight { episode_id: String },
    #[error("episode {episode_id} reached the manual retry limit of {limit}")]
    ManualRetryLimit { episode_id: String, limit: u32 },
    #[error("integrity violation: {0}")]
    Integrity(String),
}

impl From<rusqlite::Error> for ProductionError {
    fn from(error: rusqlite::Error) -> Self {
        ProductionError::Store(StoreError::Execute(error))
    }
}

impl ProductionError {
    pub(crate) fn invalid_status(
        entity: &'static str,
        id: impl Into<String>,
        status: impl fmt::Display,
    ) -> Self {
        ProductionError::InvalidStatus {
            entity,
            id: id.into(),
            status: status.to_string(),
        }
    }
}

pub type ProductionResult<T> = std::result::Result<T, ProductionError>;

/// Why a render attempt did not produce a usable asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Gateway unreachable, timed out or answered 5xx. Always retryable.
    Transport,
    /// Gateway said ok but the output broke the render constraints.
    Validation,
    /// Gateway refused the request or returned an unusable body.
    Gateway,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::Validation => "validation",
            FailureKind::Gateway => "gateway",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transport" => Ok(FailureKind::Transport),
            "validation" => Ok(FailureKind::Validation),
            "gateway" => Ok(FailureKind::Gateway),
            other => Err(format!("unknown failure kind: {other}")),
        }
    }
}

/// A classified failure with the reason shown to submitters.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl RenderFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, reason)
    }
}

impl From<&GatewayError> for RenderFailure {
    /// Raw transport detail stays in the logs; the stored reason is generic.
    fn from(error: &GatewayError) -> Self {
        match error {
            GatewayError::Transport(_) => {
                RenderFailure::new(FailureKind::Transport, "generation service unavailable")
            }
            GatewayError::Timeout(after) => RenderFailure::new(
                FailureKind::Transport,
                format!("generation timed out after {}s", after.as_secs()),
            ),
            GatewayError::Rejected(reason) => {
                RenderFailure::new(FailureKind::Gateway, format!("generation rejected: {reason}"))
            }
            GatewayError::Malformed(_) => {
                RenderFailure::new(FailureKind::Gateway, "generation returned an unusable response")
            }
        }
    }
}
