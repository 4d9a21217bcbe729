use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde::{Deserialize, Serialize};

use crate::sqlite::{get_enum, get_opt_utc, get_utc};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    AgentVoting,
    HumanVoting,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodType::AgentVoting => "agent_voting",
            PeriodType::HumanVoting => "human_voting",
        }
    }
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent_voting" => Ok(PeriodType::AgentVoting),
            "human_voting" => Ok(PeriodType::HumanVoting),
            other => Err(format!("unknown period type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PilotStatus {
    Draft,
    Submitted,
    Voting,
    Selected,
    Producing,
    HumanVoting,
    Greenlit,
    Completed,
    Rejected,
}

impl PilotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PilotStatus::Draft => "draft",
            PilotStatus::Submitted => "submitted",
            PilotStatus::Voting => "voting",
            PilotStatus::Selected => "selected",
            PilotStatus::Producing => "producing",
            PilotStatus::HumanVoting => "human_voting",
            PilotStatus::Greenlit => "greenlit",
            PilotStatus::Completed => "completed",
            PilotStatus::Rejected => "rejected",
        }
    }

    /// Statuses at or past promotion, all of which must point at a series.
    pub const REQUIRES_SERIES: [PilotStatus; 5] = [
        PilotStatus::Selected,
        PilotStatus::Producing,
        PilotStatus::HumanVoting,
        PilotStatus::Greenlit,
        PilotStatus::Completed,
    ];

    pub fn requires_series(&self) -> bool {
        Self::REQUIRES_SERIES.contains(self)
    }

    pub fn is_candidate(&self) -> bool {
        matches!(self, PilotStatus::Submitted | PilotStatus::Voting)
    }

    pub fn terminal(&self) -> bool {
        matches!(self, PilotStatus::Completed | PilotStatus::Rejected)
    }
}

impl fmt::Display for PilotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PilotStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PilotStatus::Draft),
            "submitted" => Ok(PilotStatus::Submitted),
            "voting" => Ok(PilotStatus::Voting),
            "selected" => Ok(PilotStatus::Selected),
            "producing" => Ok(PilotStatus::Producing),
            "human_voting" => Ok(PilotStatus::HumanVoting),
            "greenlit" => Ok(PilotStatus::Greenlit),
            "completed" => Ok(PilotStatus::Completed),
            "rejected" => Ok(PilotStatus::Rejected),
            other => Err(format!("unknown pilot status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SeriesStatus {
    PilotVoting,
    PilotProducing,
    HumanVoting,
    Greenlit,
    InProduction,
    Completed,
    Cancelled,
}

impl SeriesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesStatus::PilotVoting => "pilot_voting",
            SeriesStatus::PilotProducing => "pilot_producing",
            SeriesStatus::HumanVoting => "human_voting",
            SeriesStatus::Greenlit => "greenlit",
            SeriesStatus::InProduction => "in_production",
            SeriesStatus::Completed => "completed",
            SeriesStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SeriesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pilot_voting" => Ok(SeriesStatus::PilotVoting),
            "pilot_producing" => Ok(SeriesStatus::PilotProducing),
            "human_voting" => Ok(SeriesStatus::HumanVoting),
            "greenlit" => Ok(SeriesStatus::Greenlit),
            "in_production" => Ok(SeriesStatus::InProduction),
            "completed" => Ok(SeriesStatus::Completed),
            "cancelled" => Ok(SeriesStatus::Cancelled),
            other => Err(format!("unknown series status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Pending,
    Generating,
    Assembling,
    Review,
    Published,
    Failed,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::Generating => "generating",
            EpisodeStatus::Assembling => "assembling",
            EpisodeStatus::Review => "review",
            EpisodeStatus::Published => "published",
            EpisodeStatus::Failed => "failed",
        }
    }

    pub fn rendered(&self) -> bool {
        matches!(self, EpisodeStatus::Review | EpisodeStatus::Published)
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EpisodeStatus::Pending),
            "generating" => Ok(EpisodeStatus::Generating),
            "assembling" => Ok(EpisodeStatus::Assembling),
            "review" => Ok(EpisodeStatus::Review),
            "published" => Ok(EpisodeStatus::Published),
            "failed" => Ok(EpisodeStatus::Failed),
            other => Err(format!("unknown episode status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "generating" => Ok(JobStatus::Generating),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RenderKind {
    Video,
    Audio,
}

impl RenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderKind::Video => "video",
            RenderKind::Audio => "audio",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RenderKind::Video => "mp4",
            RenderKind::Audio => "m4a",
        }
    }
}

impl fmt::Display for RenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(RenderKind::Video),
            "audio" => Ok(RenderKind::Audio),
            other => Err(format!("unknown render kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoterType {
    Agent,
    Human,
}

impl VoterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoterType::Agent => "agent",
            VoterType::Human => "human",
        }
    }
}

impl fmt::Display for VoterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(VoterType::Agent),
            "human" => Ok(VoterType::Human),
            other => Err(format!("unknown voter type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    None,
    Pending,
    Confirmed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::None => "none",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(PaymentStatus::None),
            "pending" => Ok(PaymentStatus::Pending),
            "confirmed" => Ok(PaymentStatus::Confirmed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Creator,
    Platform,
    Agent,
}

impl RecipientType {
    pub const ALL: [RecipientType; 3] = [
        RecipientType::Creator,
        RecipientType::Platform,
        RecipientType::Agent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::Creator => "creator",
            RecipientType::Platform => "platform",
            RecipientType::Agent => "agent",
        }
    }
}

impl fmt::Display for RecipientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator" => Ok(RecipientType::Creator),
            "platform" => Ok(RecipientType::Platform),
            "agent" => Ok(RecipientType::Agent),
            other => Err(format!("unknown recipient type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Pending,
    Completed,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Pending => "pending",
            PayoutStatus::Completed => "completed",
            PayoutStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PayoutStatus::Pending),
            "completed" => Ok(PayoutStatus::Completed),
            "failed" => Ok(PayoutStatus::Failed),
            other => Err(format!("unknown payout status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VotingPeriod {
    pub id: String,
    pub period_type: PeriodType,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl VotingPeriod {
    pub fn new(
        id: impl Into<String>,
        period_type: PeriodType,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            period_type,
            starts_at,
            ends_at,
            is_active: true,
            is_processed: false,
            processed_at: None,
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            period_type: get_enum(row, "period_type")?,
            starts_at: get_utc(row, "starts_at")?,
            ends_at: get_utc(row, "ends_at")?,
            is_active: row.get("is_active")?,
            is_processed: row.get("is_processed")?,
            processed_at: get_opt_utc(row, "processed_at")?,
        })
    }

    /// A period is closable only while open, unprocessed and past its end.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && !self.is_processed && self.ends_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Submission {
    pub id: String,
    pub agent_id: String,
    pub creator_id: String,
    pub category: String,
    pub title: String,
    pub script: String,
    pub pilot_status: PilotStatus,
    pub voting_period_id: Option<String>,
    pub score: i64,
    pub series_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        creator_id: impl Into<String>,
        category: impl Into<String>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            creator_id: creator_id.into(),
            category: category.into(),
            title: String::new(),
            script: String::new(),
            pilot_status: PilotStatus::Submitted,
            voting_period_id: None,
            score: 0,
            series_id: None,
            submitted_at,
            updated_at: None,
        }
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            agent_id: row.get("agent_id")?,
            creator_id: row.get("creator_id")?,
            category: row.get("category")?,
            title: row.get("title")?,
            script: row.get("script")?,
            pilot_status: get_enum(row, "pilot_status")?,
            voting_period_id: row.get("voting_period_id")?,
            score: row.get("score")?,
            series_id: row.get("series_id")?,
            submitted_at: get_utc(row, "submitted_at")?,
            updated_at: get_opt_utc(row, "updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Series {
    pub id: String,
    pub submission_id: String,
    pub title: String,
    pub category: String,
    pub status: SeriesStatus,
    pub episode_count: i64,
    pub clip_voting_period_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Series {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            submission_id: row.get("submission_id")?,
            title: row.get("title")?,
            category: row.get("category")?,
            status: get_enum(row, "status")?,
            episode_count: row.get("episode_count")?,
            clip_voting_period_id: row.get("clip_voting_period_id")?,
            created_at: get_utc(row, "created_at")?,
            updated_at: get_opt_utc(row, "updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Episode {
    pub id: String,
    pub series_id: String,
    pub episode_number: i64,
    pub is_pilot: bool,
    pub status: EpisodeStatus,
    pub variants_required: i64,
    pub asset_url: Option<String>,
    pub retry_count: i64,
    pub manual_retry_count: i64,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub auto_retry_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Episode {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            series_id: row.get("series_id")?,
            episode_number: row.get("episode_number")?,
            is_pilot: row.get("is_pilot")?,
            status: get_enum(row, "status")?,
            variants_required: row.get("variants_required")?,
            asset_url: row.get("asset_url")?,
            retry_count: row.get("retry_count")?,
            manual_retry_count: row.get("manual_retry_count")?,
            last_failed_at: get_opt_utc(row, "last_failed_at")?,
            failure_reason: row.get("failure_reason")?,
            auto_retry_enabled: row.get("auto_retry_enabled")?,
            created_at: get_utc(row, "created_at")?,
            updated_at: get_opt_utc(row, "updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductionJob {
    pub id: String,
    pub episode_id: String,
    pub variant_number: i64,
    pub kind: RenderKind,
    pub prompt: String,
    pub status: JobStatus,
    /// Claims made, including stale reclaims.
    pub attempts: i64,
    /// Recorded render failures since the last manual retry.
    pub failures: i64,
    pub claim_token: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub asset_url: Option<String>,
    pub duration_seconds: Option<f64>,
    pub failure_kind: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProductionJob {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            episode_id: row.get("episode_id")?,
            variant_number: row.get("variant_number")?,
            kind: get_enum(row, "kind")?,
            prompt: row.get("prompt")?,
            status: get_enum(row, "status")?,
            attempts: row.get("attempts")?,
            failures: row.get("failures")?,
            claim_token: row.get("claim_token")?,
            claimed_at: get_opt_utc(row, "claimed_at")?,
            next_attempt_at: get_opt_utc(row, "next_attempt_at")?,
            asset_url: row.get("asset_url")?,
            duration_seconds: row.get("duration_seconds")?,
            failure_kind: row.get("failure_kind")?,
            failure_reason: row.get("failure_reason")?,
            created_at: get_utc(row, "created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipVariant {
    pub id: String,
    pub episode_id: String,
    pub variant_number: i64,
    pub asset_url: Option<String>,
    pub duration_seconds: Option<f64>,
    pub vote_count: i64,
    pub is_selected: bool,
    pub created_at: DateTime<Utc>,
}

impl ClipVariant {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            episode_id: row.get("episode_id")?,
            variant_number: row.get("variant_number")?,
            asset_url: row.get("asset_url")?,
            duration_seconds: row.get("duration_seconds")?,
            vote_count: row.get("vote_count")?,
            is_selected: row.get("is_selected")?,
            created_at: get_utc(row, "created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClipVote {
    pub id: String,
    pub clip_variant_id: String,
    pub voter_type: VoterType,
    pub voter_identity: String,
    pub tip_amount_cents: i64,
    pub payment_status: PaymentStatus,
    pub payer_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ClipVote {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            clip_variant_id: row.get("clip_variant_id")?,
            voter_type: get_enum(row, "voter_type")?,
            voter_identity: row.get("voter_identity")?,
            tip_amount_cents: row.get("tip_amount_cents")?,
            payment_status: get_enum(row, "payment_status")?,
            payer_reference: row.get("payer_reference")?,
            created_at: get_utc(row, "created_at")?,
        })
    }

    pub fn is_paid(&self) -> bool {
        self.tip_amount_cents > 0 && self.payment_status == PaymentStatus::Confirmed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Payout {
    pub id: String,
    pub source_agent_id: String,
    pub recipient_type: RecipientType,
    pub recipient_agent_id: Option<String>,
    pub clip_vote_id: String,
    pub split_bps: i64,
    pub amount_cents: i64,
    pub wallet_address: String,
    pub status: PayoutStatus,
    pub retry_count: i64,
    pub transfer_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payout {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            source_agent_id: row.get("source_agent_id")?,
            recipient_type: get_enum(row, "recipient_type")?,
            recipient_agent_id: row.get("recipient_agent_id")?,
            clip_vote_id: row.get("clip_vote_id")?,
            split_bps: row.get("split_bps")?,
            amount_cents: row.get("amount_cents")?,
            wallet_address: row.get("wallet_address")?,
            status: get_enum(row, "status")?,
            retry_count: row.get("retry_count")?,
            transfer_reference: row.get("transfer_reference")?,
            failure_reason: row.get("failure_reason")?,
            created_at: get_utc(row, "created_at")?,
            completed_at: get_opt_utc(row, "completed_at")?,
        })
    }

    /// Split as a whole percentage, for display.
    pub fn split_percent(&self) -> f64 {
        self.split_bps as f64 / 100.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnclaimedFunds {
    pub id: String,
    pub clip_vote_id: String,
    pub source_agent_id: String,
    pub recipient_type: RecipientType,
    pub recipient_agent_id: Option<String>,
    pub amount_cents: i64,
    pub split_bps: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub swept_to_treasury_at: Option<DateTime<Utc>>,
}

impl UnclaimedFunds {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            clip_vote_id: row.get("clip_vote_id")?,
            source_agent_id: row.get("source_agent_id")?,
            recipient_type: get_enum(row, "recipient_type")?,
            recipient_agent_id: row.get("recipient_agent_id")?,
            amount_cents: row.get("amount_cents")?,
            split_bps: row.get("split_bps")?,
            reason: row.get("reason")?,
            created_at: get_utc(row, "created_at")?,
            expires_at: get_utc(row, "expires_at")?,
            claimed_at: get_opt_utc(row, "claimed_at")?,
            swept_to_treasury_at: get_opt_utc(row, "swept_to_treasury_at")?,
        })
    }

    pub fn is_open(&self) -> bool {
        self.claimed_at.is_none() && self.swept_to_treasury_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayoutWallet {
    pub owner_id: String,
    pub wallet_address: String,
    pub verified_at: Option<DateTime<Utc>>,
}

impl PayoutWallet {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_id: row.get("owner_id")?,
            wallet_address: row.get("wallet_address")?,
            verified_at: get_opt_utc(row, "verified_at")?,
        })
    }

    pub fn is_verified(&self) -> bool {
        self.verified_at.is_some() && !self.wallet_address.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pilot_status_round_trips_and_flags_series_requirement() {
        for status in [
            PilotStatus::Draft,
            PilotStatus::Voting,
            PilotStatus::Selected,
            PilotStatus::Completed,
            PilotStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<PilotStatus>().unwrap(), status);
        }
        assert!(PilotStatus::Selected.requires_series());
        assert!(PilotStatus::Completed.requires_series());
        assert!(!PilotStatus::Rejected.requires_series());
        assert!(!PilotStatus::Submitted.requires_series());
        assert!("orphaned".parse::<PilotStatus>().is_err());
    }

    #[test]
    fn period_is_due_only_after_end() {
        let now = Utc::now();
        let mut period = VotingPeriod::new(
            "p1",
            PeriodType::AgentVoting,
            now - chrono::Duration::hours(2),
            now + chrono::Duration::minutes(1),
        );
        assert!(!period.is_due(now));
        period.ends_at = now;
        assert!(period.is_due(now));
        period.is_processed = true;
        assert!(!period.is_due(now));
    }
}
