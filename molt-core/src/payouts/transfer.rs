use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer rail unreachable: {0}")]
    Transport(String),
    #[error("transfer rejected: {0}")]
    Rejected(String),
    #[error("transfer rail not configured")]
    NotConfigured,
}

impl From<reqwest::Error> for TransferError {
    fn from(error: reqwest::Error) -> Self {
        TransferError::Transport(error.to_string())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TransferRequest {
    /// Payout id; the rail deduplicates on it.
    pub idempotency_key: String,
    pub wallet_address: String,
    pub amount_cents: i64,
    pub memo: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TransferReceipt {
    pub reference: String,
}

/// Downstream money movement for completed payouts.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransferClient {
    client: Client,
    endpoint: Url,
}

impl HttpTransferClient {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, TransferError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| TransferError::Rejected(format!("invalid endpoint {endpoint}: {err}")))?;
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    async fn transfer(&self, request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(TransferError::Transport(format!("rail returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::Rejected(format!("rail returned {status}: {body}")));
        }
        response
            .json::<TransferReceipt>()
            .await
            .map_err(|err| TransferError::Rejected(format!("unreadable receipt: {err}")))
    }
}

/// Stand-in used when no transfer endpoint is configured: every payout stays
/// pending until a real rail is wired in.
#[derive(Debug, Clone, Default)]
pub struct UnconfiguredTransferClient;

#[async_trait]
impl TransferClient for UnconfiguredTransferClient {
    async fn transfer(&self, _request: &TransferRequest) -> Result<TransferReceipt, TransferError> {
        Err(TransferError::NotConfigured)
    }
}
