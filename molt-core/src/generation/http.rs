use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::{AssetPayload, GatewayError, GenerationGateway, RenderOutput, RenderRequest};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// JSON client for the hosted rendering endpoint.
#[derive(Debug, Clone)]
pub struct HttpGenerationGateway {
    client: Client,
    endpoint: Url,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayHealth {
    pub status: String,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    video_base64: Option<String>,
    #[serde(default)]
    audio_base64: Option<String>,
    #[serde(default)]
    asset_url: Option<String>,
    #[serde(default)]
    duration_seconds: Option<f64>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    model: Option<String>,
}

impl HttpGenerationGateway {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, GatewayError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| GatewayError::Malformed(format!("invalid endpoint {endpoint}: {err}")))?;
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Calls `{endpoint}/health`.
    pub async fn health(&self) -> Result<GatewayHealth, GatewayError> {
        let url = health_url(&self.endpoint)?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(GatewayError::Transport(format!(
                "health check returned {}",
                response.status()
            )));
        }
        let body: HealthResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Malformed(err.to_string()))?;
        Ok(GatewayHealth {
            status: body.status,
            model: body.model,
        })
    }
}

fn health_url(endpoint: &Url) -> Result<Url, GatewayError> {
    let mut base = endpoint.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("health")
        .map_err(|err| GatewayError::Malformed(err.to_string()))
}

#[async_trait]
impl GenerationGateway for HttpGenerationGateway {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutput, GatewayError> {
        debug!(
            job_id = %request.job_id,
            idempotency_key = %request.idempotency_key,
            kind = %request.kind,
            "dispatching render request"
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GatewayError::Transport(format!("request timed out: {err}"))
                } else {
                    GatewayError::from(err)
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Transport(format!("gateway returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(rejection_reason(status, &body)));
        }

        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|err| GatewayError::Malformed(err.to_string()))?;
        decode_response(body)
    }
}

fn rejection_reason(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => format!("gateway returned {status}"),
    }
}

fn decode_response(body: GatewayResponse) -> Result<RenderOutput, GatewayError> {
    if let Some(reason) = body.error {
        return Err(GatewayError::Rejected(reason));
    }
    if matches!(body.status.as_deref(), Some(status) if status != "ok") {
        return Err(GatewayError::Rejected(format!(
            "gateway reported status {}",
            body.status.unwrap_or_default()
        )));
    }

    let asset = match (body.video_base64, body.audio_base64, body.asset_url) {
        (Some(encoded), _, _) | (None, Some(encoded), _) => STANDARD
            .decode(encoded.trim())
            .map(AssetPayload::Bytes)
            .map_err(|err| GatewayError::Malformed(format!("asset is not base64: {err}")))?,
        (None, None, Some(url)) => AssetPayload::Reference(url),
        (None, None, None) => {
            return Err(GatewayError::Malformed("response carried no asset".into()));
        }
    };

    let duration_seconds = body
        .duration_seconds
        .ok_or_else(|| GatewayError::Malformed("response is missing duration_seconds".into()))?;

    Ok(RenderOutput {
        asset,
        duration_seconds,
        width: body.width,
        height: body.height,
        seed: body.seed,
        model: body.model,
    })
}
