use crate::domain::ports::{
    AuthorizationResult, Balance, BatchDetails, BatchSubmissionResult, GatewayApi,
    TransactionStatus, TransferDisposition, TransferReceipt, TransferRequest,
};
use crate::error::{DisbursementError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Connection settings for the disbursement gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Subtracted from the gateway-reported token lifetime so a token is never
    /// used close enough to expiry to die mid-flight.
    pub token_safety_margin: Duration,
}

#[derive(Debug, Clone)]
struct BearerToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl BearerToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// HTTP client for the external disbursement gateway.
///
/// Stateless except for the cached bearer token. Never retries internally;
/// the job runner owns retry policy. The only implicit recovery is
/// re-authentication when the cached token is missing or past its
/// safety-margined expiry.
pub struct HttpGateway {
    http: Client,
    config: GatewayConfig,
    token: Mutex<Option<BearerToken>>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
    expires_in_secs: i64,
}

#[derive(Serialize)]
struct WireBatchRequest<'a> {
    /// Continue-on-partial-failure submission mode: one invalid transfer must
    /// not block the rest of the batch.
    continue_on_failure: bool,
    transfers: &'a [TransferRequest],
}

#[derive(Deserialize)]
struct WireTransferEntry {
    reference: String,
    #[serde(default)]
    gateway_reference: Option<String>,
    status: TransferDisposition,
    #[serde(default)]
    message: Option<String>,
}

impl From<WireTransferEntry> for TransferReceipt {
    fn from(entry: WireTransferEntry) -> Self {
        Self {
            reference: entry.reference,
            gateway_reference: entry.gateway_reference,
            disposition: entry.status,
            message: entry.message,
        }
    }
}

#[derive(Deserialize)]
struct WireBatchResponse {
    #[serde(default)]
    batch_reference: Option<String>,
    transfers: Vec<WireTransferEntry>,
}

#[derive(Deserialize)]
struct WireBatchDetails {
    batch_reference: String,
    transfers: Vec<WireTransferEntry>,
}

#[derive(Deserialize)]
struct WireStatusResponse {
    reference: String,
    status: TransferDisposition,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct WireAuthorizeRequest<'a> {
    code: &'a str,
}

#[derive(Deserialize)]
struct WireAuthorizeResponse {
    batch_reference: String,
    authorized: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct WireBalance {
    available: Decimal,
    currency: String,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            token: Mutex::new(None),
        }
    }

    /// Exchanges long-lived credentials for a short-lived bearer token and
    /// caches it with a safety-margined expiry.
    async fn authenticate(&self) -> Result<BearerToken> {
        let url = format!("{}/v1/auth/login", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest {
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let message = error_message(response).await;
            return Err(DisbursementError::Auth(message));
        }

        let login: LoginResponse = response.json().await?;
        let expires_at =
            Utc::now() + Duration::seconds(login.expires_in_secs) - self.config.token_safety_margin;
        info!("Authenticated with disbursement gateway");
        Ok(BearerToken {
            token: login.token,
            expires_at,
        })
    }

    /// The single token refresh point. Callers never manage tokens.
    async fn ensure_authenticated(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref()
            && token.is_fresh(Utc::now())
        {
            return Ok(token.token.clone());
        }
        let token = self.authenticate().await?;
        let bearer = token.token.clone();
        *guard = Some(token);
        Ok(bearer)
    }

    fn validate_transfers(transfers: &[TransferRequest]) -> Result<()> {
        for transfer in transfers {
            if transfer.amount <= Decimal::ZERO {
                return Err(DisbursementError::Validation(format!(
                    "Transfer {}: amount must be positive",
                    transfer.reference
                )));
            }
            if transfer.account_number.trim().is_empty() {
                return Err(DisbursementError::Validation(format!(
                    "Transfer {}: account number must not be empty",
                    transfer.reference
                )));
            }
            if transfer.bank_code.trim().is_empty() {
                return Err(DisbursementError::Validation(format!(
                    "Transfer {}: bank code must not be empty",
                    transfer.reference
                )));
            }
        }
        Ok(())
    }
}

/// Extracts the gateway's own message from an error body when it parses,
/// falling back to the HTTP status line.
async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<WireError>().await {
        Ok(error) => error.message,
        Err(_) => format!("Gateway returned {status}"),
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    if response.status() == StatusCode::UNAUTHORIZED {
        return Err(DisbursementError::Auth(error_message(response).await));
    }
    Err(DisbursementError::Gateway(error_message(response).await))
}

#[async_trait]
impl GatewayApi for HttpGateway {
    async fn submit_batch(&self, transfers: Vec<TransferRequest>) -> Result<BatchSubmissionResult> {
        Self::validate_transfers(&transfers)?;

        let bearer = self.ensure_authenticated().await?;
        let url = format!("{}/v1/transfers/batch", self.config.base_url);
        debug!(transfers = transfers.len(), "Submitting transfer batch");
        let response = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .json(&WireBatchRequest {
                continue_on_failure: true,
                transfers: &transfers,
            })
            .send()
            .await?;

        let body: WireBatchResponse = check(response).await?.json().await?;
        Ok(BatchSubmissionResult {
            batch_reference: body.batch_reference,
            transfers: body.transfers.into_iter().map(Into::into).collect(),
        })
    }

    async fn authorize_batch(
        &self,
        batch_reference: &str,
        code: &str,
    ) -> Result<AuthorizationResult> {
        if batch_reference.trim().is_empty() {
            return Err(DisbursementError::Validation(
                "Batch reference must not be empty".to_string(),
            ));
        }
        if code.trim().is_empty() {
            return Err(DisbursementError::Validation(
                "Authorization code must not be empty".to_string(),
            ));
        }

        let bearer = self.ensure_authenticated().await?;
        let url = format!(
            "{}/v1/transfers/batch/{batch_reference}/authorize",
            self.config.base_url
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(bearer)
            .json(&WireAuthorizeRequest { code })
            .send()
            .await?;

        let body: WireAuthorizeResponse = check(response).await?.json().await?;
        Ok(AuthorizationResult {
            batch_reference: body.batch_reference,
            authorized: body.authorized,
            message: body.message,
        })
    }

    async fn get_transaction_status(&self, reference: &str) -> Result<TransactionStatus> {
        let bearer = self.ensure_authenticated().await?;
        let url = format!("{}/v1/transfers/status", self.config.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(bearer)
            .query(&[("reference", reference)])
            .send()
            .await?;

        let body: WireStatusResponse = check(response).await?.json().await?;
        Ok(TransactionStatus {
            reference: body.reference,
            disposition: body.status,
            message: body.message,
        })
    }

    async fn get_batch_details(&self, batch_reference: &str) -> Result<BatchDetails> {
        let bearer = self.ensure_authenticated().await?;
        let url = format!(
            "{}/v1/transfers/batch/{batch_reference}",
            self.config.base_url
        );
        let response = self.http.get(&url).bearer_auth(bearer).send().await?;

        let body: WireBatchDetails = check(response).await?.json().await?;
        Ok(BatchDetails {
            batch_reference: body.batch_reference,
            transfers: body.transfers.into_iter().map(Into::into).collect(),
        })
    }

    async fn get_balance(&self) -> Result<Balance> {
        let bearer = self.ensure_authenticated().await?;
        let url = format!("{}/v1/balance", self.config.base_url);
        let response = self.http.get(&url).bearer_auth(bearer).send().await?;

        let body: WireBalance = check(response).await?.json().await?;
        Ok(Balance {
            available: body.available,
            currency: body.currency,
        })
    }
}
