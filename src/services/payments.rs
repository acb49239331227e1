//! Payment-provider confirmation for client-reported transactions.
//!
//! The storefront charges customers through PortOne's checkout widget; the
//! browser then reports the provider's transaction id with the order. Before
//! such an order is accepted, [`PaymentVerifier`] asks the provider for the
//! transaction and requires it to be `paid` for exactly the order total.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::{config::AppConfig, errors::ServiceError};

/// Provider view of a single transaction
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProviderPayment {
    pub imp_uid: String,
    pub status: String,
    pub amount: Decimal,
}

#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    #[error("payment provider timed out")]
    Timeout,

    #[error("payment provider rejected credentials: {0}")]
    Authentication(String),

    #[error("transaction {0} not found at provider")]
    TransactionNotFound(String),

    #[error("payment provider error: {0}")]
    Provider(String),

    #[error("payment provider transport error: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for PaymentGatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentGatewayError::Timeout
        } else {
            PaymentGatewayError::Transport(err.to_string())
        }
    }
}

/// Transaction lookup at the external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn fetch_payment(&self, transaction_id: &str)
        -> Result<ProviderPayment, PaymentGatewayError>;
}

#[derive(Debug, Clone)]
pub struct PortOneCredentials {
    pub api_key: String,
    pub api_secret: String,
}

/// PortOne (iamport) REST adapter.
#[derive(Clone)]
pub struct PortOnePaymentGateway {
    client: Client,
    base_url: String,
    credentials: PortOneCredentials,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    imp_key: &'a str,
    imp_secret: &'a str,
}

/// PortOne wraps every payload as `{code, message, response}`
#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    message: Option<String>,
    response: Option<T>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl PortOnePaymentGateway {
    pub fn new(
        base_url: impl Into<String>,
        credentials: PortOneCredentials,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ServiceError::InternalError(format!("failed to build payment client: {}", e))
            })?;

        Ok(Self::with_client(base_url, credentials, client))
    }

    pub fn with_client(
        base_url: impl Into<String>,
        credentials: PortOneCredentials,
        client: Client,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }

    async fn access_token(&self) -> Result<String, PaymentGatewayError> {
        let response = self
            .client
            .post(format!("{}/users/getToken", self.base_url))
            .json(&TokenRequest {
                imp_key: &self.credentials.api_key,
                imp_secret: &self.credentials.api_secret,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PaymentGatewayError::Authentication(format!(
                "token endpoint answered {}",
                response.status()
            )));
        }

        let envelope: Envelope<TokenResponse> = response.json().await?;
        match envelope.response {
            Some(token) if envelope.code == 0 => Ok(token.access_token),
            _ => Err(PaymentGatewayError::Authentication(
                envelope.message.unwrap_or_else(|| "no access token".to_string()),
            )),
        }
    }
}

#[async_trait]
impl PaymentGateway for PortOnePaymentGateway {
    #[instrument(skip(self))]
    async fn fetch_payment(
        &self,
        transaction_id: &str,
    ) -> Result<ProviderPayment, PaymentGatewayError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(format!("{}/payments/{}", self.base_url, transaction_id))
            .bearer_auth(token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PaymentGatewayError::TransactionNotFound(
                transaction_id.to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(PaymentGatewayError::Provider(format!(
                "payment lookup answered {}",
                response.status()
            )));
        }

        let envelope: Envelope<ProviderPayment> = response.json().await?;
        match envelope.response {
            Some(payment) if envelope.code == 0 => Ok(payment),
            _ => Err(PaymentGatewayError::Provider(
                envelope
                    .message
                    .unwrap_or_else(|| "empty payment response".to_string()),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified,
    /// No provider credentials are configured for this deployment
    Skipped,
}

/// Checks reported transactions against the provider.
///
/// Built without a gateway when the deployment has no provider credentials;
/// every verification is then skipped with a warning.
#[derive(Clone)]
pub struct PaymentVerifier {
    gateway: Option<Arc<dyn PaymentGateway>>,
}

impl PaymentVerifier {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            gateway: Some(gateway),
        }
    }

    pub fn disabled() -> Self {
        Self { gateway: None }
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        match cfg.payment_credentials() {
            Some((api_key, api_secret)) => {
                let gateway = PortOnePaymentGateway::new(
                    cfg.payment_api_base_url.clone(),
                    PortOneCredentials {
                        api_key,
                        api_secret,
                    },
                    cfg.payment_timeout(),
                )?;
                Ok(Self::new(Arc::new(gateway)))
            }
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.gateway.is_some()
    }

    /// Requires the transaction to be `paid` for exactly `expected_amount`.
    #[instrument(skip(self))]
    pub async fn verify(
        &self,
        transaction_id: &str,
        expected_amount: Decimal,
    ) -> Result<VerificationOutcome, ServiceError> {
        let Some(gateway) = &self.gateway else {
            warn!(transaction_id, "Payment credentials not configured; skipping verification");
            return Ok(VerificationOutcome::Skipped);
        };

        let payment = gateway.fetch_payment(transaction_id).await.map_err(|e| {
            metrics::counter!("storefront.payment_verification.failed", 1);
            warn!(transaction_id, error = %e, "Payment lookup failed");
            ServiceError::PaymentVerificationFailed(match e {
                PaymentGatewayError::Timeout => "payment provider did not answer in time".to_string(),
                other => other.to_string(),
            })
        })?;

        check_payment(&payment, expected_amount).map_err(|e| {
            metrics::counter!("storefront.payment_verification.failed", 1);
            e
        })?;

        info!(transaction_id, amount = %payment.amount, "Payment verified");
        Ok(VerificationOutcome::Verified)
    }
}

fn check_payment(payment: &ProviderPayment, expected_amount: Decimal) -> Result<(), ServiceError> {
    if payment.status != "paid" {
        return Err(ServiceError::PaymentVerificationFailed(format!(
            "transaction {} is {}, not paid",
            payment.imp_uid, payment.status
        )));
    }
    if payment.amount != expected_amount {
        return Err(ServiceError::PaymentVerificationFailed(format!(
            "paid amount {} does not match order total {}",
            payment.amount, expected_amount
        )));
    }
    Ok(())
}
