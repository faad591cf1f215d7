use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeInitiation {
    pub gateway_reference: String,
    pub checkout_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub status: ChargeStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Narrow contract with the external payment provider. The reconciler treats
/// a timeout as `Pending`, never as a rejection.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initiate_charge(
        &self,
        subscription_id: i64,
        amount_cents: i64,
        currency: &str,
        description: &str,
    ) -> AppResult<ChargeInitiation>;

    async fn get_outcome(&self, gateway_reference: &str) -> AppResult<ChargeOutcome>;
}

#[derive(Debug, Serialize)]
struct InitiateChargeRequest<'a> {
    subscription_id: i64,
    amount_cents: i64,
    currency: &'a str,
    description: &'a str,
}

#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn map_send_error(e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::GatewayTimeout
        } else if e.is_connect() || e.is_request() {
            // connection refused, DNS failure and the like are transient the
            // same way a timeout is; the reconciler treats them as Pending
            AppError::ExternalApiError(format!("Gateway unreachable: {e}"))
        } else {
            AppError::ReqwestError(e)
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn initiate_charge(
        &self,
        subscription_id: i64,
        amount_cents: i64,
        currency: &str,
        description: &str,
    ) -> AppResult<ChargeInitiation> {
        let url = format!("{}/v1/charges", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&InitiateChargeRequest {
                subscription_id,
                amount_cents,
                currency,
                description,
            })
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            Err(AppError::ExternalApiError(format!(
                "Failed to initiate charge: {error_text}"
            )))
        }
    }

    async fn get_outcome(&self, gateway_reference: &str) -> AppResult<ChargeOutcome> {
        let url = format!("{}/v1/charges/{}", self.config.base_url, gateway_reference);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            Err(AppError::ExternalApiError(format!(
                "Failed to read charge outcome: {error_text}"
            )))
        }
    }
}

/// Scripted gateway for tests: outcomes are set per reference, and calls can
/// be made to time out.
#[cfg(test)]
pub struct MockGateway {
    state: std::sync::Mutex<MockState>,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    issued: u64,
    outcomes: std::collections::HashMap<String, ChargeOutcome>,
    fail_with_timeout: bool,
    charges_initiated: u64,
    last_currency: Option<String>,
}

#[cfg(test)]
impl MockGateway {
    pub fn new() -> Self {
        Self {
            state: std::sync::Mutex::new(MockState::default()),
        }
    }

    pub fn set_outcome(&self, reference: &str, status: ChargeStatus) {
        self.state.lock().unwrap().outcomes.insert(
            reference.to_string(),
            ChargeOutcome {
                status,
                detail: None,
            },
        );
    }

    pub fn set_timeout_mode(&self, on: bool) {
        self.state.lock().unwrap().fail_with_timeout = on;
    }

    pub fn charges_initiated(&self) -> u64 {
        self.state.lock().unwrap().charges_initiated
    }

    pub fn last_currency(&self) -> Option<String> {
        self.state.lock().unwrap().last_currency.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl PaymentGateway for MockGateway {
    async fn initiate_charge(
        &self,
        _subscription_id: i64,
        _amount_cents: i64,
        currency: &str,
        _description: &str,
    ) -> AppResult<ChargeInitiation> {
        let mut state = self.state.lock().unwrap();
        if state.fail_with_timeout {
            return Err(AppError::GatewayTimeout);
        }
        state.last_currency = Some(currency.to_string());
        state.issued += 1;
        state.charges_initiated += 1;
        let reference = format!("mock-charge-{}", state.issued);
        state.outcomes.insert(
            reference.clone(),
            ChargeOutcome {
                status: ChargeStatus::Pending,
                detail: None,
            },
        );
        Ok(ChargeInitiation {
            gateway_reference: reference,
            checkout_url: None,
        })
    }

    async fn get_outcome(&self, gateway_reference: &str) -> AppResult<ChargeOutcome> {
        let state = self.state.lock().unwrap();
        if state.fail_with_timeout {
            return Err(AppError::GatewayTimeout);
        }
        state
            .outcomes
            .get(gateway_reference)
            .cloned()
            .ok_or_else(|| {
                AppError::ExternalApiError(format!("Unknown charge {gateway_reference}"))
            })
    }
}
