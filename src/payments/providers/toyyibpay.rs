use crate::database::payment_repository::PaymentStatus;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::BillGateway;
use crate::payments::types::{
    normalize_status_code, parse_amount, parse_gateway_time, BillStatus, CallbackEvent,
    RawCallback,
};
use crate::payments::utils::{verify_hmac_sha256_hex, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{debug, warn};

const PROVIDER: &str = "toyyibpay";

#[derive(Debug, Clone)]
pub struct ToyyibPayConfig {
    /// Only needed for bill creation, which happens outside this service.
    pub secret_key: Option<String>,
    pub callback_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for ToyyibPayConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            callback_secret: None,
            base_url: "https://toyyibpay.com".to_string(),
            timeout_secs: 15,
            max_retries: 1,
        }
    }
}

impl ToyyibPayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let base_url = std::env::var("TOYYIBPAY_BASE_URL")
            .unwrap_or_else(|_| "https://toyyibpay.com".to_string());
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(PaymentError::ValidationError {
                message: "TOYYIBPAY_BASE_URL must be an http(s) URL".to_string(),
                field: Some("TOYYIBPAY_BASE_URL".to_string()),
            });
        }

        Ok(Self {
            secret_key: std::env::var("TOYYIBPAY_SECRET_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            callback_secret: std::env::var("TOYYIBPAY_CALLBACK_SECRET")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_secs: std::env::var("TOYYIBPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(15),
            max_retries: std::env::var("TOYYIBPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(1),
        })
    }
}

pub struct ToyyibPayGateway {
    config: ToyyibPayConfig,
    http: PaymentHttpClient,
}

impl ToyyibPayGateway {
    pub fn new(config: ToyyibPayConfig) -> PaymentResult<Self> {
        let http =
            PaymentHttpClient::new(Duration::from_secs(config.timeout_secs), config.max_retries)?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(ToyyibPayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BillTransaction {
    #[serde(default, rename = "billpaymentStatus")]
    payment_status: Option<String>,
    #[serde(default, rename = "billpaymentAmount")]
    payment_amount: Option<String>,
    #[serde(default, rename = "billpaymentInvoiceNo")]
    invoice_no: Option<String>,
    #[serde(default)]
    bill_payment_date: Option<String>,
}

/// Folds the transaction list of one bill into a single status. A bill can
/// carry several attempts; any paid attempt wins, then any failed one.
fn summarize_transactions(bill_code: &str, transactions: Vec<BillTransaction>) -> BillStatus {
    let mut summary = BillStatus::pending(bill_code);
    for tx in transactions {
        let status = tx
            .payment_status
            .as_deref()
            .map(normalize_status_code)
            .unwrap_or(PaymentStatus::Pending);
        let better = match (summary.status, status) {
            (PaymentStatus::Success, _) => false,
            (_, PaymentStatus::Success) => true,
            (PaymentStatus::Pending, PaymentStatus::Failed) => true,
            _ => false,
        };
        if better {
            summary.status = status;
            summary.paid_at = tx.bill_payment_date.as_deref().and_then(parse_gateway_time);
            summary.gateway_reference = tx.invoice_no.filter(|v| !v.trim().is_empty());
            summary.amount = tx.payment_amount.as_deref().and_then(parse_amount);
        }
    }
    summary
}

#[async_trait]
impl BillGateway for ToyyibPayGateway {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn bill_status(&self, bill_code: &str) -> PaymentResult<BillStatus> {
        if bill_code.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "bill code is required".to_string(),
                field: Some("bill_code".to_string()),
            });
        }

        let raw: JsonValue = self
            .http
            .post_form(
                PROVIDER,
                &self.endpoint("/index.php/api/getBillTransactions"),
                &[("billCode", bill_code)],
            )
            .await?;

        // An unknown or unpaid bill comes back as an empty list or an error object.
        let transactions = match raw {
            JsonValue::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value::<BillTransaction>(item).ok())
                .collect::<Vec<_>>(),
            other => {
                debug!(bill_code, response = %other, "no transactions for bill");
                Vec::new()
            }
        };

        Ok(summarize_transactions(bill_code, transactions))
    }

    fn verify_callback(&self, payload: &[u8], signature: Option<&str>) -> PaymentResult<()> {
        let Some(secret) = self.config.callback_secret.as_deref() else {
            return Ok(());
        };
        let signature = signature.ok_or_else(|| PaymentError::CallbackVerificationError {
            message: "missing x-callback-signature header".to_string(),
        })?;
        if verify_hmac_sha256_hex(payload, secret, signature) {
            Ok(())
        } else {
            warn!(provider = PROVIDER, "callback signature mismatch");
            Err(PaymentError::CallbackVerificationError {
                message: "invalid toyyibpay callback signature".to_string(),
            })
        }
    }

    fn parse_callback(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
    ) -> PaymentResult<CallbackEvent> {
        let is_json = content_type
            .map(|ct| ct.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false);

        let raw: RawCallback = if is_json {
            serde_json::from_slice(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid callback JSON payload: {}", e),
                field: None,
            })?
        } else {
            serde_urlencoded::from_bytes(payload).map_err(|e| PaymentError::ValidationError {
                message: format!("invalid callback form payload: {}", e),
                field: None,
            })?
        };

        let event = CallbackEvent::from(raw);
        if event.reference_no.is_none() && event.bill_code.is_none() {
            return Err(PaymentError::ValidationError {
                message: "callback carries neither order_id nor billcode".to_string(),
                field: Some("order_id".to_string()),
            });
        }
        Ok(event)
    }
}
