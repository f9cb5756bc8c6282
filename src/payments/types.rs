use crate::database::payment_repository::PaymentStatus;
use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Offset the gateway uses for its local timestamps (Malaysia, UTC+8).
const GATEWAY_UTC_OFFSET_SECS: i32 = 8 * 3600;

const GATEWAY_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%d-%m-%Y %H:%M:%S"];

/// Maps a gateway payment status code onto the local lifecycle.
///
/// `1` is paid, `3` is failed; everything else (`2` pending, `4` pending
/// reconfirmation, unknown codes) stays pending.
pub fn normalize_status_code(code: &str) -> PaymentStatus {
    match code.trim() {
        "1" => PaymentStatus::Success,
        "3" => PaymentStatus::Failed,
        _ => PaymentStatus::Pending,
    }
}

/// Parses a gateway-local timestamp into UTC. Unparseable values give `None`.
pub fn parse_gateway_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    let offset = FixedOffset::east_opt(GATEWAY_UTC_OFFSET_SECS)?;
    GATEWAY_TIME_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(value, format)
            .ok()
            .and_then(|naive| offset.from_local_datetime(&naive).single())
            .map(|local| local.with_timezone(&Utc))
    })
}

pub fn parse_amount(value: &str) -> Option<BigDecimal> {
    BigDecimal::from_str(value.trim()).ok()
}

/// Normalized answer to a bill status query
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BillStatus {
    pub bill_code: String,
    pub status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub gateway_reference: Option<String>,
    pub amount: Option<BigDecimal>,
}

impl BillStatus {
    pub fn pending(bill_code: impl Into<String>) -> Self {
        Self {
            bill_code: bill_code.into(),
            status: PaymentStatus::Pending,
            paid_at: None,
            gateway_reference: None,
            amount: None,
        }
    }
}

/// Raw callback body as posted by the gateway (form or JSON)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCallback {
    #[serde(default)]
    pub refno: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub billcode: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
}

/// Callback after normalization
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CallbackEvent {
    /// Our reference number, echoed back by the gateway as `order_id`
    pub reference_no: Option<String>,
    pub bill_code: Option<String>,
    pub status: PaymentStatus,
    pub gateway_reference: Option<String>,
    pub reason: Option<String>,
    pub amount: Option<BigDecimal>,
    pub paid_at: Option<DateTime<Utc>>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl From<RawCallback> for CallbackEvent {
    fn from(raw: RawCallback) -> Self {
        let status = raw
            .status
            .as_deref()
            .map(normalize_status_code)
            .unwrap_or(PaymentStatus::Pending);
        Self {
            reference_no: non_empty(raw.order_id),
            bill_code: non_empty(raw.billcode),
            status,
            gateway_reference: non_empty(raw.refno),
            reason: non_empty(raw.reason),
            amount: raw.amount.as_deref().and_then(parse_amount),
            paid_at: raw.transaction_time.as_deref().and_then(parse_gateway_time),
        }
    }
}
