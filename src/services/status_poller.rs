//! Asks the gateway about bills that are still pending and feeds the answers
//! into the reconciliation engine.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::database::payment_repository::{PaymentRecord, PaymentStatus};
use crate::database::repository::{collect_pages, PaymentStore};
use crate::error::{AppError, AppResult};
use crate::payments::error::PaymentError;
use crate::payments::provider::BillGateway;
use crate::services::reconciliation::{ReconciliationEngine, StatusUpdate};
use crate::workers::payment_scheduler::PollJob;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pending payments younger than this are left to the callback.
    pub grace_period: Duration,
    /// Pending payments older than this are no longer polled.
    pub window: Duration,
    /// Page size for the pending scan; every cycle walks all pages.
    pub batch_size: i64,
    /// Hard bound on one gateway status query.
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(120),
            window: Duration::from_secs(72 * 3600),
            batch_size: 100,
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl PollerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.grace_period = Duration::from_secs(
            std::env::var("PAYMENT_POLL_GRACE_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.grace_period.as_secs()),
        );
        cfg.window = Duration::from_secs(
            std::env::var("PAYMENT_POLL_WINDOW_HOURS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|hours| hours * 3600)
                .unwrap_or(cfg.window.as_secs()),
        );
        cfg.batch_size = std::env::var("PAYMENT_POLL_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.batch_size);
        cfg.request_timeout = Duration::from_secs(
            std::env::var("PAYMENT_POLL_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.request_timeout.as_secs()),
        );
        cfg
    }
}

/// Counters for one auto-poll cycle
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PollSummary {
    pub checked: usize,
    pub updated: usize,
    pub adoptions_created: usize,
    pub still_pending: usize,
    pub timed_out: usize,
    pub failed: usize,
}

pub struct StatusPoller {
    payments: Arc<dyn PaymentStore>,
    gateway: Arc<dyn BillGateway>,
    engine: Arc<ReconciliationEngine>,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        gateway: Arc<dyn BillGateway>,
        engine: Arc<ReconciliationEngine>,
        config: PollerConfig,
    ) -> Self {
        Self {
            payments,
            gateway,
            engine,
            config,
        }
    }

    /// Manual poll of a single payment. Settled payments are not sent to the
    /// gateway again; a successful one is still reconciled.
    pub async fn poll_reference(&self, reference_no: &str) -> AppResult<StatusUpdate> {
        let reference_no = reference_no.trim();
        if reference_no.is_empty() {
            return Err(AppError::invalid_field("reference_no", "must not be empty"));
        }

        let payment = self
            .payments
            .find_by_reference(reference_no)
            .await?
            .ok_or_else(|| AppError::payment_not_found(reference_no))?;

        let stored = payment.payment_status();
        if stored.is_final() {
            info!(reference_no, status = %stored, "payment already settled, skipping gateway");
            return self.engine.apply_status(&payment, stored, payment.paid_at).await;
        }

        let bill_code = payment
            .bill_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::invalid_field("bill_code", "payment has no gateway bill code"))?;

        let observed = self.observe(&payment, bill_code).await.map_err(|e| {
            warn!(reference_no, bill_code, error = %e, "manual status poll failed");
            AppError::from(e).with_context(format!("reference_no={}", reference_no))
        })?;

        self.engine
            .apply_status(&payment, observed.0, observed.1)
            .await
    }

    /// One auto-poll cycle over every pending payment past the grace period.
    /// A failure on one payment is logged and the cycle moves on; it will be
    /// picked up again next cycle.
    pub async fn poll_pending(&self) -> AppResult<PollSummary> {
        let now = Utc::now();
        let created_before = now - chrono_duration(self.config.grace_period);
        let created_after = now - chrono_duration(self.config.window);
        let page_size = self.config.batch_size;
        let payments = self.payments.as_ref();

        let pending = collect_pages(page_size, |p: &PaymentRecord| p.id, move |after_id| {
            payments.find_pending_for_polling(created_after, created_before, after_id, page_size)
        })
        .await?;

        let mut summary = PollSummary::default();
        for payment in pending {
            let reference_no = payment.reference_no.as_str();
            let Some(bill_code) = payment
                .bill_code
                .as_deref()
                .filter(|c| !c.trim().is_empty())
            else {
                warn!(reference_no, "pending payment has no bill code, skipping");
                continue;
            };
            summary.checked += 1;

            let (status, paid_at) = match self.observe(&payment, bill_code).await {
                Ok(observed) => observed,
                Err(e) if e.is_timeout() => {
                    summary.timed_out += 1;
                    warn!(reference_no, bill_code, "gateway status query timed out, retrying next cycle");
                    continue;
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(reference_no, bill_code, error = %e, "gateway status query failed");
                    continue;
                }
            };

            if status == PaymentStatus::Pending {
                summary.still_pending += 1;
                continue;
            }

            match self.engine.apply_status(&payment, status, paid_at).await {
                Ok(update) => {
                    if update.changed {
                        summary.updated += 1;
                    }
                    if update
                        .reconciliation
                        .as_ref()
                        .map(|r| r.was_created())
                        .unwrap_or(false)
                    {
                        summary.adoptions_created += 1;
                    }
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(reference_no, error = %e, "failed to apply polled status");
                }
            }
        }

        info!(
            checked = summary.checked,
            updated = summary.updated,
            adoptions_created = summary.adoptions_created,
            still_pending = summary.still_pending,
            timed_out = summary.timed_out,
            failed = summary.failed,
            "payment auto-poll cycle finished"
        );
        Ok(summary)
    }

    async fn observe(
        &self,
        payment: &PaymentRecord,
        bill_code: &str,
    ) -> Result<(PaymentStatus, Option<DateTime<Utc>>), PaymentError> {
        observe_bill(
            self.gateway.as_ref(),
            self.config.request_timeout,
            payment,
            bill_code,
        )
        .await
    }
}

/// Asks the gateway for the bill's status within `timeout`. A success whose
/// amount differs from the recorded one is rejected.
pub(crate) async fn observe_bill(
    gateway: &dyn BillGateway,
    timeout: Duration,
    payment: &PaymentRecord,
    bill_code: &str,
) -> Result<(PaymentStatus, Option<DateTime<Utc>>), PaymentError> {
    let status = tokio::time::timeout(timeout, gateway.bill_status(bill_code))
        .await
        .map_err(|_| PaymentError::Timeout {
            timeout_secs: timeout.as_secs(),
        })??;

    if let (Some(reported), PaymentStatus::Success) = (&status.amount, status.status) {
        if *reported != payment.amount {
            warn!(
                reference_no = %payment.reference_no,
                expected = %payment.amount,
                reported = %reported,
                "gateway amount differs from recorded amount"
            );
            return Err(PaymentError::AmountMismatch {
                expected: payment.amount.to_string(),
                reported: reported.to_string(),
            });
        }
    }
    Ok((status.status, status.paid_at))
}

fn chrono_duration(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero())
}

#[async_trait]
impl PollJob for StatusPoller {
    async fn poll_cycle(&self) -> AppResult<PollSummary> {
        self.poll_pending().await
    }
}
