use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::database::payment_repository::PaymentStatus;
use crate::database::repository::PaymentStore;
use crate::error::{AppError, AppResult};
use crate::payments::provider::BillGateway;
use crate::services::reconciliation::{ReconciliationEngine, StatusUpdate};
use crate::services::status_poller::{observe_bill, PollerConfig};

/// Handles gateway callbacks: verify, find the payment, confirm the reported
/// status with the gateway, apply it.
///
/// The body only identifies the bill. Settlements come from the gateway's
/// own answer, never from the body.
pub struct CallbackProcessor {
    payments: Arc<dyn PaymentStore>,
    gateway: Arc<dyn BillGateway>,
    engine: Arc<ReconciliationEngine>,
    request_timeout: Duration,
}

impl CallbackProcessor {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        gateway: Arc<dyn BillGateway>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            payments,
            gateway,
            engine,
            request_timeout: PollerConfig::default().request_timeout,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub async fn process(
        &self,
        payload: &[u8],
        content_type: Option<&str>,
        signature: Option<&str>,
    ) -> AppResult<StatusUpdate> {
        self.gateway.verify_callback(payload, signature)?;
        let event = self.gateway.parse_callback(payload, content_type)?;

        let mut payment = match event.reference_no.as_deref() {
            Some(reference_no) => self.payments.find_by_reference(reference_no).await?,
            None => None,
        };
        if payment.is_none() {
            if let Some(bill_code) = event.bill_code.as_deref() {
                payment = self.payments.find_by_bill_code(bill_code).await?;
            }
        }

        let identifier = event
            .reference_no
            .clone()
            .or_else(|| event.bill_code.clone())
            .unwrap_or_default();
        let payment = payment.ok_or_else(|| {
            warn!(identifier = %identifier, "callback for unknown payment");
            AppError::payment_not_found(identifier.clone())
        })?;

        if let (Some(stored), Some(reported)) = (payment.bill_code.as_deref(), event.bill_code.as_deref()) {
            if stored != reported {
                warn!(
                    reference_no = %payment.reference_no,
                    stored_bill_code = stored,
                    callback_bill_code = reported,
                    "callback bill code differs from stored bill code"
                );
            }
        }

        info!(
            reference_no = %payment.reference_no,
            gateway = self.gateway.name(),
            status = %event.status,
            gateway_reference = ?event.gateway_reference,
            "payment callback received"
        );

        // Nothing to confirm: settled payments never move again, and a
        // pending report changes nothing.
        let stored = payment.payment_status();
        if stored.is_final() || event.status == PaymentStatus::Pending {
            return self
                .engine
                .apply_status(&payment, stored, payment.paid_at)
                .await;
        }

        let reference_no = payment.reference_no.as_str();
        let bill_code = payment
            .bill_code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| AppError::invalid_field("bill_code", "payment has no gateway bill code"))?;

        let (confirmed, paid_at) = observe_bill(
            self.gateway.as_ref(),
            self.request_timeout,
            &payment,
            bill_code,
        )
        .await
        .map_err(|e| {
            warn!(reference_no, bill_code, error = %e, "could not confirm callback with gateway");
            AppError::from(e).with_context(format!("reference_no={}", reference_no))
        })?;

        if confirmed != event.status {
            warn!(
                reference_no,
                bill_code,
                reported = %event.status,
                confirmed = %confirmed,
                "callback status not confirmed by gateway, using gateway status"
            );
        }
        let paid_at = match paid_at {
            Some(at) => Some(at),
            None if confirmed == event.status => event.paid_at,
            None => None,
        };

        self.engine.apply_status(&payment, confirmed, paid_at).await
    }
}
