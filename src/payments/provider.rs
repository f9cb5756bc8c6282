use crate::payments::error::PaymentResult;
use crate::payments::types::{BillStatus, CallbackEvent};
use async_trait::async_trait;

/// Outbound and inbound seam to the payment gateway.
#[async_trait]
pub trait BillGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Current status of a bill, keyed by the gateway bill code.
    async fn bill_status(&self, bill_code: &str) -> PaymentResult<BillStatus>;

    /// Checks the callback signature when the gateway is configured with a
    /// callback secret. Gateways without one accept every callback.
    fn verify_callback(&self, payload: &[u8], signature: Option<&str>) -> PaymentResult<()>;

    fn parse_callback(&self, payload: &[u8], content_type: Option<&str>)
        -> PaymentResult<CallbackEvent>;
}
