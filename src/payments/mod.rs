pub mod error;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::BillGateway;
pub use providers::toyyibpay::{ToyyibPayConfig, ToyyibPayGateway};
pub use types::{BillStatus, CallbackEvent};
