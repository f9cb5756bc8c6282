use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Gateway did not answer within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Callback verification failed: {message}")]
    CallbackVerificationError { message: String },

    #[error("Gateway reported amount {reported}, expected {expected}")]
    AmountMismatch { expected: String, reported: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::Timeout { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::CallbackVerificationError { .. } => false,
            PaymentError::AmountMismatch { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PaymentError::Timeout { .. })
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::Timeout { .. } => 504,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::CallbackVerificationError { .. } => 401,
            PaymentError::AmountMismatch { .. } => 502,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::NetworkError { .. } => {
                "Payment gateway is temporarily unavailable".to_string()
            }
            PaymentError::Timeout { .. } => "Payment gateway timed out".to_string(),
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment gateway. Please retry shortly".to_string()
            }
            PaymentError::CallbackVerificationError { .. } => {
                "Invalid callback signature".to_string()
            }
            PaymentError::AmountMismatch { .. } => {
                "Payment amount does not match the gateway record".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment gateway returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            PaymentError::Timeout { timeout_secs } => {
                AppError::new(AppErrorKind::External(ExternalError::Timeout {
                    service: "payment_gateway".to_string(),
                    timeout_secs,
                }))
            }
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                }))
            }
            PaymentError::CallbackVerificationError { message } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: "signature".to_string(),
                    reason: message,
                }))
            }
            other => {
                let gateway = match &other {
                    PaymentError::ProviderError { provider, .. } => provider.clone(),
                    _ => "payment_gateway".to_string(),
                };
                AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
                    gateway,
                    message: other.to_string(),
                    is_retryable: other.is_retryable(),
                }))
            }
        }
    }
}
