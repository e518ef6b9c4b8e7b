//! SMS delivery-status classification.
//!
//! The gateway answers a status query with an HTTP status and a result
//! code. "Undetermined" means the carrier has not confirmed yet and the
//! query should be repeated; any other non-delivered answer is final.

use std::fmt::Display;

use thiserror::Error;

use crate::core::retry::{Attempt, RetryError, RetryExecutor, Sleeper};

/// Message delivered to the handset
pub const RESULT_DELIVERED: &str = "0001";

/// Delivery not yet confirmed
pub const RESULT_UNDETERMINED: &str = "0003";

/// A confirmed delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub result_code: String,
}

/// A status query that did not confirm delivery
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Delivery not yet confirmed (result code {result_code})")]
    Pending { result_code: String },

    #[error("Delivery failed: HTTP {status}, result code {result_code}")]
    Rejected { status: u16, result_code: String },

    #[error("Delivery status request failed: {0}")]
    Transport(String),
}

/// Map one gateway response to a retry outcome
pub fn classify_delivery(http_status: u16, result_code: &str) -> Attempt<Delivered, DeliveryError> {
    match (http_status, result_code) {
        (200, RESULT_DELIVERED) => Attempt::Success(Delivered {
            result_code: result_code.to_string(),
        }),
        (200, RESULT_UNDETERMINED) => Attempt::Retryable(DeliveryError::Pending {
            result_code: result_code.to_string(),
        }),
        _ => Attempt::Fatal(DeliveryError::Rejected {
            status: http_status,
            result_code: result_code.to_string(),
        }),
    }
}

/// Poll delivery status until confirmed, rejected, or out of attempts
///
/// `fetch` returns the gateway's HTTP status and result code. A transport
/// error from `fetch` is fatal; only "undetermined" is retried.
pub fn poll_delivery<S, F, E>(
    executor: &RetryExecutor<S>,
    mut fetch: F,
) -> Result<Delivered, RetryError<DeliveryError>>
where
    S: Sleeper,
    F: FnMut() -> Result<(u16, String), E>,
    E: Display,
{
    executor.run(|| match fetch() {
        Ok((status, code)) => classify_delivery(status, &code),
        Err(e) => Attempt::Fatal(DeliveryError::Transport(e.to_string())),
    })
}
