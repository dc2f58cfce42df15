use crate::compliance::TxStatus;
use crate::utils::types::ReceivedPayment;
use log::{debug, error, trace};
use reqwest::Client;
use serde::Serialize;
use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use url::Url;

pub const DEFAULT_DELIVERY_RETRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliveryError {
    #[error("callback answered with status {0}")]
    Status(u16),
    #[error("callback request failed: {0}")]
    Transport(String),
}

/// Body posted to the receive callback.
#[derive(Debug, Serialize)]
struct PaymentNotification<'a> {
    id: &'a str,
    from: &'a str,
    to: String,
    amount: &'a str,
    asset_code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    asset_issuer: Option<&'a str>,
    transaction_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    compliance_status: Option<TxStatus>,
}

/// Outcome of a delivery including every retry.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub attempts: u32,
    pub result: Result<(), DeliveryError>,
}

/// Posts received payments to the configured callback, retrying with
/// exponential backoff.
#[derive(Debug, Clone)]
pub struct CallbackNotifier {
    client: Client,
    url: Url,
    max_retries: usize,
    backoff_base_ms: u64,
    max_delay: Duration,
}

impl CallbackNotifier {
    pub fn new(
        client: Client,
        url: Url,
        max_retries: usize,
        backoff_base_ms: u64,
        max_delay: Duration,
    ) -> Self {
        CallbackNotifier {
            client,
            url,
            max_retries,
            backoff_base_ms,
            max_delay,
        }
    }

    /// Delivers `payment`, keyed by its operation id so that the receiver can
    /// drop duplicates. A 2xx answer counts as delivered.
    pub async fn deliver(&self, payment: &ReceivedPayment) -> DeliveryReport {
        let notification = PaymentNotification {
            id: &payment.operation_id,
            from: &payment.from,
            to: payment.account.to_string(),
            amount: &payment.amount,
            asset_code: &payment.asset.code,
            asset_issuer: payment.asset.issuer.as_deref(),
            transaction_id: &payment.transaction_hash,
            compliance_status: payment.compliance_status,
        };
        let attempts = Arc::new(AtomicU32::new(0));
        debug!(
            "Making POST to {} about payment {} of {}",
            self.url, payment.operation_id, payment.amount
        );

        let action = || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let request = self
                .client
                .post(self.url.as_ref())
                .header("Idempotency-Key", payment.operation_id.as_str())
                .json(&notification);
            async move {
                let resp = request.send().await.map_err(|err| {
                    error!(
                        "Error notifying callback about payment {} (attempt {}): {}",
                        payment.operation_id, attempt, err
                    );
                    DeliveryError::Transport(err.to_string())
                })?;
                if resp.status().is_success() {
                    Ok(())
                } else {
                    error!(
                        "Callback answered {} for payment {} (attempt {})",
                        resp.status(),
                        payment.operation_id,
                        attempt
                    );
                    Err(DeliveryError::Status(resp.status().as_u16()))
                }
            }
        };

        let strategy = ExponentialBackoff::from_millis(self.backoff_base_ms)
            .max_delay(self.max_delay)
            .take(self.max_retries);
        let result = Retry::start(strategy, action).await;
        let attempts = attempts.load(Ordering::SeqCst);
        match &result {
            Ok(()) => trace!("Payment {} delivered after {} attempts", payment.operation_id, attempts),
            Err(_) => error!(
                "Exceeded max retries when notifying callback about payment {} from {} for amount {}. Please check your callback.",
                payment.operation_id, payment.from, payment.amount
            ),
        }
        DeliveryReport { attempts, result }
    }
}
