use log::{debug, error, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Compliance status of a transaction as reported by the tx-status callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Pending,
    Denied,
    Approved,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize)]
struct TxStatusResponse {
    #[serde(default)]
    status: Option<TxStatus>,
}

#[derive(Debug, Error)]
enum ComplianceError {
    #[error("tx status request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("could not decode tx status response: {0}")]
    Decode(String),
}

/// Queries an external service for the compliance status of transactions.
#[derive(Debug, Clone)]
pub struct ComplianceClient {
    client: Client,
    tx_status_url: Option<Url>,
}

impl ComplianceClient {
    pub fn new(client: Client, tx_status_url: Option<Url>) -> Self {
        ComplianceClient {
            client,
            tx_status_url,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.tx_status_url.is_some()
    }

    /// Returns `Unknown` when no URL is configured, the service cannot be
    /// reached, answers with anything but 200, or the answer carries no
    /// readable status. Failures are only logged.
    pub async fn tx_status(&self, id: &str) -> TxStatus {
        let url = match &self.tx_status_url {
            Some(url) => url,
            None => return TxStatus::Unknown,
        };
        match self.query(url, id).await {
            Ok(status) => status,
            Err(err) => {
                warn!("Could not get compliance status of {}: {}", id, err);
                TxStatus::Unknown
            }
        }
    }

    async fn query(&self, url: &Url, id: &str) -> Result<TxStatus, ComplianceError> {
        let mut url = url.clone();
        url.query_pairs_mut().append_pair("id", id);

        let resp = self.client.get(url.clone()).send().await.map_err(|err| {
            error!("Error sending request to tx_status server {}: {}", url, err);
            err
        })?;
        if resp.status() != StatusCode::OK {
            debug!("tx_status server answered {} for {}", resp.status(), id);
            return Ok(TxStatus::Unknown);
        }
        let body = resp.bytes().await?;
        let response: TxStatusResponse = serde_json::from_slice(&body).map_err(|err| {
            error!(
                "Unable to decode tx_status response {:?}: {}",
                String::from_utf8_lossy(&body),
                err
            );
            ComplianceError::Decode(err.to_string())
        })?;
        Ok(response.status.unwrap_or_default())
    }
}
