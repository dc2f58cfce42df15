use crate::operations::AccountId;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::{debug, trace};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::VecDeque, time::Duration};
use thiserror::Error;
use url::Url;

const BAD_SEQUENCE: &str = "tx_bad_seq";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(String),
    #[error("sequence number already used")]
    SequenceConflict,
    #[error("transaction rejected: {0}")]
    Rejected(String),
    #[error("ledger request timed out")]
    Timeout,
    #[error("ledger transport error: {0}")]
    Transport(String),
    #[error("unexpected ledger response: {0}")]
    UnexpectedResponse(String),
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LedgerError::Timeout
        } else if err.is_decode() {
            LedgerError::UnexpectedResponse(err.to_string())
        } else {
            LedgerError::Transport(err.to_string())
        }
    }
}

/// Result of a transaction accepted by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub hash: String,
    #[serde(default)]
    pub ledger: Option<u64>,
}

/// A payment-like operation as listed by the ledger for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerOperation {
    pub id: String,
    pub paging_token: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub transaction_hash: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub asset_code: Option<String>,
    #[serde(default)]
    pub asset_issuer: Option<String>,
}

impl LedgerOperation {
    /// Payments and path payments of any flavour.
    pub fn is_payment(&self) -> bool {
        self.kind == "payment" || self.kind.starts_with("path_payment")
    }
}

/// The ledger network as seen by the bridge.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Current sequence number of `account`
    async fn load_sequence(&self, account: &AccountId) -> Result<u64, LedgerError>;

    /// Submits a base64 encoded envelope
    async fn submit(&self, envelope: &str) -> Result<SubmitResult, LedgerError>;

    /// Whether the transaction with hex `hash` made it into a ledger
    async fn transaction_landed(&self, hash: &str) -> Result<bool, LedgerError>;

    /// Operations involving `account` strictly after `cursor`, oldest first
    async fn operations_page(
        &self,
        account: &AccountId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<LedgerOperation>, LedgerError>;

    /// Paging token of the newest operation involving `account`, if any
    async fn latest_cursor(&self, account: &AccountId) -> Result<Option<String>, LedgerError>;

    /// Turns pages into an endless stream of operations starting strictly
    /// after `cursor`. When a page comes back empty the stream waits for
    /// `poll_interval` before asking again. Errors are yielded and the stream
    /// resumes from the last yielded operation if polled further.
    fn stream_operations<'a>(
        &'a self,
        account: AccountId,
        cursor: Option<String>,
        limit: u32,
        poll_interval: Duration,
    ) -> BoxStream<'a, Result<LedgerOperation, LedgerError>>
    where
        Self: Sized,
    {
        stream::unfold(
            (cursor, VecDeque::new()),
            move |(mut cursor, mut buffer): (Option<String>, VecDeque<LedgerOperation>)| async move {
                loop {
                    if let Some(operation) = buffer.pop_front() {
                        cursor = Some(operation.paging_token.clone());
                        return Some((Ok(operation), (cursor, buffer)));
                    }
                    match self
                        .operations_page(&account, cursor.as_deref(), limit)
                        .await
                    {
                        Ok(page) if page.is_empty() => tokio::time::sleep(poll_interval).await,
                        Ok(page) => buffer.extend(page),
                        Err(err) => return Some((Err(err), (cursor, buffer))),
                    }
                }
            },
        )
        .boxed()
    }
}

/// Client for a Horizon-style REST ledger API.
#[derive(Debug, Clone)]
pub struct HorizonClient {
    base_url: Url,
    client: Client,
}

#[derive(Deserialize)]
struct AccountResponse {
    sequence: String,
}

#[derive(Deserialize)]
struct Page {
    #[serde(rename = "_embedded")]
    embedded: Records,
}

#[derive(Deserialize)]
struct Records {
    records: Vec<LedgerOperation>,
}

impl HorizonClient {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, LedgerError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HorizonClient { base_url, client })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, LedgerError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LedgerError::Transport(format!("invalid ledger URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn payments(
        &self,
        account: &AccountId,
        cursor: Option<&str>,
        order: &str,
        limit: u32,
    ) -> Result<Vec<LedgerOperation>, LedgerError> {
        let account_str = account.to_string();
        let url = self.url(&["accounts", &account_str, "payments"])?;
        let mut query = vec![("order", order.to_string()), ("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        trace!("Fetching payments for {} after {:?}", account, cursor);
        let resp = self.client.get(url).query(&query).send().await?;
        match resp.status() {
            // An account without any history yet
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if status.is_success() => Ok(resp.json::<Page>().await?.embedded.records),
            status => Err(LedgerError::UnexpectedResponse(format!(
                "listing payments returned {}",
                status
            ))),
        }
    }
}

/// Extracts the transaction result code of a failed submission.
fn result_code(body: &Value) -> Option<String> {
    body.pointer("/extras/result_codes/transaction")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[async_trait]
impl LedgerClient for HorizonClient {
    async fn load_sequence(&self, account: &AccountId) -> Result<u64, LedgerError> {
        let account_str = account.to_string();
        let resp = self
            .client
            .get(self.url(&["accounts", &account_str])?)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(LedgerError::AccountNotFound(account_str)),
            status if status.is_success() => {
                let body: AccountResponse = resp.json().await?;
                body.sequence.parse().map_err(|_| {
                    LedgerError::UnexpectedResponse(format!(
                        "sequence {:?} is not a number",
                        body.sequence
                    ))
                })
            }
            status => Err(LedgerError::UnexpectedResponse(format!(
                "loading account returned {}",
                status
            ))),
        }
    }

    async fn submit(&self, envelope: &str) -> Result<SubmitResult, LedgerError> {
        let resp = self
            .client
            .post(self.url(&["transactions"])?)
            .form(&[("tx", envelope)])
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        match result_code(&body) {
            Some(code) if code == BAD_SEQUENCE => Err(LedgerError::SequenceConflict),
            Some(code) => {
                debug!("Transaction rejected with {}: {}", code, body);
                Err(LedgerError::Rejected(code))
            }
            None => Err(LedgerError::UnexpectedResponse(format!(
                "submission returned {}",
                status
            ))),
        }
    }

    async fn transaction_landed(&self, hash: &str) -> Result<bool, LedgerError> {
        let resp = self
            .client
            .get(self.url(&["transactions", hash])?)
            .send()
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(LedgerError::UnexpectedResponse(format!(
                "looking up transaction returned {}",
                status
            ))),
        }
    }

    async fn operations_page(
        &self,
        account: &AccountId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<LedgerOperation>, LedgerError> {
        self.payments(account, cursor, "asc", limit).await
    }

    async fn latest_cursor(&self, account: &AccountId) -> Result<Option<String>, LedgerError> {
        let page = self.payments(account, None, "desc", 1).await?;
        Ok(page.into_iter().next().map(|op| op.paging_token))
    }
}
