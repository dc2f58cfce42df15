use crate::compliance::TxStatus;
use crate::operations::{AccountId, AssetBody};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),
    #[error("corrupt record {0}")]
    Corrupt(String),
    #[error("{0} not found")]
    NotFound(String),
}

/// What became of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    Pending,
    Confirmed,
    Rejected(String),
}

/// A transaction signed with a given `(account, sequence)`, recorded before it
/// is sent so that a crash mid-submission can be reconciled on restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub account: AccountId,
    pub sequence: u64,
    pub envelope: String,
    pub hash: String,
    pub submitted_at: DateTime<Utc>,
    pub outcome: SubmissionOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Exhausted,
}

/// An incoming payment observed on the ledger, unique per `operation_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedPayment {
    pub operation_id: String,
    pub account: AccountId,
    pub amount: String,
    pub asset: AssetBody,
    pub from: String,
    pub cursor: String,
    pub transaction_hash: String,
    pub processed_at: DateTime<Utc>,
    pub delivery_status: DeliveryStatus,
    #[serde(default)]
    pub delivery_attempts: u32,
    #[serde(default)]
    pub compliance_status: Option<TxStatus>,
}

/// Persistence used by the transaction submitter: the per-account sequence
/// cache and the submissions made with it.
#[async_trait]
pub trait SubmissionStore {
    /// Last sequence number used by `account`, if the account was initialized
    async fn load_sequence(&self, account: &AccountId) -> Result<Option<u64>, StoreError>;

    async fn save_sequence(&self, account: &AccountId, sequence: u64) -> Result<(), StoreError>;

    /// Saves a submission keyed by its account and sequence, replacing any
    /// previous record for the same pair
    async fn save_submission(&self, submission: &PendingSubmission) -> Result<(), StoreError>;

    async fn load_submission(
        &self,
        account: &AccountId,
        sequence: u64,
    ) -> Result<Option<PendingSubmission>, StoreError>;

    async fn update_submission_outcome(
        &self,
        account: &AccountId,
        sequence: u64,
        outcome: SubmissionOutcome,
    ) -> Result<(), StoreError>;

    /// Submissions of `account` still waiting for an outcome, by sequence
    async fn load_pending_submissions(
        &self,
        account: &AccountId,
    ) -> Result<Vec<PendingSubmission>, StoreError>;
}

/// Persistence used by the payment listener: received payments and the
/// per-account paging cursor.
#[async_trait]
pub trait PaymentStore {
    /// Inserts `payment` unless one with the same operation id exists.
    /// Returns true if it was inserted.
    async fn insert_payment(&self, payment: &ReceivedPayment) -> Result<bool, StoreError>;

    async fn load_payment(&self, operation_id: &str)
        -> Result<Option<ReceivedPayment>, StoreError>;

    async fn update_delivery_status(
        &self,
        operation_id: &str,
        status: DeliveryStatus,
        attempts: u32,
    ) -> Result<(), StoreError>;

    async fn load_payments_by_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<ReceivedPayment>, StoreError>;

    /// Saves the paging token up to which all operations were processed
    async fn save_cursor(&self, account: &AccountId, cursor: &str) -> Result<(), StoreError>;

    async fn load_cursor(&self, account: &AccountId) -> Result<Option<String>, StoreError>;
}
