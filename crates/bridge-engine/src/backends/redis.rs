use crate::operations::AccountId;
use crate::utils::types::{
    DeliveryStatus, PaymentStore, PendingSubmission, ReceivedPayment, StoreError,
    SubmissionOutcome, SubmissionStore,
};

use futures::future::TryFutureExt;

use bytes::Bytes;
use ledger_gateway::{
    stores::{IdempotentData, IdempotentEngineStore, IdempotentStoreError},
    StatusCode,
};

use async_trait::async_trait;
use redis_crate::{self as redis, aio::MultiplexedConnection, AsyncCommands, ConnectionInfo};

use log::{error, trace};
use serde::{de::DeserializeOwned, Serialize};

// Sequence number last used per account, so that submissions do not have to
// ask the ledger every time.
static SEQUENCES_KEY: &str = "sequences";
// Paging token up to which the operations of an account were processed.
static CURSORS_KEY: &str = "cursors";
// Received payments by operation id. Inserted with HSETNX so that an operation
// seen twice is only recorded once.
static PAYMENTS_KEY: &str = "payments";
static SUBMISSIONS_KEY: &str = "submissions";
static IDEMPOTENCY_KEY: &str = "idempotency";
static BRIDGE_KEY: &str = "bridge";

// Idempotent responses are kept for a day
const IDEMPOTENCY_EXPIRY_SECONDS: u64 = 86400;

fn bridge_key(name: &str) -> String {
    format!("{}:{}", BRIDGE_KEY, name)
}

fn submissions_key(account: &AccountId) -> String {
    format!("{}:{}:{}", BRIDGE_KEY, SUBMISSIONS_KEY, account)
}

fn idempotency_key(key: &str) -> String {
    format!("{}:{}:{}", BRIDGE_KEY, IDEMPOTENCY_KEY, key)
}

fn encode<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Corrupt(err.to_string()))
}

fn decode<T: DeserializeOwned>(what: &str, value: &str) -> Result<T, StoreError> {
    serde_json::from_str(value).map_err(|err| {
        error!("Could not decode {}: {}", what, err);
        StoreError::Corrupt(what.to_string())
    })
}

fn connection_error(context: String) -> impl FnOnce(redis::RedisError) -> StoreError {
    move |err| {
        error!("{}: {:?}", context, err);
        StoreError::Connection(err.to_string())
    }
}

pub struct BridgeRedisStoreBuilder {
    redis_url: ConnectionInfo,
}

impl BridgeRedisStoreBuilder {
    pub fn new(redis_url: ConnectionInfo) -> Self {
        BridgeRedisStoreBuilder { redis_url }
    }

    pub async fn connect(&self) -> Result<BridgeRedisStore, StoreError> {
        let client = redis::Client::open(self.redis_url.clone())
            .map_err(connection_error("Error creating Redis client".to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .map_err(connection_error(format!(
                "Error connecting to Redis at {:?}",
                self.redis_url.addr
            )))
            .await?;
        Ok(BridgeRedisStore { connection })
    }
}

/// A bridge store that uses Redis as its underlying database.
///
/// Values are JSON encoded. Every account gets its own submissions hash, the
/// rest of the data lives in shared hashes keyed by account or operation id.
#[derive(Clone)]
pub struct BridgeRedisStore {
    connection: MultiplexedConnection,
}

#[async_trait]
impl SubmissionStore for BridgeRedisStore {
    async fn load_sequence(&self, account: &AccountId) -> Result<Option<u64>, StoreError> {
        let mut connection = self.connection.clone();
        connection
            .hget(bridge_key(SEQUENCES_KEY), account.to_string())
            .map_err(connection_error(format!("Error loading sequence of {}", account)))
            .await
    }

    async fn save_sequence(&self, account: &AccountId, sequence: u64) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(bridge_key(SEQUENCES_KEY), account.to_string(), sequence)
            .map_err(connection_error(format!(
                "Error saving sequence {} of {}",
                sequence, account
            )))
            .await?;
        trace!("Saved sequence {} of {}", sequence, account);
        Ok(())
    }

    async fn save_submission(&self, submission: &PendingSubmission) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(
                submissions_key(&submission.account),
                submission.sequence,
                encode(submission)?,
            )
            .map_err(connection_error(format!(
                "Error saving submission {} of {}",
                submission.sequence, submission.account
            )))
            .await?;
        Ok(())
    }

    async fn load_submission(
        &self,
        account: &AccountId,
        sequence: u64,
    ) -> Result<Option<PendingSubmission>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection
            .hget(submissions_key(account), sequence)
            .map_err(connection_error(format!(
                "Error loading submission {} of {}",
                sequence, account
            )))
            .await?;
        raw.map(|raw| decode("submission", &raw)).transpose()
    }

    async fn update_submission_outcome(
        &self,
        account: &AccountId,
        sequence: u64,
        outcome: SubmissionOutcome,
    ) -> Result<(), StoreError> {
        let mut submission = self
            .load_submission(account, sequence)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("submission {} of {}", sequence, account)))?;
        submission.outcome = outcome;
        self.save_submission(&submission).await
    }

    async fn load_pending_submissions(
        &self,
        account: &AccountId,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Vec<String> = connection
            .hvals(submissions_key(account))
            .map_err(connection_error(format!(
                "Error loading submissions of {}",
                account
            )))
            .await?;
        let mut pending = Vec::new();
        for raw in raw {
            let submission: PendingSubmission = decode("submission", &raw)?;
            if submission.outcome == SubmissionOutcome::Pending {
                pending.push(submission);
            }
        }
        pending.sort_by_key(|submission| submission.sequence);
        Ok(pending)
    }
}

#[async_trait]
impl PaymentStore for BridgeRedisStore {
    async fn insert_payment(&self, payment: &ReceivedPayment) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();
        let inserted: bool = connection
            .hset_nx(
                bridge_key(PAYMENTS_KEY),
                &payment.operation_id,
                encode(payment)?,
            )
            .map_err(connection_error(format!(
                "Error saving payment {}",
                payment.operation_id
            )))
            .await?;
        Ok(inserted)
    }

    async fn load_payment(
        &self,
        operation_id: &str,
    ) -> Result<Option<ReceivedPayment>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection
            .hget(bridge_key(PAYMENTS_KEY), operation_id)
            .map_err(connection_error(format!("Error loading payment {}", operation_id)))
            .await?;
        raw.map(|raw| decode("payment", &raw)).transpose()
    }

    async fn update_delivery_status(
        &self,
        operation_id: &str,
        status: DeliveryStatus,
        attempts: u32,
    ) -> Result<(), StoreError> {
        let mut payment = self
            .load_payment(operation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", operation_id)))?;
        payment.delivery_status = status;
        payment.delivery_attempts = attempts;
        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(bridge_key(PAYMENTS_KEY), operation_id, encode(&payment)?)
            .map_err(connection_error(format!(
                "Error saving status of payment {}",
                operation_id
            )))
            .await?;
        Ok(())
    }

    async fn load_payments_by_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<ReceivedPayment>, StoreError> {
        let mut connection = self.connection.clone();
        let raw: Vec<String> = connection
            .hvals(bridge_key(PAYMENTS_KEY))
            .map_err(connection_error("Error loading payments".to_string()))
            .await?;
        let mut payments = Vec::new();
        for raw in raw {
            let payment: ReceivedPayment = decode("payment", &raw)?;
            if payment.delivery_status == status {
                payments.push(payment);
            }
        }
        payments.sort_by(|a, b| a.processed_at.cmp(&b.processed_at));
        Ok(payments)
    }

    async fn save_cursor(&self, account: &AccountId, cursor: &str) -> Result<(), StoreError> {
        let mut connection = self.connection.clone();
        let _: () = connection
            .hset(bridge_key(CURSORS_KEY), account.to_string(), cursor)
            .map_err(connection_error(format!(
                "Error saving cursor {} of {}",
                cursor, account
            )))
            .await?;
        Ok(())
    }

    async fn load_cursor(&self, account: &AccountId) -> Result<Option<String>, StoreError> {
        let mut connection = self.connection.clone();
        connection
            .hget(bridge_key(CURSORS_KEY), account.to_string())
            .map_err(connection_error(format!("Error loading cursor of {}", account)))
            .await
    }
}

#[async_trait]
impl IdempotentEngineStore for BridgeRedisStore {
    async fn load_idempotent_data(
        &self,
        idempotency_key_value: String,
    ) -> Result<Option<IdempotentData>, IdempotentStoreError> {
        let mut connection = self.connection.clone();
        let raw: Option<String> = connection
            .get(idempotency_key(&idempotency_key_value))
            .map_err(|err| {
                error!(
                    "Error loading idempotency key {}: {:?}",
                    idempotency_key_value, err
                );
                IdempotentStoreError(err.to_string())
            })
            .await?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(|err| IdempotentStoreError(err.to_string())))
            .transpose()
    }

    async fn save_idempotent_data(
        &self,
        idempotency_key_value: String,
        input_hash: [u8; 32],
        status_code: StatusCode,
        data: Bytes,
    ) -> Result<(), IdempotentStoreError> {
        let data = IdempotentData::new(status_code, data, input_hash);
        let raw = serde_json::to_string(&data).map_err(|err| IdempotentStoreError(err.to_string()))?;
        let mut connection = self.connection.clone();
        let _: () = connection
            .set_ex(
                idempotency_key(&idempotency_key_value),
                raw,
                IDEMPOTENCY_EXPIRY_SECONDS,
            )
            .map_err(|err| {
                error!(
                    "Error saving idempotency key {}: {:?}",
                    idempotency_key_value, err
                );
                IdempotentStoreError(err.to_string())
            })
            .await?;
        trace!(
            "Cached {:?}: {:?}, {:?}",
            idempotency_key_value,
            status_code,
            data.body
        );
        Ok(())
    }
}
