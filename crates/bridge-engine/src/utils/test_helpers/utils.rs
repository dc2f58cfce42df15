use async_trait::async_trait;
use bytes::Bytes;

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use chrono::Utc;
use ledger_gateway::{
    stores::{IdempotentData, IdempotentEngineStore, IdempotentStoreError},
    StatusCode,
};
use reqwest::Client;

use super::fixtures::{ALICE, BOB, NETWORK};
use crate::assembler::TransactionAssembler;
use crate::compliance::ComplianceClient;
use crate::engine::{BridgeEngine, EngineAccounts};
use crate::envelope::{Ed25519EnvelopeSdk, TransactionEnvelope};
use crate::horizon::{LedgerClient, LedgerError, LedgerOperation, SubmitResult};
use crate::operations::{AccountId, AssetBody};
use crate::submitter::DEFAULT_SEQUENCE_CONFLICT_RETRIES;
use crate::utils::types::{
    DeliveryStatus, PaymentStore, PendingSubmission, ReceivedPayment, StoreError,
    SubmissionOutcome, SubmissionStore,
};

// Test Store
#[derive(Clone, Default)]
pub struct TestStore {
    pub sequences: Arc<RwLock<HashMap<AccountId, u64>>>,
    pub submissions: Arc<RwLock<HashMap<(AccountId, u64), PendingSubmission>>>,
    pub payments: Arc<RwLock<HashMap<String, ReceivedPayment>>>,
    pub cursors: Arc<RwLock<HashMap<AccountId, String>>>,
    #[allow(clippy::all)]
    pub cache: Arc<RwLock<HashMap<String, IdempotentData>>>,
    pub cache_hits: Arc<RwLock<u64>>,
    should_fail: Arc<AtomicBool>,
    failing_delivery_updates: Arc<AtomicBool>,
}

impl TestStore {
    /// Makes every store call fail until reset
    pub fn set_failing(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Makes only delivery status updates fail until reset
    pub fn set_failing_delivery_updates(&self, fail: bool) {
        self.failing_delivery_updates.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        Ok(())
    }

    pub fn cached_sequence(&self, account: &AccountId) -> Option<u64> {
        self.sequences.read().get(account).copied()
    }

    pub fn submission(&self, account: &AccountId, sequence: u64) -> Option<PendingSubmission> {
        self.submissions.read().get(&(*account, sequence)).cloned()
    }

    pub fn payment(&self, operation_id: &str) -> Option<ReceivedPayment> {
        self.payments.read().get(operation_id).cloned()
    }

    pub fn payment_count(&self) -> usize {
        self.payments.read().len()
    }

    /// Operation ids of the payments in `status`, sorted
    pub fn payments_with_status(&self, status: DeliveryStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .payments
            .read()
            .values()
            .filter(|p| p.delivery_status == status)
            .map(|p| p.operation_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn set_cursor(&self, account: &AccountId, cursor: &str) {
        self.cursors.write().insert(*account, cursor.to_string());
    }

    pub fn cursor(&self, account: &AccountId) -> Option<String> {
        self.cursors.read().get(account).cloned()
    }
}

#[async_trait]
impl SubmissionStore for TestStore {
    async fn load_sequence(&self, account: &AccountId) -> Result<Option<u64>, StoreError> {
        self.check()?;
        Ok(self.cached_sequence(account))
    }

    async fn save_sequence(&self, account: &AccountId, sequence: u64) -> Result<(), StoreError> {
        self.check()?;
        self.sequences.write().insert(*account, sequence);
        Ok(())
    }

    async fn save_submission(&self, submission: &PendingSubmission) -> Result<(), StoreError> {
        self.check()?;
        self.submissions.write().insert(
            (submission.account, submission.sequence),
            submission.clone(),
        );
        Ok(())
    }

    async fn load_submission(
        &self,
        account: &AccountId,
        sequence: u64,
    ) -> Result<Option<PendingSubmission>, StoreError> {
        self.check()?;
        Ok(self.submission(account, sequence))
    }

    async fn update_submission_outcome(
        &self,
        account: &AccountId,
        sequence: u64,
        outcome: SubmissionOutcome,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut submissions = self.submissions.write();
        let submission = submissions
            .get_mut(&(*account, sequence))
            .ok_or_else(|| StoreError::NotFound(format!("submission {}/{}", account, sequence)))?;
        submission.outcome = outcome;
        Ok(())
    }

    async fn load_pending_submissions(
        &self,
        account: &AccountId,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        self.check()?;
        let mut pending: Vec<PendingSubmission> = self
            .submissions
            .read()
            .values()
            .filter(|s| s.account == *account && s.outcome == SubmissionOutcome::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|s| s.sequence);
        Ok(pending)
    }
}

#[async_trait]
impl PaymentStore for TestStore {
    async fn insert_payment(&self, payment: &ReceivedPayment) -> Result<bool, StoreError> {
        self.check()?;
        let mut payments = self.payments.write();
        if payments.contains_key(&payment.operation_id) {
            return Ok(false);
        }
        payments.insert(payment.operation_id.clone(), payment.clone());
        Ok(true)
    }

    async fn load_payment(
        &self,
        operation_id: &str,
    ) -> Result<Option<ReceivedPayment>, StoreError> {
        self.check()?;
        Ok(self.payment(operation_id))
    }

    async fn update_delivery_status(
        &self,
        operation_id: &str,
        status: DeliveryStatus,
        attempts: u32,
    ) -> Result<(), StoreError> {
        self.check()?;
        if self.failing_delivery_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store unavailable".to_string()));
        }
        let mut payments = self.payments.write();
        let payment = payments
            .get_mut(operation_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", operation_id)))?;
        payment.delivery_status = status;
        payment.delivery_attempts = attempts;
        Ok(())
    }

    async fn load_payments_by_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<ReceivedPayment>, StoreError> {
        self.check()?;
        Ok(self
            .payments_with_status(status)
            .iter()
            .filter_map(|id| self.payment(id))
            .collect())
    }

    async fn save_cursor(&self, account: &AccountId, cursor: &str) -> Result<(), StoreError> {
        self.check()?;
        self.set_cursor(account, cursor);
        Ok(())
    }

    async fn load_cursor(&self, account: &AccountId) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.cursor(account))
    }
}

#[async_trait]
impl IdempotentEngineStore for TestStore {
    async fn load_idempotent_data(
        &self,
        idempotency_key: String,
    ) -> Result<Option<IdempotentData>, IdempotentStoreError> {
        let cache = self.cache.read();
        if let Some(data) = cache.get(&idempotency_key) {
            let mut guard = self.cache_hits.write();
            *guard += 1; // used to test how many times this branch gets executed
            Ok(Some(data.clone()))
        } else {
            Ok(None)
        }
    }

    async fn save_idempotent_data(
        &self,
        idempotency_key: String,
        input_hash: [u8; 32],
        status_code: StatusCode,
        data: Bytes,
    ) -> Result<(), IdempotentStoreError> {
        let mut cache = self.cache.write();
        cache.insert(
            idempotency_key,
            IdempotentData::new(status_code, data, input_hash),
        );
        Ok(())
    }
}

// Test Ledger

/// Scriptable in-memory ledger. Submissions must use exactly the next
/// sequence number of their source account.
#[derive(Clone, Default)]
pub struct TestLedger {
    sequences: Arc<RwLock<HashMap<AccountId, u64>>>,
    operations: Arc<RwLock<Vec<LedgerOperation>>>,
    submitted: Arc<RwLock<Vec<String>>>,
    landed: Arc<RwLock<HashSet<String>>>,
    lost_responses: Arc<AtomicUsize>,
    failures: Arc<Mutex<VecDeque<LedgerError>>>,
    failing_pages: Arc<AtomicUsize>,
    sequence_loads: Arc<AtomicUsize>,
    delay: Arc<RwLock<Duration>>,
}

impl TestLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sequence(&self, account: &AccountId, sequence: u64) {
        self.sequences.write().insert(*account, sequence);
    }

    pub fn sequence(&self, account: &AccountId) -> Option<u64> {
        self.sequences.read().get(account).copied()
    }

    /// Delays every sequence query and submission
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }

    pub fn sequence_loads(&self) -> usize {
        self.sequence_loads.load(Ordering::SeqCst)
    }

    /// Envelopes the ledger accepted, in order
    pub fn submitted(&self) -> Vec<String> {
        self.submitted.read().clone()
    }

    /// Answers the next submissions with `failures`, in order
    pub fn fail_submissions(&self, failures: Vec<LedgerError>) {
        self.failures.lock().extend(failures);
    }

    /// Applies the next `count` submissions but answers them with a
    /// transport error
    pub fn lose_responses(&self, count: usize) {
        self.lost_responses.store(count, Ordering::SeqCst);
    }

    /// Fails the next `count` page requests
    pub fn fail_pages(&self, count: usize) {
        self.failing_pages.store(count, Ordering::SeqCst);
    }

    pub fn push_operations(&self, operations: Vec<LedgerOperation>) {
        self.operations.write().extend(operations);
    }

    async fn wait(&self) {
        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn involving(&self, account: &AccountId) -> Vec<LedgerOperation> {
        let account = account.to_string();
        self.operations
            .read()
            .iter()
            .filter(|op| {
                op.from.as_deref() == Some(account.as_str())
                    || op.to.as_deref() == Some(account.as_str())
            })
            .cloned()
            .collect()
    }
}

fn token(cursor: &str) -> u64 {
    cursor.parse().unwrap_or(0)
}

#[async_trait]
impl LedgerClient for TestLedger {
    async fn load_sequence(&self, account: &AccountId) -> Result<u64, LedgerError> {
        self.sequence_loads.fetch_add(1, Ordering::SeqCst);
        self.wait().await;
        self.sequence(account)
            .ok_or_else(|| LedgerError::AccountNotFound(account.to_string()))
    }

    async fn submit(&self, envelope: &str) -> Result<SubmitResult, LedgerError> {
        self.wait().await;
        if let Some(failure) = self.failures.lock().pop_front() {
            return Err(failure);
        }
        let decoded = TransactionEnvelope::from_base64(envelope)
            .map_err(|_| LedgerError::Rejected("tx_malformed".to_string()))?;
        let hash = decoded
            .tx
            .hash(NETWORK)
            .map_err(|_| LedgerError::Rejected("tx_malformed".to_string()))?;
        let mut sequences = self.sequences.write();
        let current = sequences
            .get_mut(&decoded.tx.source_account)
            .ok_or_else(|| LedgerError::Rejected("tx_no_source_account".to_string()))?;
        if decoded.tx.sequence != *current + 1 {
            return Err(LedgerError::SequenceConflict);
        }
        *current = decoded.tx.sequence;
        let hash = hex::encode(hash);
        self.landed.write().insert(hash.clone());
        let mut submitted = self.submitted.write();
        submitted.push(envelope.to_string());
        let lost = self.lost_responses.load(Ordering::SeqCst);
        if lost > 0 {
            self.lost_responses.store(lost - 1, Ordering::SeqCst);
            return Err(LedgerError::Transport("connection reset".to_string()));
        }
        Ok(SubmitResult {
            hash,
            ledger: Some(submitted.len() as u64),
        })
    }

    async fn transaction_landed(&self, hash: &str) -> Result<bool, LedgerError> {
        self.wait().await;
        Ok(self.landed.read().contains(hash))
    }

    async fn operations_page(
        &self,
        account: &AccountId,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<Vec<LedgerOperation>, LedgerError> {
        let failing = self.failing_pages.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_pages.store(failing - 1, Ordering::SeqCst);
            return Err(LedgerError::Transport("connection reset".to_string()));
        }
        let after = cursor.map(token).unwrap_or(0);
        Ok(self
            .involving(account)
            .into_iter()
            .filter(|op| token(&op.paging_token) > after)
            .take(limit as usize)
            .collect())
    }

    async fn latest_cursor(&self, account: &AccountId) -> Result<Option<String>, LedgerError> {
        Ok(self
            .involving(account)
            .last()
            .map(|op| op.paging_token.clone()))
    }
}

// Fixtures

/// A native payment of 10 units, also used as its paging token
pub fn ledger_payment(id: &str, from: &str, to: &str) -> LedgerOperation {
    LedgerOperation {
        id: id.to_string(),
        paging_token: id.to_string(),
        kind: "payment".to_string(),
        transaction_hash: format!("hash{}", id),
        from: Some(from.to_string()),
        to: Some(to.to_string()),
        amount: Some("10.0000000".to_string()),
        asset_type: Some("native".to_string()),
        asset_code: None,
        asset_issuer: None,
    }
}

/// A recorded, undelivered payment from Bob to Alice
pub fn test_payment(id: &str) -> ReceivedPayment {
    ReceivedPayment {
        operation_id: id.to_string(),
        account: ALICE.parse().unwrap(),
        amount: "10.0000000".to_string(),
        asset: AssetBody {
            code: "native".to_string(),
            issuer: None,
        },
        from: BOB.to_string(),
        cursor: id.to_string(),
        transaction_hash: format!("hash{}", id),
        processed_at: Utc::now(),
        delivery_status: DeliveryStatus::Pending,
        delivery_attempts: 0,
        compliance_status: None,
    }
}

// Helper to create a new engine
pub fn test_engine(
    store: TestStore,
    ledger: TestLedger,
    accounts: EngineAccounts,
) -> BridgeEngine<TestStore, TestLedger> {
    let assembler = TransactionAssembler::new(Arc::new(Ed25519EnvelopeSdk::default()), NETWORK);
    BridgeEngine::new(
        store,
        ledger,
        assembler,
        ComplianceClient::new(Client::new(), None),
        accounts,
        DEFAULT_SEQUENCE_CONFLICT_RETRIES,
        Duration::from_secs(1),
    )
}

/// Polls `condition` until it holds, panicking after five seconds
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
