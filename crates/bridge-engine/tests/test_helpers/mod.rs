#![allow(dead_code)]

use async_trait::async_trait;
use bridge_engine::{
    assembler::TransactionAssembler,
    compliance::ComplianceClient,
    envelope::Ed25519EnvelopeSdk,
    horizon::HorizonClient,
    operations::{AccountId, SecretSeed},
    utils::types::{
        DeliveryStatus, PaymentStore, PendingSubmission, ReceivedPayment, StoreError,
        SubmissionOutcome, SubmissionStore,
    },
    BridgeEngine, EngineAccounts,
};
use bytes::Bytes;
use ledger_gateway::{
    stores::{IdempotentData, IdempotentEngineStore, IdempotentStoreError},
    StatusCode,
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc, time::Duration};

pub const NETWORK: &str = "Test SDF Network ; September 2015";

pub const ALICE: &str = "GDK36SR7ZTTRPMBYRPGCOSPLYFEK3GLJWI7UL3Q3MBP5LB3YK5VMI6ET";
pub const ALICE_SEED: &str = "SAV5QBWJP4HABLY2D7BTFD5HMOUSNFZDZDNY7LCPSOXXDWYYNVXJAO6K";
pub const BOB: &str = "GDWMDNMHE7Z7CKZRSSEBVHWLTXQLFDHHWIDSGDMOSMH6DPHHLYSWZ7H4";
pub const ISSUER: &str = "GC457CLNAUSJLWOHGRUD3VLBXKGOM3JJKKGMXPRJNR6BAJB5K3PXYX3Z";
pub const BASE: &str = "GBQ7QDO3NZDP6KPYBQMXDF4CK3KWZXGZPMHXQXLAMIE277DBUQTABGIH";
pub const BASE_SEED: &str = "SDFOMYQXF7KFBOYM24IKO2IHTQC37ROY4NPPUZLW5XD5AN327XKKEAU3";

pub static ALICE_ID: Lazy<AccountId> = Lazy::new(|| ALICE.parse().unwrap());
pub static BASE_ID: Lazy<AccountId> = Lazy::new(|| BASE.parse().unwrap());

/// Bridge state kept in memory, shared between clones.
#[derive(Clone, Default)]
pub struct MemoryStore {
    sequences: Arc<RwLock<HashMap<AccountId, u64>>>,
    submissions: Arc<RwLock<HashMap<(AccountId, u64), PendingSubmission>>>,
    payments: Arc<RwLock<HashMap<String, ReceivedPayment>>>,
    cursors: Arc<RwLock<HashMap<AccountId, String>>>,
    idempotency: Arc<RwLock<HashMap<String, IdempotentData>>>,
}

impl MemoryStore {
    pub fn payment(&self, operation_id: &str) -> Option<ReceivedPayment> {
        self.payments.read().get(operation_id).cloned()
    }

    pub fn payment_count(&self) -> usize {
        self.payments.read().len()
    }

    pub fn cursor(&self, account: &AccountId) -> Option<String> {
        self.cursors.read().get(account).cloned()
    }

    pub fn submission(&self, account: &AccountId, sequence: u64) -> Option<PendingSubmission> {
        self.submissions.read().get(&(*account, sequence)).cloned()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn load_sequence(&self, account: &AccountId) -> Result<Option<u64>, StoreError> {
        Ok(self.sequences.read().get(account).copied())
    }

    async fn save_sequence(&self, account: &AccountId, sequence: u64) -> Result<(), StoreError> {
        self.sequences.write().insert(*account, sequence);
        Ok(())
    }

    async fn save_submission(&self, submission: &PendingSubmission) -> Result<(), StoreError> {
        self.submissions
            .write()
            .insert((submission.account, submission.sequence), submission.clone());
        Ok(())
    }

    async fn load_submission(
        &self,
        account: &AccountId,
        sequence: u64,
    ) -> Result<Option<PendingSubmission>, StoreError> {
        Ok(self.submission(account, sequence))
    }

    async fn update_submission_outcome(
        &self,
        account: &AccountId,
        sequence: u64,
        outcome: SubmissionOutcome,
    ) -> Result<(), StoreError> {
        match self.submissions.write().get_mut(&(*account, sequence)) {
            Some(submission) => {
                submission.outcome = outcome;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("{}:{}", account, sequence))),
        }
    }

    async fn load_pending_submissions(
        &self,
        account: &AccountId,
    ) -> Result<Vec<PendingSubmission>, StoreError> {
        let mut pending: Vec<_> = self
            .submissions
            .read()
            .values()
            .filter(|s| &s.account == account && s.outcome == SubmissionOutcome::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|s| s.sequence);
        Ok(pending)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: &ReceivedPayment) -> Result<bool, StoreError> {
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
        Ok(self.payment(operation_id))
    }

    async fn update_delivery_status(
        &self,
        operation_id: &str,
        status: DeliveryStatus,
        attempts: u32,
    ) -> Result<(), StoreError> {
        match self.payments.write().get_mut(operation_id) {
            Some(payment) => {
                payment.delivery_status = status;
                payment.delivery_attempts = attempts;
                Ok(())
            }
            None => Err(StoreError::NotFound(operation_id.to_string())),
        }
    }

    async fn load_payments_by_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<ReceivedPayment>, StoreError> {
        Ok(self
            .payments
            .read()
            .values()
            .filter(|p| p.delivery_status == status)
            .cloned()
            .collect())
    }

    async fn save_cursor(&self, account: &AccountId, cursor: &str) -> Result<(), StoreError> {
        self.cursors.write().insert(*account, cursor.to_string());
        Ok(())
    }

    async fn load_cursor(&self, account: &AccountId) -> Result<Option<String>, StoreError> {
        Ok(self.cursor(account))
    }
}

#[async_trait]
impl IdempotentEngineStore for MemoryStore {
    async fn load_idempotent_data(
        &self,
        idempotency_key: String,
    ) -> Result<Option<IdempotentData>, IdempotentStoreError> {
        Ok(self.idempotency.read().get(&idempotency_key).cloned())
    }

    async fn save_idempotent_data(
        &self,
        idempotency_key: String,
        input_hash: [u8; 32],
        status_code: StatusCode,
        data: Bytes,
    ) -> Result<(), IdempotentStoreError> {
        self.idempotency.write().insert(
            idempotency_key,
            IdempotentData::new(status_code, data, input_hash),
        );
        Ok(())
    }
}

pub fn horizon(url: &str) -> HorizonClient {
    HorizonClient::new(url.parse().unwrap(), Duration::from_secs(5)).unwrap()
}

/// An engine paying from `BASE` through the Horizon server at `url`.
pub fn bridge_engine(store: MemoryStore, url: &str) -> BridgeEngine<MemoryStore, HorizonClient> {
    let assembler = TransactionAssembler::new(Arc::new(Ed25519EnvelopeSdk::default()), NETWORK);
    let accounts = EngineAccounts {
        base_seed: Some(SecretSeed::parse(BASE_SEED).unwrap()),
        ..Default::default()
    };
    BridgeEngine::new(
        store,
        horizon(url),
        assembler,
        ComplianceClient::new(reqwest::Client::new(), None),
        accounts,
        1,
        Duration::from_secs(5),
    )
}

/// A payment to `ALICE` as Horizon lists it.
pub fn payment_record(id: &str) -> Value {
    json!({
        "id": id,
        "paging_token": id,
        "type": "payment",
        "transaction_hash": format!("tx{}", id),
        "from": BOB,
        "to": ALICE,
        "amount": "10.0000000",
        "asset_type": "native",
    })
}

pub fn page(records: Vec<Value>) -> String {
    json!({"_embedded": {"records": records}}).to_string()
}

pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
