use crate::assembler::TransactionAssembler;
use crate::errors::GatewayError;
use crate::horizon::{LedgerClient, LedgerError};
use crate::operations::{AccountId, OperationMutation, SecretSeed};
use crate::utils::types::{PendingSubmission, SubmissionOutcome, SubmissionStore};
use chrono::Utc;
use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const BAD_SEQUENCE: &str = "tx_bad_seq";
const NOT_ON_LEDGER: &str = "not found on ledger";
const SEQUENCE_TAKEN: &str = "sequence used by another transaction";

/// Sequence conflicts tolerated per submission before giving up.
pub const DEFAULT_SEQUENCE_CONFLICT_RETRIES: u32 = 1;

/// Returned to the caller once the ledger accepted a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub hash: String,
    pub sequence: u64,
}

/// One async mutex per account, created on first use.
#[derive(Clone, Default)]
struct KeyedLocks {
    locks: Arc<Mutex<HashMap<AccountId, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    async fn lock(&self, account: AccountId) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().entry(account).or_default().clone();
        lock.lock_owned().await
    }
}

/// Submits transactions for accounts the bridge holds seeds for.
///
/// Submissions for one account are serialized: the lock is held while the
/// next sequence number is read, the transaction signed, recorded as pending
/// and sent, and until the cached sequence is updated. Different accounts
/// proceed concurrently.
#[derive(Clone)]
pub struct TransactionSubmitter<S, L> {
    store: S,
    ledger: L,
    assembler: TransactionAssembler,
    locks: KeyedLocks,
    sequence_conflict_retries: u32,
    timeout: Duration,
}

impl<S, L> TransactionSubmitter<S, L>
where
    S: SubmissionStore + Clone + Send + Sync + 'static,
    L: LedgerClient + Clone + Send + Sync + 'static,
{
    pub fn new(
        store: S,
        ledger: L,
        assembler: TransactionAssembler,
        sequence_conflict_retries: u32,
        timeout: Duration,
    ) -> Self {
        TransactionSubmitter {
            store,
            ledger,
            assembler,
            locks: KeyedLocks::default(),
            sequence_conflict_retries,
            timeout,
        }
    }

    /// Reconciles any submissions left pending by a previous run and loads
    /// the account's sequence number from the ledger.
    pub async fn init_account(&self, seed: &SecretSeed) -> Result<(), GatewayError> {
        let account = seed.account_id();
        let _guard = self.locks.lock(account).await;
        let sequence = self.reconcile(&account).await?;
        info!("Initialized {} at sequence {}", account, sequence);
        Ok(())
    }

    /// Signs `mutations` with `seed` and submits them from the seed's account.
    pub async fn submit(
        &self,
        seed: &SecretSeed,
        mutations: Vec<OperationMutation>,
    ) -> Result<SubmissionReceipt, GatewayError> {
        let account = seed.account_id();
        let _guard = self.locks.lock(account).await;

        let mut cached = match self.store.load_sequence(&account).await.map_err(|err| {
            error!("Could not load cached sequence of {}: {}", account, err);
            GatewayError::Internal(err.to_string())
        })? {
            Some(sequence) => sequence,
            None => {
                debug!("Lazily initializing {}", account);
                self.reconcile(&account).await?
            }
        };

        let mut conflicts = 0;
        loop {
            let sequence = cached.checked_add(1).ok_or_else(|| {
                GatewayError::Internal(format!("sequence overflow for {}", account))
            })?;
            // An earlier submission with an unknown outcome may hold this sequence
            if let Some(previous) = self.pending_at(&account, sequence).await? {
                let current = self.ledger_sequence(&account).await?;
                self.resolve(&previous, current).await?;
                if previous.sequence <= current {
                    self.save_sequence(&account, current).await?;
                    cached = current;
                    continue;
                }
            }
            let signed = self.assembler.assemble(
                account,
                sequence,
                mutations.clone(),
                std::slice::from_ref(seed),
            )?;
            let submission = PendingSubmission {
                account,
                sequence,
                envelope: signed.envelope.clone(),
                hash: signed.hash.clone(),
                submitted_at: Utc::now(),
                outcome: SubmissionOutcome::Pending,
            };
            self.store
                .save_submission(&submission)
                .await
                .map_err(|err| {
                    error!(
                        "Could not record submission of {} at sequence {}: {}",
                        account, sequence, err
                    );
                    GatewayError::Internal(err.to_string())
                })?;

            trace!("Submitting {} for {} at sequence {}", signed.hash, account, sequence);
            let result = tokio::time::timeout(self.timeout, self.ledger.submit(&signed.envelope))
                .await
                .unwrap_or(Err(LedgerError::Timeout));
            match result {
                Ok(accepted) => {
                    debug!(
                        "Transaction {} of {} at sequence {} accepted in ledger {:?}",
                        signed.hash, account, sequence, accepted.ledger
                    );
                    self.save_sequence(&account, sequence).await?;
                    self.set_outcome(&account, sequence, SubmissionOutcome::Confirmed)
                        .await?;
                    return Ok(SubmissionReceipt {
                        hash: signed.hash,
                        sequence,
                    });
                }
                Err(LedgerError::SequenceConflict) => {
                    self.set_outcome(
                        &account,
                        sequence,
                        SubmissionOutcome::Rejected(BAD_SEQUENCE.to_string()),
                    )
                    .await?;
                    if conflicts >= self.sequence_conflict_retries {
                        error!(
                            "Sequence {} of {} still conflicting after {} retries",
                            sequence, account, conflicts
                        );
                        return Err(GatewayError::Internal(format!(
                            "sequence conflict for {} at {}",
                            account, sequence
                        )));
                    }
                    conflicts += 1;
                    warn!(
                        "Sequence {} of {} already used, reloading from ledger",
                        sequence, account
                    );
                    cached = self.ledger_sequence(&account).await?;
                    self.save_sequence(&account, cached).await?;
                }
                Err(LedgerError::Rejected(code)) => {
                    error!(
                        "Transaction of {} at sequence {} rejected: {}",
                        account, sequence, code
                    );
                    self.set_outcome(&account, sequence, SubmissionOutcome::Rejected(code.clone()))
                        .await?;
                    return Err(GatewayError::Internal(code));
                }
                Err(err) => {
                    // The transaction may still land, leave it for reconciliation
                    error!(
                        "Submission of {} at sequence {} failed: {}",
                        account, sequence, err
                    );
                    return Err(GatewayError::Internal(err.to_string()));
                }
            }
        }
    }

    /// Resolves pending submissions of `account` against the ledger, then
    /// caches the ledger's sequence.
    async fn reconcile(&self, account: &AccountId) -> Result<u64, GatewayError> {
        let pending = self
            .store
            .load_pending_submissions(account)
            .await
            .map_err(|err| {
                error!("Could not load pending submissions of {}: {}", account, err);
                GatewayError::Internal(err.to_string())
            })?;
        let current = self.ledger_sequence(account).await?;
        for submission in pending {
            self.resolve(&submission, current).await?;
        }
        self.save_sequence(account, current).await?;
        Ok(current)
    }

    /// Settles a pending submission given the ledger's `current` sequence.
    /// It is confirmed only if its own hash landed. A sequence the ledger
    /// moved past without it was taken by another transaction.
    async fn resolve(
        &self,
        submission: &PendingSubmission,
        current: u64,
    ) -> Result<(), GatewayError> {
        let outcome = if submission.sequence > current {
            SubmissionOutcome::Rejected(NOT_ON_LEDGER.to_string())
        } else if self.landed(&submission.hash).await? {
            SubmissionOutcome::Confirmed
        } else {
            SubmissionOutcome::Rejected(SEQUENCE_TAKEN.to_string())
        };
        info!(
            "Pending submission {} of {} at sequence {} resolved as {:?}",
            submission.hash, submission.account, submission.sequence, outcome
        );
        self.set_outcome(&submission.account, submission.sequence, outcome)
            .await
    }

    async fn pending_at(
        &self,
        account: &AccountId,
        sequence: u64,
    ) -> Result<Option<PendingSubmission>, GatewayError> {
        let submission = self
            .store
            .load_submission(account, sequence)
            .await
            .map_err(|err| {
                error!(
                    "Could not load submission of {} at sequence {}: {}",
                    account, sequence, err
                );
                GatewayError::Internal(err.to_string())
            })?;
        Ok(submission.filter(|s| s.outcome == SubmissionOutcome::Pending))
    }

    async fn landed(&self, hash: &str) -> Result<bool, GatewayError> {
        tokio::time::timeout(self.timeout, self.ledger.transaction_landed(hash))
            .await
            .unwrap_or(Err(LedgerError::Timeout))
            .map_err(|err| {
                error!("Could not look up transaction {}: {}", hash, err);
                GatewayError::Internal(err.to_string())
            })
    }

    async fn ledger_sequence(&self, account: &AccountId) -> Result<u64, GatewayError> {
        tokio::time::timeout(self.timeout, self.ledger.load_sequence(account))
            .await
            .unwrap_or(Err(LedgerError::Timeout))
            .map_err(|err| {
                error!("Could not load sequence number of {}: {}", account, err);
                GatewayError::Internal(err.to_string())
            })
    }

    async fn save_sequence(&self, account: &AccountId, sequence: u64) -> Result<(), GatewayError> {
        self.store
            .save_sequence(account, sequence)
            .await
            .map_err(|err| {
                error!("Could not save sequence {} of {}: {}", sequence, account, err);
                GatewayError::Internal(err.to_string())
            })
    }

    async fn set_outcome(
        &self,
        account: &AccountId,
        sequence: u64,
        outcome: SubmissionOutcome,
    ) -> Result<(), GatewayError> {
        self.store
            .update_submission_outcome(account, sequence, outcome)
            .await
            .map_err(|err| {
                error!(
                    "Could not update submission of {} at sequence {}: {}",
                    account, sequence, err
                );
                GatewayError::Internal(err.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Ed25519EnvelopeSdk, TransactionEnvelope};
    use crate::operations::{Amount, Asset, MutationBody};
    use crate::utils::test_helpers::{
        fixtures::{ALICE_SEED, BOB, BOB_SEED, NETWORK},
        TestLedger, TestStore,
    };

    fn submitter(store: TestStore, ledger: TestLedger) -> TransactionSubmitter<TestStore, TestLedger> {
        let assembler = TransactionAssembler::new(Arc::new(Ed25519EnvelopeSdk::default()), NETWORK);
        TransactionSubmitter::new(
            store,
            ledger,
            assembler,
            DEFAULT_SEQUENCE_CONFLICT_RETRIES,
            Duration::from_millis(500),
        )
    }

    fn payment() -> Vec<OperationMutation> {
        vec![OperationMutation {
            source: None,
            body: MutationBody::Payment {
                destination: BOB.parse().unwrap(),
                amount: Amount::from_stroops(10),
                asset: Asset::Native,
            },
        }]
    }

    fn alice() -> SecretSeed {
        SecretSeed::parse(ALICE_SEED).unwrap()
    }

    #[tokio::test]
    async fn sequential_submissions_use_cached_sequence() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        ledger.set_sequence(&alice().account_id(), 41);
        let submitter = submitter(store.clone(), ledger.clone());
        submitter.init_account(&alice()).await.unwrap();

        let first = submitter.submit(&alice(), payment()).await.unwrap();
        let second = submitter.submit(&alice(), payment()).await.unwrap();
        assert_eq!(first.sequence, 42);
        assert_eq!(second.sequence, 43);
        // only the initialization asked the ledger
        assert_eq!(ledger.sequence_loads(), 1);
        assert_eq!(store.cached_sequence(&alice().account_id()), Some(43));
        assert_eq!(
            store.submission(&alice().account_id(), 42).unwrap().outcome,
            SubmissionOutcome::Confirmed
        );

        let envelope = TransactionEnvelope::from_base64(&ledger.submitted()[1]).unwrap();
        assert_eq!(envelope.tx.sequence, 43);
    }

    #[tokio::test]
    async fn concurrent_submissions_for_one_account_are_serialized() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        ledger.set_sequence(&alice().account_id(), 10);
        ledger.set_delay(Duration::from_millis(20));
        let submitter = submitter(store, ledger.clone());

        let (first, second) = (alice(), alice());
        let (a, b) = tokio::join!(
            submitter.submit(&first, payment()),
            submitter.submit(&second, payment())
        );
        let mut sequences = vec![a.unwrap().sequence, b.unwrap().sequence];
        sequences.sort_unstable();
        assert_eq!(sequences, vec![11, 12]);
        assert_eq!(ledger.sequence(&alice().account_id()), Some(12));
    }

    #[tokio::test]
    async fn accounts_are_initialized_lazily() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let bob = SecretSeed::parse(BOB_SEED).unwrap();
        ledger.set_sequence(&bob.account_id(), 5);
        let receipt = submitter(store, ledger).submit(&bob, payment()).await.unwrap();
        assert_eq!(receipt.sequence, 6);
    }

    #[tokio::test]
    async fn refreshes_sequence_after_a_conflict() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let account = alice().account_id();
        ledger.set_sequence(&account, 41);
        let submitter = submitter(store.clone(), ledger.clone());
        submitter.init_account(&alice()).await.unwrap();

        // Someone else used the account behind our back
        ledger.set_sequence(&account, 50);
        let receipt = submitter.submit(&alice(), payment()).await.unwrap();
        assert_eq!(receipt.sequence, 51);
        assert_eq!(
            store.submission(&account, 42).unwrap().outcome,
            SubmissionOutcome::Rejected("tx_bad_seq".to_string())
        );
        assert_eq!(store.cached_sequence(&account), Some(51));
    }

    #[tokio::test]
    async fn gives_up_after_repeated_conflicts() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let account = alice().account_id();
        ledger.set_sequence(&account, 1);
        ledger.fail_submissions(vec![LedgerError::SequenceConflict, LedgerError::SequenceConflict]);
        let submitter = submitter(store, ledger.clone());

        let err = submitter.submit(&alice(), payment()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Internal(_)));
        assert!(ledger.submitted().is_empty());
    }

    #[tokio::test]
    async fn rejections_leave_the_cache_alone() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let account = alice().account_id();
        ledger.set_sequence(&account, 7);
        ledger.fail_submissions(vec![LedgerError::Rejected("tx_insufficient_balance".into())]);
        let submitter = submitter(store.clone(), ledger);

        assert!(submitter.submit(&alice(), payment()).await.is_err());
        assert_eq!(store.cached_sequence(&account), Some(7));
        assert_eq!(
            store.submission(&account, 8).unwrap().outcome,
            SubmissionOutcome::Rejected("tx_insufficient_balance".to_string())
        );
    }

    #[tokio::test]
    async fn transport_failures_stay_pending() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let account = alice().account_id();
        ledger.set_sequence(&account, 7);
        ledger.fail_submissions(vec![LedgerError::Transport("connection reset".into())]);
        let submitter = submitter(store.clone(), ledger);

        assert!(submitter.submit(&alice(), payment()).await.is_err());
        assert_eq!(
            store.submission(&account, 8).unwrap().outcome,
            SubmissionOutcome::Pending
        );
    }

    #[tokio::test]
    async fn landed_submission_is_confirmed_before_the_next_one() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let account = alice().account_id();
        ledger.set_sequence(&account, 7);
        ledger.lose_responses(1);
        let submitter = submitter(store.clone(), ledger.clone());

        // The transaction lands but its answer never arrives
        assert!(submitter.submit(&alice(), payment()).await.is_err());
        let first = store.submission(&account, 8).unwrap();
        assert_eq!(first.outcome, SubmissionOutcome::Pending);
        assert_eq!(ledger.sequence(&account), Some(8));

        let receipt = submitter.submit(&alice(), payment()).await.unwrap();
        assert_eq!(receipt.sequence, 9);
        let record = store.submission(&account, 8).unwrap();
        assert_eq!(record.hash, first.hash);
        assert_eq!(record.outcome, SubmissionOutcome::Confirmed);
        assert_eq!(store.cached_sequence(&account), Some(9));

        // One transaction per sequence reached the ledger
        let sequences: Vec<u64> = ledger
            .submitted()
            .iter()
            .map(|envelope| TransactionEnvelope::from_base64(envelope).unwrap().tx.sequence)
            .collect();
        assert_eq!(sequences, vec![8, 9]);
    }

    #[tokio::test]
    async fn sequence_taken_by_another_transaction_is_rejected() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let account = alice().account_id();
        ledger.set_sequence(&account, 7);
        ledger.fail_submissions(vec![LedgerError::Transport("connection reset".into())]);
        let submitter = submitter(store.clone(), ledger.clone());
        assert!(submitter.submit(&alice(), payment()).await.is_err());

        // Another client used sequence 8 meanwhile
        ledger.set_sequence(&account, 8);
        let receipt = submitter.submit(&alice(), payment()).await.unwrap();
        assert_eq!(receipt.sequence, 9);
        assert_eq!(
            store.submission(&account, 8).unwrap().outcome,
            SubmissionOutcome::Rejected("sequence used by another transaction".to_string())
        );
        assert_eq!(ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn unlanded_submission_frees_its_sequence() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let account = alice().account_id();
        ledger.set_sequence(&account, 7);
        ledger.fail_submissions(vec![LedgerError::Timeout]);
        let submitter = submitter(store.clone(), ledger.clone());
        assert!(submitter.submit(&alice(), payment()).await.is_err());

        let receipt = submitter.submit(&alice(), payment()).await.unwrap();
        assert_eq!(receipt.sequence, 8);
        assert_eq!(
            store.submission(&account, 8).unwrap().outcome,
            SubmissionOutcome::Confirmed
        );
    }

    #[tokio::test]
    async fn pending_submissions_are_reconciled_on_init() {
        let (store, ledger) = (TestStore::default(), TestLedger::new());
        let account = alice().account_id();
        let assembler = TransactionAssembler::new(Arc::new(Ed25519EnvelopeSdk::default()), NETWORK);
        let pending = |sequence: u64, envelope: String, hash: String| PendingSubmission {
            account,
            sequence,
            envelope,
            hash,
            submitted_at: Utc::now(),
            outcome: SubmissionOutcome::Pending,
        };

        // Sequence 8 landed before the crash
        ledger.set_sequence(&account, 7);
        let landed = assembler.assemble(account, 8, payment(), &[alice()]).unwrap();
        ledger.submit(&landed.envelope).await.unwrap();
        store
            .save_submission(&pending(8, landed.envelope.clone(), landed.hash.clone()))
            .await
            .unwrap();
        // 7 was used by someone else, 9 never arrived
        for sequence in [7, 9] {
            store
                .save_submission(&pending(sequence, String::new(), format!("hash{}", sequence)))
                .await
                .unwrap();
        }
        submitter(store.clone(), ledger)
            .init_account(&alice())
            .await
            .unwrap();

        assert_eq!(
            store.submission(&account, 7).unwrap().outcome,
            SubmissionOutcome::Rejected("sequence used by another transaction".to_string())
        );
        assert_eq!(
            store.submission(&account, 8).unwrap().outcome,
            SubmissionOutcome::Confirmed
        );
        assert_eq!(
            store.submission(&account, 9).unwrap().outcome,
            SubmissionOutcome::Rejected("not found on ledger".to_string())
        );
        assert_eq!(store.cached_sequence(&account), Some(8));
    }
}
