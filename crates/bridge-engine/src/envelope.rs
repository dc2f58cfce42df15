use crate::operations::{AccountId, OperationMutation, SecretSeed};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Fee charged per operation, in stroops.
pub const BASE_FEE: u32 = 100;
const ENVELOPE_TYPE_TX: &[u8] = b"tx";

/// A single step applied to a transaction under construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutator {
    SourceAccount(AccountId),
    Sequence(u64),
    Network(String),
    Operation(OperationMutation),
}

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("transaction is missing its {0}")]
    Missing(&'static str),
    #[error("transaction has no operations")]
    NoOperations,
    #[error("transaction fee overflows")]
    FeeOverflow,
    #[error("could not encode transaction: {0}")]
    Encoding(String),
    #[error("could not decode envelope: {0}")]
    Decoding(String),
}

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    /// Base64 encoded envelope
    pub envelope: String,
    /// Hex encoded transaction hash
    pub hash: String,
}

/// Builds, signs and encodes ledger transactions.
pub trait LedgerSdk: Send + Sync {
    fn build(&self, mutators: Vec<Mutator>, signers: &[SecretSeed])
        -> Result<SignedEnvelope, SdkError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub source_account: AccountId,
    pub fee: u32,
    pub sequence: u64,
    pub operations: Vec<OperationMutation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    /// Last four bytes of the signer's public key, hex encoded
    pub hint: String,
    /// Base64 encoded ed25519 signature of the transaction hash
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub tx: Transaction,
    pub signatures: Vec<DecoratedSignature>,
}

impl Transaction {
    /// `sha256(sha256(passphrase) || "tx" || tx_json)`
    pub fn hash(&self, network_passphrase: &str) -> Result<[u8; 32], SdkError> {
        let tx_json =
            serde_json::to_vec(self).map_err(|err| SdkError::Encoding(err.to_string()))?;
        let network_id = Sha256::digest(network_passphrase.as_bytes());
        let mut hasher = Sha256::new();
        hasher.update(network_id);
        hasher.update(ENVELOPE_TYPE_TX);
        hasher.update(&tx_json);
        Ok(hasher.finalize().into())
    }
}

impl TransactionEnvelope {
    pub fn from_base64(envelope: &str) -> Result<Self, SdkError> {
        let bytes = STANDARD
            .decode(envelope)
            .map_err(|err| SdkError::Decoding(err.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|err| SdkError::Decoding(err.to_string()))
    }

    pub fn to_base64(&self) -> Result<String, SdkError> {
        let bytes = serde_json::to_vec(self).map_err(|err| SdkError::Encoding(err.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    /// Checks that some signature on the envelope was made by `account`.
    pub fn is_signed_by(&self, account: &AccountId, network_passphrase: &str) -> bool {
        let hash = match self.tx.hash(network_passphrase) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        let key = match VerifyingKey::from_bytes(account.as_bytes()) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let hint = signature_hint(account);
        self.signatures
            .iter()
            .filter(|sig| sig.hint == hint)
            .filter_map(|sig| STANDARD.decode(&sig.signature).ok())
            .filter_map(|bytes| Signature::from_slice(&bytes).ok())
            .any(|signature| key.verify(&hash, &signature).is_ok())
    }
}

fn signature_hint(account: &AccountId) -> String {
    hex::encode(&account.as_bytes()[28..])
}

/// JSON envelope SDK signing with ed25519.
#[derive(Debug, Clone)]
pub struct Ed25519EnvelopeSdk {
    base_fee: u32,
}

impl Default for Ed25519EnvelopeSdk {
    fn default() -> Self {
        Ed25519EnvelopeSdk { base_fee: BASE_FEE }
    }
}

impl Ed25519EnvelopeSdk {
    pub fn with_base_fee(base_fee: u32) -> Self {
        Ed25519EnvelopeSdk { base_fee }
    }
}

impl LedgerSdk for Ed25519EnvelopeSdk {
    fn build(
        &self,
        mutators: Vec<Mutator>,
        signers: &[SecretSeed],
    ) -> Result<SignedEnvelope, SdkError> {
        let mut source_account = None;
        let mut sequence = None;
        let mut network = None;
        let mut operations = Vec::new();
        for mutator in mutators {
            match mutator {
                Mutator::SourceAccount(account) => source_account = Some(account),
                Mutator::Sequence(seq) => sequence = Some(seq),
                Mutator::Network(passphrase) => network = Some(passphrase),
                Mutator::Operation(op) => operations.push(op),
            }
        }
        let source_account = source_account.ok_or(SdkError::Missing("source account"))?;
        let sequence = sequence.ok_or(SdkError::Missing("sequence number"))?;
        let network = network.ok_or(SdkError::Missing("network passphrase"))?;
        if operations.is_empty() {
            return Err(SdkError::NoOperations);
        }
        let fee = u32::try_from(operations.len())
            .ok()
            .and_then(|count| count.checked_mul(self.base_fee))
            .ok_or(SdkError::FeeOverflow)?;

        let tx = Transaction {
            source_account,
            fee,
            sequence,
            operations,
        };
        let hash = tx.hash(&network)?;
        let signatures = signers
            .iter()
            .map(|seed| {
                let key = seed.signing_key();
                DecoratedSignature {
                    hint: signature_hint(&seed.account_id()),
                    signature: STANDARD.encode(key.sign(&hash).to_bytes()),
                }
            })
            .collect();
        let envelope = TransactionEnvelope { tx, signatures }.to_base64()?;
        Ok(SignedEnvelope {
            envelope,
            hash: hex::encode(hash),
        })
    }
}
