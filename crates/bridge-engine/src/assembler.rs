use crate::envelope::{LedgerSdk, Mutator, SignedEnvelope};
use crate::errors::GatewayError;
use crate::operations::{AccountId, OperationMutation, SecretSeed};
use log::error;
use std::sync::Arc;

/// Combines the source, sequence, network and operations into a signed
/// envelope. Stateless.
#[derive(Clone)]
pub struct TransactionAssembler {
    sdk: Arc<dyn LedgerSdk>,
    network_passphrase: String,
}

impl TransactionAssembler {
    pub fn new(sdk: Arc<dyn LedgerSdk>, network_passphrase: impl Into<String>) -> Self {
        TransactionAssembler {
            sdk,
            network_passphrase: network_passphrase.into(),
        }
    }

    pub fn network_passphrase(&self) -> &str {
        &self.network_passphrase
    }

    pub fn assemble(
        &self,
        source: AccountId,
        sequence: u64,
        mutations: Vec<OperationMutation>,
        signers: &[SecretSeed],
    ) -> Result<SignedEnvelope, GatewayError> {
        let mut mutators = Vec::with_capacity(mutations.len() + 3);
        mutators.push(Mutator::SourceAccount(source));
        mutators.push(Mutator::Sequence(sequence));
        mutators.push(Mutator::Network(self.network_passphrase.clone()));
        mutators.extend(mutations.into_iter().map(Mutator::Operation));

        self.sdk.build(mutators, signers).map_err(|err| {
            error!(
                "Could not build transaction for {} with sequence {}: {}",
                source, sequence, err
            );
            GatewayError::Internal(err.to_string())
        })
    }
}
