use crate::errors::GatewayError;
use crate::horizon::LedgerClient;
use crate::operations::AccountId;
use log::error;
use std::time::Duration;

/// Works out the sequence number a new transaction from an account must use.
#[derive(Debug, Clone)]
pub struct SequenceResolver<L> {
    ledger: L,
    timeout: Duration,
}

impl<L: LedgerClient> SequenceResolver<L> {
    pub fn new(ledger: L, timeout: Duration) -> Self {
        SequenceResolver { ledger, timeout }
    }

    /// Parses `supplied` when given. Otherwise asks the ledger for the
    /// account's current sequence and returns the next one. Not retried.
    pub async fn resolve(
        &self,
        account: &AccountId,
        supplied: Option<&str>,
    ) -> Result<u64, GatewayError> {
        if let Some(supplied) = supplied {
            return supplied.parse::<u64>().map_err(|_| {
                GatewayError::invalid(
                    "sequence_number",
                    supplied,
                    "Sequence number must be a number",
                )
            });
        }

        let current = tokio::time::timeout(self.timeout, self.ledger.load_sequence(account))
            .await
            .map_err(|_| {
                error!("Timed out loading sequence number of {}", account);
                GatewayError::Internal(format!("timed out loading {}", account))
            })?
            .map_err(|err| {
                error!("Could not load sequence number of {}: {}", account, err);
                GatewayError::Internal(err.to_string())
            })?;

        current.checked_add(1).ok_or_else(|| {
            error!("Sequence number of {} cannot be incremented", account);
            GatewayError::Internal(format!("sequence overflow for {}", account))
        })
    }
}
