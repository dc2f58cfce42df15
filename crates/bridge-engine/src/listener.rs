use crate::compliance::ComplianceClient;
use crate::errors::GatewayError;
use crate::horizon::{LedgerClient, LedgerError, LedgerOperation};
use crate::notifier::CallbackNotifier;
use crate::operations::{AccountId, AssetBody};
use crate::utils::types::{DeliveryStatus, PaymentStore, ReceivedPayment, StoreError};
use chrono::Utc;
use futures::StreamExt;
use log::{debug, error, info, trace, warn};
use parking_lot::RwLock;
use std::{cmp::min, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Initializing,
    Streaming,
    Reconnecting,
    Stopped,
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub poll_interval: Duration,
    pub page_limit: u32,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    pub request_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        ListenerConfig {
            poll_interval: Duration::from_secs(5),
            page_limit: 100,
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Watches the ledger for payments to one account, records each of them once
/// and notifies the receive callback about them.
///
/// Every payment is inserted before the cursor moves past it, and the cursor
/// is saved before the callback is notified. A crash can therefore never skip
/// a payment, and payments whose delivery did not finish are delivered again
/// at the next start.
#[derive(Clone)]
pub struct PaymentListener<S, L> {
    store: S,
    ledger: L,
    notifier: CallbackNotifier,
    compliance: ComplianceClient,
    account: AccountId,
    config: ListenerConfig,
    state: Arc<RwLock<ListenerState>>,
}

impl<S, L> PaymentListener<S, L>
where
    S: PaymentStore + Clone + Send + Sync + 'static,
    L: LedgerClient + Clone + Send + Sync + 'static,
{
    pub fn new(
        store: S,
        ledger: L,
        notifier: CallbackNotifier,
        compliance: ComplianceClient,
        account: AccountId,
        config: ListenerConfig,
    ) -> Self {
        PaymentListener {
            store,
            ledger,
            notifier,
            compliance,
            account,
            config,
            state: Arc::new(RwLock::new(ListenerState::Initializing)),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    fn set_state(&self, state: ListenerState) {
        *self.state.write() = state;
    }

    /// Runs the listener in the background until `token` is cancelled.
    pub fn spawn(&self, token: CancellationToken) -> JoinHandle<()> {
        let listener = self.clone();
        tokio::spawn(async move { listener.run(token).await })
    }

    pub async fn run(&self, token: CancellationToken) {
        let mut delay = self.config.reconnect_base;
        let mut cursor = loop {
            match self.initialize().await {
                Ok(cursor) => break cursor,
                Err(err) => {
                    error!("Could not initialize listener for {}: {}", self.account, err);
                    if !self.wait_to_reconnect(&token, &mut delay).await {
                        self.set_state(ListenerState::Stopped);
                        return;
                    }
                }
            }
        };

        info!("Listening for payments to {} after {:?}", self.account, cursor);
        loop {
            self.set_state(ListenerState::Streaming);
            match self.stream(&token, &mut cursor, &mut delay).await {
                Ok(()) => break,
                Err(err) => {
                    error!(
                        "Payment stream of {} failed at cursor {:?}: {}",
                        self.account, cursor, err
                    );
                    if !self.wait_to_reconnect(&token, &mut delay).await {
                        break;
                    }
                }
            }
        }
        info!("Listener for {} stopped at cursor {:?}", self.account, cursor);
        self.set_state(ListenerState::Stopped);
    }

    /// Loads the saved cursor, or the ledger's newest one on the very first
    /// run, and redelivers payments a previous run did not finish.
    async fn initialize(&self) -> Result<Option<String>, ListenerError> {
        self.set_state(ListenerState::Initializing);
        let cursor = match self.store.load_cursor(&self.account).await? {
            Some(cursor) => Some(cursor),
            None => {
                let latest = tokio::time::timeout(
                    self.config.request_timeout,
                    self.ledger.latest_cursor(&self.account),
                )
                .await
                .unwrap_or(Err(LedgerError::Timeout))?;
                if let Some(latest) = &latest {
                    self.store.save_cursor(&self.account, latest).await?;
                }
                latest
            }
        };
        self.redeliver_pending().await?;
        Ok(cursor)
    }

    /// Processes operations until cancelled or until the stream fails.
    /// `cursor` always holds the last durably saved paging token.
    async fn stream(
        &self,
        token: &CancellationToken,
        cursor: &mut Option<String>,
        delay: &mut Duration,
    ) -> Result<(), ListenerError> {
        let mut operations = self.ledger.stream_operations(
            self.account,
            cursor.clone(),
            self.config.page_limit,
            self.config.poll_interval,
        );
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                next = operations.next() => next,
            };
            match next {
                Some(Ok(operation)) => {
                    // Not interrupted by cancellation once started
                    self.process_operation(&operation).await?;
                    *cursor = Some(operation.paging_token);
                    *delay = self.config.reconnect_base;
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    return Err(LedgerError::Transport("operation stream ended".to_string()).into())
                }
            }
        }
    }

    async fn wait_to_reconnect(&self, token: &CancellationToken, delay: &mut Duration) -> bool {
        self.set_state(ListenerState::Reconnecting);
        debug!("Reconnecting listener for {} in {:?}", self.account, delay);
        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(*delay) => {}
        }
        *delay = min(*delay * 2, self.config.reconnect_max);
        true
    }

    /// Records `operation` if it is a payment to the monitored account, then
    /// moves the cursor past it and finally delivers newly recorded payments.
    pub async fn process_operation(&self, operation: &LedgerOperation) -> Result<(), ListenerError> {
        let account = self.account.to_string();
        if !operation.is_payment() || operation.to.as_deref() != Some(account.as_str()) {
            trace!("Skipping operation {} ({})", operation.id, operation.kind);
            self.store
                .save_cursor(&self.account, &operation.paging_token)
                .await?;
            return Ok(());
        }

        let compliance_status = if self.compliance.is_configured() {
            Some(self.compliance.tx_status(&operation.transaction_hash).await)
        } else {
            None
        };

        let payment = ReceivedPayment {
            operation_id: operation.id.clone(),
            account: self.account,
            amount: operation.amount.clone().unwrap_or_default(),
            asset: asset_of(operation),
            from: operation.from.clone().unwrap_or_default(),
            cursor: operation.paging_token.clone(),
            transaction_hash: operation.transaction_hash.clone(),
            processed_at: Utc::now(),
            delivery_status: DeliveryStatus::Pending,
            delivery_attempts: 0,
            compliance_status,
        };
        let inserted = self.store.insert_payment(&payment).await.map_err(|err| {
            error!("Could not save payment {}: {}", payment.operation_id, err);
            err
        })?;
        self.store
            .save_cursor(&self.account, &operation.paging_token)
            .await?;

        if inserted {
            info!(
                "Received payment {} of {} {} from {}",
                payment.operation_id, payment.amount, payment.asset.code, payment.from
            );
            let operation_id = payment.operation_id.clone();
            if let Err(err) = self.deliver(payment).await {
                // Stays pending and is picked up by the next redelivery
                warn!("Delivery of payment {} not recorded: {}", operation_id, err);
            }
        } else {
            debug!("Payment {} already processed", payment.operation_id);
        }
        Ok(())
    }

    /// Notifies the callback and records the final delivery status.
    async fn deliver(&self, payment: ReceivedPayment) -> Result<DeliveryStatus, GatewayError> {
        let report = self.notifier.deliver(&payment).await;
        let attempts = payment.delivery_attempts.saturating_add(report.attempts);
        let status = match report.result {
            Ok(()) => DeliveryStatus::Delivered,
            Err(_) => DeliveryStatus::Exhausted,
        };
        self.store
            .update_delivery_status(&payment.operation_id, status, attempts)
            .await
            .map_err(|err| {
                error!(
                    "Could not save delivery status of payment {}: {}",
                    payment.operation_id, err
                );
                GatewayError::Internal(err.to_string())
            })?;
        Ok(status)
    }

    /// Delivers payments of this account that were recorded but never
    /// delivered.
    pub async fn redeliver_pending(&self) -> Result<(), StoreError> {
        let pending = self
            .store
            .load_payments_by_status(DeliveryStatus::Pending)
            .await?;
        for payment in pending.into_iter().filter(|p| p.account == self.account) {
            info!("Redelivering payment {}", payment.operation_id);
            let operation_id = payment.operation_id.clone();
            if let Err(err) = self.deliver(payment).await {
                warn!("Delivery of payment {} not recorded: {}", operation_id, err);
            }
        }
        Ok(())
    }

    /// Delivers a recorded payment again. Delivered payments are only sent
    /// again with `force`.
    pub async fn reprocess(
        &self,
        operation_id: &str,
        force: bool,
    ) -> Result<DeliveryStatus, GatewayError> {
        let payment = self
            .store
            .load_payment(operation_id)
            .await
            .map_err(|err| {
                error!("Could not load payment {}: {}", operation_id, err);
                GatewayError::Internal(err.to_string())
            })?
            .ok_or_else(|| GatewayError::NotFound(format!("payment {}", operation_id)))?;
        if payment.delivery_status == DeliveryStatus::Delivered && !force {
            return Err(GatewayError::invalid(
                "operation_id",
                operation_id,
                "Payment was already delivered. Use `force` to deliver it again.",
            ));
        }
        info!("Reprocessing payment {}", operation_id);
        self.deliver(payment).await
    }
}

fn asset_of(operation: &LedgerOperation) -> AssetBody {
    match operation.asset_type.as_deref() {
        Some("native") | None => AssetBody {
            code: "native".to_string(),
            issuer: None,
        },
        Some(_) => AssetBody {
            code: operation.asset_code.clone().unwrap_or_default(),
            issuer: operation.asset_issuer.clone(),
        },
    }
}
