use crate::engine::EngineAccounts;
use crate::listener::ListenerConfig;
use crate::notifier::DEFAULT_DELIVERY_RETRIES;
use crate::operations::{AccountId, SecretSeed};
use crate::submitter::DEFAULT_SEQUENCE_CONFLICT_RETRIES;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use config::{Config, Environment, File};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use url::Url;

#[derive(Debug, Parser)]
#[command(name = "bridge-engine", about = "Bridges an HTTP API to a ledger network")]
pub struct EngineOpts {
    /// Config file (TOML, YAML or JSON). `BRIDGE__*` environment variables
    /// override its values, e.g. `BRIDGE__ACCOUNTS__BASE_SEED`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,
    pub horizon_url: Url,
    pub network_passphrase: String,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub callbacks: CallbacksConfig,
    #[serde(default)]
    pub listener: ListenerSettings,
    #[serde(default)]
    pub submitter: SubmitterSettings,
    #[serde(default)]
    pub delivery: DeliverySettings,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountsConfig {
    pub base_seed: Option<SecretString>,
    pub authorizing_seed: Option<SecretString>,
    pub issuing_account_id: Option<String>,
    pub receiving_account_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbacksConfig {
    pub receive: Option<Url>,
    pub tx_status: Option<Url>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    pub poll_interval_ms: u64,
    pub page_limit: u32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        ListenerSettings {
            poll_interval_ms: 5000,
            page_limit: 100,
            reconnect_base_ms: 500,
            reconnect_max_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubmitterSettings {
    pub sequence_conflict_retries: u32,
}

impl Default for SubmitterSettings {
    fn default() -> Self {
        SubmitterSettings {
            sequence_conflict_retries: DEFAULT_SEQUENCE_CONFLICT_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub max_retries: usize,
    pub backoff_base_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        DeliverySettings {
            max_retries: DEFAULT_DELIVERY_RETRIES,
            backoff_base_ms: 100,
            max_delay_ms: 60_000,
        }
    }
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8001))
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

/// Accounts parsed out of a validated config.
#[derive(Clone)]
pub struct ValidatedAccounts {
    pub engine: EngineAccounts,
    /// Set only when payments should be listened for
    pub receiving_account: Option<AccountId>,
}

impl BridgeConfig {
    /// Reads `path` if given, then applies `BRIDGE__*` environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder
            .add_source(
                Environment::with_prefix("BRIDGE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .context("could not load config")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            poll_interval: Duration::from_millis(self.listener.poll_interval_ms),
            page_limit: self.listener.page_limit,
            reconnect_base: Duration::from_millis(self.listener.reconnect_base_ms),
            reconnect_max: Duration::from_millis(self.listener.reconnect_max_ms),
            request_timeout: self.request_timeout(),
        }
    }

    /// Checks every parameter, parsing the configured keys.
    pub fn validate(&self) -> anyhow::Result<ValidatedAccounts> {
        if self.network_passphrase.is_empty() {
            bail!("network_passphrase param is required");
        }
        if self.listener.page_limit == 0 || self.listener.page_limit > 200 {
            bail!("listener.page_limit must be between 1 and 200");
        }

        let seed = |name: &str, value: &Option<SecretString>| {
            value
                .as_ref()
                .map(|value| {
                    SecretSeed::parse(value.expose_secret())
                        .map_err(|_| anyhow!("Invalid accounts.{} parameter", name))
                })
                .transpose()
        };
        let account = |name: &str, value: &Option<String>| {
            value
                .as_ref()
                .map(|value| {
                    value
                        .parse::<AccountId>()
                        .map_err(|_| anyhow!("Invalid accounts.{} parameter", name))
                })
                .transpose()
        };

        let engine = EngineAccounts {
            base_seed: seed("base_seed", &self.accounts.base_seed)?,
            authorizing_seed: seed("authorizing_seed", &self.accounts.authorizing_seed)?,
            issuing_account: account("issuing_account_id", &self.accounts.issuing_account_id)?,
        };
        let receiving_account =
            account("receiving_account_id", &self.accounts.receiving_account_id)?;
        let receiving_account = match (receiving_account, &self.callbacks.receive) {
            (Some(account), Some(_)) => Some(account),
            (None, None) => None,
            (Some(_), None) => {
                log::warn!(
                    "accounts.receiving_account_id set without callbacks.receive. Payment listener disabled."
                );
                None
            }
            (None, Some(_)) => {
                log::warn!(
                    "callbacks.receive set without accounts.receiving_account_id. Payment listener disabled."
                );
                None
            }
        };
        Ok(ValidatedAccounts {
            engine,
            receiving_account,
        })
    }
}

#[cfg(feature = "redis")]
pub use self::server::run_bridge_engine;

#[cfg(feature = "redis")]
mod server {
    use super::BridgeConfig;
    use crate::assembler::TransactionAssembler;
    use crate::backends::redis::BridgeRedisStoreBuilder;
    use crate::compliance::ComplianceClient;
    use crate::engine::BridgeEngine;
    use crate::envelope::Ed25519EnvelopeSdk;
    use crate::horizon::HorizonClient;
    use crate::listener::PaymentListener;
    use crate::notifier::CallbackNotifier;
    use ledger_gateway::create_gateway_filter;
    use log::{info, warn};
    use redis_crate::IntoConnectionInfo;
    use std::{future::Future, sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;

    /// Connects the store, initializes the configured accounts, starts the
    /// payment listener when configured and serves the API until `shutdown`
    /// resolves. The listener is stopped and awaited before returning.
    pub async fn run_bridge_engine(
        config: BridgeConfig,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let accounts = config.validate()?;
        let timeout = config.request_timeout();

        let store = BridgeRedisStoreBuilder::new(config.redis_url.as_str().into_connection_info()?)
            .connect()
            .await?;
        let ledger = HorizonClient::new(config.horizon_url.clone(), timeout)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let compliance = ComplianceClient::new(client.clone(), config.callbacks.tx_status.clone());
        let assembler = TransactionAssembler::new(
            Arc::new(Ed25519EnvelopeSdk::default()),
            config.network_passphrase.clone(),
        );

        let mut engine = BridgeEngine::new(
            store.clone(),
            ledger.clone(),
            assembler,
            compliance.clone(),
            accounts.engine,
            config.submitter.sequence_conflict_retries,
            timeout,
        );
        engine.init_accounts().await?;

        let token = CancellationToken::new();
        let listener = match (accounts.receiving_account, config.callbacks.receive.clone()) {
            (Some(account), Some(receive)) => {
                let notifier = CallbackNotifier::new(
                    client,
                    receive,
                    config.delivery.max_retries,
                    config.delivery.backoff_base_ms,
                    Duration::from_millis(config.delivery.max_delay_ms),
                );
                let listener = PaymentListener::new(
                    store.clone(),
                    ledger,
                    notifier,
                    compliance,
                    account,
                    config.listener_config(),
                );
                engine = engine.with_listener(listener.clone());
                info!("Starting payment listener for {}", account);
                Some(listener.spawn(token.clone()))
            }
            _ => {
                warn!("Payment listener not configured. Skipping...");
                None
            }
        };

        let api = create_gateway_filter(engine, store);
        let (addr, server) =
            warp::serve(api).try_bind_with_graceful_shutdown(config.bind_address, shutdown)?;
        info!("Bridge engine listening on: {}", addr);
        server.await;

        token.cancel();
        if let Some(listener) = listener {
            listener.await?;
        }
        info!("Bridge engine stopped");
        Ok(())
    }
}
