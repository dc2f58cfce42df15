#![allow(clippy::needless_lifetimes)] // False positive on async-trait
use crate::assembler::TransactionAssembler;
use crate::compliance::ComplianceClient;
use crate::errors::GatewayError;
use crate::horizon::LedgerClient;
use crate::listener::PaymentListener;
use crate::operations::{
    bodies::{PathPaymentBody, PaymentBody},
    types::validate_asset_code,
    AccountId, AssetBody, BuilderRequest, MutationBody, OperationBody, OperationMutation,
    SecretSeed,
};
use crate::sequence::SequenceResolver;
use crate::submitter::{SubmissionReceipt, TransactionSubmitter};
use crate::utils::types::{PaymentStore, SubmissionStore};

use async_trait::async_trait;
use bytes::Bytes;
use ed25519_dalek::SigningKey;
use ledger_gateway::{ApiError, ApiResponse, GatewayEngine, StatusCode};
use log::{debug, error, info, warn};
use rand::rngs::OsRng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::{str::FromStr, time::Duration};

/// Seeds and accounts the engine acts with.
#[derive(Clone, Default)]
pub struct EngineAccounts {
    /// Default source of `/payment`
    pub base_seed: Option<SecretSeed>,
    /// Signs `/authorize` transactions
    pub authorizing_seed: Option<SecretSeed>,
    /// Issuer of the authorized assets when it is not the authorizing account
    pub issuing_account: Option<AccountId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PaymentRequest {
    source: Option<String>,
    destination: Option<String>,
    amount: Option<String>,
    asset_code: Option<String>,
    asset_issuer: Option<String>,
    send_max: Option<String>,
    send_asset_code: Option<String>,
    send_asset_issuer: Option<String>,
    path: Vec<AssetBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthorizeRequest {
    account_id: Option<String>,
    asset_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReprocessRequest {
    operation_id: Option<String>,
    force: bool,
}

#[derive(Debug, Serialize)]
struct KeyPair {
    public_key: String,
    private_key: String,
}

/// Request handling of the bridge. Stateless apart from what the submitter
/// and the listener keep in the store.
#[derive(Clone)]
pub struct BridgeEngine<S, L> {
    resolver: SequenceResolver<L>,
    assembler: TransactionAssembler,
    submitter: TransactionSubmitter<S, L>,
    compliance: ComplianceClient,
    listener: Option<PaymentListener<S, L>>,
    accounts: EngineAccounts,
}

impl<S, L> BridgeEngine<S, L>
where
    S: SubmissionStore + PaymentStore + Clone + Send + Sync + 'static,
    L: LedgerClient + Clone + Send + Sync + 'static,
{
    pub fn new(
        store: S,
        ledger: L,
        assembler: TransactionAssembler,
        compliance: ComplianceClient,
        accounts: EngineAccounts,
        sequence_conflict_retries: u32,
        timeout: Duration,
    ) -> Self {
        BridgeEngine {
            resolver: SequenceResolver::new(ledger.clone(), timeout),
            submitter: TransactionSubmitter::new(
                store,
                ledger,
                assembler.clone(),
                sequence_conflict_retries,
                timeout,
            ),
            assembler,
            compliance,
            listener: None,
            accounts,
        }
    }

    /// Enables `/reprocess` through the given listener.
    pub fn with_listener(mut self, listener: PaymentListener<S, L>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Loads the sequence numbers of the configured seeds, reconciling
    /// submissions a previous run left pending.
    pub async fn init_accounts(&self) -> Result<(), GatewayError> {
        for seed in [&self.accounts.base_seed, &self.accounts.authorizing_seed]
            .iter()
            .filter_map(|seed| seed.as_ref())
        {
            self.submitter.init_account(seed).await?;
        }
        Ok(())
    }

    async fn build(&self, body: Bytes) -> Result<ApiResponse, GatewayError> {
        let mut request: BuilderRequest = parse_body(&body)?;
        let validated = request.dispatch()?;
        let sequence = self
            .resolver
            .resolve(&validated.source, validated.sequence_number.as_deref())
            .await?;
        let envelope = self.assembler.assemble(
            validated.source,
            sequence,
            validated.mutations,
            &validated.signers,
        )?;
        debug!(
            "Built transaction {} for {} with sequence {}",
            envelope.hash, validated.source, sequence
        );
        json_response(&json!({ "transaction_envelope": envelope.envelope }))
    }

    async fn pay(&self, body: Bytes) -> Result<ApiResponse, GatewayError> {
        let request: PaymentRequest = parse_body(&body)?;
        let seed = match request.source.as_deref().filter(|source| !source.is_empty()) {
            Some(source) => SecretSeed::parse(source)
                .map_err(|_| GatewayError::invalid("source", "", "Source must start with `S`."))?,
            None => self
                .accounts
                .base_seed
                .clone()
                .ok_or_else(|| GatewayError::MissingParameter("source".to_string()))?,
        };
        let mutation = payment_mutation(request)?;
        let receipt = self.submitter.submit(&seed, vec![mutation]).await?;
        info!(
            "Payment from {} sent in {} (sequence {})",
            seed.account_id(),
            receipt.hash,
            receipt.sequence
        );
        json_response(&receipt)
    }

    async fn allow_trust(&self, body: Bytes) -> Result<ApiResponse, GatewayError> {
        let seed = self
            .accounts
            .authorizing_seed
            .as_ref()
            .ok_or_else(|| GatewayError::NotFound("authorizing account".to_string()))?;
        let request: AuthorizeRequest = parse_body(&body)?;
        let account_id = required("account_id", request.account_id)?;
        let trustor = AccountId::from_str(&account_id).map_err(|_| {
            GatewayError::invalid(
                "account_id",
                account_id.as_str(),
                "Account ID must start with `G`.",
            )
        })?;
        let asset_code = required("asset_code", request.asset_code)?;
        validate_asset_code(&asset_code)
            .map_err(|msg| GatewayError::invalid("asset_code", asset_code.as_str(), msg))?;

        let mutation = OperationMutation {
            source: self.accounts.issuing_account,
            body: MutationBody::AllowTrust {
                trustor,
                asset_code: asset_code.clone(),
                authorize: true,
            },
        };
        let receipt: SubmissionReceipt = self.submitter.submit(seed, vec![mutation]).await?;
        info!("Authorized {} to hold {}", trustor, asset_code);
        json_response(&receipt)
    }

    async fn redeliver(&self, body: Bytes) -> Result<ApiResponse, GatewayError> {
        let request: ReprocessRequest = parse_body(&body)?;
        let operation_id = required("operation_id", request.operation_id)?;
        let listener = self.listener.as_ref().ok_or_else(|| {
            warn!("Cannot reprocess {}: payment listener is disabled", operation_id);
            GatewayError::NotFound("payment listener".to_string())
        })?;
        let status = listener.reprocess(&operation_id, request.force).await?;
        json_response(&json!({ "status": status }))
    }

    async fn lookup_tx_status(&self, id: Option<String>) -> Result<ApiResponse, GatewayError> {
        let id = required("id", id)?;
        let status = self.compliance.tx_status(&id).await;
        json_response(&json!({ "status": status }))
    }
}

#[async_trait]
impl<S, L> GatewayEngine for BridgeEngine<S, L>
where
    S: SubmissionStore + PaymentStore + Clone + Send + Sync + 'static,
    L: LedgerClient + Clone + Send + Sync + 'static,
{
    async fn build_transaction(&self, body: Bytes) -> Result<ApiResponse, ApiError> {
        Ok(self.build(body).await?)
    }

    async fn send_payment(&self, body: Bytes) -> Result<ApiResponse, ApiError> {
        Ok(self.pay(body).await?)
    }

    async fn authorize(&self, body: Bytes) -> Result<ApiResponse, ApiError> {
        Ok(self.allow_trust(body).await?)
    }

    async fn create_keypair(&self) -> Result<ApiResponse, ApiError> {
        let seed = SecretSeed::from_signing_key(&SigningKey::generate(&mut OsRng));
        Ok(json_response(&KeyPair {
            public_key: seed.account_id().to_string(),
            private_key: seed.expose().to_string(),
        })?)
    }

    async fn reprocess(&self, body: Bytes) -> Result<ApiResponse, ApiError> {
        Ok(self.redeliver(body).await?)
    }

    async fn tx_status(&self, id: Option<String>) -> Result<ApiResponse, ApiError> {
        Ok(self.lookup_tx_status(id).await?)
    }
}

/// Turns a payment request into a payment, or a path payment when the
/// request names a `send_max`.
fn payment_mutation(request: PaymentRequest) -> Result<OperationMutation, GatewayError> {
    let destination = required("destination", request.destination)?;
    let amount = required("amount", request.amount)?;
    let asset = asset_body(request.asset_code, request.asset_issuer);
    let body = match request.send_max {
        Some(send_max) => OperationBody::PathPayment(PathPaymentBody {
            source: None,
            destination,
            destination_amount: amount,
            destination_asset: Some(asset),
            send_max,
            send_asset: Some(asset_body(
                request.send_asset_code,
                request.send_asset_issuer,
            )),
            path: request.path,
        }),
        None => OperationBody::Payment(PaymentBody {
            source: None,
            destination,
            amount,
            asset: Some(asset),
        }),
    };
    body.validate().map_err(|err| err.map_field(payment_field))
}

fn asset_body(code: Option<String>, issuer: Option<String>) -> AssetBody {
    AssetBody {
        code: code.unwrap_or_else(|| "native".to_string()),
        issuer: issuer.filter(|issuer| !issuer.is_empty()),
    }
}

/// Maps body fields back to the flat names of the payment request, e.g.
/// `destination_asset[issuer]` to `asset_issuer`.
fn payment_field(field: &str) -> String {
    let field = match field {
        "destination_amount" => "amount".to_string(),
        _ => match field.strip_prefix("destination_") {
            Some(rest) if rest.starts_with("asset") => rest.to_string(),
            _ => field.to_string(),
        },
    };
    for prefix in ["send_asset", "asset"] {
        if let Some(part) = field
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('['))
            .and_then(|rest| rest.strip_suffix(']'))
        {
            return format!("{}_{}", prefix, part);
        }
    }
    field
}

fn required(field: &str, value: Option<String>) -> Result<String, GatewayError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| GatewayError::MissingParameter(field.to_string()))
}

fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        debug!("Could not parse request body: {}", err);
        GatewayError::invalid("body", "", "Request body must be a JSON object.")
            .with_data("err", json!(err.to_string()))
    })
}

fn json_response<T: Serialize>(value: &T) -> Result<ApiResponse, GatewayError> {
    let body = serde_json::to_vec(value).map_err(|err| {
        error!("Could not serialize response: {}", err);
        GatewayError::Internal(err.to_string())
    })?;
    Ok((StatusCode::OK, Bytes::from(body)))
}
