//! Decoding and validation of client-submitted ledger operations.
//!
//! A [`BuilderRequest`] goes through two passes. [`BuilderRequest::process`]
//! picks a body shape for every operation based on its `type` and decodes it.
//! [`BuilderRequest::validate`] then checks the source account, the signers and
//! each operation's fields, stopping at the first failure.

pub mod bodies;
pub mod types;

pub use bodies::{MutationBody, OperationBody, OperationMutation, Signer};
pub use types::{AccountId, Amount, Asset, AssetBody, Price, SecretSeed};

use crate::errors::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateAccount,
    Payment,
    PathPayment,
    ManageOffer,
    CreatePassiveOffer,
    SetOptions,
    ChangeTrust,
    AllowTrust,
    AccountMerge,
    Inflation,
    ManageData,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateAccount => "create_account",
            OperationKind::Payment => "payment",
            OperationKind::PathPayment => "path_payment",
            OperationKind::ManageOffer => "manage_offer",
            OperationKind::CreatePassiveOffer => "create_passive_offer",
            OperationKind::SetOptions => "set_options",
            OperationKind::ChangeTrust => "change_trust",
            OperationKind::AllowTrust => "allow_trust",
            OperationKind::AccountMerge => "account_merge",
            OperationKind::Inflation => "inflation",
            OperationKind::ManageData => "manage_data",
        }
    }
}

impl FromStr for OperationKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "create_account" => OperationKind::CreateAccount,
            "payment" => OperationKind::Payment,
            "path_payment" => OperationKind::PathPayment,
            "manage_offer" => OperationKind::ManageOffer,
            "create_passive_offer" => OperationKind::CreatePassiveOffer,
            "set_options" => OperationKind::SetOptions,
            "change_trust" => OperationKind::ChangeTrust,
            "allow_trust" => OperationKind::AllowTrust,
            "account_merge" => OperationKind::AccountMerge,
            "inflation" => OperationKind::Inflation,
            "manage_data" => OperationKind::ManageData,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation as received. The body stays raw JSON until the `type` is
/// known; `resolved` is filled in by [`BuilderRequest::process`].
#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub body: Value,
    #[serde(skip)]
    resolved: Option<OperationBody>,
}

impl Operation {
    pub fn new(kind: &str, body: Value) -> Self {
        Operation {
            kind: kind.to_owned(),
            body,
            resolved: None,
        }
    }

    /// The decoded body. Fails if the operation was never processed.
    pub fn resolved(&self) -> Result<&OperationBody, GatewayError> {
        self.resolved.as_ref().ok_or_else(|| {
            GatewayError::Internal(format!("operation {} was read before decoding", self.kind))
        })
    }
}

/// Body of `POST /builder`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuilderRequest {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub sequence_number: Option<String>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub signers: Vec<String>,
}

/// A builder request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub source: AccountId,
    pub sequence_number: Option<String>,
    pub mutations: Vec<OperationMutation>,
    pub signers: Vec<SecretSeed>,
}

impl BuilderRequest {
    /// Selects a decoder by `type` and decodes every body. Each operation's
    /// `resolved` body is set once and never overwritten.
    pub fn process(&mut self) -> Result<(), GatewayError> {
        for (i, operation) in self.operations.iter_mut().enumerate() {
            if operation.resolved.is_some() {
                continue;
            }
            let kind = OperationKind::from_str(&operation.kind).map_err(|_| {
                GatewayError::invalid(
                    format!("operations[{}][type]", i),
                    operation.kind.as_str(),
                    "Invalid operation type.",
                )
            })?;
            let body = OperationBody::decode(kind, &operation.body).map_err(|err| {
                GatewayError::invalid(
                    format!("operations[{}][body]", i),
                    "",
                    "Operation is invalid.",
                )
                .with_data("err", json!(err.to_string()))
            })?;
            operation.resolved = Some(body);
        }
        Ok(())
    }

    /// Validates the source, the operation list, every signer and then each
    /// operation in list order.
    pub fn validate(&self) -> Result<ValidatedRequest, GatewayError> {
        let source = AccountId::from_str(&self.source).map_err(|_| {
            GatewayError::invalid(
                "source",
                self.source.as_str(),
                "Source parameter must start with `G`.",
            )
        })?;

        if self.operations.is_empty() {
            return Err(GatewayError::invalid(
                "operations",
                "",
                "At least one operation is required.",
            ));
        }

        let signers = self
            .signers
            .iter()
            .enumerate()
            .map(|(i, signer)| {
                SecretSeed::parse(signer).map_err(|_| {
                    GatewayError::invalid(
                        format!("signers[{}]", i),
                        signer.as_str(),
                        "Signer must start with `S`.",
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mutations = self
            .operations
            .iter()
            .enumerate()
            .map(|(i, operation)| {
                operation
                    .resolved()?
                    .validate()
                    .map_err(|err| err.in_field("body").in_field(&format!("operations[{}]", i)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        // An empty string means the sequence was not supplied
        let sequence_number = self
            .sequence_number
            .clone()
            .filter(|sequence| !sequence.is_empty());

        Ok(ValidatedRequest {
            source,
            sequence_number,
            mutations,
            signers,
        })
    }

    /// Decodes and validates the request in one go.
    pub fn dispatch(&mut self) -> Result<ValidatedRequest, GatewayError> {
        self.process()?;
        self.validate()
    }
}
