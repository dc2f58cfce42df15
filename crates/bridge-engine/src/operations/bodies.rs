use super::types::{validate_asset_code, AccountId, Amount, Asset, AssetBody, Price};
use super::OperationKind;
use crate::errors::GatewayError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

const MAX_PATH_LENGTH: usize = 5;
const MAX_HOME_DOMAIN_LENGTH: usize = 32;
const MAX_DATA_NAME_LENGTH: usize = 64;
const MAX_DATA_VALUE_LENGTH: usize = 64;
const KNOWN_FLAGS: [i64; 4] = [1, 2, 4, 8];

/// Operation body as decoded from the request, before field validation.
/// Missing string fields decode as empty and are reported by `validate`
/// with their exact path.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationBody {
    CreateAccount(CreateAccountBody),
    Payment(PaymentBody),
    PathPayment(PathPaymentBody),
    ManageOffer(ManageOfferBody),
    SetOptions(SetOptionsBody),
    ChangeTrust(ChangeTrustBody),
    AllowTrust(AllowTrustBody),
    AccountMerge(AccountMergeBody),
    Inflation(InflationBody),
    ManageData(ManageDataBody),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CreateAccountBody {
    pub source: Option<String>,
    pub destination: String,
    pub starting_balance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PaymentBody {
    pub source: Option<String>,
    pub destination: String,
    pub amount: String,
    pub asset: Option<AssetBody>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PathPaymentBody {
    pub source: Option<String>,
    pub destination: String,
    pub destination_amount: String,
    pub destination_asset: Option<AssetBody>,
    pub send_max: String,
    pub send_asset: Option<AssetBody>,
    pub path: Vec<AssetBody>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ManageOfferBody {
    pub source: Option<String>,
    pub selling: Option<AssetBody>,
    pub buying: Option<AssetBody>,
    pub amount: String,
    pub price: String,
    pub offer_id: Option<String>,
    /// Set for `create_passive_offer`, never read from the wire.
    #[serde(skip)]
    pub passive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SignerBody {
    pub public_key: String,
    pub weight: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SetOptionsBody {
    pub source: Option<String>,
    pub inflation_dest: Option<String>,
    pub set_flags: Option<Vec<i64>>,
    pub clear_flags: Option<Vec<i64>>,
    pub master_weight: Option<i64>,
    pub low_threshold: Option<i64>,
    pub medium_threshold: Option<i64>,
    pub high_threshold: Option<i64>,
    pub home_domain: Option<String>,
    pub signer: Option<SignerBody>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChangeTrustBody {
    pub source: Option<String>,
    pub asset: Option<AssetBody>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AllowTrustBody {
    pub source: Option<String>,
    pub asset_code: String,
    pub trustor: String,
    pub authorize: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AccountMergeBody {
    pub source: Option<String>,
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InflationBody {
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ManageDataBody {
    pub source: Option<String>,
    pub name: String,
    /// Base64 encoded value. Absent means the entry is deleted.
    #[serde(alias = "value")]
    pub data: Option<String>,
}

/// A signer added or removed through `set_options`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub public_key: AccountId,
    pub weight: u8,
}

/// Typed, validated form of every operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MutationBody {
    CreateAccount {
        destination: AccountId,
        starting_balance: Amount,
    },
    Payment {
        destination: AccountId,
        amount: Amount,
        asset: Asset,
    },
    PathPayment {
        destination: AccountId,
        destination_amount: Amount,
        destination_asset: Asset,
        send_max: Amount,
        send_asset: Asset,
        path: Vec<Asset>,
    },
    ManageOffer {
        selling: Asset,
        buying: Asset,
        amount: Amount,
        price: Price,
        offer_id: u64,
        passive: bool,
    },
    SetOptions {
        inflation_dest: Option<AccountId>,
        set_flags: Option<u32>,
        clear_flags: Option<u32>,
        master_weight: Option<u8>,
        low_threshold: Option<u8>,
        medium_threshold: Option<u8>,
        high_threshold: Option<u8>,
        home_domain: Option<String>,
        signer: Option<Signer>,
    },
    ChangeTrust {
        asset: Asset,
        limit: Option<Amount>,
    },
    AllowTrust {
        trustor: AccountId,
        asset_code: String,
        authorize: bool,
    },
    AccountMerge {
        destination: AccountId,
    },
    Inflation,
    ManageData {
        name: String,
        value: Option<String>,
    },
}

/// One operation of a transaction: an optional per-operation source account
/// and its typed body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMutation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AccountId>,
    pub body: MutationBody,
}

impl OperationBody {
    /// Decodes `raw` into the body shape of `kind`. A missing or `null` body
    /// decodes as `{}`.
    pub fn decode(kind: OperationKind, raw: &Value) -> Result<Self, serde_json::Error> {
        let raw = match raw {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };
        Ok(match kind {
            OperationKind::CreateAccount => OperationBody::CreateAccount(serde_json::from_value(raw)?),
            OperationKind::Payment => OperationBody::Payment(serde_json::from_value(raw)?),
            OperationKind::PathPayment => OperationBody::PathPayment(serde_json::from_value(raw)?),
            OperationKind::ManageOffer => OperationBody::ManageOffer(serde_json::from_value(raw)?),
            OperationKind::CreatePassiveOffer => {
                let mut body: ManageOfferBody = serde_json::from_value(raw)?;
                body.passive = true;
                OperationBody::ManageOffer(body)
            }
            OperationKind::SetOptions => OperationBody::SetOptions(serde_json::from_value(raw)?),
            OperationKind::ChangeTrust => OperationBody::ChangeTrust(serde_json::from_value(raw)?),
            OperationKind::AllowTrust => OperationBody::AllowTrust(serde_json::from_value(raw)?),
            OperationKind::AccountMerge => OperationBody::AccountMerge(serde_json::from_value(raw)?),
            OperationKind::Inflation => OperationBody::Inflation(serde_json::from_value(raw)?),
            OperationKind::ManageData => OperationBody::ManageData(serde_json::from_value(raw)?),
        })
    }

    /// Validates every field and produces the typed mutation. Field names in
    /// errors are relative to the body, e.g. `asset[issuer]`.
    pub fn validate(&self) -> Result<OperationMutation, GatewayError> {
        let (source, body) = match self {
            OperationBody::CreateAccount(body) => (
                &body.source,
                MutationBody::CreateAccount {
                    destination: account("destination", &body.destination)?,
                    starting_balance: positive_amount("starting_balance", &body.starting_balance)?,
                },
            ),
            OperationBody::Payment(body) => (
                &body.source,
                MutationBody::Payment {
                    destination: account("destination", &body.destination)?,
                    amount: positive_amount("amount", &body.amount)?,
                    asset: asset("asset", body.asset.as_ref())?,
                },
            ),
            OperationBody::PathPayment(body) => {
                if body.path.len() > MAX_PATH_LENGTH {
                    return Err(GatewayError::invalid(
                        "path",
                        body.path.len().to_string(),
                        "Path can contain at most 5 assets.",
                    ));
                }
                let path = body
                    .path
                    .iter()
                    .enumerate()
                    .map(|(i, hop)| asset(&format!("path[{}]", i), Some(hop)))
                    .collect::<Result<Vec<_>, _>>()?;
                (
                    &body.source,
                    MutationBody::PathPayment {
                        destination: account("destination", &body.destination)?,
                        destination_amount: positive_amount(
                            "destination_amount",
                            &body.destination_amount,
                        )?,
                        destination_asset: asset(
                            "destination_asset",
                            body.destination_asset.as_ref(),
                        )?,
                        send_max: positive_amount("send_max", &body.send_max)?,
                        send_asset: asset("send_asset", body.send_asset.as_ref())?,
                        path,
                    },
                )
            }
            OperationBody::ManageOffer(body) => {
                let offer_id = match (&body.offer_id, body.passive) {
                    (Some(offer_id), true) => {
                        return Err(GatewayError::invalid(
                            "offer_id",
                            offer_id.as_str(),
                            "Passive offers cannot update an existing offer.",
                        ))
                    }
                    (Some(offer_id), false) => u64::from_str(offer_id).map_err(|_| {
                        GatewayError::invalid("offer_id", offer_id.as_str(), "Offer ID must be a number.")
                    })?,
                    (None, _) => 0,
                };
                (
                    &body.source,
                    MutationBody::ManageOffer {
                        selling: asset("selling", body.selling.as_ref())?,
                        buying: asset("buying", body.buying.as_ref())?,
                        amount: amount("amount", &body.amount)?,
                        price: Price::from_str(&body.price)
                            .map_err(|msg| GatewayError::invalid("price", body.price.as_str(), msg))?,
                        offer_id,
                        passive: body.passive,
                    },
                )
            }
            OperationBody::SetOptions(body) => (&body.source, body.to_mutation()?),
            OperationBody::ChangeTrust(body) => (
                &body.source,
                MutationBody::ChangeTrust {
                    asset: asset("asset", body.asset.as_ref())?,
                    limit: body
                        .limit
                        .as_ref()
                        .map(|limit| amount("limit", limit))
                        .transpose()?,
                },
            ),
            OperationBody::AllowTrust(body) => {
                validate_asset_code(&body.asset_code).map_err(|msg| {
                    GatewayError::invalid("asset_code", body.asset_code.as_str(), msg)
                })?;
                (
                    &body.source,
                    MutationBody::AllowTrust {
                        trustor: account("trustor", &body.trustor)?,
                        asset_code: body.asset_code.clone(),
                        authorize: body.authorize,
                    },
                )
            }
            OperationBody::AccountMerge(body) => (
                &body.source,
                MutationBody::AccountMerge {
                    destination: account("destination", &body.destination)?,
                },
            ),
            OperationBody::Inflation(body) => (&body.source, MutationBody::Inflation),
            OperationBody::ManageData(body) => (&body.source, body.to_mutation()?),
        };

        let source = source
            .as_ref()
            .map(|source| account("source", source))
            .transpose()?;
        Ok(OperationMutation { source, body })
    }
}

impl SetOptionsBody {
    fn to_mutation(&self) -> Result<MutationBody, GatewayError> {
        let signer = match &self.signer {
            Some(signer) => Some(Signer {
                public_key: account("signer[public_key]", &signer.public_key)?,
                weight: weight("signer[weight]", Some(signer.weight))?.unwrap_or_default(),
            }),
            None => None,
        };
        if let Some(home_domain) = &self.home_domain {
            if home_domain.len() > MAX_HOME_DOMAIN_LENGTH {
                return Err(GatewayError::invalid(
                    "home_domain",
                    home_domain.as_str(),
                    "Home domain can be at most 32 bytes long.",
                ));
            }
        }
        Ok(MutationBody::SetOptions {
            inflation_dest: self
                .inflation_dest
                .as_ref()
                .map(|dest| account("inflation_dest", dest))
                .transpose()?,
            set_flags: flags("set_flags", self.set_flags.as_deref())?,
            clear_flags: flags("clear_flags", self.clear_flags.as_deref())?,
            master_weight: weight("master_weight", self.master_weight)?,
            low_threshold: weight("low_threshold", self.low_threshold)?,
            medium_threshold: weight("medium_threshold", self.medium_threshold)?,
            high_threshold: weight("high_threshold", self.high_threshold)?,
            home_domain: self.home_domain.clone(),
            signer,
        })
    }
}

impl ManageDataBody {
    fn to_mutation(&self) -> Result<MutationBody, GatewayError> {
        if self.name.is_empty() || self.name.len() > MAX_DATA_NAME_LENGTH {
            return Err(GatewayError::invalid(
                "name",
                self.name.as_str(),
                "Name must be between 1 and 64 bytes long.",
            ));
        }
        if let Some(data) = &self.data {
            let decoded = STANDARD
                .decode(data)
                .map_err(|_| GatewayError::invalid("data", data.as_str(), "Data must be base64 encoded."))?;
            if decoded.len() > MAX_DATA_VALUE_LENGTH {
                return Err(GatewayError::invalid(
                    "data",
                    data.as_str(),
                    "Data can be at most 64 bytes long.",
                ));
            }
        }
        Ok(MutationBody::ManageData {
            name: self.name.clone(),
            value: self.data.clone(),
        })
    }
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, GatewayError> {
    if value.is_empty() {
        return Err(GatewayError::invalid(field, value, "Field is required."));
    }
    Ok(value)
}

fn account(field: &str, value: &str) -> Result<AccountId, GatewayError> {
    AccountId::from_str(required(field, value)?)
        .map_err(|msg| GatewayError::invalid(field, value, msg))
}

fn amount(field: &str, value: &str) -> Result<Amount, GatewayError> {
    Amount::from_str(required(field, value)?).map_err(|msg| GatewayError::invalid(field, value, msg))
}

fn positive_amount(field: &str, value: &str) -> Result<Amount, GatewayError> {
    let parsed = amount(field, value)?;
    if parsed.is_zero() {
        return Err(GatewayError::invalid(field, value, "Amount must be positive."));
    }
    Ok(parsed)
}

fn asset(field: &str, body: Option<&AssetBody>) -> Result<Asset, GatewayError> {
    let body = body.ok_or_else(|| GatewayError::invalid(field, "", "Field is required."))?;
    match &body.issuer {
        None if body.code.eq_ignore_ascii_case("native") => Ok(Asset::Native),
        None => Err(GatewayError::invalid(
            format!("{}[issuer]", field),
            "",
            "Issuer is required for non-native assets.",
        )),
        Some(issuer) => {
            validate_asset_code(&body.code).map_err(|msg| {
                GatewayError::invalid(format!("{}[code]", field), body.code.as_str(), msg)
            })?;
            let issuer = account(&format!("{}[issuer]", field), issuer)?;
            Ok(Asset::Credit {
                code: body.code.clone(),
                issuer,
            })
        }
    }
}

fn weight(field: &str, value: Option<i64>) -> Result<Option<u8>, GatewayError> {
    value
        .map(|value| {
            u8::try_from(value).map_err(|_| {
                GatewayError::invalid(field, value.to_string(), "Value must be between 0 and 255.")
            })
        })
        .transpose()
}

fn flags(field: &str, values: Option<&[i64]>) -> Result<Option<u32>, GatewayError> {
    let values = match values {
        Some(values) => values,
        None => return Ok(None),
    };
    let mut mask = 0u32;
    for value in values {
        if !KNOWN_FLAGS.contains(value) {
            return Err(GatewayError::invalid(
                field,
                value.to_string(),
                "Flags must be one of 1, 2, 4 or 8.",
            ));
        }
        mask |= *value as u32;
    }
    Ok(Some(mask))
}
