use ed25519_dalek::SigningKey;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use stellar_strkey::ed25519::{PrivateKey, PublicKey};

/// Number of stroops in one unit of any asset.
pub const STROOPS_PER_UNIT: i64 = 10_000_000;
const AMOUNT_SCALE: u32 = 7;

/// A ledger account, i.e. an ed25519 public key rendered as a `G...` strkey.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId([u8; 32]);

impl AccountId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        AccountId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for AccountId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.starts_with('G') {
            return Err("Account ID must start with `G`.");
        }
        PublicKey::from_string(s)
            .map(|key| AccountId(key.0))
            .map_err(|_| "Account ID is not a valid public key.")
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", PublicKey(self.0).to_string())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountId({})", self)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        AccountId::from_str(&s).map_err(D::Error::custom)
    }
}

/// A secret seed (`S...` strkey). The text never shows up in `Debug` output.
#[derive(Clone)]
pub struct SecretSeed(SecretString);

impl SecretSeed {
    pub fn parse(seed: &str) -> Result<Self, &'static str> {
        if !seed.starts_with('S') {
            return Err("Secret seed must start with `S`.");
        }
        PrivateKey::from_string(seed).map_err(|_| "Secret seed is invalid.")?;
        Ok(SecretSeed(SecretString::new(seed.to_owned())))
    }

    pub fn from_signing_key(key: &SigningKey) -> Self {
        SecretSeed(SecretString::new(
            PrivateKey(key.to_bytes()).to_string(),
        ))
    }

    pub fn signing_key(&self) -> SigningKey {
        // The seed was validated when it was created
        let bytes = PrivateKey::from_string(self.0.expose_secret())
            .map(|key| key.0)
            .unwrap_or_default();
        SigningKey::from_bytes(&bytes)
    }

    pub fn account_id(&self) -> AccountId {
        AccountId(self.signing_key().verifying_key().to_bytes())
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SecretSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretSeed(for {})", self.account_id())
    }
}

impl<'de> Deserialize<'de> for SecretSeed {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        SecretSeed::parse(&s).map_err(D::Error::custom)
    }
}

/// An amount of any asset, held as an integer number of stroops.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub fn from_stroops(stroops: i64) -> Self {
        Amount(stroops)
    }

    pub fn stroops(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Amount {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str_exact(s.trim()).map_err(|_| "Amount is not a number.")?;
        if value.is_sign_negative() {
            return Err("Amount must be non-negative.");
        }
        if value.normalize().scale() > AMOUNT_SCALE {
            return Err("Amount can have at most 7 decimal places.");
        }
        value
            .checked_mul(Decimal::from(STROOPS_PER_UNIT))
            .and_then(|stroops| stroops.to_i64())
            .map(Amount)
            .ok_or("Amount is too big.")
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = Decimal::new(self.0, AMOUNT_SCALE);
        value.rescale(AMOUNT_SCALE);
        write!(f, "{}", value)
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(D::Error::custom)
    }
}

/// An offer price as a reduced fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Price {
    pub n: i32,
    pub d: i32,
}

impl FromStr for Price {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|_| "Price is not a number.")?
            .normalize();
        if value <= Decimal::ZERO {
            return Err("Price must be positive.");
        }
        let numerator = value.mantissa();
        let denominator = 10i128.pow(value.scale());
        let divisor = gcd(numerator, denominator);
        let n = i32::try_from(numerator / divisor).map_err(|_| "Price is out of range.")?;
        let d = i32::try_from(denominator / divisor).map_err(|_| "Price is out of range.")?;
        Ok(Price { n, d })
    }
}

fn gcd(mut a: i128, mut b: i128) -> i128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

/// Asset as sent by clients: `{"code": "native"}` or `{"code", "issuer"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBody {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Asset {
    Native,
    Credit { code: String, issuer: AccountId },
}

impl Asset {
    pub fn credit(code: &str, issuer: AccountId) -> Result<Self, &'static str> {
        validate_asset_code(code)?;
        Ok(Asset::Credit {
            code: code.to_owned(),
            issuer,
        })
    }

    pub fn code(&self) -> &str {
        match self {
            Asset::Native => "native",
            Asset::Credit { code, .. } => code,
        }
    }

    pub fn issuer(&self) -> Option<&AccountId> {
        match self {
            Asset::Native => None,
            Asset::Credit { issuer, .. } => Some(issuer),
        }
    }
}

/// Asset codes are 1 to 12 ASCII alphanumerics.
pub fn validate_asset_code(code: &str) -> Result<(), &'static str> {
    if code.is_empty() || code.len() > 12 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("Asset code must be 1-12 alphanumeric characters.");
    }
    Ok(())
}
