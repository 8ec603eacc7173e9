use super::address::{Address, AddressRegistry};
use super::bundle::{BundleAction, BundleStatus, TransactionBundle};
use super::currency::CurrencyRegistry;
use super::transaction::{AtomicTransaction, TransactionAction, TransactionError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::io::Read;

#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("invalid bundle file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error("invalid datetime: {0}")]
    InvalidDatetime(String),
}

/// Input root for bundle JSON
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BundleInput {
    /// Tickers whose bundles are set aside before reconciliation (spam tokens)
    #[serde(default)]
    pub excluded_currencies: Vec<String>,
    pub bundles: Vec<BundleRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BundleRecord {
    /// Correlation key of the source record (chain transaction hash, exchange trade id)
    pub id: String,
    pub action: BundleAction,
    #[serde(default)]
    pub status: BundleStatus,
    pub transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransactionRecord {
    /// When the movement happened (RFC3339; naive times and dates are UTC)
    #[serde(deserialize_with = "deserialize_datetime")]
    #[schemars(with = "String")]
    pub created_at: DateTime<Utc>,
    /// Source label of the movement; `PAY_FEE` marks a fee payment
    pub action: String,
    pub currency: String,
    pub from: AddressRecord,
    pub to: AddressRecord,
    #[schemars(with = "f64")]
    pub amount: Decimal,
    /// Defaults to the id of the enclosing bundle
    #[serde(default)]
    pub bundle_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AddressRecord {
    Wallet {
        chain: String,
        address: String,
        controlled: bool,
        /// Keep the address verbatim instead of lower-casing it
        #[serde(default)]
        case_sensitive: bool,
    },
    Platform {
        platform: String,
        nickname: String,
        controlled: bool,
    },
    BankAccount,
    Void {
        note: String,
    },
}

impl From<&AddressRecord> for Address {
    fn from(record: &AddressRecord) -> Self {
        match record {
            AddressRecord::Wallet {
                chain,
                address,
                controlled,
                case_sensitive: true,
            } => Address::wallet_case_sensitive(chain, address, *controlled),
            AddressRecord::Wallet {
                chain,
                address,
                controlled,
                ..
            } => Address::wallet(chain, address, *controlled),
            AddressRecord::Platform {
                platform,
                nickname,
                controlled,
            } => Address::platform(platform, nickname, *controlled),
            AddressRecord::BankAccount => Address::bank_account(),
            AddressRecord::Void { note } => Address::void(note),
        }
    }
}

/// Bundles loaded from an input file, with the file's own exclusion list.
#[derive(Debug)]
pub struct LoadedBundles {
    pub bundles: Vec<TransactionBundle>,
    pub excluded_currencies: Vec<String>,
}

pub fn read_bundles_json<R: Read>(
    reader: R,
    currencies: &mut CurrencyRegistry,
    addresses: &mut AddressRegistry,
) -> Result<LoadedBundles, InputError> {
    let input: BundleInput = serde_json::from_reader(reader)?;
    let bundles = input
        .bundles
        .iter()
        .map(|record| record.to_bundle(currencies, addresses))
        .collect::<Result<Vec<_>, _>>()?;
    log::info!(
        "Loaded {} bundles ({} currencies, {} addresses)",
        bundles.len(),
        currencies.len(),
        addresses.len()
    );
    Ok(LoadedBundles {
        bundles,
        excluded_currencies: input.excluded_currencies,
    })
}

impl BundleRecord {
    pub fn to_bundle(
        &self,
        currencies: &mut CurrencyRegistry,
        addresses: &mut AddressRegistry,
    ) -> Result<TransactionBundle, TransactionError> {
        let transactions = self
            .transactions
            .iter()
            .map(|tx| {
                AtomicTransaction::new(
                    tx.created_at,
                    TransactionAction::from(tx.action.as_str()),
                    currencies.get_or_insert(&tx.currency),
                    addresses.register(Address::from(&tx.from)),
                    addresses.register(Address::from(&tx.to)),
                    tx.bundle_id.as_deref().unwrap_or(&self.id),
                    tx.amount,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransactionBundle::new(
            &self.id,
            self.action,
            self.status,
            transactions,
        ))
    }
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, InputError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| InputError::InvalidDatetime(s.to_string()))
}

fn deserialize_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    parse_datetime(&s).map_err(|err| serde::de::Error::custom(err.to_string()))
}
