use super::currency::Currency;
use super::input::parse_datetime;
use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use taxrec_derive::CsvSchema;

/// How many days back a missing daily price may be filled from.
pub const MAX_PRICE_GAP_DAYS: u64 = 4;

#[derive(Debug, thiserror::Error)]
pub enum PriceError {
    #[error("no {ticker} price on or up to {max_gap} days before {date}")]
    Missing {
        ticker: String,
        date: NaiveDate,
        max_gap: u64,
    },
    #[error("invalid price row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Spot price of a currency in the reporting fiat unit.
pub trait PriceSource {
    /// Price of one unit of a non-fiat `currency` at `at`.
    fn spot_price(&self, currency: &Currency, at: DateTime<Utc>) -> Result<Decimal, PriceError>;

    /// Like `spot_price`, but fiat is always worth 1.
    fn price(&self, currency: &Currency, at: DateTime<Utc>) -> Result<Decimal, PriceError> {
        if currency.is_fiat() {
            Ok(Decimal::ONE)
        } else {
            self.spot_price(currency, at)
        }
    }
}

/// Column description for CSV inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvField {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

/// One row of a daily price file.
#[derive(Debug, Clone, Serialize, Deserialize, CsvSchema)]
pub struct PriceRecord {
    /// Currency ticker (e.g. BTC, ETH)
    pub currency: String,
    /// Day the price applies to (YYYY-MM-DD)
    pub date: String,
    /// Price of one unit in the reporting fiat currency
    pub price: Decimal,
}

/// Daily closing prices keyed by ticker.
#[derive(Debug, Default, Clone)]
pub struct Prices {
    prices: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
}

impl Prices {
    pub fn read_csv<R: Read>(reader: R) -> Result<Prices, PriceError> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut prices = Prices::default();
        for (i, result) in rdr.deserialize::<PriceRecord>().enumerate() {
            let record = result?;
            let row = i + 1;
            let date = parse_datetime(&record.date)
                .map_err(|e| PriceError::InvalidRow {
                    row,
                    reason: e.to_string(),
                })?
                .date_naive();
            if record.price.is_sign_negative() && !record.price.is_zero() {
                return Err(PriceError::InvalidRow {
                    row,
                    reason: format!("negative price {}", record.price),
                });
            }
            prices.insert(&record.currency, date, record.price);
        }
        log::debug!("Loaded prices for {} currencies", prices.prices.len());
        Ok(prices)
    }

    pub fn insert(&mut self, ticker: &str, date: NaiveDate, price: Decimal) {
        self.prices
            .entry(ticker.to_string())
            .or_default()
            .insert(date, price);
    }

    /// Price on `date`, else the most recent earlier price at most `MAX_PRICE_GAP_DAYS` old.
    pub fn get(&self, ticker: &str, date: NaiveDate) -> Option<Decimal> {
        let daily = self.prices.get(ticker)?;
        let earliest = date
            .checked_sub_days(Days::new(MAX_PRICE_GAP_DAYS))
            .unwrap_or(NaiveDate::MIN);
        daily
            .range(earliest..=date)
            .next_back()
            .map(|(_, price)| *price)
    }

    pub fn len(&self) -> usize {
        self.prices.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PriceSource for Prices {
    fn spot_price(&self, currency: &Currency, at: DateTime<Utc>) -> Result<Decimal, PriceError> {
        let date = at.date_naive();
        self.get(currency.ticker(), date)
            .ok_or_else(|| PriceError::Missing {
                ticker: currency.ticker().to_string(),
                date,
                max_gap: MAX_PRICE_GAP_DAYS,
            })
    }
}
