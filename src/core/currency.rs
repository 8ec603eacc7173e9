use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tickers treated as fiat. Prices are quoted in fiat and fiat always prices at 1.
pub const FIAT_TICKERS: &[&str] = &["USD", "EUR"];

/// A currency, identified by its (case-sensitive) ticker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Currency {
    ticker: Arc<str>,
}

impl Currency {
    /// A standalone currency. Prefer `CurrencyRegistry::get_or_insert` when loading data so the
    /// ticker allocation is shared.
    pub fn new(ticker: &str) -> Self {
        Currency {
            ticker: Arc::from(ticker),
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn is_fiat(&self) -> bool {
        FIAT_TICKERS.contains(&self.ticker())
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.ticker)
    }
}

impl Serialize for Currency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.ticker)
    }
}

/// Hands out one shared `Currency` per ticker for the duration of a run.
#[derive(Debug, Default)]
pub struct CurrencyRegistry {
    currencies: HashMap<String, Currency>,
}

impl CurrencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_insert(&mut self, ticker: &str) -> Currency {
        self.currencies
            .entry(ticker.to_string())
            .or_insert_with(|| Currency::new(ticker))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.currencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }
}
