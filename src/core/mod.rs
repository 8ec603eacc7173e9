pub mod address;
pub mod bundle;
pub mod consolidator;
pub mod currency;
pub mod input;
pub mod price;
pub mod transaction;

// Flat public surface for domain types and functions.
pub use address::{Address, AddressKind, AddressRegistry};
pub use bundle::{
    within_tolerance, BundleAction, BundleError, BundleStatus, CurrencyAmount, TransactionBundle,
};
pub use consolidator::{BundleConsolidator, Consolidation, ConsolidationError};
pub use currency::{Currency, CurrencyRegistry};
pub use input::{read_bundles_json, BundleInput, InputError, LoadedBundles};
pub use price::{CsvField, PriceError, PriceRecord, PriceSource, Prices};
pub use transaction::{AtomicTransaction, TransactionAction, TransactionError};
