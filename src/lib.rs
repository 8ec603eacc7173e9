//! Reconciles transaction bundles reported by exchanges and blockchains, then computes realized
//! gains against a highest-price-first cost basis ledger.

pub mod core;
pub mod tax;
