use super::address::Address;
use super::currency::Currency;
use super::transaction::{AtomicTransaction, TransactionAction};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Relative tolerance when comparing amounts of the same movement reported by two sources.
pub const AMOUNT_TOLERANCE: Decimal = dec!(0.000001);

/// Maximum clock skew between two sources reporting the same movement.
pub fn clock_skew_allowance() -> Duration {
    Duration::hours(1)
}

/// `true` when `a` and `b` differ by at most half their sum times the relative tolerance.
pub fn within_tolerance(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= dec!(0.5) * (a + b) * AMOUNT_TOLERANCE
}

/// `true` when an inbound leg at `inbound` can be the receiving end of an outbound leg at
/// `outbound`.
pub fn plausible_arrival(outbound: DateTime<Utc>, inbound: DateTime<Utc>) -> bool {
    inbound >= outbound || outbound - inbound < clock_skew_allowance()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BundleError {
    #[error("transactions cannot be aggregated into a single synthetic transaction: {bundle}")]
    NotSynthetizable { bundle: String },
    #[error("fees are only ever paid, never received: {bundle}")]
    FeeReceived { bundle: String },
    #[error("more than one fee paid in a bundle: {bundle}")]
    MultipleFees { bundle: String },
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum BundleAction {
    Transfer,
    TransferToSelf,
    Trade,
    GetFree,
    NoOp,
    PureFeePayment,
    ToBeDetermined,
}

#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Complete,
    #[default]
    Incomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrencyAmount {
    pub currency: Currency,
    pub amount: Decimal,
}

/// The transactions making up one economic event.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionBundle {
    id: String,
    action: BundleAction,
    status: BundleStatus,
    atomic_transactions: Vec<AtomicTransaction>,
    #[serde(skip)]
    from_controlled: bool,
    #[serde(skip)]
    to_controlled: bool,
    #[serde(skip)]
    synthetizable: bool,
}

impl TransactionBundle {
    pub fn new(
        id: &str,
        action: BundleAction,
        status: BundleStatus,
        atomic_transactions: Vec<AtomicTransaction>,
    ) -> Self {
        let from_controlled = atomic_transactions
            .iter()
            .any(|t| t.from().is_controlled());
        let to_controlled = atomic_transactions.iter().any(|t| t.to().is_controlled());
        let synthetizable = is_synthetizable(&atomic_transactions);
        TransactionBundle {
            id: id.to_string(),
            action,
            status,
            atomic_transactions,
            from_controlled,
            to_controlled,
            synthetizable,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn action(&self) -> BundleAction {
        self.action
    }

    pub fn status(&self) -> BundleStatus {
        self.status
    }

    pub fn atomic_transactions(&self) -> &[AtomicTransaction] {
        &self.atomic_transactions
    }

    pub fn into_atomic_transactions(self) -> Vec<AtomicTransaction> {
        self.atomic_transactions
    }

    /// Some transaction leaves a controlled address.
    pub fn from_controlled(&self) -> bool {
        self.from_controlled
    }

    /// Some transaction reaches a controlled address.
    pub fn to_controlled(&self) -> bool {
        self.to_controlled
    }

    pub fn synthetizable(&self) -> bool {
        self.synthetizable
    }

    pub fn is_complete(&self) -> bool {
        self.status == BundleStatus::Complete
    }

    /// No transactions, or only zero amounts.
    pub fn is_empty(&self) -> bool {
        self.atomic_transactions.iter().all(|t| t.amount().is_zero())
    }

    pub fn is_pure_fee(&self) -> bool {
        matches!(self.atomic_transactions.as_slice(), [only] if only.is_fee_payment())
    }

    pub fn non_fee_transactions(&self) -> impl Iterator<Item = &AtomicTransaction> {
        self.atomic_transactions
            .iter()
            .filter(|t| !t.is_fee_payment())
    }

    /// Earliest transaction instant. `None` for a bundle without transactions.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.atomic_transactions
            .iter()
            .map(AtomicTransaction::created_at)
            .min()
    }

    /// Distinct correlation keys of the transactions, in first-seen order.
    pub fn transaction_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for t in &self.atomic_transactions {
            if !ids.iter().any(|id| id == t.bundle_id()) {
                ids.push(t.bundle_id().to_string());
            }
        }
        ids
    }

    /// Distinct currencies moved, in first-seen order.
    pub fn currencies(&self) -> Vec<Currency> {
        let mut currencies: Vec<Currency> = Vec::new();
        for t in &self.atomic_transactions {
            if !currencies.contains(t.currency()) {
                currencies.push(t.currency().clone());
            }
        }
        currencies
    }

    /// The non-fee transactions collapsed into one, amounts summed. Only defined when they all
    /// share from, to, currency and instant (UTXO outputs of a single payment).
    pub fn synthetic_transaction(&self) -> Result<AtomicTransaction, BundleError> {
        let first = match self.non_fee_transactions().next() {
            Some(first) if self.synthetizable => first,
            _ => {
                return Err(BundleError::NotSynthetizable {
                    bundle: self.to_json(),
                })
            }
        };
        let amount = self.non_fee_transactions().map(|t| t.amount()).sum();
        AtomicTransaction::new(
            first.created_at(),
            TransactionAction::Label("SYNTHETIC".to_string()),
            first.currency().clone(),
            Arc::clone(first.from()),
            Arc::clone(first.to()),
            first.bundle_id(),
            amount,
        )
        .map_err(|_| BundleError::NotSynthetizable {
            bundle: self.to_json(),
        })
    }

    /// Non-fee amounts leaving controlled addresses, summed per currency.
    pub fn amounts_out_per_currency(&self) -> Vec<CurrencyAmount> {
        self.sum_per_currency(|t| t.from().is_controlled())
    }

    /// Non-fee amounts reaching controlled addresses, summed per currency.
    pub fn amounts_in_per_currency(&self) -> Vec<CurrencyAmount> {
        self.sum_per_currency(|t| t.to().is_controlled())
    }

    fn sum_per_currency<F>(&self, include: F) -> Vec<CurrencyAmount>
    where
        F: Fn(&AtomicTransaction) -> bool,
    {
        let mut sums: Vec<CurrencyAmount> = Vec::new();
        for t in self.non_fee_transactions().filter(|t| include(t)) {
            match sums.iter_mut().find(|s| &s.currency == t.currency()) {
                Some(sum) => sum.amount += t.amount(),
                None => sums.push(CurrencyAmount {
                    currency: t.currency().clone(),
                    amount: t.amount(),
                }),
            }
        }
        sums
    }

    /// The single fee paid from a controlled address, if any.
    pub fn fee_transaction(&self) -> Result<Option<&AtomicTransaction>, BundleError> {
        let fees = self
            .atomic_transactions
            .iter()
            .filter(|t| t.is_fee_payment());
        if fees.clone().any(|t| t.to().is_controlled()) {
            return Err(BundleError::FeeReceived {
                bundle: self.to_json(),
            });
        }
        let mut outbound = fees.filter(|t| t.from().is_controlled());
        let fee = outbound.next();
        if outbound.next().is_some() {
            return Err(BundleError::MultipleFees {
                bundle: self.to_json(),
            });
        }
        Ok(fee)
    }

    /// Same multiset of atomic transactions.
    pub fn equal(&self, other: &TransactionBundle) -> bool {
        if self.atomic_transactions.len() != other.atomic_transactions.len() {
            return false;
        }
        let mut unmatched: Vec<&AtomicTransaction> = other.atomic_transactions.iter().collect();
        for t in &self.atomic_transactions {
            match unmatched.iter().position(|o| *o == t) {
                Some(i) => {
                    unmatched.swap_remove(i);
                }
                None => return false,
            }
        }
        true
    }

    pub fn complete(&self) -> TransactionBundle {
        self.with_status(self.action, BundleStatus::Complete)
    }

    pub fn with_status(&self, action: BundleAction, status: BundleStatus) -> TransactionBundle {
        TransactionBundle {
            action,
            status,
            ..self.clone()
        }
    }

    /// SHA-256 over the sorted canonical transaction keys. Equal bundles share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut keys: Vec<String> = self
            .atomic_transactions
            .iter()
            .map(AtomicTransaction::canonical_key)
            .collect();
        keys.sort();
        let mut hasher = Sha256::new();
        for key in keys {
            hasher.update(key.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// Pretty JSON used in error reports.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{self:?}"))
    }

    /// Address of the first non-fee transaction leaving a controlled address.
    pub fn controlled_sender(&self) -> Option<&Arc<Address>> {
        self.non_fee_transactions()
            .find(|t| t.from().is_controlled())
            .map(AtomicTransaction::from)
    }

    /// Address of the first non-fee transaction reaching a controlled address.
    pub fn controlled_recipient(&self) -> Option<&Arc<Address>> {
        self.non_fee_transactions()
            .find(|t| t.to().is_controlled())
            .map(AtomicTransaction::to)
    }
}

fn is_synthetizable(transactions: &[AtomicTransaction]) -> bool {
    let mut non_fee = transactions.iter().filter(|t| !t.is_fee_payment());
    let Some(first) = non_fee.next() else {
        return false;
    };
    non_fee.all(|t| {
        t.from() == first.from()
            && t.to() == first.to()
            && t.currency() == first.currency()
            && t.created_at() == first.created_at()
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::transaction::FEE_PAYMENT_LABEL;
    use chrono::TimeZone;

    pub(crate) fn at(hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 6, 1, hour, min, sec).unwrap()
    }

    pub(crate) fn wallet(name: &str, controlled: bool) -> Arc<Address> {
        Arc::new(Address::wallet("ethereum", name, controlled))
    }

    pub(crate) fn tx(
        created_at: DateTime<Utc>,
        ticker: &str,
        from: &Arc<Address>,
        to: &Arc<Address>,
        bundle_id: &str,
        amount: Decimal,
    ) -> AtomicTransaction {
        AtomicTransaction::new(
            created_at,
            TransactionAction::from("TRANSFER"),
            Currency::new(ticker),
            Arc::clone(from),
            Arc::clone(to),
            bundle_id,
            amount,
        )
        .unwrap()
    }

    pub(crate) fn fee(
        created_at: DateTime<Utc>,
        ticker: &str,
        from: &Arc<Address>,
        bundle_id: &str,
        amount: Decimal,
    ) -> AtomicTransaction {
        AtomicTransaction::new(
            created_at,
            TransactionAction::from(FEE_PAYMENT_LABEL),
            Currency::new(ticker),
            Arc::clone(from),
            Arc::new(Address::void("Miner")),
            bundle_id,
            amount,
        )
        .unwrap()
    }

    pub(crate) fn bundle(
        id: &str,
        action: BundleAction,
        transactions: Vec<AtomicTransaction>,
    ) -> TransactionBundle {
        TransactionBundle::new(id, action, BundleStatus::Incomplete, transactions)
    }

    #[test]
    fn derived_flags() {
        let mine = wallet("0xmine", true);
        let other = wallet("0xother", false);
        let b = bundle(
            "1",
            BundleAction::Transfer,
            vec![
                tx(at(10, 0, 0), "ETH", &mine, &other, "1", dec!(1)),
                fee(at(10, 0, 0), "ETH", &mine, "1", dec!(0.01)),
            ],
        );
        assert!(b.from_controlled());
        assert!(!b.to_controlled());
        assert!(b.synthetizable());
        assert!(!b.is_empty());
        assert!(!b.is_pure_fee());
        assert_eq!(b.non_fee_transactions().count(), 1);

        let only_fee = bundle(
            "2",
            BundleAction::PureFeePayment,
            vec![fee(at(10, 0, 0), "ETH", &mine, "2", dec!(0.01))],
        );
        assert!(only_fee.is_pure_fee());
        assert!(!only_fee.synthetizable());
    }

    #[test]
    fn empty_bundles() {
        assert!(bundle("e", BundleAction::Transfer, vec![]).is_empty());
        let mine = wallet("0xmine", true);
        let other = wallet("0xother", false);
        let zero = bundle(
            "z",
            BundleAction::Transfer,
            vec![tx(at(10, 0, 0), "ETH", &mine, &other, "z", dec!(0))],
        );
        assert!(zero.is_empty());
    }

    #[test]
    fn timestamp_and_ids() {
        let mine = wallet("0xmine", true);
        let other = wallet("0xother", false);
        let b = bundle(
            "a",
            BundleAction::Transfer,
            vec![
                tx(at(11, 0, 0), "ETH", &mine, &other, "b", dec!(1)),
                tx(at(10, 0, 0), "ETH", &other, &mine, "a", dec!(1)),
                tx(at(12, 0, 0), "ETH", &other, &mine, "b", dec!(1)),
            ],
        );
        assert_eq!(b.timestamp(), Some(at(10, 0, 0)));
        assert_eq!(b.transaction_ids(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn synthetic_transaction_sums_utxo_outputs() {
        let mine = wallet("bc1mine", true);
        let other = wallet("bc1other", false);
        let b = bundle(
            "utxo",
            BundleAction::Transfer,
            vec![
                tx(at(9, 0, 0), "BTC", &mine, &other, "utxo", dec!(0.2)),
                tx(at(9, 0, 0), "BTC", &mine, &other, "utxo", dec!(0.3)),
                fee(at(9, 0, 0), "BTC", &mine, "utxo", dec!(0.0001)),
            ],
        );
        let synthetic = b.synthetic_transaction().unwrap();
        assert_eq!(synthetic.amount(), dec!(0.5));
        assert_eq!(synthetic.currency().ticker(), "BTC");
    }

    #[test]
    fn synthetic_transaction_requires_shared_fields() {
        let mine = wallet("0xmine", true);
        let other = wallet("0xother", false);
        let b = bundle(
            "t",
            BundleAction::Trade,
            vec![
                tx(at(9, 0, 0), "ETH", &mine, &other, "t", dec!(1)),
                tx(at(9, 0, 0), "BTC", &other, &mine, "t", dec!(0.05)),
            ],
        );
        assert!(!b.synthetizable());
        assert!(matches!(
            b.synthetic_transaction(),
            Err(BundleError::NotSynthetizable { .. })
        ));
    }

    #[test]
    fn amounts_per_currency_skip_fees_and_foreign_legs() {
        let mine = wallet("0xmine", true);
        let other = wallet("0xother", false);
        let b = bundle(
            "t",
            BundleAction::Trade,
            vec![
                tx(at(9, 0, 0), "USDC", &mine, &other, "t", dec!(100)),
                tx(at(9, 0, 0), "USDC", &mine, &other, "t", dec!(50)),
                tx(at(9, 0, 0), "ETH", &other, &mine, "t", dec!(0.1)),
                fee(at(9, 0, 0), "ETH", &mine, "t", dec!(0.002)),
            ],
        );
        assert_eq!(
            b.amounts_out_per_currency(),
            vec![CurrencyAmount {
                currency: Currency::new("USDC"),
                amount: dec!(150)
            }]
        );
        assert_eq!(
            b.amounts_in_per_currency(),
            vec![CurrencyAmount {
                currency: Currency::new("ETH"),
                amount: dec!(0.1)
            }]
        );
    }

    #[test]
    fn fee_transaction_invariants() {
        let mine = wallet("0xmine", true);
        let other = wallet("0xother", false);
        let one = bundle(
            "f",
            BundleAction::Transfer,
            vec![
                tx(at(9, 0, 0), "ETH", &mine, &other, "f", dec!(1)),
                fee(at(9, 0, 0), "ETH", &mine, "f", dec!(0.01)),
            ],
        );
        assert_eq!(one.fee_transaction().unwrap().unwrap().amount(), dec!(0.01));

        let two = bundle(
            "f",
            BundleAction::Transfer,
            vec![
                fee(at(9, 0, 0), "ETH", &mine, "f", dec!(0.01)),
                fee(at(9, 0, 0), "ETH", &mine, "f", dec!(0.02)),
            ],
        );
        assert!(matches!(
            two.fee_transaction(),
            Err(BundleError::MultipleFees { .. })
        ));

        let received = AtomicTransaction::new(
            at(9, 0, 0),
            TransactionAction::FeePayment,
            Currency::new("ETH"),
            Arc::clone(&other),
            Arc::clone(&mine),
            "f",
            dec!(0.01),
        )
        .unwrap();
        let received = bundle("f", BundleAction::Transfer, vec![received]);
        assert!(matches!(
            received.fee_transaction(),
            Err(BundleError::FeeReceived { .. })
        ));

        // fees paid by someone else are ignored
        let foreign = bundle(
            "f",
            BundleAction::Transfer,
            vec![fee(at(9, 0, 0), "ETH", &other, "f", dec!(0.01))],
        );
        assert_eq!(foreign.fee_transaction().unwrap(), None);
    }

    #[test]
    fn equality_is_symmetric_and_order_independent() {
        let mine = wallet("0xmine", true);
        let other = wallet("0xother", false);
        let t1 = tx(at(9, 0, 0), "ETH", &mine, &other, "x", dec!(1));
        let t2 = fee(at(9, 0, 0), "ETH", &mine, "x", dec!(0.01));
        let a = bundle("x", BundleAction::Transfer, vec![t1.clone(), t2.clone()]);
        let b = bundle("x", BundleAction::Transfer, vec![t2.clone(), t1.clone()]);
        assert!(a.equal(&b));
        assert!(b.equal(&a));
        assert_eq!(a.fingerprint(), b.fingerprint());

        // same length, different multiplicities
        let c = bundle("x", BundleAction::Transfer, vec![t1.clone(), t1.clone()]);
        let d = bundle("x", BundleAction::Transfer, vec![t1, t2]);
        assert!(!c.equal(&d));
        assert!(!d.equal(&c));
        assert_ne!(c.fingerprint(), d.fingerprint());
    }

    #[test]
    fn tolerance_boundary() {
        assert!(within_tolerance(dec!(999999.5), dec!(1000000.5)));
        assert!(within_tolerance(dec!(1000000.5), dec!(999999.5)));
        assert!(!within_tolerance(dec!(999999.4), dec!(1000000.6)));
    }

    #[test]
    fn clock_skew() {
        assert!(plausible_arrival(at(10, 0, 0), at(12, 0, 0)));
        assert!(plausible_arrival(at(10, 0, 0), at(9, 30, 0)));
        assert!(!plausible_arrival(at(10, 0, 0), at(9, 0, 0)));
    }

    #[test]
    fn complete_keeps_action() {
        let b = bundle("c", BundleAction::GetFree, vec![]);
        let c = b.complete();
        assert!(c.is_complete());
        assert_eq!(c.action(), BundleAction::GetFree);
        assert_eq!(c.id(), "c");
    }
}
