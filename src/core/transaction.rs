use super::address::Address;
use super::currency::Currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Input label reserved for fee movements.
pub const FEE_PAYMENT_LABEL: &str = "PAY_FEE";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("negative amount {amount} in transaction of bundle {bundle_id}")]
    NegativeAmount { bundle_id: String, amount: Decimal },
}

/// What an atomic transaction did. Only fee payments matter to the pipeline, everything else is
/// kept as the source's own label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransactionAction {
    FeePayment,
    Label(String),
}

impl From<&str> for TransactionAction {
    fn from(label: &str) -> Self {
        if label == FEE_PAYMENT_LABEL {
            TransactionAction::FeePayment
        } else {
            TransactionAction::Label(label.to_string())
        }
    }
}

impl fmt::Display for TransactionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionAction::FeePayment => f.write_str(FEE_PAYMENT_LABEL),
            TransactionAction::Label(label) => f.write_str(label),
        }
    }
}

impl Serialize for TransactionAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One directed movement of an amount of a currency between two addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AtomicTransaction {
    created_at: DateTime<Utc>,
    action: TransactionAction,
    currency: Currency,
    from: Arc<Address>,
    to: Arc<Address>,
    bundle_id: String,
    amount: Decimal,
}

impl AtomicTransaction {
    pub fn new(
        created_at: DateTime<Utc>,
        action: TransactionAction,
        currency: Currency,
        from: Arc<Address>,
        to: Arc<Address>,
        bundle_id: &str,
        amount: Decimal,
    ) -> Result<Self, TransactionError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(TransactionError::NegativeAmount {
                bundle_id: bundle_id.to_string(),
                amount,
            });
        }
        Ok(AtomicTransaction {
            created_at,
            action,
            currency,
            from,
            to,
            bundle_id: bundle_id.to_string(),
            amount,
        })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn action(&self) -> &TransactionAction {
        &self.action
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn from(&self) -> &Arc<Address> {
        &self.from
    }

    pub fn to(&self) -> &Arc<Address> {
        &self.to
    }

    pub fn bundle_id(&self) -> &str {
        &self.bundle_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn is_fee_payment(&self) -> bool {
        self.action == TransactionAction::FeePayment
    }

    /// Stable textual form of every field, used for bundle fingerprints.
    pub fn canonical_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.created_at.to_rfc3339(),
            self.action,
            self.currency,
            self.from.key(),
            self.to.key(),
            self.bundle_id,
            self.amount.normalize()
        )
    }
}
