use super::cost_basis::{CostBasisUpdate, MasterCostBasisTracker};
use super::TaxError;
use crate::core::bundle::{plausible_arrival, within_tolerance};
use crate::core::{
    AtomicTransaction, BundleAction, Currency, CurrencyAmount, PriceSource, TransactionBundle,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Fee paid by a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeSummary {
    pub currency: Currency,
    pub amount: Decimal,
    /// Value in the reporting fiat unit, when it was needed.
    pub cost: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum TaxableEventKind {
    TransferToSelf {
        currency: Currency,
        amount: Decimal,
        from: String,
        to: String,
    },
    Purchase {
        currency: Currency,
        amount: Decimal,
        fiat_currency: Currency,
        fiat_amount: Decimal,
        /// Unit cost basis of the acquired currency, fee included
        price: Decimal,
    },
    Sale {
        currency: Currency,
        amount: Decimal,
        fiat_currency: Currency,
        fiat_amount: Decimal,
        consumptions: Vec<CostBasisUpdate>,
    },
    Swap {
        currency_out: Currency,
        amount_out: Decimal,
        currency_in: Currency,
        amount_in: Decimal,
        /// Spot price of the received currency
        price_in: Decimal,
        consumptions: Vec<CostBasisUpdate>,
    },
    GetFree {
        gains: Vec<CurrencyAmount>,
    },
}

impl TaxableEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaxableEventKind::TransferToSelf { .. } => "Transfer to self",
            TaxableEventKind::Purchase { .. } => "Purchase",
            TaxableEventKind::Sale { .. } => "Sale",
            TaxableEventKind::Swap { .. } => "Swap",
            TaxableEventKind::GetFree { .. } => "Income",
        }
    }
}

/// Tax effect of one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxableEventSummary {
    pub timestamp: DateTime<Utc>,
    pub transaction_ids: Vec<String>,
    #[serde(flatten)]
    pub kind: TaxableEventKind,
    pub fee: Option<FeeSummary>,
    /// Tracker changes caused by the fee.
    pub fee_updates: Vec<CostBasisUpdate>,
    /// Realized gain (negative for a loss) or income.
    pub benefit: Decimal,
}

impl TaxableEventSummary {
    /// Every consumption and destruction this event applied.
    pub fn updates(&self) -> impl Iterator<Item = &CostBasisUpdate> {
        let consumptions: &[CostBasisUpdate] = match &self.kind {
            TaxableEventKind::Sale { consumptions, .. }
            | TaxableEventKind::Swap { consumptions, .. } => consumptions,
            _ => &[],
        };
        consumptions.iter().chain(&self.fee_updates)
    }
}

struct Legs<'a> {
    outbound: Vec<CurrencyAmount>,
    inbound: Vec<CurrencyAmount>,
    fee: Option<&'a AtomicTransaction>,
    timestamp: DateTime<Utc>,
}

impl TransactionBundle {
    /// Classifies the bundle and applies its effect to `tracker`.
    ///
    /// Bundles without a tax effect (plain transfers, no-ops, fee payments and bundles awaiting
    /// classification) return `None`.
    pub fn get_taxable_events(
        &self,
        tracker: &mut MasterCostBasisTracker,
        prices: &dyn PriceSource,
    ) -> Result<Option<TaxableEventSummary>, TaxError> {
        let legs = Legs {
            outbound: self.amounts_out_per_currency(),
            inbound: self.amounts_in_per_currency(),
            fee: self.fee_transaction()?,
            timestamp: match self.timestamp() {
                Some(timestamp) => timestamp,
                None => return Ok(None),
            },
        };
        match self.action() {
            BundleAction::TransferToSelf => self.transfer_to_self(legs, tracker).map(Some),
            BundleAction::Trade => self.trade(legs, tracker, prices).map(Some),
            BundleAction::GetFree => self.get_free(legs, tracker, prices).map(Some),
            BundleAction::Transfer
            | BundleAction::NoOp
            | BundleAction::PureFeePayment
            | BundleAction::ToBeDetermined => Ok(None),
        }
    }

    fn invalid(&self, reason: &str) -> TaxError {
        TaxError::InvalidBundle {
            action: self.action(),
            reason: reason.to_string(),
            bundle: self.to_json(),
        }
    }

    fn transfer_to_self(
        &self,
        legs: Legs,
        tracker: &mut MasterCostBasisTracker,
    ) -> Result<TaxableEventSummary, TaxError> {
        let (out, inc) = match (legs.outbound.as_slice(), legs.inbound.as_slice()) {
            ([out], [inc]) => (out, inc),
            _ => return Err(self.invalid("expected exactly one outbound and one inbound amount")),
        };
        if out.currency != inc.currency {
            return Err(self.invalid("outbound and inbound currencies differ"));
        }
        if !within_tolerance(out.amount, inc.amount) {
            return Err(self.invalid("outbound and inbound amounts differ"));
        }
        let (from, to) = match (self.controlled_sender(), self.controlled_recipient()) {
            (Some(from), Some(to)) => (from, to),
            _ => return Err(self.invalid("missing controlled sender or recipient")),
        };
        let sent_at = self
            .non_fee_transactions()
            .find(|t| t.from().is_controlled())
            .map(AtomicTransaction::created_at);
        let received_at = self
            .non_fee_transactions()
            .find(|t| t.to().is_controlled())
            .map(AtomicTransaction::created_at);
        if let (Some(sent_at), Some(received_at)) = (sent_at, received_at) {
            if !plausible_arrival(sent_at, received_at) {
                return Err(self.invalid("received before it was sent"));
            }
        }

        let fee_updates = legs
            .fee
            .map(|fee| tracker.destroy(fee.currency().ticker(), fee.amount()))
            .unwrap_or_default();

        Ok(TaxableEventSummary {
            timestamp: legs.timestamp,
            transaction_ids: self.transaction_ids(),
            kind: TaxableEventKind::TransferToSelf {
                currency: inc.currency.clone(),
                amount: (out.amount + inc.amount) / Decimal::TWO,
                from: from.key().to_string(),
                to: to.key().to_string(),
            },
            fee: legs.fee.map(|fee| FeeSummary {
                currency: fee.currency().clone(),
                amount: fee.amount(),
                cost: None,
            }),
            fee_updates,
            benefit: Decimal::ZERO,
        })
    }

    fn trade(
        &self,
        legs: Legs,
        tracker: &mut MasterCostBasisTracker,
        prices: &dyn PriceSource,
    ) -> Result<TaxableEventSummary, TaxError> {
        let (out, inc) = match (legs.outbound.as_slice(), legs.inbound.as_slice()) {
            ([out], [inc]) => (out, inc),
            _ => return Err(self.invalid("expected exactly one outbound and one inbound amount")),
        };
        if out.currency == inc.currency {
            return Err(self.invalid("a trade exchanges two different currencies"));
        }
        if out.currency.is_fiat() && inc.currency.is_fiat() {
            return Err(self.invalid("a trade between two fiat currencies"));
        }
        let fiat_fee = legs
            .fee
            .filter(|fee| fee.currency().is_fiat())
            .map_or(Decimal::ZERO, AtomicTransaction::amount);
        let crypto_fee = legs.fee.filter(|fee| !fee.currency().is_fiat());
        let mut fee_updates = Vec::new();

        let (kind, benefit) = if out.currency.is_fiat() {
            if inc.amount.is_zero() {
                return Err(self.invalid("purchase of a zero amount"));
            }
            // a fee in the bought currency can only be paid once the purchase is accrued
            let fee_from_purchase = crypto_fee.filter(|fee| *fee.currency() == inc.currency);
            if let Some(fee) = crypto_fee.filter(|_| fee_from_purchase.is_none()) {
                fee_updates = tracker.consume(fee.currency().ticker(), fee.amount());
            }
            let price = (out.amount + fiat_fee + total_cost(&fee_updates)) / inc.amount;
            tracker.accrue(inc.currency.ticker(), inc.amount, price, Some(self.id()));
            if let Some(fee) = fee_from_purchase {
                fee_updates = tracker.consume(fee.currency().ticker(), fee.amount());
            }
            let kind = TaxableEventKind::Purchase {
                currency: inc.currency.clone(),
                amount: inc.amount,
                fiat_currency: out.currency.clone(),
                fiat_amount: out.amount,
                price,
            };
            (kind, Decimal::ZERO)
        } else if inc.currency.is_fiat() {
            let consumptions = tracker.consume(out.currency.ticker(), out.amount);
            if let Some(fee) = crypto_fee {
                fee_updates = tracker.consume(fee.currency().ticker(), fee.amount());
            }
            let fee_cost = fiat_fee + total_cost(&fee_updates);
            let benefit = inc.amount - total_cost(&consumptions) - fee_cost;
            let kind = TaxableEventKind::Sale {
                currency: out.currency.clone(),
                amount: out.amount,
                fiat_currency: inc.currency.clone(),
                fiat_amount: inc.amount,
                consumptions,
            };
            (kind, benefit)
        } else {
            let price_in = prices.price(&inc.currency, legs.timestamp)?;
            tracker.accrue(inc.currency.ticker(), inc.amount, price_in, Some(self.id()));
            let consumptions = tracker.consume(out.currency.ticker(), out.amount);
            if let Some(fee) = crypto_fee {
                fee_updates = tracker.consume(fee.currency().ticker(), fee.amount());
            }
            let fee_cost = fiat_fee + total_cost(&fee_updates);
            let benefit = price_in * inc.amount - total_cost(&consumptions) - fee_cost;
            let kind = TaxableEventKind::Swap {
                currency_out: out.currency.clone(),
                amount_out: out.amount,
                currency_in: inc.currency.clone(),
                amount_in: inc.amount,
                price_in,
                consumptions,
            };
            (kind, benefit)
        };

        let fee = legs.fee.map(|fee| FeeSummary {
            currency: fee.currency().clone(),
            amount: fee.amount(),
            cost: Some(if fee.currency().is_fiat() {
                fee.amount()
            } else {
                total_cost(&fee_updates)
            }),
        });

        Ok(TaxableEventSummary {
            timestamp: legs.timestamp,
            transaction_ids: self.transaction_ids(),
            kind,
            fee,
            fee_updates,
            benefit,
        })
    }

    fn get_free(
        &self,
        legs: Legs,
        tracker: &mut MasterCostBasisTracker,
        prices: &dyn PriceSource,
    ) -> Result<TaxableEventSummary, TaxError> {
        if !legs.outbound.is_empty() {
            return Err(self.invalid("nothing may be sent when receiving for free"));
        }
        if legs.inbound.is_empty() {
            return Err(self.invalid("nothing received by a controlled address"));
        }
        let fee = spot_valued_fee(legs.fee, prices)?;
        let fee_cost = fee.as_ref().and_then(|f| f.cost).unwrap_or_default();

        let mut value = Decimal::ZERO;
        for gain in &legs.inbound {
            tracker.accrue(gain.currency.ticker(), gain.amount, Decimal::ZERO, Some(self.id()));
            value += prices.price(&gain.currency, legs.timestamp)? * gain.amount;
        }
        let fee_updates = legs
            .fee
            .map(|fee| tracker.destroy(fee.currency().ticker(), fee.amount()))
            .unwrap_or_default();

        Ok(TaxableEventSummary {
            timestamp: legs.timestamp,
            transaction_ids: self.transaction_ids(),
            kind: TaxableEventKind::GetFree { gains: legs.inbound },
            fee,
            fee_updates,
            benefit: value - fee_cost,
        })
    }
}

/// A destroyed fee realizes no lot cost, so it is valued at spot.
fn spot_valued_fee(
    fee: Option<&AtomicTransaction>,
    prices: &dyn PriceSource,
) -> Result<Option<FeeSummary>, TaxError> {
    let Some(fee) = fee else {
        return Ok(None);
    };
    let price = prices.price(fee.currency(), fee.created_at())?;
    Ok(Some(FeeSummary {
        currency: fee.currency().clone(),
        amount: fee.amount(),
        cost: Some(fee.amount() * price),
    }))
}

fn total_cost(updates: &[CostBasisUpdate]) -> Decimal {
    updates.iter().map(CostBasisUpdate::cost).sum()
}
