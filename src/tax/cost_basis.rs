use rust_decimal::Decimal;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::binary_heap::PeekMut;
use std::collections::{BinaryHeap, HashMap};

pub const CONSUMED_MORE_THAN_ACCRUED: &str = "Consumed more than was accrued.";
pub const DESTROYED_MORE_THAN_ACCRUED: &str = "Destroyed more than was accrued.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CostBasisUpdateKind {
    Accrual,
    Consumption,
    Destruction,
}

/// One change applied to a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostBasisUpdate {
    pub kind: CostBasisUpdateKind,
    pub amount: Decimal,
    pub price: Decimal,
    /// Bundle that accrued the lot, `None` for shortfalls.
    pub bundle_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl CostBasisUpdate {
    pub fn cost(&self) -> Decimal {
        self.amount * self.price
    }

    pub fn is_shortfall(&self) -> bool {
        !self.notes.is_empty()
    }

    fn shortfall(kind: CostBasisUpdateKind, amount: Decimal, note: &str) -> Self {
        CostBasisUpdate {
            kind,
            amount,
            price: Decimal::ZERO,
            bundle_id: None,
            notes: vec![note.to_string()],
        }
    }
}

/// Quantity acquired at one price.
#[derive(Debug, Clone, Serialize)]
pub struct Lot {
    pub amount: Decimal,
    pub price: Decimal,
    pub bundle_id: Option<String>,
    #[serde(skip)]
    seq: u64,
}

impl Lot {
    fn update(&self, kind: CostBasisUpdateKind, amount: Decimal) -> CostBasisUpdate {
        CostBasisUpdate {
            kind,
            amount,
            price: self.price,
            bundle_id: self.bundle_id.clone(),
            notes: Vec::new(),
        }
    }
}

// Highest price first, then earliest accrual.
impl Ord for Lot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.price
            .cmp(&other.price)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Lot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Lot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Lot {}

/// Lots held in one currency, served most expensive first.
#[derive(Debug, Clone)]
pub struct CostBasisTracker {
    ticker: String,
    lots: BinaryHeap<Lot>,
    next_seq: u64,
}

impl CostBasisTracker {
    pub fn new(ticker: &str) -> Self {
        CostBasisTracker {
            ticker: ticker.to_string(),
            lots: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    /// Acquisition
    pub fn accrue(
        &mut self,
        amount: Decimal,
        price: Decimal,
        bundle_id: Option<&str>,
    ) -> CostBasisUpdate {
        let lot = Lot {
            amount,
            price,
            bundle_id: bundle_id.map(str::to_string),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        log::debug!(
            "Lots {} ACCRUE: amount={}, price={}. Held: {}",
            self.ticker,
            amount,
            price,
            self.total_amount() + amount
        );
        let update = lot.update(CostBasisUpdateKind::Accrual, amount);
        self.lots.push(lot);
        update
    }

    /// Disposal: removes `amount` from the most expensive lots and reports each slice removed.
    pub fn consume(&mut self, amount: Decimal) -> Vec<CostBasisUpdate> {
        let mut updates = Vec::new();
        let mut remaining = amount;
        while remaining > Decimal::ZERO {
            let Some(mut top) = self.lots.peek_mut() else {
                log::warn!("Lots {}: consumed {} more than held", self.ticker, remaining);
                updates.push(CostBasisUpdate::shortfall(
                    CostBasisUpdateKind::Consumption,
                    remaining,
                    CONSUMED_MORE_THAN_ACCRUED,
                ));
                break;
            };
            if top.amount < remaining {
                let lot = PeekMut::pop(top);
                remaining -= lot.amount;
                updates.push(lot.update(CostBasisUpdateKind::Consumption, lot.amount));
            } else {
                top.amount -= remaining;
                updates.push(top.update(CostBasisUpdateKind::Consumption, remaining));
                remaining = Decimal::ZERO;
                if top.amount.is_zero() {
                    PeekMut::pop(top);
                }
            }
        }
        log::debug!(
            "Lots {} CONSUME: amount={}, cost={}. Held: {}",
            self.ticker,
            amount,
            updates.iter().map(CostBasisUpdate::cost).sum::<Decimal>(),
            self.total_amount()
        );
        updates
    }

    /// Non-taxable reduction: removes `amount` like `consume`, but the cost of the removed
    /// quantity stays with the remaining lots.
    pub fn destroy(&mut self, amount: Decimal) -> Vec<CostBasisUpdate> {
        let mut updates = Vec::new();
        let mut remaining = amount;
        let mut carried = Decimal::ZERO;
        while remaining > Decimal::ZERO {
            let Some(mut top) = self.lots.peek_mut() else {
                log::warn!("Lots {}: destroyed {} more than held", self.ticker, remaining);
                updates.push(CostBasisUpdate::shortfall(
                    CostBasisUpdateKind::Destruction,
                    remaining,
                    DESTROYED_MORE_THAN_ACCRUED,
                ));
                break;
            };
            if top.amount <= remaining {
                let lot = PeekMut::pop(top);
                remaining -= lot.amount;
                carried += lot.amount * lot.price;
                updates.push(lot.update(CostBasisUpdateKind::Destruction, lot.amount));
            } else {
                let total = top.amount * top.price + carried;
                top.amount -= remaining;
                top.price = total / top.amount;
                // reported at the raised price the lot carries from here on
                updates.push(top.update(CostBasisUpdateKind::Destruction, remaining));
                remaining = Decimal::ZERO;
                carried = Decimal::ZERO;
            }
        }
        if carried > Decimal::ZERO {
            if let Some(mut top) = self.lots.peek_mut().filter(|top| !top.amount.is_zero()) {
                let total = top.amount * top.price + carried;
                top.price = total / top.amount;
            }
        }
        log::debug!(
            "Lots {} DESTROY: amount={}. Held: {}, cost={}",
            self.ticker,
            amount,
            self.total_amount(),
            self.total_cost()
        );
        updates
    }

    pub fn total_amount(&self) -> Decimal {
        self.lots.iter().map(|l| l.amount).sum()
    }

    pub fn total_cost(&self) -> Decimal {
        self.lots.iter().map(|l| l.amount * l.price).sum()
    }

    /// Lots in the order they would be served.
    pub fn lots(&self) -> Vec<Lot> {
        let mut lots: Vec<Lot> = self.lots.iter().cloned().collect();
        lots.sort_by(|a, b| b.cmp(a));
        lots
    }
}

/// Amount and cost held in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holding {
    pub ticker: String,
    pub amount: Decimal,
    pub cost: Decimal,
}

/// One tracker per currency ticker, created on first use.
#[derive(Debug, Default, Clone)]
pub struct MasterCostBasisTracker {
    trackers: HashMap<String, CostBasisTracker>,
}

impl MasterCostBasisTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn tracker_mut(&mut self, ticker: &str) -> &mut CostBasisTracker {
        self.trackers
            .entry(ticker.to_string())
            .or_insert_with(|| CostBasisTracker::new(ticker))
    }

    pub fn accrue(
        &mut self,
        ticker: &str,
        amount: Decimal,
        price: Decimal,
        bundle_id: Option<&str>,
    ) -> CostBasisUpdate {
        self.tracker_mut(ticker).accrue(amount, price, bundle_id)
    }

    pub fn consume(&mut self, ticker: &str, amount: Decimal) -> Vec<CostBasisUpdate> {
        self.tracker_mut(ticker).consume(amount)
    }

    pub fn destroy(&mut self, ticker: &str, amount: Decimal) -> Vec<CostBasisUpdate> {
        self.tracker_mut(ticker).destroy(amount)
    }

    pub fn tracker(&self, ticker: &str) -> Option<&CostBasisTracker> {
        self.trackers.get(ticker)
    }

    /// Non-empty holdings sorted by ticker.
    pub fn holdings(&self) -> Vec<Holding> {
        let mut holdings: Vec<Holding> = self
            .trackers
            .values()
            .filter(|t| !t.total_amount().is_zero())
            .map(|t| Holding {
                ticker: t.ticker.clone(),
                amount: t.total_amount(),
                cost: t.total_cost(),
            })
            .collect();
        holdings.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        holdings
    }
}
