use super::cost_basis::{CostBasisUpdate, Holding, MasterCostBasisTracker};
use super::events::TaxableEventSummary;
use super::TaxError;
use crate::core::{BundleAction, Consolidation, PriceSource, TransactionBundle};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Tax effect of one reconciled bundle.
#[derive(Debug, Clone, Serialize)]
pub struct TaxableEvent {
    pub bundle_id: String,
    pub timestamp: DateTime<Utc>,
    pub summary: TaxableEventSummary,
}

#[derive(Debug, Serialize)]
pub struct TaxReport {
    pub events: Vec<TaxableEvent>,
    /// Bundles awaiting classification and orphans, not taxed.
    pub needs_review: Vec<TransactionBundle>,
    /// What is still held once every event is applied.
    pub holdings: Vec<Holding>,
}

impl TaxReport {
    pub fn total_benefit(&self) -> Decimal {
        self.events.iter().map(|e| e.summary.benefit).sum()
    }

    /// Cost basis updates flagged as taking more than was held.
    pub fn shortfalls(&self) -> Vec<(&TaxableEvent, &CostBasisUpdate)> {
        self.events
            .iter()
            .flat_map(|e| e.summary.updates().map(move |u| (e, u)))
            .filter(|(_, u)| u.is_shortfall())
            .collect()
    }
}

/// Applies every reconciled bundle, oldest first, to a fresh cost basis ledger.
pub fn calculate_taxes(
    consolidation: &Consolidation,
    prices: &dyn PriceSource,
) -> Result<TaxReport, TaxError> {
    let mut bundles: Vec<&TransactionBundle> = consolidation
        .complete
        .iter()
        .chain(&consolidation.deduplicated)
        .chain(&consolidation.merged)
        .chain(&consolidation.matched)
        .chain(&consolidation.self_transfers)
        .collect();
    bundles.sort_by_key(|b| b.timestamp());

    let mut tracker = MasterCostBasisTracker::new();
    let mut events = Vec::new();
    let mut needs_review = Vec::new();
    for bundle in bundles {
        if bundle.action() == BundleAction::ToBeDetermined {
            needs_review.push(bundle.clone());
            continue;
        }
        let summary = bundle
            .get_taxable_events(&mut tracker, prices)
            .inspect_err(|_| log::error!("Failed to classify bundle {}", bundle.id()))?;
        if let Some(summary) = summary {
            events.push(TaxableEvent {
                bundle_id: bundle.id().to_string(),
                timestamp: summary.timestamp,
                summary,
            });
        }
    }
    needs_review.extend(consolidation.orphans.iter().cloned());

    let report = TaxReport {
        events,
        needs_review,
        holdings: tracker.holdings(),
    };
    let shortfalls = report.shortfalls().len();
    if shortfalls > 0 {
        log::warn!("{} cost basis shortfalls, check for missing acquisitions", shortfalls);
    }
    log::info!(
        "{} taxable events, {} bundles need review",
        report.events.len(),
        report.needs_review.len()
    );
    Ok(report)
}
