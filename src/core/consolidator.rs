use super::bundle::{
    plausible_arrival, within_tolerance, BundleAction, BundleError, BundleStatus,
    TransactionBundle,
};
use super::transaction::AtomicTransaction;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConsolidationError {
    #[error("bundle found {count} times, at most two copies are expected: {bundle}")]
    TooManyDuplicates { count: usize, bundle: String },
    #[error("neither sender nor recipient is controlled: {bundle}")]
    Uncontrolled { bundle: String },
    #[error("unmatched bundle is both sent from and received by controlled addresses: {bundle}")]
    BothControlled { bundle: String },
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

/// Every bucket produced while consolidating, in assembly order.
#[derive(Debug, Default, Serialize)]
pub struct Consolidation {
    /// Bundles whose currencies are all excluded. Not part of the result.
    pub excluded: Vec<TransactionBundle>,
    /// Reported complete by their source.
    pub complete: Vec<TransactionBundle>,
    /// One copy of a transfer reported by both controlled ends.
    pub deduplicated: Vec<TransactionBundle>,
    /// Legs of one on-chain transaction merged together.
    pub merged: Vec<TransactionBundle>,
    /// Outbound and inbound legs matched across sources.
    pub matched: Vec<TransactionBundle>,
    /// Both sent from and received by controlled addresses (swaps, DeFi deposits).
    pub self_transfers: Vec<TransactionBundle>,
    /// Could not be reconciled, need manual review.
    pub orphans: Vec<TransactionBundle>,
}

impl Consolidation {
    /// Reconciled bundles, orphans last.
    pub fn bundles(&self) -> impl Iterator<Item = &TransactionBundle> {
        self.complete
            .iter()
            .chain(&self.deduplicated)
            .chain(&self.merged)
            .chain(&self.matched)
            .chain(&self.self_transfers)
            .chain(&self.orphans)
    }

    pub fn into_bundles(self) -> Vec<TransactionBundle> {
        let mut bundles = self.complete;
        bundles.extend(self.deduplicated);
        bundles.extend(self.merged);
        bundles.extend(self.matched);
        bundles.extend(self.self_transfers);
        bundles.extend(self.orphans);
        bundles
    }

    pub fn len(&self) -> usize {
        self.bundles().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reconciles bundles reported by several sources into one set of economic events.
#[derive(Debug, Clone, Default)]
pub struct BundleConsolidator {
    excluded_currencies: Vec<String>,
}

impl BundleConsolidator {
    pub fn new<S: AsRef<str>>(excluded_currencies: &[S]) -> Self {
        BundleConsolidator {
            excluded_currencies: excluded_currencies
                .iter()
                .map(|t| t.as_ref().to_uppercase())
                .collect(),
        }
    }

    pub fn consolidate(
        &self,
        bundles: Vec<TransactionBundle>,
    ) -> Result<Vec<TransactionBundle>, ConsolidationError> {
        Ok(self.consolidate_detailed(bundles)?.into_bundles())
    }

    pub fn consolidate_detailed(
        &self,
        bundles: Vec<TransactionBundle>,
    ) -> Result<Consolidation, ConsolidationError> {
        let mut result = Consolidation::default();
        let input = bundles.len();

        let (excluded, kept): (Vec<_>, Vec<_>) = bundles
            .into_iter()
            .filter(|b| !b.is_empty())
            .partition(|b| self.is_excluded(b));
        result.excluded = excluded;

        let (complete, incomplete): (Vec<_>, Vec<_>) =
            kept.into_iter().partition(TransactionBundle::is_complete);
        result.complete = complete;

        let (deduplicated, remaining) = remove_duplicates(incomplete)?;
        result.deduplicated = deduplicated;

        let (shared, unique): (Vec<_>, Vec<_>) = group_by_id(remaining)
            .into_iter()
            .partition(|group| group.len() > 1);
        result.merged = shared.into_iter().map(merge_siblings).collect();

        let (self_transfers, one_directional): (Vec<_>, Vec<_>) = unique
            .into_iter()
            .flatten()
            .partition(|b| b.from_controlled() && b.to_controlled());
        result.self_transfers = self_transfers;

        let (matched, orphans) = match_transfers(one_directional)?;
        result.matched = matched;
        result.orphans = orphans;

        log::info!(
            "Consolidated {} bundles: {} excluded, {} complete, {} deduplicated, {} merged, {} matched, {} self transfers, {} orphans",
            input,
            result.excluded.len(),
            result.complete.len(),
            result.deduplicated.len(),
            result.merged.len(),
            result.matched.len(),
            result.self_transfers.len(),
            result.orphans.len()
        );
        Ok(result)
    }

    fn is_excluded(&self, bundle: &TransactionBundle) -> bool {
        !self.excluded_currencies.is_empty()
            && bundle.currencies().iter().all(|c| {
                self.excluded_currencies
                    .iter()
                    .any(|excluded| excluded == c.ticker())
            })
    }
}

/// Groups bundles by id, keeping groups and their members in first-seen order.
fn group_by_id(bundles: Vec<TransactionBundle>) -> Vec<Vec<TransactionBundle>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<TransactionBundle>> = Vec::new();
    for bundle in bundles {
        match index.get(bundle.id()) {
            Some(&i) => groups[i].push(bundle),
            None => {
                index.insert(bundle.id().to_string(), groups.len());
                groups.push(vec![bundle]);
            }
        }
    }
    groups
}

/// Collapses transfers reported by both controlled ends.
///
/// Returns the promoted copies (complete, `transfer`) and the bundles without a copy.
pub fn remove_duplicates(
    bundles: Vec<TransactionBundle>,
) -> Result<(Vec<TransactionBundle>, Vec<TransactionBundle>), ConsolidationError> {
    let mut deduplicated = Vec::new();
    let mut remaining = Vec::new();
    for group in group_by_id(bundles) {
        let mut copies_by_fingerprint: Vec<(String, Vec<TransactionBundle>)> = Vec::new();
        for bundle in group {
            let fingerprint = bundle.fingerprint();
            match copies_by_fingerprint
                .iter_mut()
                .find(|(existing, _)| *existing == fingerprint)
            {
                Some((_, copies)) => copies.push(bundle),
                None => copies_by_fingerprint.push((fingerprint, vec![bundle])),
            }
        }
        for (fingerprint, copies) in copies_by_fingerprint {
            if copies.len() > 2 {
                return Err(ConsolidationError::TooManyDuplicates {
                    count: copies.len(),
                    bundle: copies[0].to_json(),
                });
            }
            let mut copies = copies.into_iter();
            let Some(bundle) = copies.next() else {
                continue;
            };
            if copies.next().is_some() {
                log::debug!(
                    "Bundle {} reported twice ({}), keeping one",
                    bundle.id(),
                    &fingerprint[..12]
                );
                deduplicated
                    .push(bundle.with_status(BundleAction::Transfer, BundleStatus::Complete));
            } else {
                remaining.push(bundle);
            }
        }
    }
    Ok((deduplicated, remaining))
}

fn merge_siblings(group: Vec<TransactionBundle>) -> TransactionBundle {
    let id = group[0].id().to_string();
    let action = group[0].action();
    let transactions: Vec<AtomicTransaction> = group
        .into_iter()
        .flat_map(TransactionBundle::into_atomic_transactions)
        .collect();
    TransactionBundle::new(&id, action, BundleStatus::Complete, transactions)
}

/// Pairs outbound-only bundles with the inbound-only bundle recording the same movement.
fn match_transfers(
    bundles: Vec<TransactionBundle>,
) -> Result<(Vec<TransactionBundle>, Vec<TransactionBundle>), ConsolidationError> {
    let mut orphans = Vec::new();
    let mut outbound = Vec::new();
    let mut inbound = Vec::new();
    for bundle in bundles {
        if bundle.from_controlled() && bundle.to_controlled() {
            return Err(ConsolidationError::BothControlled {
                bundle: bundle.to_json(),
            });
        }
        if !bundle.synthetizable() {
            orphans.push(bundle);
            continue;
        }
        let synthetic = bundle.synthetic_transaction()?;
        if bundle.from_controlled() {
            outbound.push((synthetic, bundle));
        } else if bundle.to_controlled() {
            inbound.push((synthetic, bundle));
        } else {
            return Err(ConsolidationError::Uncontrolled {
                bundle: bundle.to_json(),
            });
        }
    }

    inbound.sort_by_key(|(synthetic, _)| synthetic.created_at());

    let mut matched = Vec::new();
    for (out_tx, out_bundle) in outbound {
        let candidate = inbound.iter().position(|(in_tx, _)| {
            in_tx.to() != out_tx.from()
                && in_tx.currency() == out_tx.currency()
                && within_tolerance(in_tx.amount(), out_tx.amount())
                && plausible_arrival(out_tx.created_at(), in_tx.created_at())
        });
        match candidate {
            Some(i) => {
                let (_, in_bundle) = inbound.remove(i);
                log::debug!("Matched {} with {}", out_bundle.id(), in_bundle.id());
                let id = format!("{}{}", out_bundle.id(), in_bundle.id());
                let mut transactions = out_bundle.into_atomic_transactions();
                transactions.extend(in_bundle.into_atomic_transactions());
                matched.push(TransactionBundle::new(
                    &id,
                    BundleAction::TransferToSelf,
                    BundleStatus::Complete,
                    transactions,
                ));
            }
            None => orphans.push(out_bundle),
        }
    }
    orphans.extend(inbound.into_iter().map(|(_, bundle)| bundle));
    Ok((matched, orphans))
}
