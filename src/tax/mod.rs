pub mod cost_basis;
pub mod events;
pub mod report;

use crate::core::{BundleAction, BundleError, PriceError};

pub use cost_basis::{
    CostBasisTracker, CostBasisUpdate, CostBasisUpdateKind, Holding, MasterCostBasisTracker,
};
pub use events::{FeeSummary, TaxableEventKind, TaxableEventSummary};
pub use report::{calculate_taxes, TaxReport, TaxableEvent};

#[derive(Debug, thiserror::Error)]
pub enum TaxError {
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error(transparent)]
    Price(#[from] PriceError),
    #[error("invalid {action:?} bundle, {reason}: {bundle}")]
    InvalidBundle {
        action: BundleAction,
        reason: String,
        bundle: String,
    },
}
