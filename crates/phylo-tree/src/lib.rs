#![deny(missing_docs)]
#![doc = include_str!("../docs/tree-api.md")]

mod events;
mod likelihood;
mod rates;
mod simulate;
mod tree;

pub use events::ShiftEvent;
pub use likelihood::{
    birth_death_log_likelihood, integrate_segment, shift_process_log_prior, SegmentState,
};
pub use rates::{BranchRateSummary, BranchRates, RatePair};
pub use simulate::{draw_multipliers, resimulate_events, ShiftProcess};
pub use tree::{AugmentedTree, TreeVertex};
