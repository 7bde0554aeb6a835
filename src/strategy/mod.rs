//! Portfolio construction.
//!
//! Contains the core logic for:
//! - Rebalance cadence scheduling
//! - Sector-neutral long/short selection
//! - Portfolio and exposure matrix representation

mod exposure;
mod portfolio;
pub mod scheduler;
mod selector;

pub use exposure::{ExposureMatrix, ExposureRow};
pub use portfolio::{Candidate, CandidateSet, Portfolio, Position, Side};
pub use scheduler::{is_due, parse_day, Cadence};
pub use selector::{Formulation, SectorNeutralSelector, SelectionError, SelectionRequest};
