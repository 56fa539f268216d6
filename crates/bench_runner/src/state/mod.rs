//! State module - snapshots the controller reconciles between.
//!
//! - **DesiredFleet**: what the instance configuration says should exist
//! - **ObservedFleet / ObservedSite**: what the runtime actually reports

mod desired;
mod observed;

pub use desired::{DesiredFleet, DesiredSite};
pub use observed::{ObservedFleet, ObservedSite};
