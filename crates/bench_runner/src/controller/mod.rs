//! Controller module - the run loop and its reports.
//!
//! 1. Observe the fleet
//! 2. Prune abandoned sites
//! 3. Converge each desired site
//! 4. Report

pub mod reconciler;
pub mod refresh;
pub mod report;

pub use reconciler::run_reconciliation_with_ui;
pub use refresh::run_library_refresh_with_ui;
pub use report::{ActionFailure, ActionKind, RefreshReport, RunReport, SiteResult};
