//! Module library refresh - pulls every fetched checkout, then migrates.
//!
//! Runs after reconciliation so long-lived runtimes pick up upstream module
//! changes without a redeploy. Every step is isolated; failures land in the
//! refresh report and count toward the run outcome.

use crate::controller::report::{ActionFailure, ActionKind, RefreshReport};
use crate::state::DesiredFleet;
use crate::{BenchExecutor, ReconcileUI};

/// Updates each module checkout in the library, then migrates each desired
/// site so code and schema line up.
pub async fn run_library_refresh_with_ui(
    executor: &dyn BenchExecutor,
    fleet: &DesiredFleet,
    ui: &mut dyn ReconcileUI,
) -> RefreshReport {
    let mut report = RefreshReport::default();

    let modules = match executor.list_library_modules().await {
        Ok(modules) => modules,
        Err(e) => {
            let failure = ActionFailure::new(ActionKind::ObserveLibrary, "library", e);
            ui.on_action_failed(&failure);
            report.failures.push(failure);
            return report;
        }
    };
    ui.on_refresh_start(modules.len());

    for module in &modules {
        match executor.update_module_source(module).await {
            Ok(()) => {
                ui.on_module_updated(module);
                report.updated.push(module.clone());
            }
            Err(e) => {
                let failure = ActionFailure::new(ActionKind::UpdateModule, module, e);
                ui.on_action_failed(&failure);
                report.failures.push(failure);
            }
        }
    }

    for site in &fleet.sites {
        match executor.migrate_site(&site.name).await {
            Ok(()) => {
                ui.on_site_migrated(&site.name);
                report.migrated.push(site.name.clone());
            }
            Err(e) => {
                let failure = ActionFailure::new(ActionKind::MigrateSite, &site.name, e);
                ui.on_action_failed(&failure);
                report.failures.push(failure);
            }
        }
    }

    report
}
