//! Reconciler - drives the runtime from its observed state toward the
//! desired fleet.
//!
//! One run is: observe the fleet, drop abandoned sites, converge each
//! desired site. Only fleet observation is fatal; every later step is
//! isolated per site and per module and ends up in the report instead of
//! aborting the run.

use std::collections::BTreeSet;

use crate::controller::report::{ActionFailure, ActionKind, RunReport, SiteResult};
use crate::reconcile::{plan_module_actions, ModuleAction};
use crate::state::{DesiredFleet, DesiredSite, ObservedFleet, ObservedSite};
use crate::{BenchExecutor, BenchRunnerError, ReconcileUI, BASE_MODULE};

/// Runs one full reconciliation pass.
///
/// Fails only when the fleet itself cannot be observed; without the list of
/// existing sites neither pruning nor convergence is safe. Everything else
/// is recorded in the returned report.
pub async fn run_reconciliation_with_ui(
    executor: &dyn BenchExecutor,
    fleet: &DesiredFleet,
    ui: &mut dyn ReconcileUI,
) -> Result<RunReport, BenchRunnerError> {
    let observed = ObservedFleet::from_sites(executor.list_sites().await?);
    ui.on_observe(observed.sites.len());

    let mut report = RunReport::default();

    if fleet.drop_abandoned {
        prune_abandoned(executor, fleet, &observed, ui, &mut report).await;
    }

    for site in &fleet.sites {
        let result = converge_site(executor, site, &fleet.module_branch, ui).await;
        ui.on_site_complete(&result);
        report.sites.push(result);
    }

    ui.on_run_complete(&report);
    Ok(report)
}

/// Drops every observed site that is no longer desired, in lexicographic
/// order. Drop failures are recorded and do not stop the run.
async fn prune_abandoned(
    executor: &dyn BenchExecutor,
    fleet: &DesiredFleet,
    observed: &ObservedFleet,
    ui: &mut dyn ReconcileUI,
    report: &mut RunReport,
) {
    let desired_names = fleet.site_names();

    for site in observed.abandoned(&desired_names) {
        match executor.drop_site(&site).await {
            Ok(()) => {
                ui.on_site_dropped(&site);
                report.dropped.push(site);
            }
            Err(e) => {
                let failure = ActionFailure::new(ActionKind::DropSite, &site, e);
                ui.on_action_failed(&failure);
                report.drop_failures.push(failure);
            }
        }
    }
}

/// Converges a single site: ensure it exists, fetch missing module
/// checkouts, apply the module plan, migrate.
///
/// The site is skipped entirely when it cannot be created or its existence
/// cannot be confirmed. Migrate runs in every other case, including after
/// partial module failures.
async fn converge_site(
    executor: &dyn BenchExecutor,
    site: &DesiredSite,
    branch: &str,
    ui: &mut dyn ReconcileUI,
) -> SiteResult {
    let mut result = SiteResult::new(&site.name);

    let exists = match executor.site_exists(&site.name).await {
        Ok(exists) => exists,
        Err(e) => {
            let failure = ActionFailure::new(ActionKind::ObserveSite, &site.name, e);
            ui.on_action_failed(&failure);
            result.failures.push(failure);
            return result;
        }
    };

    if !exists {
        match executor.create_site(&site.name).await {
            Ok(()) => {
                result.created = true;
                ui.on_site_created(&site.name);
            }
            Err(e) => {
                let failure = ActionFailure::new(ActionKind::CreateSite, &site.name, e);
                ui.on_action_failed(&failure);
                result.failures.push(failure);
                return result;
            }
        }
    }

    // A module whose checkout cannot be fetched is excluded from the
    // install half of the plan; the rest of the site still converges.
    let mut unfetchable = BTreeSet::new();
    for module in &site.modules {
        if module == BASE_MODULE {
            continue;
        }
        if let Err(e) = ensure_module_fetched(executor, module, branch, ui).await {
            let failure = ActionFailure::new(ActionKind::FetchModule, module, e);
            ui.on_action_failed(&failure);
            result.failures.push(failure);
            unfetchable.insert(module.clone());
        }
    }

    let installed = match executor.list_modules(&site.name).await {
        Ok(records) => Some(ObservedSite::from_records(&site.name, &records)),
        Err(e) => {
            let failure = ActionFailure::new(ActionKind::ObserveModules, &site.name, e);
            ui.on_action_failed(&failure);
            result.failures.push(failure);
            None
        }
    };

    if let Some(installed) = installed {
        let plan = plan_module_actions(&installed.modules, &site.modules);
        ui.on_plan(&site.name, plan.install_count(), plan.uninstall_count());

        for action in plan {
            apply_module_action(executor, &site.name, &action, &unfetchable, ui, &mut result)
                .await;
        }
    }

    // Migrate always runs for an existing site, even after partial module
    // failures.
    match executor.migrate_site(&site.name).await {
        Ok(()) => {
            result.migrated = true;
            ui.on_site_migrated(&site.name);
        }
        Err(e) => {
            let failure = ActionFailure::new(ActionKind::MigrateSite, &site.name, e);
            ui.on_action_failed(&failure);
            result.failures.push(failure);
        }
    }

    result
}

async fn apply_module_action(
    executor: &dyn BenchExecutor,
    site: &str,
    action: &ModuleAction,
    unfetchable: &BTreeSet<String>,
    ui: &mut dyn ReconcileUI,
    result: &mut SiteResult,
) {
    match action {
        ModuleAction::Install { module } => {
            if unfetchable.contains(module) {
                return;
            }
            match executor.install_module(site, module).await {
                Ok(()) => {
                    ui.on_module_installed(site, module);
                    result.installed.push(module.clone());
                }
                Err(e) => {
                    let failure = ActionFailure::new(ActionKind::InstallModule, module, e);
                    ui.on_action_failed(&failure);
                    result.failures.push(failure);
                }
            }
        }
        ModuleAction::Uninstall { module } => {
            match executor.uninstall_module(site, module).await {
                Ok(()) => {
                    ui.on_module_uninstalled(site, module);
                    result.uninstalled.push(module.clone());
                }
                Err(e) => {
                    let failure = ActionFailure::new(ActionKind::UninstallModule, module, e);
                    ui.on_action_failed(&failure);
                    result.failures.push(failure);
                }
            }
        }
    }
}

async fn ensure_module_fetched(
    executor: &dyn BenchExecutor,
    module: &str,
    branch: &str,
    ui: &mut dyn ReconcileUI,
) -> Result<(), BenchRunnerError> {
    if executor.module_fetched(module).await? {
        return Ok(());
    }
    executor.fetch_module(module, branch).await?;
    ui.on_module_fetched(module, branch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockBench, MockUI};

    fn fleet(drop_abandoned: bool, sites: Vec<(&str, Vec<&str>)>) -> DesiredFleet {
        DesiredFleet {
            sites: sites
                .into_iter()
                .map(|(name, modules)| DesiredSite {
                    name: name.to_string(),
                    modules: modules.into_iter().map(|m| m.to_string()).collect(),
                })
                .collect(),
            module_branch: "develop".to_string(),
            drop_abandoned,
        }
    }

    async fn run(
        bench: &MockBench,
        fleet: &DesiredFleet,
    ) -> (RunReport, MockUI) {
        let mut ui = MockUI::new();
        let report = run_reconciliation_with_ui(bench, fleet, &mut ui)
            .await
            .expect("fleet observation should not fail");
        (report, ui)
    }

    // =========================================================================
    // Tests: Convergence
    // =========================================================================

    #[tokio::test]
    async fn test_fresh_runtime_creates_and_converges_sites() {
        let bench = MockBench::new();
        let fleet = fleet(
            false,
            vec![("one.local", vec!["hrms"]), ("two.local", vec![])],
        );

        let (report, ui) = run(&bench, &fleet).await;

        assert!(report.ok());
        assert_eq!(report.sites.len(), 2);
        assert!(report.sites[0].created);
        assert_eq!(report.sites[0].installed, vec!["hrms"]);
        assert!(report.sites[0].migrated);
        assert!(report.sites[1].created);
        assert!(report.sites[1].installed.is_empty());

        let modules = bench.site_modules("one.local").unwrap();
        assert!(modules.contains("frappe"));
        assert!(modules.contains("hrms"));
        assert!(ui.has_event("create:one.local"));
        assert!(ui.has_event("complete:ok"));
    }

    #[tokio::test]
    async fn test_steady_state_only_migrates() {
        let bench = MockBench::new()
            .with_site("one.local", &["frappe", "hrms"])
            .with_library_module("hrms");
        let fleet = fleet(false, vec![("one.local", vec!["hrms"])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(report.ok());
        let calls = bench.calls();
        assert!(!calls.iter().any(|c| c.starts_with("new-site:")));
        assert!(!calls.iter().any(|c| c.starts_with("install-app:")));
        assert!(!calls.iter().any(|c| c.starts_with("uninstall-app:")));
        assert!(!calls.iter().any(|c| c.starts_with("get-app:")));
        assert!(calls.contains(&"migrate:one.local".to_string()));
    }

    #[tokio::test]
    async fn test_installs_come_before_uninstalls() {
        let bench = MockBench::new()
            .with_site("one.local", &["frappe", "stale_app"])
            .with_library_module("fresh_app");
        let fleet = fleet(false, vec![("one.local", vec!["fresh_app"])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(report.ok());
        let calls = bench.calls();
        let install = calls
            .iter()
            .position(|c| c == "install-app:one.local:fresh_app")
            .expect("install call missing");
        let uninstall = calls
            .iter()
            .position(|c| c == "uninstall-app:one.local:stale_app")
            .expect("uninstall call missing");
        assert!(install < uninstall);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let bench = MockBench::new();
        let fleet = fleet(true, vec![("one.local", vec!["hrms"])]);

        let (first, _ui) = run(&bench, &fleet).await;
        assert!(first.ok());

        bench.clear_calls();
        let (second, _ui) = run(&bench, &fleet).await;

        assert!(second.ok());
        let calls = bench.calls();
        for prefix in ["new-site:", "install-app:", "uninstall-app:", "get-app:", "drop-site:"] {
            assert!(
                !calls.iter().any(|c| c.starts_with(prefix)),
                "second run issued {} call: {:?}",
                prefix,
                calls
            );
        }
    }

    #[tokio::test]
    async fn test_fetched_module_is_not_refetched() {
        let bench = MockBench::new().with_library_module("hrms");
        let fleet = fleet(false, vec![("one.local", vec!["hrms"])]);

        run(&bench, &fleet).await;

        assert!(!bench.calls().iter().any(|c| c.starts_with("get-app:")));
    }

    // =========================================================================
    // Tests: Pruning
    // =========================================================================

    #[tokio::test]
    async fn test_abandoned_sites_dropped_in_order() {
        let bench = MockBench::new()
            .with_site("kept.local", &["frappe"])
            .with_site("zeta.local", &["frappe"])
            .with_site("alpha.local", &["frappe"]);
        let fleet = fleet(true, vec![("kept.local", vec![])]);

        let (report, ui) = run(&bench, &fleet).await;

        assert!(report.ok());
        assert_eq!(report.dropped, vec!["alpha.local", "zeta.local"]);
        assert_eq!(bench.site_names(), vec!["kept.local"]);
        assert!(ui.has_event("drop:alpha.local"));
    }

    #[tokio::test]
    async fn test_abandoned_sites_kept_when_disabled() {
        let bench = MockBench::new()
            .with_site("kept.local", &["frappe"])
            .with_site("orphan.local", &["frappe"]);
        let fleet = fleet(false, vec![("kept.local", vec![])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(report.ok());
        assert!(report.dropped.is_empty());
        assert!(!bench.calls().iter().any(|c| c.starts_with("drop-site:")));
        assert!(bench.site_modules("orphan.local").is_some());
    }

    #[tokio::test]
    async fn test_drop_failure_recorded_and_run_continues() {
        let bench = MockBench::new()
            .with_site("orphan.local", &["frappe"])
            .failing_on("drop-site:orphan.local");
        let fleet = fleet(true, vec![("one.local", vec![])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(!report.ok());
        assert_eq!(report.drop_failures.len(), 1);
        assert_eq!(report.drop_failures[0].kind, ActionKind::DropSite);
        // The desired site still converged.
        assert_eq!(report.converged(), 1);
        assert!(report.sites[0].migrated);
    }

    // =========================================================================
    // Tests: Base module protection
    // =========================================================================

    #[tokio::test]
    async fn test_base_module_is_never_acted_on() {
        // The configuration lists the base module explicitly; the runtime
        // must never see an install, uninstall, or fetch for it.
        let bench = MockBench::new().with_site("one.local", &["frappe", "stale"]);
        let fleet = fleet(false, vec![("one.local", vec!["frappe", "hrms"])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(report.ok());
        let calls = bench.calls();
        assert!(!calls.contains(&"install-app:one.local:frappe".to_string()));
        assert!(!calls.contains(&"uninstall-app:one.local:frappe".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("get-app:frappe")));
        assert!(bench.site_modules("one.local").unwrap().contains("frappe"));
    }

    // =========================================================================
    // Tests: Failure isolation
    // =========================================================================

    #[tokio::test]
    async fn test_fleet_observation_failure_is_fatal() {
        let bench = MockBench::new().failing_on("list-sites");
        let fleet = fleet(false, vec![("one.local", vec![])]);
        let mut ui = MockUI::new();

        let result = run_reconciliation_with_ui(&bench, &fleet, &mut ui).await;

        assert!(result.is_err());
        // Nothing was attempted.
        assert!(!bench.calls().iter().any(|c| c.starts_with("new-site:")));
    }

    #[tokio::test]
    async fn test_install_failure_is_isolated() {
        let bench = MockBench::new().failing_on("install-app:one.local:bad_app");
        let fleet = fleet(
            false,
            vec![("one.local", vec!["bad_app", "good_app"]), ("two.local", vec![])],
        );

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(!report.ok());
        let one = &report.sites[0];
        assert_eq!(one.installed, vec!["good_app"]);
        assert_eq!(one.failures.len(), 1);
        assert_eq!(one.failures[0].kind, ActionKind::InstallModule);
        assert_eq!(one.failures[0].subject, "bad_app");
        // Migrate still ran for the failing site, and the other site is clean.
        assert!(one.migrated);
        assert!(report.sites[1].ok());
    }

    #[tokio::test]
    async fn test_create_failure_skips_site_but_not_run() {
        let bench = MockBench::new().failing_on("new-site:one.local");
        let fleet = fleet(false, vec![("one.local", vec!["hrms"]), ("two.local", vec![])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(!report.ok());
        let one = &report.sites[0];
        assert!(!one.created);
        assert!(!one.migrated);
        assert_eq!(one.failures[0].kind, ActionKind::CreateSite);
        // No follow-up work on the site that could not be created.
        assert!(!bench.calls().contains(&"migrate:one.local".to_string()));
        assert!(report.sites[1].ok());
    }

    #[tokio::test]
    async fn test_fetch_failure_excludes_module_from_install() {
        let bench = MockBench::new().failing_on("get-app:ghost:develop");
        let fleet = fleet(false, vec![("one.local", vec!["ghost", "real_app"])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(!report.ok());
        let one = &report.sites[0];
        assert_eq!(one.installed, vec!["real_app"]);
        assert_eq!(one.failures[0].kind, ActionKind::FetchModule);
        assert!(!bench
            .calls()
            .contains(&"install-app:one.local:ghost".to_string()));
        assert!(one.migrated);
    }

    #[tokio::test]
    async fn test_site_probe_failure_is_isolated() {
        let bench = MockBench::new().failing_on("site-exists:one.local");
        let fleet = fleet(false, vec![("one.local", vec![]), ("two.local", vec![])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(!report.ok());
        assert_eq!(report.sites[0].failures[0].kind, ActionKind::ObserveSite);
        assert!(!bench.calls().contains(&"migrate:one.local".to_string()));
        assert!(report.sites[1].ok());
    }

    #[tokio::test]
    async fn test_module_listing_failure_still_migrates() {
        let bench = MockBench::new()
            .with_site("one.local", &["frappe"])
            .with_library_module("hrms")
            .failing_on("list-apps:one.local");
        let fleet = fleet(false, vec![("one.local", vec!["hrms"])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(!report.ok());
        let one = &report.sites[0];
        assert_eq!(one.failures[0].kind, ActionKind::ObserveModules);
        assert!(one.installed.is_empty());
        assert!(one.migrated);
    }

    #[tokio::test]
    async fn test_migrate_failure_is_recorded() {
        let bench = MockBench::new().failing_on("migrate:one.local");
        let fleet = fleet(false, vec![("one.local", vec![])]);

        let (report, _ui) = run(&bench, &fleet).await;

        assert!(!report.ok());
        let one = &report.sites[0];
        assert!(!one.migrated);
        assert_eq!(one.failures[0].kind, ActionKind::MigrateSite);
    }

    // =========================================================================
    // Tests: UI event stream
    // =========================================================================

    #[tokio::test]
    async fn test_ui_sees_the_full_event_stream() {
        let bench = MockBench::new();
        let fleet = fleet(false, vec![("one.local", vec!["hrms"])]);

        let (_report, ui) = run(&bench, &fleet).await;

        assert!(ui.has_event("observe:0"));
        assert!(ui.has_event("create:one.local"));
        assert!(ui.has_event("fetch:hrms:develop"));
        assert!(ui.has_event("plan:one.local:+1:-0"));
        assert!(ui.has_event("install:one.local:hrms"));
        assert!(ui.has_event("migrate:one.local"));
        assert!(ui.has_event("site:one.local:ok"));
        assert!(ui.has_event("complete:ok"));
    }
}
