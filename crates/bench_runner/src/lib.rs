//! Bench runner - converges a shared runtime onto its desired fleet of
//! sites and modules.
//!
//! The [`BenchExecutor`] trait owns every command line that touches the
//! runtime; the controller only speaks in terms of its operations, which is
//! what makes full runs testable against a mock. [`RealBench`] is the CLI
//! implementation used in production.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::process::Command;

use benchup_config::Settings;

pub mod controller;
pub mod module_list;
pub mod reconcile;
pub mod state;

pub use controller::{
    run_library_refresh_with_ui, run_reconciliation_with_ui, ActionFailure, ActionKind,
    RefreshReport, RunReport, SiteResult,
};
pub use module_list::{parse_module_list, ModuleRecord};
pub use reconcile::{plan_module_actions, ModuleAction, ModulePlan};
pub use state::{DesiredFleet, DesiredSite, ObservedFleet, ObservedSite};

/// The framework module every site carries. The reconciler never installs,
/// uninstalls, or fetches it.
pub const BASE_MODULE: &str = "frappe";

#[derive(Debug, Error)]
pub enum BenchRunnerError {
    #[error("Failed to execute bench: {0}")]
    Execution(#[from] std::io::Error),

    #[error("Bench command failed: {0}")]
    CommandFailed(String),
}

// ============================================================================
// BenchExecutor Trait - abstracts runtime interaction for tests
// ============================================================================

/// Operations against the runtime.
///
/// The controller never builds command strings itself; everything that
/// reaches the runtime goes through here, so mocking this trait is enough
/// to test a complete run.
#[async_trait]
pub trait BenchExecutor: Send + Sync {
    /// Sites currently present in the runtime.
    async fn list_sites(&self) -> Result<Vec<String>, BenchRunnerError>;

    /// Whether a single site currently exists.
    async fn site_exists(&self, site: &str) -> Result<bool, BenchRunnerError>;

    /// Modules installed on a site.
    async fn list_modules(&self, site: &str) -> Result<Vec<ModuleRecord>, BenchRunnerError>;

    /// Creates a site together with its database.
    async fn create_site(&self, site: &str) -> Result<(), BenchRunnerError>;

    /// Drops a site together with its database.
    async fn drop_site(&self, site: &str) -> Result<(), BenchRunnerError>;

    /// Fetches a module checkout into the library.
    async fn fetch_module(&self, module: &str, branch: &str) -> Result<(), BenchRunnerError>;

    /// Whether a module checkout is already present in the library.
    async fn module_fetched(&self, module: &str) -> Result<bool, BenchRunnerError>;

    async fn install_module(&self, site: &str, module: &str) -> Result<(), BenchRunnerError>;

    async fn uninstall_module(&self, site: &str, module: &str) -> Result<(), BenchRunnerError>;

    /// Runs schema migrations on a site.
    async fn migrate_site(&self, site: &str) -> Result<(), BenchRunnerError>;

    /// Library checkouts that track a source repository.
    async fn list_library_modules(&self) -> Result<Vec<String>, BenchRunnerError>;

    /// Pulls the latest source for a library checkout.
    async fn update_module_source(&self, module: &str) -> Result<(), BenchRunnerError>;
}

// ============================================================================
// RealBench - CLI implementation
// ============================================================================

/// Runtime access through the `bench` CLI, rooted in one bench directory.
pub struct RealBench {
    frappe_home: PathBuf,
    bench_dir: PathBuf,
    sites_dir: PathBuf,
    apps_dir: PathBuf,
    db_root_username: String,
    db_root_password: String,
    admin_password: String,
    common_config_source: PathBuf,
}

impl RealBench {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            frappe_home: settings.frappe_home.clone(),
            bench_dir: settings.bench_dir(),
            sites_dir: settings.sites_dir(),
            apps_dir: settings.apps_dir(),
            db_root_username: settings.db.user.clone(),
            db_root_password: settings.db.password.clone(),
            admin_password: settings.admin_password.clone(),
            common_config_source: settings.common_config.clone(),
        }
    }

    /// Whether the bench directory has been bootstrapped.
    pub fn is_initialized(&self) -> bool {
        self.bench_dir.exists()
    }

    /// Bootstraps the bench directory with `bench init`. Output is streamed
    /// through; this runs for minutes on a cold start.
    pub async fn init_runtime(&self, branch: &str) -> Result<(), BenchRunnerError> {
        tokio::fs::create_dir_all(&self.frappe_home).await?;

        let status = Command::new("bench")
            .arg("init")
            .arg("--frappe-branch")
            .arg(branch)
            .arg(&self.bench_dir)
            .status()
            .await?;

        if !status.success() {
            return Err(BenchRunnerError::CommandFailed(format!(
                "bench init exited with {}",
                status
            )));
        }
        Ok(())
    }

    /// Installs the shared site configuration into the bench.
    ///
    /// The runtime reads this file while serving; it is replaced through a
    /// temp file in the same directory plus rename, never written in place.
    pub async fn sync_common_config(&self) -> Result<(), BenchRunnerError> {
        let payload = tokio::fs::read(&self.common_config_source).await?;
        let target = self.sites_dir.join("common_site_config.json");

        let mut staged = NamedTempFile::new_in(&self.sites_dir)?;
        staged.write_all(&payload)?;
        staged
            .persist(&target)
            .map_err(|e| BenchRunnerError::Execution(e.error))?;
        Ok(())
    }

    async fn bench_output(&self, args: &[&str]) -> Result<std::process::Output, BenchRunnerError> {
        let output = Command::new("bench")
            .args(args)
            .current_dir(&self.bench_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        Ok(output)
    }
}

fn command_failure(context: &str, output: &std::process::Output) -> BenchRunnerError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    BenchRunnerError::CommandFailed(format!("{}: {}", context, stderr.trim()))
}

async fn path_exists(path: &Path) -> Result<bool, BenchRunnerError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl BenchExecutor for RealBench {
    async fn list_sites(&self) -> Result<Vec<String>, BenchRunnerError> {
        let mut sites = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.sites_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // The assets directory lives next to the sites and never is one.
            if name == "assets" {
                continue;
            }
            if path_exists(&entry.path().join("site_config.json")).await? {
                sites.push(name);
            }
        }

        Ok(sites)
    }

    async fn site_exists(&self, site: &str) -> Result<bool, BenchRunnerError> {
        path_exists(&self.sites_dir.join(site).join("site_config.json")).await
    }

    async fn list_modules(&self, site: &str) -> Result<Vec<ModuleRecord>, BenchRunnerError> {
        let output = self.bench_output(&["--site", site, "list-apps"]).await?;
        if !output.status.success() {
            return Err(command_failure(
                &format!("Failed to list modules on '{}'", site),
                &output,
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_module_list(&stdout))
    }

    async fn create_site(&self, site: &str) -> Result<(), BenchRunnerError> {
        let output = self
            .bench_output(&[
                "new-site",
                site,
                "--db-root-username",
                &self.db_root_username,
                "--db-root-password",
                &self.db_root_password,
                "--admin-password",
                &self.admin_password,
            ])
            .await?;

        if !output.status.success() {
            return Err(command_failure(
                &format!("Failed to create site '{}'", site),
                &output,
            ));
        }
        Ok(())
    }

    async fn drop_site(&self, site: &str) -> Result<(), BenchRunnerError> {
        let output = self
            .bench_output(&[
                "drop-site",
                site,
                "--force",
                "--root-password",
                &self.db_root_password,
            ])
            .await?;

        if !output.status.success() {
            return Err(command_failure(
                &format!("Failed to drop site '{}'", site),
                &output,
            ));
        }
        Ok(())
    }

    async fn fetch_module(&self, module: &str, branch: &str) -> Result<(), BenchRunnerError> {
        let output = self
            .bench_output(&["get-app", "--branch", branch, module])
            .await?;

        if !output.status.success() {
            return Err(command_failure(
                &format!("Failed to fetch module '{}' ({})", module, branch),
                &output,
            ));
        }
        Ok(())
    }

    async fn module_fetched(&self, module: &str) -> Result<bool, BenchRunnerError> {
        path_exists(&self.apps_dir.join(module)).await
    }

    async fn install_module(&self, site: &str, module: &str) -> Result<(), BenchRunnerError> {
        let output = self
            .bench_output(&["--site", site, "install-app", module])
            .await?;

        if !output.status.success() {
            return Err(command_failure(
                &format!("Failed to install '{}' on '{}'", module, site),
                &output,
            ));
        }
        Ok(())
    }

    async fn uninstall_module(&self, site: &str, module: &str) -> Result<(), BenchRunnerError> {
        let output = self
            .bench_output(&["--site", site, "uninstall-app", module, "--yes"])
            .await?;

        if !output.status.success() {
            return Err(command_failure(
                &format!("Failed to uninstall '{}' from '{}'", module, site),
                &output,
            ));
        }
        Ok(())
    }

    async fn migrate_site(&self, site: &str) -> Result<(), BenchRunnerError> {
        let output = self.bench_output(&["--site", site, "migrate"]).await?;

        if !output.status.success() {
            return Err(command_failure(
                &format!("Failed to migrate '{}'", site),
                &output,
            ));
        }
        Ok(())
    }

    async fn list_library_modules(&self) -> Result<Vec<String>, BenchRunnerError> {
        let mut modules = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.apps_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            // Only checkouts that track a repository can be updated.
            if path_exists(&entry.path().join(".git")).await? {
                modules.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        modules.sort();
        Ok(modules)
    }

    async fn update_module_source(&self, module: &str) -> Result<(), BenchRunnerError> {
        let output = Command::new("git")
            .arg("pull")
            .current_dir(self.apps_dir.join(module))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BenchRunnerError::CommandFailed(format!(
                "Failed to update module '{}': {}",
                module,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// ReconcileUI Trait - progress reporting
// ============================================================================

/// Observer for run progress. The controller drives it; implementations
/// decide how events are presented.
pub trait ReconcileUI {
    fn on_observe(&mut self, site_count: usize);
    fn on_site_dropped(&mut self, site: &str);
    fn on_site_created(&mut self, site: &str);
    fn on_module_fetched(&mut self, module: &str, branch: &str);
    fn on_plan(&mut self, site: &str, installs: usize, uninstalls: usize);
    fn on_module_installed(&mut self, site: &str, module: &str);
    fn on_module_uninstalled(&mut self, site: &str, module: &str);
    fn on_site_migrated(&mut self, site: &str);
    fn on_action_failed(&mut self, failure: &ActionFailure);
    fn on_site_complete(&mut self, result: &SiteResult);
    fn on_refresh_start(&mut self, module_count: usize);
    fn on_module_updated(&mut self, module: &str);
    fn on_run_complete(&mut self, report: &RunReport);
}

/// Line-per-event console output for headless runs.
pub struct HeadlessUI;

impl ReconcileUI for HeadlessUI {
    fn on_observe(&mut self, site_count: usize) {
        println!("[OBSERVE] {} site(s) present", site_count);
    }

    fn on_site_dropped(&mut self, site: &str) {
        println!("[DROP] {}", site);
    }

    fn on_site_created(&mut self, site: &str) {
        println!("[CREATE] {}", site);
    }

    fn on_module_fetched(&mut self, module: &str, branch: &str) {
        println!("[FETCH] {} ({})", module, branch);
    }

    fn on_plan(&mut self, site: &str, installs: usize, uninstalls: usize) {
        println!("[PLAN] {}: +{} -{}", site, installs, uninstalls);
    }

    fn on_module_installed(&mut self, site: &str, module: &str) {
        println!("[INSTALL] {}: {}", site, module);
    }

    fn on_module_uninstalled(&mut self, site: &str, module: &str) {
        println!("[UNINSTALL] {}: {}", site, module);
    }

    fn on_site_migrated(&mut self, site: &str) {
        println!("[MIGRATE] {}", site);
    }

    fn on_action_failed(&mut self, failure: &ActionFailure) {
        eprintln!("[FAIL] {}", failure);
    }

    fn on_site_complete(&mut self, result: &SiteResult) {
        if result.ok() {
            println!("[SITE] {} converged", result.site);
        } else {
            println!(
                "[SITE] {} finished with {} failure(s)",
                result.site,
                result.failures.len()
            );
        }
    }

    fn on_refresh_start(&mut self, module_count: usize) {
        println!("[REFRESH] {} module checkout(s)", module_count);
    }

    fn on_module_updated(&mut self, module: &str) {
        println!("[UPDATE] {}", module);
    }

    fn on_run_complete(&mut self, report: &RunReport) {
        if report.ok() {
            println!("[DONE] {} site(s) converged", report.sites.len());
        } else {
            println!(
                "[DONE] {} of {} site(s) converged, {} failure(s)",
                report.converged(),
                report.sites.len(),
                report.failure_count()
            );
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Runs one reconciliation pass with console output.
pub async fn run_reconciliation(
    executor: &dyn BenchExecutor,
    fleet: &DesiredFleet,
) -> Result<RunReport, BenchRunnerError> {
    let mut ui = HeadlessUI;
    run_reconciliation_with_ui(executor, fleet, &mut ui).await
}

/// Refreshes the module library with console output.
pub async fn run_library_refresh(
    executor: &dyn BenchExecutor,
    fleet: &DesiredFleet,
) -> RefreshReport {
    let mut ui = HeadlessUI;
    run_library_refresh_with_ui(executor, fleet, &mut ui).await
}

// ============================================================================
// Test Utilities
// ============================================================================

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    //! Mock executor and UI for tests.

    use std::collections::{BTreeMap, BTreeSet, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::module_list::ModuleRecord;
    use crate::{
        ActionFailure, BenchExecutor, BenchRunnerError, ReconcileUI, RunReport, SiteResult,
        BASE_MODULE,
    };

    /// In-memory runtime. Mutations apply to its state, so repeated runs
    /// observe their own effects.
    #[derive(Default)]
    pub struct MockBench {
        sites: Mutex<BTreeMap<String, BTreeSet<String>>>,
        library: Mutex<BTreeSet<String>>,
        calls: Mutex<Vec<String>>,
        fail_on: Mutex<HashSet<String>>,
    }

    impl MockBench {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds a site with the given installed modules.
        pub fn with_site(self, name: &str, modules: &[&str]) -> Self {
            self.sites.lock().unwrap().insert(
                name.to_string(),
                modules.iter().map(|m| m.to_string()).collect(),
            );
            self
        }

        /// Seeds a fetched module checkout.
        pub fn with_library_module(self, name: &str) -> Self {
            self.library.lock().unwrap().insert(name.to_string());
            self
        }

        /// Makes the call with this exact key fail. Keys mirror the call
        /// log, e.g. `install-app:one.local:hrms`.
        pub fn failing_on(self, call: &str) -> Self {
            self.fail_on.lock().unwrap().insert(call.to_string());
            self
        }

        /// Every call made so far, in order.
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear_calls(&self) {
            self.calls.lock().unwrap().clear();
        }

        /// Current site names, sorted.
        pub fn site_names(&self) -> Vec<String> {
            self.sites.lock().unwrap().keys().cloned().collect()
        }

        /// Installed modules of a site, if it exists.
        pub fn site_modules(&self, site: &str) -> Option<BTreeSet<String>> {
            self.sites.lock().unwrap().get(site).cloned()
        }

        pub fn library(&self) -> BTreeSet<String> {
            self.library.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> Result<(), BenchRunnerError> {
            let failing = self.fail_on.lock().unwrap().contains(&call);
            self.calls.lock().unwrap().push(call.clone());
            if failing {
                return Err(BenchRunnerError::CommandFailed(format!(
                    "mock failure on {}",
                    call
                )));
            }
            Ok(())
        }

        fn unknown_site(site: &str) -> BenchRunnerError {
            BenchRunnerError::CommandFailed(format!("mock: unknown site {}", site))
        }
    }

    #[async_trait]
    impl BenchExecutor for MockBench {
        async fn list_sites(&self) -> Result<Vec<String>, BenchRunnerError> {
            self.record("list-sites".to_string())?;
            Ok(self.site_names())
        }

        async fn site_exists(&self, site: &str) -> Result<bool, BenchRunnerError> {
            self.record(format!("site-exists:{}", site))?;
            Ok(self.sites.lock().unwrap().contains_key(site))
        }

        async fn list_modules(&self, site: &str) -> Result<Vec<ModuleRecord>, BenchRunnerError> {
            self.record(format!("list-apps:{}", site))?;
            let sites = self.sites.lock().unwrap();
            let modules = sites.get(site).ok_or_else(|| Self::unknown_site(site))?;
            Ok(modules
                .iter()
                .map(|name| ModuleRecord::NameOnly {
                    name: name.clone(),
                    raw: name.clone(),
                })
                .collect())
        }

        async fn create_site(&self, site: &str) -> Result<(), BenchRunnerError> {
            self.record(format!("new-site:{}", site))?;
            let mut sites = self.sites.lock().unwrap();
            if sites.contains_key(site) {
                return Err(BenchRunnerError::CommandFailed(format!(
                    "mock: site {} already exists",
                    site
                )));
            }
            let mut modules = BTreeSet::new();
            modules.insert(BASE_MODULE.to_string());
            sites.insert(site.to_string(), modules);
            Ok(())
        }

        async fn drop_site(&self, site: &str) -> Result<(), BenchRunnerError> {
            self.record(format!("drop-site:{}", site))?;
            self.sites
                .lock()
                .unwrap()
                .remove(site)
                .map(|_| ())
                .ok_or_else(|| Self::unknown_site(site))
        }

        async fn fetch_module(&self, module: &str, branch: &str) -> Result<(), BenchRunnerError> {
            self.record(format!("get-app:{}:{}", module, branch))?;
            self.library.lock().unwrap().insert(module.to_string());
            Ok(())
        }

        async fn module_fetched(&self, module: &str) -> Result<bool, BenchRunnerError> {
            self.record(format!("app-fetched:{}", module))?;
            Ok(self.library.lock().unwrap().contains(module))
        }

        async fn install_module(&self, site: &str, module: &str) -> Result<(), BenchRunnerError> {
            self.record(format!("install-app:{}:{}", site, module))?;
            let mut sites = self.sites.lock().unwrap();
            let modules = sites.get_mut(site).ok_or_else(|| Self::unknown_site(site))?;
            modules.insert(module.to_string());
            Ok(())
        }

        async fn uninstall_module(&self, site: &str, module: &str) -> Result<(), BenchRunnerError> {
            self.record(format!("uninstall-app:{}:{}", site, module))?;
            let mut sites = self.sites.lock().unwrap();
            let modules = sites.get_mut(site).ok_or_else(|| Self::unknown_site(site))?;
            modules.remove(module);
            Ok(())
        }

        async fn migrate_site(&self, site: &str) -> Result<(), BenchRunnerError> {
            self.record(format!("migrate:{}", site))?;
            if !self.sites.lock().unwrap().contains_key(site) {
                return Err(Self::unknown_site(site));
            }
            Ok(())
        }

        async fn list_library_modules(&self) -> Result<Vec<String>, BenchRunnerError> {
            self.record("list-library".to_string())?;
            Ok(self.library.lock().unwrap().iter().cloned().collect())
        }

        async fn update_module_source(&self, module: &str) -> Result<(), BenchRunnerError> {
            self.record(format!("update:{}", module))?;
            if !self.library.lock().unwrap().contains(module) {
                return Err(BenchRunnerError::CommandFailed(format!(
                    "mock: unknown module {}",
                    module
                )));
            }
            Ok(())
        }
    }

    /// Records every UI event as a compact string.
    #[derive(Default)]
    pub struct MockUI {
        pub events: Vec<String>,
    }

    impl MockUI {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn has_event(&self, event: &str) -> bool {
            self.events.iter().any(|e| e == event)
        }
    }

    impl ReconcileUI for MockUI {
        fn on_observe(&mut self, site_count: usize) {
            self.events.push(format!("observe:{}", site_count));
        }

        fn on_site_dropped(&mut self, site: &str) {
            self.events.push(format!("drop:{}", site));
        }

        fn on_site_created(&mut self, site: &str) {
            self.events.push(format!("create:{}", site));
        }

        fn on_module_fetched(&mut self, module: &str, branch: &str) {
            self.events.push(format!("fetch:{}:{}", module, branch));
        }

        fn on_plan(&mut self, site: &str, installs: usize, uninstalls: usize) {
            self.events
                .push(format!("plan:{}:+{}:-{}", site, installs, uninstalls));
        }

        fn on_module_installed(&mut self, site: &str, module: &str) {
            self.events.push(format!("install:{}:{}", site, module));
        }

        fn on_module_uninstalled(&mut self, site: &str, module: &str) {
            self.events.push(format!("uninstall:{}:{}", site, module));
        }

        fn on_site_migrated(&mut self, site: &str) {
            self.events.push(format!("migrate:{}", site));
        }

        fn on_action_failed(&mut self, failure: &ActionFailure) {
            self.events
                .push(format!("fail:{}:{}", failure.kind, failure.subject));
        }

        fn on_site_complete(&mut self, result: &SiteResult) {
            let outcome = if result.ok() { "ok" } else { "failed" };
            self.events.push(format!("site:{}:{}", result.site, outcome));
        }

        fn on_refresh_start(&mut self, module_count: usize) {
            self.events.push(format!("refresh:{}", module_count));
        }

        fn on_module_updated(&mut self, module: &str) {
            self.events.push(format!("update:{}", module));
        }

        fn on_run_complete(&mut self, report: &RunReport) {
            let outcome = if report.ok() { "ok" } else { "failed" };
            self.events.push(format!("complete:{}", outcome));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
