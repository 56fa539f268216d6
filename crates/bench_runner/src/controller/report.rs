//! Run reports - what a run did and what failed.
//!
//! Failures below fleet observation never abort the run; they are collected
//! here so the caller can log them and pick the exit status.

use std::fmt;

/// The runtime operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    ObserveSite,
    ObserveModules,
    ObserveLibrary,
    CreateSite,
    DropSite,
    FetchModule,
    InstallModule,
    UninstallModule,
    MigrateSite,
    UpdateModule,
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ObserveSite => "observe-site",
            Self::ObserveModules => "observe-modules",
            Self::ObserveLibrary => "observe-library",
            Self::CreateSite => "create-site",
            Self::DropSite => "drop-site",
            Self::FetchModule => "fetch-module",
            Self::InstallModule => "install-module",
            Self::UninstallModule => "uninstall-module",
            Self::MigrateSite => "migrate-site",
            Self::UpdateModule => "update-module",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One failed action, recorded instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    pub kind: ActionKind,
    /// The site or module the action was about.
    pub subject: String,
    pub error: String,
}

impl ActionFailure {
    pub fn new(kind: ActionKind, subject: impl Into<String>, error: impl ToString) -> Self {
        Self {
            kind,
            subject: subject.into(),
            error: error.to_string(),
        }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.subject, self.error)
    }
}

/// Outcome of converging a single site.
#[derive(Debug, Clone, Default)]
pub struct SiteResult {
    pub site: String,
    /// Whether the site had to be created this run.
    pub created: bool,
    pub installed: Vec<String>,
    pub uninstalled: Vec<String>,
    /// Whether the post-convergence migrate succeeded.
    pub migrated: bool,
    pub failures: Vec<ActionFailure>,
}

impl SiteResult {
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            ..Self::default()
        }
    }

    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of a whole reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Abandoned sites that were dropped.
    pub dropped: Vec<String>,
    pub drop_failures: Vec<ActionFailure>,
    pub sites: Vec<SiteResult>,
}

impl RunReport {
    /// True when every site converged and every drop succeeded.
    pub fn ok(&self) -> bool {
        self.drop_failures.is_empty() && self.sites.iter().all(|s| s.ok())
    }

    pub fn failure_count(&self) -> usize {
        self.drop_failures.len() + self.sites.iter().map(|s| s.failures.len()).sum::<usize>()
    }

    /// Number of sites that converged without a failure.
    pub fn converged(&self) -> usize {
        self.sites.iter().filter(|s| s.ok()).count()
    }
}

/// Outcome of the post-run module library refresh.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub updated: Vec<String>,
    pub migrated: Vec<String>,
    pub failures: Vec<ActionFailure>,
}

impl RefreshReport {
    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}
