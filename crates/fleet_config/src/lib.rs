use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetConfigError {
    #[error("Failed to read fleet document: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse fleet document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Duplicate site name in fleet document: {0}")]
    DuplicateSite(String),

    #[error("Site entry {0} has an empty site_name")]
    EmptySiteName(usize),
}

/// The operator's declarative fleet document (`instance.json`).
///
/// Wire names match what the deployment environment already ships; the
/// engine maps them onto its own model.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Deployment mode of the runtime. Reported at startup, otherwise unused
    /// here (its consumer is the process supervisor, outside this tool).
    #[serde(default = "default_mode")]
    pub deployment: String,

    /// Branch used when initializing the runtime and fetching modules.
    #[serde(default = "default_branch")]
    pub frappe_branch: String,

    /// Drop sites that exist in the runtime but are not declared below.
    #[serde(default)]
    pub drop_abandoned_sites: bool,

    /// The declared sites. Declaration order is preserved; names must be
    /// unique (a duplicate is a configuration error, never deduplicated).
    #[serde(default)]
    pub instance_sites: Vec<SiteEntry>,
}

/// One declared site and the modules it must run.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteEntry {
    pub site_name: String,
    #[serde(default)]
    pub apps: Vec<String>,
}

fn default_mode() -> String {
    "develop".to_string()
}

fn default_branch() -> String {
    "develop".to_string()
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, FleetConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parses and validates a fleet document. Present-but-empty mode and
    /// branch values fall back to the defaults, like absent ones.
    pub fn from_json(content: &str) -> Result<Self, FleetConfigError> {
        let mut config: FleetConfig = serde_json::from_str(content)?;
        if config.deployment.is_empty() {
            config.deployment = default_mode();
        }
        if config.frappe_branch.is_empty() {
            config.frappe_branch = default_branch();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), FleetConfigError> {
        let mut seen = HashSet::new();
        for (index, site) in self.instance_sites.iter().enumerate() {
            if site.site_name.is_empty() {
                return Err(FleetConfigError::EmptySiteName(index));
            }
            if !seen.insert(site.site_name.as_str()) {
                return Err(FleetConfigError::DuplicateSite(site.site_name.clone()));
            }
        }
        Ok(())
    }
}
