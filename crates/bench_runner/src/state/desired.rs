//! Desired state - what the instance configuration says should exist.

use std::collections::BTreeSet;

use benchup_fleet_config::{FleetConfig, SiteEntry};

/// The desired shape of the whole runtime.
///
/// Built once per run from the instance configuration. Module names are kept
/// exactly as configured; identity is the exact, case-sensitive name.
#[derive(Debug, Clone, Default)]
pub struct DesiredFleet {
    /// Every site that should exist, in configuration order.
    pub sites: Vec<DesiredSite>,
    /// Branch new module checkouts are fetched from.
    pub module_branch: String,
    /// Whether sites absent from the configuration get dropped.
    pub drop_abandoned: bool,
}

impl DesiredFleet {
    /// Builds the desired fleet from a loaded instance configuration.
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            sites: config.instance_sites.iter().map(DesiredSite::from_entry).collect(),
            module_branch: config.frappe_branch.clone(),
            drop_abandoned: config.drop_abandoned_sites,
        }
    }

    /// All desired site names as an ordered set.
    pub fn site_names(&self) -> BTreeSet<String> {
        self.sites.iter().map(|s| s.name.clone()).collect()
    }

    pub fn find_site(&self, name: &str) -> Option<&DesiredSite> {
        self.sites.iter().find(|s| s.name == name)
    }
}

/// One desired site and the modules it should have installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredSite {
    pub name: String,
    /// Desired modules as an ordered set. The base module is implicit and
    /// does not have to be listed.
    pub modules: BTreeSet<String>,
}

impl DesiredSite {
    fn from_entry(entry: &SiteEntry) -> Self {
        Self {
            name: entry.site_name.clone(),
            modules: entry.apps.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(json: &str) -> FleetConfig {
        FleetConfig::from_json(json).unwrap()
    }

    #[test]
    fn test_from_config_maps_sites_and_modules() {
        let config = config(
            r#"{
                "frappe_branch": "version-15",
                "drop_abandoned_sites": true,
                "instance_sites": [
                    {"site_name": "one.local", "apps": ["hrms", "erpnext"]},
                    {"site_name": "two.local", "apps": []}
                ]
            }"#,
        );

        let fleet = DesiredFleet::from_config(&config);

        assert_eq!(fleet.module_branch, "version-15");
        assert!(fleet.drop_abandoned);
        assert_eq!(fleet.sites.len(), 2);
        assert_eq!(fleet.sites[0].name, "one.local");
        let expected: BTreeSet<String> =
            ["erpnext", "hrms"].iter().map(|s| s.to_string()).collect();
        assert_eq!(fleet.sites[0].modules, expected);
        assert!(fleet.sites[1].modules.is_empty());
    }

    #[test]
    fn test_duplicate_modules_collapse_into_set() {
        let config = config(
            r#"{"instance_sites": [{"site_name": "one.local", "apps": ["hrms", "hrms"]}]}"#,
        );

        let fleet = DesiredFleet::from_config(&config);

        assert_eq!(fleet.sites[0].modules.len(), 1);
    }

    #[test]
    fn test_site_names_are_ordered() {
        let config = config(
            r#"{"instance_sites": [
                {"site_name": "zeta.local", "apps": []},
                {"site_name": "alpha.local", "apps": []}
            ]}"#,
        );

        let fleet = DesiredFleet::from_config(&config);
        let names: Vec<String> = fleet.site_names().into_iter().collect();

        assert_eq!(names, vec!["alpha.local", "zeta.local"]);
    }

    #[test]
    fn test_find_site() {
        let config =
            config(r#"{"instance_sites": [{"site_name": "one.local", "apps": ["hrms"]}]}"#);
        let fleet = DesiredFleet::from_config(&config);

        assert!(fleet.find_site("one.local").is_some());
        assert!(fleet.find_site("One.Local").is_none());
        assert!(fleet.find_site("missing.local").is_none());
    }

    #[test]
    fn test_default_fleet_is_empty() {
        let fleet = DesiredFleet::default();

        assert!(fleet.sites.is_empty());
        assert!(fleet.site_names().is_empty());
    }
}
