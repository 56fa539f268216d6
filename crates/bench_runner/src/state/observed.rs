//! Observed state - what the runtime actually reports.

use std::collections::BTreeSet;

use crate::module_list::ModuleRecord;

/// The set of sites present in the runtime at observation time.
#[derive(Debug, Clone, Default)]
pub struct ObservedFleet {
    pub sites: BTreeSet<String>,
}

impl ObservedFleet {
    pub fn from_sites(names: Vec<String>) -> Self {
        Self {
            sites: names.into_iter().collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sites.contains(name)
    }

    /// Sites present in the runtime but absent from the desired set, in
    /// lexicographic order.
    pub fn abandoned(&self, desired: &BTreeSet<String>) -> Vec<String> {
        self.sites.difference(desired).cloned().collect()
    }
}

/// One site's installed modules as reported by the runtime listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedSite {
    pub name: String,
    pub modules: BTreeSet<String>,
}

impl ObservedSite {
    pub fn from_records(name: impl Into<String>, records: &[ModuleRecord]) -> Self {
        Self {
            name: name.into(),
            modules: records.iter().map(|r| r.name().to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_list::parse_module_list;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_sites_dedupes() {
        let fleet = ObservedFleet::from_sites(vec![
            "one.local".to_string(),
            "one.local".to_string(),
            "two.local".to_string(),
        ]);

        assert_eq!(fleet.sites.len(), 2);
        assert!(fleet.contains("one.local"));
    }

    #[test]
    fn test_abandoned_is_observed_minus_desired() {
        let fleet = ObservedFleet::from_sites(vec![
            "zeta.local".to_string(),
            "alpha.local".to_string(),
            "kept.local".to_string(),
        ]);

        let abandoned = fleet.abandoned(&set(&["kept.local"]));

        assert_eq!(abandoned, vec!["alpha.local", "zeta.local"]);
    }

    #[test]
    fn test_abandoned_empty_when_all_desired() {
        let fleet = ObservedFleet::from_sites(vec!["one.local".to_string()]);

        assert!(fleet.abandoned(&set(&["one.local", "two.local"])).is_empty());
    }

    #[test]
    fn test_observed_site_from_records() {
        let records = parse_module_list("frappe 15.0.0\nhrms 1.4.2\nhrms 1.4.2\n");
        let site = ObservedSite::from_records("one.local", &records);

        assert_eq!(site.name, "one.local");
        assert_eq!(site.modules, set(&["frappe", "hrms"]));
    }

    #[test]
    fn test_observed_site_names_are_case_sensitive() {
        let records = parse_module_list("Payroll\npayroll\n");
        let site = ObservedSite::from_records("one.local", &records);

        assert_eq!(site.modules.len(), 2);
    }
}
