//! Reconcile module - pure planning of module actions.
//!
//! `plan_module_actions()` is a **pure function**: set arithmetic over the
//! observed and desired module sets of one site, no side effects, perfectly
//! testable without mocks.

mod actions;

pub use actions::{ModuleAction, ModulePlan};

use std::collections::BTreeSet;

use crate::BASE_MODULE;

/// Computes the actions that converge one site's installed modules onto the
/// desired set.
///
/// Installs (desired minus observed) come before uninstalls (observed minus
/// desired); each half is in lexicographic order because the inputs are
/// ordered sets. The base module is filtered from both sides and never
/// produces an action.
pub fn plan_module_actions(observed: &BTreeSet<String>, desired: &BTreeSet<String>) -> ModulePlan {
    let mut plan = ModulePlan::new();

    for module in desired.difference(observed) {
        if module == BASE_MODULE {
            continue;
        }
        plan.push(ModuleAction::Install {
            module: module.clone(),
        });
    }

    for module in observed.difference(desired) {
        if module == BASE_MODULE {
            continue;
        }
        plan.push(ModuleAction::Uninstall {
            module: module.clone(),
        });
    }

    plan
}
