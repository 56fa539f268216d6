//! Module actions - what the planner can ask the controller to do.

/// A single convergence step for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleAction {
    /// Install a module that is desired but not present.
    Install { module: String },
    /// Uninstall a module that is present but no longer desired.
    Uninstall { module: String },
}

impl ModuleAction {
    /// The module this action touches.
    pub fn module(&self) -> &str {
        match self {
            Self::Install { module } => module,
            Self::Uninstall { module } => module,
        }
    }

    pub fn is_install(&self) -> bool {
        matches!(self, Self::Install { .. })
    }
}

/// The planned actions for one site, installs first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulePlan {
    actions: Vec<ModuleAction>,
}

impl ModulePlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: ModuleAction) {
        self.actions.push(action);
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn install_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_install()).count()
    }

    pub fn uninstall_count(&self) -> usize {
        self.actions.iter().filter(|a| !a.is_install()).count()
    }

    pub fn actions(&self) -> &[ModuleAction] {
        &self.actions
    }

    pub fn into_vec(self) -> Vec<ModuleAction> {
        self.actions
    }
}

impl IntoIterator for ModulePlan {
    type Item = ModuleAction;
    type IntoIter = std::vec::IntoIter<ModuleAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}
