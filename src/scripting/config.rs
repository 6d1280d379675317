use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// Lua standard library pieces a script may opt into. Each script gets its
/// own copy of the selected tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StandardModule {
    /// Global functions such as `print`, `pairs`, `tostring` and `error`.
    Base,
    String,
    Table,
    Math,
}

impl StandardModule {
    pub const ALL: [StandardModule; 4] = [
        StandardModule::Base,
        StandardModule::String,
        StandardModule::Table,
        StandardModule::Math,
    ];

    /// Global name of the library table; `None` for the base functions.
    pub(crate) fn table_name(self) -> Option<&'static str> {
        match self {
            StandardModule::Base => None,
            StandardModule::String => Some("string"),
            StandardModule::Table => Some("table"),
            StandardModule::Math => Some("math"),
        }
    }
}

/// Per-script configuration: module dependencies by alias and enabled
/// standard modules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LuaConfig {
    modules: Vec<(String, NodeId)>,
    standard_modules: Vec<StandardModule>,
}

impl LuaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `module` available to the script under the global `alias`.
    pub fn with_module(mut self, alias: impl Into<String>, module: NodeId) -> Self {
        self.modules.push((alias.into(), module));
        self
    }

    pub fn with_standard_module(mut self, module: StandardModule) -> Self {
        if !self.standard_modules.contains(&module) {
            self.standard_modules.push(module);
        }
        self
    }

    pub fn with_standard_modules(self) -> Self {
        StandardModule::ALL
            .into_iter()
            .fold(self, LuaConfig::with_standard_module)
    }

    pub fn modules(&self) -> &[(String, NodeId)] {
        &self.modules
    }

    pub fn standard_modules(&self) -> &[StandardModule] {
        &self.standard_modules
    }

    pub fn uses_module(&self, module: NodeId) -> bool {
        self.modules.iter().any(|(_, id)| *id == module)
    }
}
