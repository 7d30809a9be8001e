//! Module activation hierarchy
//!
//! Handles:
//! - The fixed prerequisite graph between appliance modules
//! - Checking that every upstream module is active before one starts

use crate::error::{Error, Result};
use crate::store::{ConfigStore, ModuleStatus};
use clap::ValueEnum;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Appliance modules known to the hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Module {
    Wan,
    Vlans,
    Tagging,
    Firewall,
    Ebtables,
    Dmz,
}

impl Module {
    pub const ALL: [Module; 6] = [
        Module::Wan,
        Module::Vlans,
        Module::Tagging,
        Module::Firewall,
        Module::Ebtables,
        Module::Dmz,
    ];

    /// Name used for the module's directory and document
    pub fn as_str(self) -> &'static str {
        match self {
            Module::Wan => "wan",
            Module::Vlans => "vlans",
            Module::Tagging => "tagging",
            Module::Firewall => "firewall",
            Module::Ebtables => "ebtables",
            Module::Dmz => "dmz",
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Prerequisite edges (upstream -> downstream)
const EDGES: [(Module, Module); 6] = [
    (Module::Wan, Module::Vlans),
    (Module::Vlans, Module::Tagging),
    (Module::Tagging, Module::Firewall),
    (Module::Tagging, Module::Ebtables),
    (Module::Tagging, Module::Dmz),
    (Module::Firewall, Module::Dmz),
];

/// Where the gate reads module status from
pub trait StatusSource {
    fn module_status(&self, module: Module) -> ModuleStatus;
}

impl StatusSource for ConfigStore {
    fn module_status(&self, module: Module) -> ModuleStatus {
        ConfigStore::module_status(self, module)
    }
}

/// Enforces the module activation hierarchy
#[derive(Debug)]
pub struct DependencyGate {
    graph: DiGraph<Module, ()>,
    nodes: HashMap<Module, NodeIndex>,
    /// Modules in activation order
    order: Vec<Module>,
}

impl DependencyGate {
    pub fn new() -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for module in Module::ALL {
            nodes.insert(module, graph.add_node(module));
        }
        for (from, to) in EDGES {
            graph.add_edge(nodes[&from], nodes[&to], ());
        }

        let order = toposort(&graph, None)
            .map(|sorted| sorted.iter().map(|n| graph[*n]).collect())
            .map_err(|cycle| {
                Error::ConfigValidation(format!(
                    "Cyclic module dependency involving '{}'",
                    graph[cycle.node_id()]
                ))
            })?;

        Ok(Self {
            graph,
            nodes,
            order,
        })
    }

    /// Every module that must be active before `module`, upstream first
    pub fn requirements(&self, module: Module) -> Vec<Module> {
        let start = self.nodes[&module];
        let reversed = Reversed(&self.graph);
        let mut upstream = HashSet::new();
        let mut dfs = Dfs::new(reversed, start);
        while let Some(node) = dfs.next(reversed) {
            if node != start {
                upstream.insert(self.graph[node]);
            }
        }

        self.order
            .iter()
            .copied()
            .filter(|m| upstream.contains(m))
            .collect()
    }

    /// Fail with the first inactive prerequisite of `module`
    pub fn check(&self, module: Module, source: &dyn StatusSource) -> Result<()> {
        for required in self.requirements(module) {
            let status = source.module_status(required);
            if !status.is_active() {
                tracing::debug!(%module, %required, %status, "dependency not satisfied");
                return Err(Error::Dependency { module, required });
            }
        }
        Ok(())
    }
}
