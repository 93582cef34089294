//! core::graph
//!
//! Plugin dependency graph representation and operations.
//!
//! # Architecture
//!
//! The dependency graph is a DAG where:
//! - Nodes are plugins
//! - Edges point from importer to imported plugin
//!
//! # Invariants
//!
//! - Graph must be acyclic (import cycles are a schema error)
//! - Every edge endpoint names a plugin in the resolution context

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::manifest::Manifest;
use crate::core::types::PluginName;

/// The plugin dependency graph derived from manifest imports.
///
/// This is an in-memory representation computed from a set of manifests.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Imports for each plugin (outgoing edges).
    imports: HashMap<PluginName, HashSet<PluginName>>,
    /// Importers of each plugin (derived reverse edges).
    importers: HashMap<PluginName, HashSet<PluginName>>,
}

impl DependencyGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from a set of manifests.
    pub fn from_manifests<'a>(manifests: impl IntoIterator<Item = &'a Manifest>) -> Self {
        let mut graph = Self::new();
        for manifest in manifests {
            graph.imports.entry(manifest.name.clone()).or_default();
            for imported in manifest.imports.keys() {
                graph.add_import(manifest.name.clone(), imported.clone());
            }
        }
        graph
    }

    /// Record that `importer` imports `imported`.
    ///
    /// This also updates the reverse-edge cache.
    pub fn add_import(&mut self, importer: PluginName, imported: PluginName) {
        self.importers
            .entry(imported.clone())
            .or_default()
            .insert(importer.clone());
        self.imports.entry(imported.clone()).or_default();
        self.imports.entry(importer).or_default().insert(imported);
    }

    /// Get the plugins a plugin imports directly.
    pub fn imports_of(&self, plugin: &PluginName) -> Option<&HashSet<PluginName>> {
        self.imports.get(plugin)
    }

    /// Get the plugins importing a plugin directly.
    pub fn dependents_of(&self, plugin: &PluginName) -> Option<&HashSet<PluginName>> {
        self.importers.get(plugin)
    }

    /// All plugins in the graph.
    pub fn plugins(&self) -> impl Iterator<Item = &PluginName> {
        self.imports.keys()
    }

    /// Check if the graph contains an import cycle.
    ///
    /// Returns `Some(plugin)` if a cycle is detected starting from that
    /// plugin.
    pub fn find_cycle(&self) -> Option<PluginName> {
        let mut visited = HashSet::new();
        let mut path = HashSet::new();

        for plugin in self.imports.keys() {
            if self.has_cycle_from(plugin, &mut visited, &mut path) {
                return Some(plugin.clone());
            }
        }
        None
    }

    fn has_cycle_from(
        &self,
        plugin: &PluginName,
        visited: &mut HashSet<PluginName>,
        path: &mut HashSet<PluginName>,
    ) -> bool {
        if path.contains(plugin) {
            return true;
        }
        if visited.contains(plugin) {
            return false;
        }

        visited.insert(plugin.clone());
        path.insert(plugin.clone());

        if let Some(imports) = self.imports.get(plugin) {
            for imported in imports {
                if self.has_cycle_from(imported, visited, path) {
                    return true;
                }
            }
        }

        path.remove(plugin);
        false
    }

    /// All plugins depending on `plugin`, directly or transitively.
    ///
    /// Uses breadth-first traversal over the reverse edges; this is the
    /// set the integrity cascade must revisit after `plugin` mutates.
    ///
    /// # Example
    ///
    /// ```
    /// use weft::core::graph::DependencyGraph;
    /// use weft::core::types::PluginName;
    ///
    /// let palette = PluginName::new("palette").unwrap();
    /// let theme = PluginName::new("theme").unwrap();
    /// let icons = PluginName::new("icons").unwrap();
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_import(theme.clone(), palette.clone());
    /// graph.add_import(icons.clone(), theme.clone());
    ///
    /// let dependents = graph.transitive_dependents(&palette);
    /// assert!(dependents.contains(&theme));
    /// assert!(dependents.contains(&icons));
    /// ```
    pub fn transitive_dependents(&self, plugin: &PluginName) -> HashSet<PluginName> {
        let mut result = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(importers) = self.importers.get(plugin) {
            queue.extend(importers.iter().cloned());
        }

        while let Some(current) = queue.pop_front() {
            if result.insert(current.clone()) {
                if let Some(importers) = self.importers.get(&current) {
                    queue.extend(importers.iter().cloned());
                }
            }
        }

        result
    }

    /// Plugins in dependency order: every plugin appears after the
    /// plugins it imports.
    ///
    /// Returns `None` if the graph has an import cycle. Ties are broken
    /// by name so the order is deterministic.
    pub fn topological_order(&self) -> Option<Vec<PluginName>> {
        let mut pending: HashMap<&PluginName, usize> = self
            .imports
            .iter()
            .map(|(plugin, imports)| (plugin, imports.len()))
            .collect();

        let mut seed: Vec<&PluginName> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(plugin, _)| *plugin)
            .collect();
        seed.sort();
        let mut ready: VecDeque<&PluginName> = seed.into();

        let mut order = Vec::with_capacity(pending.len());
        while let Some(plugin) = ready.pop_front() {
            order.push(plugin.clone());
            let mut unlocked = Vec::new();
            if let Some(importers) = self.importers.get(plugin) {
                for importer in importers {
                    if let Some(count) = pending.get_mut(importer) {
                        *count -= 1;
                        if *count == 0 {
                            unlocked.push(importer);
                        }
                    }
                }
            }
            unlocked.sort();
            ready.extend(unlocked);
        }

        if order.len() == self.imports.len() {
            Some(order)
        } else {
            None
        }
    }
}
