//! Dependency Graph - foreign-key relationships between tables
//!
//! Nodes are fully-qualified table names (`` `schema`.`table` ``) plus
//! integer alias nodes; an edge points from a referenced (parent) table to
//! the table that references it. A foreign key whose columns are renamed
//! relative to the parent's primary key is routed through an alias node
//! (`parent -> "3" -> child`), so a single child may depend on the same
//! parent more than once.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use crate::{Error, Result};
use crate::storage::SqliteStore;
use crate::table::TableHandle;

/// A single foreign-key edge of the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Referenced node
    pub parent: String,
    /// Referencing node
    pub child: String,
    /// Whether the foreign key is part of the child's primary key
    pub primary: bool,
    /// Whether the foreign key renames the parent's columns
    pub aliased: bool,
    /// child column -> parent column
    pub attr_map: Vec<(String, String)>,
}

/// In-memory dependency graph of every table across the attached schemas.
///
/// Loaded once from the store and treated as read-only afterwards.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: BTreeSet<String>,
    /// Outgoing edges (parent -> children)
    edges_from: HashMap<String, Vec<Dependency>>,
    /// Incoming edges (child -> parents)
    edges_to: HashMap<String, Vec<Dependency>>,
    next_alias: usize,
}

impl DependencyGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the graph from the foreign-key metadata of every attached schema
    pub fn load(store: &SqliteStore) -> Result<Self> {
        let mut graph = Self::new();

        for schema in store.schemas()? {
            let tables = store.list_tables(&schema)?;
            for table in &tables {
                graph.add_node(TableHandle::new(&schema, table).full_name());
            }

            for table in &tables {
                let child = TableHandle::new(&schema, table);
                let child_pk: HashSet<String> =
                    store.primary_key(&child)?.into_iter().collect();

                for fk in store.foreign_keys(&child)? {
                    let parent = TableHandle::new(&schema, &fk.parent_table);
                    if parent == child {
                        // self-references do not order tables
                        continue;
                    }
                    let parent_pk = store.primary_key(&parent)?;
                    let attr_map: Vec<(String, String)> = fk
                        .columns
                        .iter()
                        .enumerate()
                        .map(|(i, (from, to))| {
                            let to = to
                                .clone()
                                .or_else(|| parent_pk.get(i).cloned())
                                .unwrap_or_else(|| from.clone());
                            (from.clone(), to)
                        })
                        .collect();

                    let aliased = attr_map.iter().any(|(from, to)| from != to);
                    let primary = attr_map.iter().all(|(from, _)| child_pk.contains(from));
                    graph.add_foreign_key(parent.full_name(), child.full_name(), primary, aliased, attr_map);
                }
            }
        }

        tracing::debug!("Loaded dependency graph: {}", graph.stats().summary());
        Ok(graph)
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, name: impl Into<String>) {
        self.nodes.insert(name.into());
    }

    /// Add a foreign key from `child` to `parent`, inserting an alias node
    /// when the key renames columns.
    pub fn add_foreign_key(
        &mut self,
        parent: String,
        child: String,
        primary: bool,
        aliased: bool,
        attr_map: Vec<(String, String)>,
    ) {
        if aliased {
            let alias = self.next_alias.to_string();
            self.next_alias += 1;
            self.add_node(alias.clone());
            self.add_edge(Dependency {
                parent,
                child: alias.clone(),
                primary,
                aliased,
                attr_map: attr_map.clone(),
            });
            self.add_edge(Dependency {
                parent: alias,
                child,
                primary,
                aliased,
                attr_map,
            });
        } else {
            self.add_edge(Dependency {
                parent,
                child,
                primary,
                aliased,
                attr_map,
            });
        }
    }

    /// Add an edge to the graph
    pub fn add_edge(&mut self, edge: Dependency) {
        self.nodes.insert(edge.parent.clone());
        self.nodes.insert(edge.child.clone());
        self.edges_from.entry(edge.parent.clone()).or_default().push(edge.clone());
        self.edges_to.entry(edge.child.clone()).or_default().push(edge);
    }

    /// Check whether a node exists
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains(name)
    }

    /// Get all nodes, sorted by name
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    /// Get outgoing edges (dependents) of a node
    pub fn children(&self, name: &str) -> &[Dependency] {
        self.edges_from.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Get incoming edges (dependencies) of a node
    pub fn parents(&self, name: &str) -> &[Dependency] {
        self.edges_to.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The node itself and everything that transitively depends on it,
    /// topologically sorted so that every table precedes its dependents.
    pub fn descendants(&self, name: &str) -> Result<Vec<String>> {
        self.closure(name, |node| self.children(node).iter().map(|e| e.child.as_str()).collect())
            .map(|set| self.topological_order(&set))
    }

    /// The node itself and everything it transitively depends on,
    /// topologically sorted with the node last.
    pub fn ancestors(&self, name: &str) -> Result<Vec<String>> {
        self.closure(name, |node| self.parents(node).iter().map(|e| e.parent.as_str()).collect())
            .map(|set| self.topological_order(&set))
    }

    fn closure<'a, F>(&'a self, name: &str, next: F) -> Result<HashSet<&'a str>>
    where
        F: Fn(&str) -> Vec<&'a str>,
    {
        let root = self
            .nodes
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([root.as_str()]);
        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            for n in next(current) {
                if !visited.contains(n) {
                    queue.push_back(n);
                }
            }
        }
        Ok(visited)
    }

    /// Kahn's algorithm over the induced subgraph, ties broken by name.
    fn topological_order(&self, subset: &HashSet<&str>) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> = subset.iter().map(|n| (*n, 0)).collect();
        for node in subset {
            for edge in self.children(node) {
                if let Some(d) = in_degree.get_mut(edge.child.as_str()) {
                    *d += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut order = Vec::with_capacity(subset.len());

        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for edge in self.children(node) {
                if let Some(d) = in_degree.get_mut(edge.child.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(edge.child.as_str());
                    }
                }
            }
        }

        if order.len() < subset.len() {
            // cycle: append the remainder in name order
            let placed: HashSet<String> = order.iter().cloned().collect();
            let mut rest: Vec<&str> = subset.iter().copied().filter(|n| !placed.contains(*n)).collect();
            rest.sort_unstable();
            order.extend(rest.into_iter().map(str::to_string));
        }
        order
    }

    /// Get statistics about the graph
    pub fn stats(&self) -> GraphStats {
        let edges: usize = self.edges_from.values().map(|v| v.len()).sum();
        let alias_nodes = self.nodes.iter().filter(|n| n.parse::<u64>().is_ok()).count();
        let schemas: BTreeSet<&str> = self
            .nodes
            .iter()
            .filter_map(|n| n.strip_prefix('`').and_then(|s| s.split_once('`')).map(|(s, _)| s))
            .collect();

        GraphStats {
            tables: self.nodes.len() - alias_nodes,
            alias_nodes,
            edges,
            schemas: schemas.len(),
        }
    }
}

/// Statistics about a dependency graph
#[derive(Debug, Clone)]
pub struct GraphStats {
    pub tables: usize,
    pub alias_nodes: usize,
    pub edges: usize,
    pub schemas: usize,
}

impl GraphStats {
    fn summary(&self) -> String {
        format!(
            "{} tables in {} schemas, {} edges, {} aliases",
            self.tables, self.schemas, self.edges, self.alias_nodes
        )
    }
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Dependency Graph Statistics:")?;
        writeln!(f, "  Schemas: {}", self.schemas)?;
        writeln!(f, "  Tables: {}", self.tables)?;
        writeln!(f, "  Edges: {} (alias nodes: {})", self.edges, self.alias_nodes)
    }
}
