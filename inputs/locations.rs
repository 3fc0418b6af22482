//! The location hierarchy a cascade walks down.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub type LocationId = i64;

#[derive(Error, Debug)]
pub enum LocationError {
    #[error("Failed to read location hierarchy: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML location hierarchy: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Location {0} is not part of the hierarchy.")]
    UnknownLocation(LocationId),
    #[error("Location {child} has two parents, {first} and {second}.")]
    MultipleParents {
        child: LocationId,
        first: LocationId,
        second: LocationId,
    },
    #[error("Location {0} is listed as its own ancestor.")]
    Cycle(LocationId),
}

/// One row of a hierarchy file. Roots have no parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub location_id: LocationId,
    #[serde(default)]
    pub parent_id: Option<LocationId>,
}

#[derive(Debug, Clone, Deserialize)]
struct HierarchyFile {
    #[serde(default)]
    location: Vec<LocationRecord>,
}

/// A tree of locations. Children keep the order they were declared in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationDag {
    nodes: BTreeSet<LocationId>,
    children: BTreeMap<LocationId, Vec<LocationId>>,
    parents: BTreeMap<LocationId, LocationId>,
}

impl LocationDag {
    pub fn from_records(records: &[LocationRecord]) -> Result<Self, LocationError> {
        let mut dag = LocationDag::default();
        for record in records {
            dag.nodes.insert(record.location_id);
            if let Some(parent) = record.parent_id {
                dag.add_edge(parent, record.location_id)?;
            }
        }
        dag.check_acyclic()?;
        Ok(dag)
    }

    /// Builds the hierarchy from `(parent, child)` pairs.
    pub fn from_edges(edges: &[(LocationId, LocationId)]) -> Result<Self, LocationError> {
        let mut dag = LocationDag::default();
        for &(parent, child) in edges {
            dag.add_edge(parent, child)?;
        }
        dag.check_acyclic()?;
        Ok(dag)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LocationError> {
        let text = fs::read_to_string(path)?;
        let file: HierarchyFile = toml::from_str(&text)?;
        Self::from_records(&file.location)
    }

    fn add_edge(&mut self, parent: LocationId, child: LocationId) -> Result<(), LocationError> {
        if let Some(&first) = self.parents.get(&child) {
            if first != parent {
                return Err(LocationError::MultipleParents {
                    child,
                    first,
                    second: parent,
                });
            }
            return Ok(());
        }
        self.nodes.insert(parent);
        self.nodes.insert(child);
        self.parents.insert(child, parent);
        self.children.entry(parent).or_default().push(child);
        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), LocationError> {
        for &start in &self.nodes {
            let mut current = start;
            let mut steps = 0;
            while let Some(&parent) = self.parents.get(&current) {
                if parent == start || steps > self.nodes.len() {
                    return Err(LocationError::Cycle(start));
                }
                current = parent;
                steps += 1;
            }
        }
        Ok(())
    }

    pub fn contains(&self, location: LocationId) -> bool {
        self.nodes.contains(&location)
    }

    /// Immediate children of `parent`, in declaration order.
    pub fn children(&self, parent: LocationId) -> Result<Vec<LocationId>, LocationError> {
        if !self.contains(parent) {
            return Err(LocationError::UnknownLocation(parent));
        }
        Ok(self.children.get(&parent).cloned().unwrap_or_default())
    }

    pub fn parent_of(&self, location: LocationId) -> Option<LocationId> {
        self.parents.get(&location).copied()
    }

    /// Every location below `root`, depth first, parents before children.
    pub fn descendants(&self, root: LocationId) -> Result<Vec<LocationId>, LocationError> {
        let mut order = Vec::new();
        let mut stack: Vec<LocationId> = self.children(root)?.into_iter().rev().collect();
        while let Some(location) = stack.pop() {
            order.push(location);
            if let Some(children) = self.children.get(&location) {
                stack.extend(children.iter().rev());
            }
        }
        Ok(order)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
