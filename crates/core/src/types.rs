//! Pre-resolved "is-a" table for exception kinds.
//!
//! Exception kinds are plain strings. Their parent relationships come from
//! configuration (`[notifier.types]`) and are flattened into an ancestor set
//! per kind when the registry is built, so lookups never walk the graph.

use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeRegistry {
    ancestors: HashMap<String, HashSet<String>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from `kind -> direct parents` edges.
    ///
    /// Cycles are tolerated; a kind never lists itself as its own ancestor.
    pub fn from_parents<I, K, P>(edges: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<P>)>,
        K: Into<String>,
        P: Into<String>,
    {
        let parents: HashMap<String, Vec<String>> = edges
            .into_iter()
            .map(|(kind, ps)| (kind.into(), ps.into_iter().map(Into::into).collect()))
            .collect();

        let mut ancestors = HashMap::with_capacity(parents.len());
        for kind in parents.keys() {
            let mut seen: HashSet<String> = HashSet::new();
            let mut queue: VecDeque<&str> = VecDeque::new();
            queue.push_back(kind.as_str());

            while let Some(current) = queue.pop_front() {
                let Some(direct) = parents.get(current) else {
                    continue;
                };
                for parent in direct {
                    if parent != kind && seen.insert(parent.clone()) {
                        queue.push_back(parent.as_str());
                    }
                }
            }

            ancestors.insert(kind.clone(), seen);
        }

        Self { ancestors }
    }

    /// True if `kind` is `pattern` or has `pattern` among its ancestors.
    pub fn is_a(&self, kind: &str, pattern: &str) -> bool {
        kind == pattern
            || self
                .ancestors
                .get(kind)
                .is_some_and(|set| set.contains(pattern))
    }

    /// Number of kinds with registered parents.
    pub fn len(&self) -> usize {
        self.ancestors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ancestors.is_empty()
    }
}
