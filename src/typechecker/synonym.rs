use petgraph::algo::tarjan_scc;
use petgraph::prelude::DiGraphMap;

use crate::typechecker::types::SynonymId;

/// Directed dependency graph over synonym IDs. An edge `a -> b` records
/// that the body of `a` references `b` (directly or through another
/// synonym's arguments). Synonyms must form a DAG; a cycle would make
/// eager expansion during unification diverge.
#[derive(Debug, Default)]
pub struct SynonymDependencyGraph {
    graph: DiGraphMap<SynonymId, ()>,
}

impl SynonymDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, sid: SynonymId) {
        self.graph.add_node(sid);
    }

    pub fn add_edge(&mut self, from: SynonymId, to: SynonymId) {
        self.graph.add_edge(from, to, ());
    }

    /// Returns the vertices of some dependency cycle, if one exists.
    /// Self-loops count.
    pub fn find_cycle(&self) -> Option<Vec<SynonymId>> {
        for scc in tarjan_scc(&self.graph) {
            if scc.len() > 1 {
                return Some(scc);
            }
            if scc.len() == 1 && self.graph.contains_edge(scc[0], scc[0]) {
                return Some(scc);
            }
        }
        None
    }
}
