use std::collections::BTreeSet;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::table::{Slot, Table};

/// Identity of one recalculation wave; every value change carries the id of
/// the wave that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssemblyId(pub u64);

impl fmt::Display for AssemblyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wave#{}", self.0)
    }
}

/// Evaluation order for one wave. Nodes are derived cells.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    /// Acyclic cells, every one after all of its in-wave inputs.
    pub order: Vec<Slot>,
    /// Strongly connected groups that cannot be ordered; never evaluated.
    pub cycles: Vec<Vec<Slot>>,
    /// Nodes left out because the wave hit its size limit.
    pub truncated: usize,
}

pub(crate) struct WavePlanner<'a> {
    table: &'a Table,
    limit: Option<usize>,
}

impl<'a> WavePlanner<'a> {
    pub(crate) fn new(table: &'a Table, limit: Option<usize>) -> Self {
        Self { table, limit }
    }

    /// Order `roots` and, when `propagate` is set, every derived cell
    /// downstream of them.
    pub(crate) fn plan(&self, roots: &[Slot], propagate: bool) -> Plan {
        let (nodes, truncated) = self.discover(roots, propagate);
        if nodes.is_empty() {
            return Plan::default();
        }
        let index: FxHashMap<Slot, usize> =
            nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let successors: Vec<Vec<usize>> = nodes
            .iter()
            .map(|n| {
                self.successors(n)
                    .into_iter()
                    .filter_map(|s| index.get(&s).copied())
                    .collect()
            })
            .collect();

        let sccs = tarjan_scc(&successors);
        let mut cyclic = vec![false; nodes.len()];
        let mut cycles = Vec::new();
        for scc in sccs {
            let self_loop = scc.len() == 1 && successors[scc[0]].contains(&scc[0]);
            if scc.len() > 1 || self_loop {
                for &i in &scc {
                    cyclic[i] = true;
                }
                let mut group: Vec<Slot> = scc.iter().map(|&i| nodes[i]).collect();
                group.sort();
                cycles.push(group);
            }
        }

        let order = kahn_order(&successors, &cyclic)
            .into_iter()
            .map(|i| nodes[i])
            .collect();
        Plan {
            order,
            cycles,
            truncated,
        }
    }

    fn successors(&self, node: &Slot) -> Vec<Slot> {
        self.table.dependents_of(node.0, node.1)
    }

    /// Depth-first discovery; a node's position is the order it was first
    /// reached in, which breaks ties in the final ordering.
    fn discover(&self, roots: &[Slot], propagate: bool) -> (Vec<Slot>, usize) {
        let limit = self.limit.unwrap_or(usize::MAX);
        let mut seen = FxHashSet::default();
        let mut nodes = Vec::new();
        let mut truncated = 0;
        let mut stack: Vec<Slot> = roots.iter().rev().copied().collect();
        while let Some(node) = stack.pop() {
            if self.table.owner_of(node.0, node.1).is_none() || !seen.insert(node) {
                continue;
            }
            if nodes.len() >= limit {
                truncated += 1;
                continue;
            }
            nodes.push(node);
            if propagate {
                let next = self.successors(&node);
                stack.extend(next.into_iter().rev().filter(|n| !seen.contains(n)));
            }
        }
        if truncated > 0 {
            tracing::warn!(limit, truncated, "wave exceeded its node limit");
        }
        (nodes, truncated)
    }
}

/// Tarjan's strongly connected components over an adjacency list.
fn tarjan_scc(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut state = Tarjan {
        successors,
        counter: 0,
        stack: Vec::new(),
        indices: vec![None; successors.len()],
        lowlinks: vec![0; successors.len()],
        on_stack: vec![false; successors.len()],
        sccs: Vec::new(),
    };
    for v in 0..successors.len() {
        if state.indices[v].is_none() {
            state.visit(v);
        }
    }
    state.sccs
}

struct Tarjan<'g> {
    successors: &'g [Vec<usize>],
    counter: usize,
    stack: Vec<usize>,
    indices: Vec<Option<usize>>,
    lowlinks: Vec<usize>,
    on_stack: Vec<bool>,
    sccs: Vec<Vec<usize>>,
}

impl Tarjan<'_> {
    fn visit(&mut self, v: usize) {
        self.indices[v] = Some(self.counter);
        self.lowlinks[v] = self.counter;
        self.counter += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        for &w in &self.successors[v] {
            match self.indices[w] {
                None => {
                    self.visit(w);
                    self.lowlinks[v] = self.lowlinks[v].min(self.lowlinks[w]);
                }
                Some(index) if self.on_stack[w] => {
                    self.lowlinks[v] = self.lowlinks[v].min(index);
                }
                // cross edge into a finished component
                Some(_) => {}
            }
        }

        if Some(self.lowlinks[v]) == self.indices[v] {
            let mut scc = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                scc.push(w);
                if w == v {
                    break;
                }
            }
            self.sccs.push(scc);
        }
    }
}

/// Kahn's algorithm over the non-cyclic nodes; ready nodes are taken in
/// discovery order.
fn kahn_order(successors: &[Vec<usize>], cyclic: &[bool]) -> Vec<usize> {
    let mut indegree = vec![0usize; successors.len()];
    for (v, next) in successors.iter().enumerate() {
        if cyclic[v] {
            continue;
        }
        for &w in next {
            if !cyclic[w] && w != v {
                indegree[w] += 1;
            }
        }
    }
    let mut ready: BTreeSet<usize> = (0..successors.len())
        .filter(|&v| !cyclic[v] && indegree[v] == 0)
        .collect();
    let mut order = Vec::with_capacity(successors.len());
    while let Some(v) = ready.pop_first() {
        order.push(v);
        for &w in &successors[v] {
            if cyclic[w] || w == v {
                continue;
            }
            indegree[w] -= 1;
            if indegree[w] == 0 {
                ready.insert(w);
            }
        }
    }
    order
}
