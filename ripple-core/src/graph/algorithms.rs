//! Graph Algorithms
//!
//! Pure functions over `node -> set-of-dependencies` maps.
//!
//! # Conventions
//!
//! A [`DependencyGraph`] maps every node to the nodes it depends on. An edge
//! is written `(node, dependency)`; in any ordering produced here the
//! dependency comes before the node.
//!
//! Nodes that only appear on the right-hand side are still nodes of the
//! graph. All traversals follow `IndexMap`/`IndexSet` insertion order, so
//! results are repeatable for the same input.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

/// Adjacency map: node -> nodes it depends on.
pub type DependencyGraph<N> = IndexMap<N, IndexSet<N>>;

/// Result of [`topological_sort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologicalOrder<N> {
    /// Nodes in dependency order. Nodes stuck on a cycle are absent.
    pub order: Vec<N>,
    /// Edges `(node, dependency)` among the nodes that could not be ordered.
    pub cycle_edges: Vec<(N, N)>,
}

impl<N> TopologicalOrder<N> {
    /// Whether every node was ordered.
    pub fn is_complete(&self) -> bool {
        self.cycle_edges.is_empty()
    }
}

/// Every node of the graph, keys first, then dependency-only nodes.
fn all_nodes<N>(graph: &DependencyGraph<N>) -> IndexSet<N>
where
    N: Copy + Eq + Hash,
{
    let mut nodes: IndexSet<N> = graph.keys().copied().collect();
    for deps in graph.values() {
        nodes.extend(deps.iter().copied());
    }
    nodes
}

/// Sort the graph with Kahn's algorithm.
///
/// Dependencies are emitted before their dependents. Any node that sits on
/// or behind a cycle is left out of `order`, and the edges among those
/// leftover nodes are reported in `cycle_edges`.
pub fn topological_sort<N>(graph: &DependencyGraph<N>) -> TopologicalOrder<N>
where
    N: Copy + Eq + Hash,
{
    let nodes = all_nodes(graph);
    let mut in_degree: HashMap<N, usize> = HashMap::with_capacity(nodes.len());
    let mut dependents: HashMap<N, Vec<N>> = HashMap::new();

    for &node in &nodes {
        let deps = graph.get(&node);
        in_degree.insert(node, deps.map_or(0, IndexSet::len));
        for &dep in deps.into_iter().flatten() {
            dependents.entry(dep).or_default().push(node);
        }
    }

    let mut queue: VecDeque<N> = nodes
        .iter()
        .copied()
        .filter(|n| in_degree.get(n).copied() == Some(0))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &dependent in dependents.get(&node).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(&dependent) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
    }

    let mut cycle_edges = Vec::new();
    if order.len() < nodes.len() {
        let ordered: HashSet<N> = order.iter().copied().collect();
        for &node in nodes.iter().filter(|n| !ordered.contains(n)) {
            for &dep in graph.get(&node).into_iter().flatten() {
                if !ordered.contains(&dep) {
                    cycle_edges.push((node, dep));
                }
            }
        }
    }

    TopologicalOrder { order, cycle_edges }
}

/// Find strongly connected components with Kosaraju's algorithm.
///
/// Every node belongs to exactly one component. Components are returned in
/// the order the second pass discovers them.
pub fn strongly_connected_components<N>(graph: &DependencyGraph<N>) -> Vec<Vec<N>>
where
    N: Copy + Eq + Hash,
{
    let nodes = all_nodes(graph);

    // First pass: finishing order over forward edges.
    let mut visited: HashSet<N> = HashSet::with_capacity(nodes.len());
    let mut finished: Vec<N> = Vec::with_capacity(nodes.len());
    for &start in &nodes {
        if !visited.insert(start) {
            continue;
        }
        let mut stack: Vec<(N, usize)> = vec![(start, 0)];
        while let Some(top) = stack.last_mut() {
            let node = top.0;
            let next = graph.get(&node).and_then(|deps| deps.get_index(top.1)).copied();
            match next {
                Some(next) => {
                    top.1 += 1;
                    if visited.insert(next) {
                        stack.push((next, 0));
                    }
                }
                None => {
                    finished.push(node);
                    stack.pop();
                }
            }
        }
    }

    // Second pass: collect components over the transposed edges.
    let mut transposed: HashMap<N, Vec<N>> = HashMap::new();
    for (&node, deps) in graph {
        for &dep in deps {
            transposed.entry(dep).or_default().push(node);
        }
    }

    let mut assigned: HashSet<N> = HashSet::with_capacity(nodes.len());
    let mut components = Vec::new();
    for &root in finished.iter().rev() {
        if !assigned.insert(root) {
            continue;
        }
        let mut component = vec![root];
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            for &next in transposed.get(&node).into_iter().flatten() {
                if assigned.insert(next) {
                    component.push(next);
                    stack.push(next);
                }
            }
        }
        components.push(component);
    }

    components
}

/// Components that contain a cycle: more than one member, or a self-loop.
pub fn find_cycles<N>(graph: &DependencyGraph<N>) -> Vec<Vec<N>>
where
    N: Copy + Eq + Hash,
{
    strongly_connected_components(graph)
        .into_iter()
        .filter(|component| match component.as_slice() {
            [single] => graph.get(single).is_some_and(|deps| deps.contains(single)),
            _ => true,
        })
        .collect()
}

/// Remove feedback edges until the graph is acyclic.
///
/// Each round removes one edge per cyclic component: the greatest
/// `(node, dependency)` pair inside that component. Every edge inside a
/// strongly connected component lies on a cycle, so each round strictly
/// shrinks the cyclic part of the graph. Returns the removed edges in
/// removal order.
pub fn break_cycles<N>(graph: &mut DependencyGraph<N>) -> Vec<(N, N)>
where
    N: Copy + Eq + Hash + Ord,
{
    let mut removed = Vec::new();

    loop {
        let cycles = find_cycles(graph);
        if cycles.is_empty() {
            break;
        }

        for component in cycles {
            let members: HashSet<N> = component.iter().copied().collect();
            let mut feedback: Option<(N, N)> = None;
            for &node in &component {
                for &dep in graph.get(&node).into_iter().flatten() {
                    if members.contains(&dep) && feedback.map_or(true, |edge| (node, dep) > edge) {
                        feedback = Some((node, dep));
                    }
                }
            }

            if let Some((node, dep)) = feedback {
                if let Some(deps) = graph.get_mut(&node) {
                    deps.shift_remove(&dep);
                }
                removed.push((node, dep));
            }
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(u32, u32)]) -> DependencyGraph<u32> {
        let mut g = DependencyGraph::new();
        for &(node, dep) in edges {
            g.entry(node).or_default().insert(dep);
        }
        g
    }

    fn position(order: &[u32], node: u32) -> usize {
        order.iter().position(|&n| n == node).expect("node missing from order")
    }

    #[test]
    fn sorts_chain_dependencies_first() {
        // 3 depends on 2, 2 depends on 1
        let g = graph(&[(3, 2), (2, 1)]);
        let sorted = topological_sort(&g);
        assert!(sorted.is_complete());
        assert_eq!(sorted.order, vec![1, 2, 3]);
    }

    #[test]
    fn sorts_diamond() {
        let g = graph(&[(2, 1), (3, 1), (4, 2), (4, 3)]);
        let sorted = topological_sort(&g);
        assert_eq!(sorted.order.len(), 4);
        assert!(position(&sorted.order, 1) < position(&sorted.order, 2));
        assert!(position(&sorted.order, 1) < position(&sorted.order, 3));
        assert!(position(&sorted.order, 2) < position(&sorted.order, 4));
        assert!(position(&sorted.order, 3) < position(&sorted.order, 4));
    }

    #[test]
    fn reports_cycle_edges() {
        let g = graph(&[(1, 2), (2, 1), (3, 0)]);
        let sorted = topological_sort(&g);
        assert!(!sorted.is_complete());
        assert_eq!(sorted.order, vec![0, 3]);
        assert_eq!(sorted.cycle_edges, vec![(1, 2), (2, 1)]);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let g = graph(&[(1, 1)]);
        assert_eq!(find_cycles(&g), vec![vec![1]]);
        assert!(!topological_sort(&g).is_complete());
    }

    #[test]
    fn finds_components() {
        // Two cycles: {1,2,3} and {4,5}, plus a tail 6 -> 4.
        let g = graph(&[(1, 2), (2, 3), (3, 1), (4, 5), (5, 4), (6, 4)]);
        let mut components: Vec<Vec<u32>> = strongly_connected_components(&g)
            .into_iter()
            .map(|mut c| {
                c.sort_unstable();
                c
            })
            .collect();
        components.sort();
        assert_eq!(components, vec![vec![1, 2, 3], vec![4, 5], vec![6]]);

        assert_eq!(find_cycles(&g).len(), 2);
    }

    #[test]
    fn break_cycles_leaves_acyclic_graph() {
        let mut g = graph(&[(1, 2), (2, 3), (3, 1), (1, 3), (4, 5), (5, 4)]);
        let removed = break_cycles(&mut g);
        assert!(!removed.is_empty());
        assert!(find_cycles(&g).is_empty());
        assert!(topological_sort(&g).is_complete());
    }

    #[test]
    fn break_cycles_is_deterministic() {
        let edges = [(1, 2), (2, 3), (3, 1)];
        let mut first = graph(&edges);
        let mut second = graph(&edges);
        assert_eq!(break_cycles(&mut first), break_cycles(&mut second));
        assert_eq!(break_cycles(&mut graph(&edges)), vec![(3, 1)]);
    }

    #[test]
    fn acyclic_graph_is_untouched() {
        let mut g = graph(&[(2, 1), (3, 2)]);
        assert!(break_cycles(&mut g).is_empty());
        assert_eq!(g.len(), 2);
    }
}
