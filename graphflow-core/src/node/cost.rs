//! Cost Model
//!
//! `cost = process_cost + dependency contribution`, where the contribution is
//! the sum of the dependency node costs (`Selection::All`) or only the
//! minimum of them (`Selection::MinCost`). Literal and producer entries cost
//! nothing. A memo node whose slot is filled costs zero: it has been paid.
//!
//! Costs are recomputed on every query so dynamic costs stay live. The
//! aggregation walks the graph with an explicit stack, so deep chains do not
//! exhaust the call stack.

use super::{Dependency, Node, Selection};

enum Visit {
    Enter(Node),
    Exit {
        node: Node,
        children: usize,
        has_literals: bool,
    },
}

fn aggregate(selection: Selection, costs: impl Iterator<Item = f64>) -> f64 {
    match selection {
        Selection::All => costs.sum(),
        Selection::MinCost => costs.fold(None, |min: Option<f64>, cost| match min {
            Some(current) if current <= cost => Some(current),
            _ => Some(cost),
        })
        .unwrap_or(0.0),
    }
}

impl Node {
    /// Intrinsic cost of this node alone.
    pub fn process_cost(&self) -> f64 {
        self.descriptor().cost.value()
    }

    /// Contribution of the direct dependencies under the selection policy.
    pub fn dependencies_cost(&self) -> f64 {
        let entries = self.dependencies();
        aggregate(self.selection(), entries.iter().map(Dependency::cost))
    }

    /// Total cost of evaluating this node.
    pub fn cost(&self) -> f64 {
        let mut stack = vec![Visit::Enter(self.clone())];
        let mut totals: Vec<f64> = Vec::new();

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(node) => {
                    if node.is_cached() {
                        totals.push(0.0);
                        continue;
                    }
                    let entries = node.dependencies();
                    let children: Vec<Node> =
                        entries.iter().filter_map(|d| d.as_node().cloned()).collect();
                    let has_literals = children.len() < entries.len();
                    stack.push(Visit::Exit {
                        node,
                        children: children.len(),
                        has_literals,
                    });
                    stack.extend(children.into_iter().rev().map(Visit::Enter));
                }
                Visit::Exit {
                    node,
                    children,
                    has_literals,
                } => {
                    let child_costs = totals.split_off(totals.len() - children);
                    let literal_costs = has_literals.then_some(0.0);
                    let dependencies = aggregate(
                        node.selection(),
                        child_costs.into_iter().chain(literal_costs),
                    );
                    totals.push(node.process_cost() + dependencies);
                }
            }
        }

        totals.pop().unwrap_or(0.0)
    }

    /// Index of the cheapest dependency entry; ties go to the lowest index.
    pub fn min_cost_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, entry) in self.dependencies().iter().enumerate() {
            let cost = entry.cost();
            if best.map_or(true, |(_, lowest)| cost < lowest) {
                best = Some((index, cost));
            }
        }
        best.map(|(index, _)| index)
    }

    /// The entries this node resolves under its selection policy.
    pub(crate) fn selected_dependencies(&self) -> Vec<Dependency> {
        match self.selection() {
            Selection::All => self.dependencies(),
            Selection::MinCost => {
                let Some(index) = self.min_cost_index() else {
                    return Vec::new();
                };
                tracing::debug!(node = %self.label(), branch = index, "selected minimum-cost branch");
                self.dependencies().into_iter().nth(index).into_iter().collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn costed(cost: f64) -> Node {
        Node::builder().cost(cost).build()
    }

    #[test]
    fn cost_is_own_plus_node_dependencies() {
        let a = costed(1.0);
        let b = Node::builder().cost(2.0).dependency(&a).build();
        let root = Node::builder()
            .cost(3.0)
            .dependency(&b)
            .dependency(json!(100))
            .dependency(costed(4.0))
            .build();

        assert_eq!(root.dependencies_cost(), 7.0);
        assert_eq!(root.cost(), root.process_cost() + root.dependencies_cost());
        assert_eq!(root.cost(), 10.0);
    }

    #[test]
    fn shared_dependency_is_counted_per_edge() {
        let shared = costed(5.0);
        let root = Node::builder().dependency(&shared).dependency(&shared).build();
        assert_eq!(root.cost(), 10.0);
    }

    #[test]
    fn three_costed_leaves_under_one_parent() {
        let parent = Node::builder()
            .dependencies([costed(10.0), costed(20.0), costed(30.0)])
            .build();
        assert_eq!(parent.dependencies_cost(), 60.0);
        assert_eq!(parent.cost(), 60.0);
    }

    #[test]
    fn min_cost_reports_cheapest_branch() {
        let node = Node::builder()
            .cost(4.0)
            .dependencies([costed(5.0), costed(2.0), costed(8.0)])
            .select(Selection::MinCost)
            .build();
        assert_eq!(node.dependencies_cost(), 2.0);
        assert_eq!(node.cost(), 6.0);
        assert_eq!(node.min_cost_index(), Some(1));
    }

    #[test]
    fn min_cost_ties_pick_lowest_index() {
        let node = Node::min_cost([costed(3.0), costed(1.0), costed(1.0)]);
        assert_eq!(node.min_cost_index(), Some(1));
    }

    #[test]
    fn min_cost_without_dependencies_is_zero() {
        let node = Node::builder().cost(2.0).select(Selection::MinCost).build();
        assert_eq!(node.dependencies_cost(), 0.0);
        assert_eq!(node.cost(), 2.0);
        assert_eq!(node.min_cost_index(), None);
    }

    #[test]
    fn nested_min_cost_uses_full_branch_cost() {
        let cheap_leaf_expensive_branch = Node::builder()
            .cost(1.0)
            .dependency(costed(10.0))
            .build();
        let node = Node::min_cost([cheap_leaf_expensive_branch, costed(5.0)]);
        assert_eq!(node.cost(), 5.0);
        assert_eq!(node.min_cost_index(), Some(1));
    }

    #[test]
    fn dynamic_costs_are_recomputed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let node = Node::builder()
            .dynamic_cost(move || (counter.fetch_add(1, Ordering::SeqCst) + 1) as f64)
            .build();

        assert_eq!(node.cost(), 1.0);
        assert_eq!(node.cost(), 2.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn deep_chains_do_not_overflow() {
        let mut node = costed(1.0);
        for _ in 0..50_000 {
            node = Node::builder().cost(1.0).dependency(node).build();
        }
        assert_eq!(node.cost(), 50_001.0);
    }
}
