//! Dependency walk.

use super::Node;

/// Pre-order walk over a node and its dependency nodes.
///
/// Shared nodes are yielded once per path that reaches them, mirroring how
/// evaluation visits them. Literal and producer entries are skipped.
pub struct Traverse {
    stack: Vec<Node>,
}

impl Iterator for Traverse {
    type Item = Node;

    fn next(&mut self) -> Option<Node> {
        let node = self.stack.pop()?;
        let children: Vec<Node> = node
            .dependencies()
            .iter()
            .filter_map(|entry| entry.as_node().cloned())
            .collect();
        self.stack.extend(children.into_iter().rev());
        Some(node)
    }
}

impl Node {
    /// Walk this node and everything it depends on, parents before children.
    pub fn traverse(&self) -> Traverse {
        Traverse {
            stack: vec![self.clone()],
        }
    }
}
