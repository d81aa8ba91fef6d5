//! Diagnostic tree printout.

use crate::node::{Dependency, Node};

enum Entry {
    Node(Node),
    Literal(String),
}

impl From<Dependency> for Entry {
    fn from(dependency: Dependency) -> Self {
        match dependency {
            Dependency::Node(node) => Entry::Node(node),
            Dependency::Value(value) => Entry::Literal(value.to_string()),
            Dependency::Producer(_) => Entry::Literal("<producer>".to_string()),
        }
    }
}

/// Render a node and its dependencies as an indented tree, one line per entry.
///
/// Children are indented by one column; a `|` guide marks a child that still
/// has later siblings below it. With `include_costs`, node lines read
/// `name [total: (node)own + (deps)deps]`. Reading costs never evaluates
/// anything, although dynamic costs are queried.
///
/// ```rust
/// use graphflow_core::{render_tree, Node};
///
/// let x = Node::builder().name("x").dependency(Node::leaf(1).rename("one")).build();
/// let root = Node::builder().name("root").dependency(&x).dependency(Node::leaf(2).rename("two")).build();
/// assert_eq!(render_tree(&root, false), "root\n x\n |one\n | 1\n two\n  2");
/// ```
pub fn render_tree(node: &Node, include_costs: bool) -> String {
    let mut lines = Vec::new();
    let mut stack = vec![(Entry::Node(node.clone()), String::new(), 0usize)];

    while let Some((entry, indent, remaining)) = stack.pop() {
        let node = match entry {
            Entry::Literal(text) => {
                lines.push(format!("{indent}{text}"));
                continue;
            }
            Entry::Node(node) => node,
        };

        if include_costs {
            lines.push(format!(
                "{indent}{} [{}: (node){} + (deps){}]",
                node.label(),
                node.cost(),
                node.process_cost(),
                node.dependencies_cost()
            ));
        } else {
            lines.push(format!("{indent}{}", node.label()));
        }

        let guide = if remaining > 1 { "|" } else { " " };
        let child_indent = format!("{indent}{guide}");
        let dependencies = node.dependencies();
        let count = dependencies.len();
        for (index, dependency) in dependencies.into_iter().enumerate().rev() {
            stack.push((dependency.into(), child_indent.clone(), count - index));
        }
    }

    lines.join("\n")
}
