//! The filter tree handed to a datastore adapter.
//!
//! Same shape as the IR, but every leaf is a concrete predicate over
//! storage keys. No wildcard survives into this tree.

use std::fmt;
use std::mem;

use serde::Serialize;

use crate::ir::{Arithmetic, ComparisonOperator, Conjunction, Literal};

/// A node of the filter tree.
///
/// Serializes as `{"combinator": "AND", "children": [l, r]}` or
/// `{"predicate": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterTree {
    Group {
        combinator: Conjunction,
        children: Box<[FilterTree; 2]>,
    },
    Leaf {
        predicate: Predicate,
    },
}

impl FilterTree {
    pub fn leaf(predicate: Predicate) -> Self {
        FilterTree::Leaf { predicate }
    }

    pub fn group(combinator: Conjunction, left: FilterTree, right: FilterTree) -> Self {
        FilterTree::Group {
            combinator,
            children: Box::new([left, right]),
        }
    }

    /// Folds nodes into a right-leaning chain: `[a, b, c]` becomes
    /// `OP(a, OP(b, c))`. Returns `None` for an empty input.
    pub fn chain(combinator: Conjunction, nodes: impl IntoIterator<Item = FilterTree>) -> Option<Self> {
        let mut nodes: Vec<FilterTree> = nodes.into_iter().collect();
        let mut acc = nodes.pop()?;
        while let Some(previous) = nodes.pop() {
            acc = FilterTree::group(combinator, previous, acc);
        }
        Some(acc)
    }

    /// Leaf predicates, left to right.
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut predicates = Vec::new();
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            match node {
                FilterTree::Group { children, .. } => {
                    pending.push(&children[1]);
                    pending.push(&children[0]);
                }
                FilterTree::Leaf { predicate } => predicates.push(predicate),
            }
        }
        predicates
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut pending = vec![(self, 1)];
        while let Some((node, level)) = pending.pop() {
            depth = depth.max(level);
            if let FilterTree::Group { children, .. } = node {
                pending.push((&children[0], level + 1));
                pending.push((&children[1], level + 1));
            }
        }
        depth
    }

    /// A leaf that owns no heap memory, swapped in while a tree is torn down.
    fn vacant() -> Self {
        FilterTree::leaf(Predicate::Exists {
            key: String::new(),
            exists: false,
        })
    }
}

/// Nested groups are moved onto a work list before their parent is freed, so
/// a long chain is dropped in a loop.
impl Drop for FilterTree {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        detach_groups(self, &mut pending);
        while let Some(mut node) = pending.pop() {
            detach_groups(&mut node, &mut pending);
        }
    }
}

fn detach_groups(node: &mut FilterTree, pending: &mut Vec<FilterTree>) {
    if let FilterTree::Group { children, .. } = node {
        for child in children.iter_mut() {
            if matches!(child, FilterTree::Group { .. }) {
                pending.push(mem::replace(child, FilterTree::vacant()));
            }
        }
    }
}

/// `OP(left, right)`. The right spine is written in a loop.
impl fmt::Display for FilterTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut node = self;
        let mut open = 0;
        loop {
            match node {
                FilterTree::Group {
                    combinator,
                    children,
                } => {
                    write!(f, "{combinator}({}, ", children[0])?;
                    open += 1;
                    node = &children[1];
                }
                FilterTree::Leaf { predicate } => {
                    write!(f, "{predicate}")?;
                    break;
                }
            }
        }
        for _ in 0..open {
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// A concrete condition on one or more storage keys.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Predicate {
    /// `key <operator> value` with `=`, `!=`, `>` or `<`.
    Compare {
        key: String,
        operator: ComparisonOperator,
        value: Operand,
    },
    /// Whether a value is present under `key`.
    Exists { key: String, exists: bool },
    /// The number of `keys` holding a value, related to `value` by `=`, `>`
    /// or `<`.
    Count {
        keys: Vec<String>,
        operator: ComparisonOperator,
        value: u64,
    },
    /// An arithmetic expression over key values compared to a number.
    Derived {
        expression: Arithmetic<String>,
        operator: ComparisonOperator,
        value: f64,
    },
}

impl Predicate {
    /// Every storage key the predicate reads.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Predicate::Compare { key, value, .. } => match value {
                Operand::Field { field } => vec![key.as_str(), field.as_str()],
                Operand::Literal(_) => vec![key.as_str()],
            },
            Predicate::Exists { key, .. } => vec![key.as_str()],
            Predicate::Count { keys, .. } => keys.iter().map(String::as_str).collect(),
            Predicate::Derived { expression, .. } => {
                expression.fields().into_iter().map(String::as_str).collect()
            }
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare {
                key,
                operator,
                value,
            } => write!(f, "{key} {operator} {value}"),
            Predicate::Exists { key, exists } => write!(f, "{key} exists {exists}"),
            Predicate::Count {
                keys,
                operator,
                value,
            } => write!(f, "count({}) {operator} {value}", keys.join(", ")),
            Predicate::Derived {
                expression,
                operator,
                value,
            } => write!(f, "expr{expression} {operator} {value}"),
        }
    }
}

/// Right-hand side of a [`Predicate::Compare`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Operand {
    Literal(Literal),
    Field { field: String },
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(literal) => write!(f, "{literal}"),
            Operand::Field { field } => write!(f, "{field}"),
        }
    }
}
