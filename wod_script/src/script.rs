//! Flattened, id-indexed form of a statement tree.
//!
//! The runtime's block factory compiles child blocks lazily, long after the
//! parent statement was consumed, so it needs random access by id rather than
//! a borrow into a tree. [`Script`] is that arena: built once from the parsed
//! tree, then read-only for the life of the session.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::fragment::{Fragment, FragmentKind};
use crate::statement::{Statement, StatementId};

/// Error building a [`Script`] from a statement tree.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The same id appears on more than one statement.
    #[error("duplicate statement id {0}")]
    DuplicateId(StatementId),
    /// The tree was empty.
    #[error("script has no statements")]
    Empty,
}

/// One flattened statement: fragments plus child ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatementNode {
    /// Identity, unique within the script.
    pub id: StatementId,
    /// The statement's typed fragments, in parse order.
    pub fragments: Vec<Fragment>,
    /// Ids of nested statements, in source order.
    pub children: Vec<StatementId>,
}

impl StatementNode {
    /// First fragment of the given kind, if any.
    pub fn first_of_kind(&self, kind: FragmentKind) -> Option<&Fragment> {
        self.fragments.iter().find(|f| f.kind() == kind)
    }

    /// All fragments of the given kind, in parse order.
    pub fn of_kind(&self, kind: FragmentKind) -> impl Iterator<Item = &Fragment> {
        self.fragments.iter().filter(move |f| f.kind() == kind)
    }

    /// True if any fragment has the given kind.
    pub fn has_kind(&self, kind: FragmentKind) -> bool {
        self.first_of_kind(kind).is_some()
    }

    /// True if the statement has nested statements.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// An immutable, flattened script: every statement of the tree, indexed by
/// id. Built from the tree, never deserialized — the id index only exists
/// through [`Script::from_statements`].
#[derive(Clone, Debug, Default)]
pub struct Script {
    nodes: Vec<StatementNode>,
    index: FxHashMap<StatementId, usize>,
    roots: Vec<StatementId>,
}

impl Script {
    /// Flattens a statement tree. Fails on duplicate ids or an empty tree.
    pub fn from_statements(statements: Vec<Statement>) -> Result<Script, ScriptError> {
        if statements.is_empty() {
            return Err(ScriptError::Empty);
        }
        let mut script = Script::default();
        for statement in &statements {
            script.roots.push(statement.id);
        }
        let mut pending: Vec<Statement> = statements;
        // Depth-first; children keep source order within each parent.
        while let Some(statement) = pending.pop() {
            let Statement {
                id,
                fragments,
                children,
            } = statement;
            if script.index.contains_key(&id) {
                return Err(ScriptError::DuplicateId(id));
            }
            let node = StatementNode {
                id,
                fragments,
                children: children.iter().map(|c| c.id).collect(),
            };
            script.index.insert(id, script.nodes.len());
            script.nodes.push(node);
            pending.extend(children.into_iter().rev());
        }
        Ok(script)
    }

    /// Looks up a statement by id.
    pub fn get(&self, id: StatementId) -> Option<&StatementNode> {
        self.index.get(&id).map(|&idx| &self.nodes[idx])
    }

    /// The top-level statement ids, in source order.
    pub fn roots(&self) -> &[StatementId] {
        &self.roots
    }

    /// All statements, in flattening order.
    pub fn nodes(&self) -> &[StatementNode] {
        &self.nodes
    }

    /// Number of statements.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the script holds no statements.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
