//! Parsed statement tree, the input contract from the parser.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::fragment::{Fragment, FragmentKind};

/// Identity of a statement within one script.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct StatementId(pub u64);

impl Display for StatementId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "stmt-{}", self.0)
    }
}

/// One node of the parsed script tree. Immutable during execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    /// Identity, unique within the script.
    pub id: StatementId,
    /// The statement's typed fragments, in parse order.
    pub fragments: Vec<Fragment>,
    /// Nested statements.
    #[serde(default)]
    pub children: Vec<Statement>,
}

impl Statement {
    /// A leaf statement.
    pub fn leaf(id: StatementId, fragments: Vec<Fragment>) -> Statement {
        Statement {
            id,
            fragments,
            children: Vec::new(),
        }
    }

    /// A statement with children.
    pub fn with_children(
        id: StatementId,
        fragments: Vec<Fragment>,
        children: Vec<Statement>,
    ) -> Statement {
        Statement {
            id,
            fragments,
            children,
        }
    }

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
}
