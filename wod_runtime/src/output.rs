//! The append-only output/history stream.

use serde::{Deserialize, Serialize};
use wod_script::{Fragment, TimeSpan};

use crate::block::BlockKey;

/// Identity of one output statement. Monotonic in append order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct OutputId(pub u64);

impl std::fmt::Display for OutputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "out-{}", self.0)
    }
}

/// What an output statement records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// A segment of the plan started executing.
    Segment,
    /// A block finished; carries its result fragments.
    Completion,
    /// A mid-flight measurement (round milestones, session summary).
    Metric,
    /// Diagnostics: recovered failures, livelock notes, teardown causes.
    System,
}

/// One entry of the history stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputStatement {
    /// Monotonic id, assigned on append.
    pub id: OutputId,
    /// Entry kind.
    pub kind: OutputKind,
    /// Block that produced the entry; `None` for session-level diagnostics.
    pub source_block: Option<BlockKey>,
    /// Stack depth of the source block when the entry was produced.
    pub stack_level: usize,
    /// Time covered by the entry, when it covers time.
    pub span: Option<TimeSpan>,
    /// Fragment groups, same bucket shape as block plans.
    pub fragments: Vec<Vec<Fragment>>,
}

/// Append-only log with monotonic ids.
#[derive(Debug, Default)]
pub struct OutputLog {
    entries: Vec<OutputStatement>,
    next_id: u64,
}

impl OutputLog {
    /// Assigns the next id, appends, and returns a reference to the stored
    /// entry.
    pub fn append(&mut self, mut statement: OutputStatement) -> &OutputStatement {
        statement.id = OutputId(self.next_id);
        self.next_id += 1;
        self.entries.push(statement);
        self.entries.last().expect("just pushed")
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[OutputStatement] {
        &self.entries
    }

    /// Entries of one kind.
    pub fn of_kind(&self, kind: OutputKind) -> impl Iterator<Item = &OutputStatement> {
        self.entries.iter().filter(move |e| e.kind == kind)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True before the first append.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry. Used by session reset only; ids keep climbing so
    /// consumers never see a reused id.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
