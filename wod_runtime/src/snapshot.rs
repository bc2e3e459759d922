//! Immutable stack views published after every structural change.

use serde::{Deserialize, Serialize};
use wod_script::{EpochMs, StatementId};

use crate::block::{Block, BlockKey, BlockKind, CompletionReason};

/// What changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    /// First snapshot of a session.
    Initial,
    /// A block was pushed; it is `affected` and on top.
    Push,
    /// A block was popped; it is `affected` and already gone.
    Pop,
    /// The stack was cleared (teardown).
    Clear,
}

/// One block as seen from outside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block identity.
    pub key: BlockKey,
    /// Factory strategy.
    pub kind: BlockKind,
    /// Statements the block was compiled from.
    pub source_ids: Vec<StatementId>,
    /// Resolved display label, once labeling ran.
    pub label: Option<String>,
    /// Completion flag.
    pub is_complete: bool,
    /// Completion reason, once complete.
    pub completion_reason: Option<CompletionReason>,
}

impl Block {
    /// The block's snapshot form.
    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            key: self.key(),
            kind: self.kind(),
            source_ids: self.meta().source_ids.clone(),
            label: self.meta().display_label.clone(),
            is_complete: self.is_complete(),
            completion_reason: self.meta().completion_reason(),
        }
    }
}

/// An immutable view of the stack, published after the structural mutation
/// and before any further event dispatch.
///
/// For `Push`, `affected` equals the last entry of `blocks`; for `Pop` it is
/// the summary of the block that just left (with its completion state), which
/// no longer appears in `blocks`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackSnapshot {
    /// What changed.
    pub kind: SnapshotKind,
    /// Bottom-up block summaries.
    pub blocks: Vec<BlockSummary>,
    /// Stack depth; always equals `blocks.len()`.
    pub depth: usize,
    /// The block the change was about, if any.
    pub affected: Option<BlockSummary>,
    /// Session-clock time of publication.
    pub clock_time: EpochMs,
}

impl StackSnapshot {
    pub(crate) fn capture(
        kind: SnapshotKind,
        stack: &[Block],
        affected: Option<BlockSummary>,
        clock_time: EpochMs,
    ) -> StackSnapshot {
        let blocks: Vec<BlockSummary> = stack.iter().map(Block::summary).collect();
        StackSnapshot {
            kind,
            depth: blocks.len(),
            blocks,
            affected,
            clock_time,
        }
    }
}
