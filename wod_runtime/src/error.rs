//! Runtime error taxonomy.
//!
//! Local recovery is the default: compilation, action, handler, and memory
//! failures are recorded as `system` outputs and execution continues. Only
//! [`InvariantViolation`]s are fatal to the session.

use wod_script::{ScriptError, StatementId};

use crate::block::BlockKey;

/// Anything that can go wrong inside the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The block factory could not produce a block for the given statements.
    /// The session skips the statement and continues.
    #[error("cannot compile statements {statements:?}: {reason}")]
    Compilation {
        /// Statements that failed to compile.
        statements: Vec<StatementId>,
        /// Human-readable cause.
        reason: String,
    },

    /// A single action failed while draining. Isolated; later actions run.
    #[error("action `{action}` failed: {reason}")]
    ActionFailure {
        /// Stable action name.
        action: &'static str,
        /// Human-readable cause.
        reason: String,
    },

    /// An event handler failed. Isolated; remaining handlers still fire.
    #[error("handler on {owner} for `{event}` failed: {reason}")]
    HandlerFailure {
        /// Block owning the handler.
        owner: BlockKey,
        /// Event name being dispatched.
        event: &'static str,
        /// Human-readable cause.
        reason: String,
    },

    /// Write to a released memory location. The write is a no-op.
    #[error("memory access on released location `{tag}`")]
    MemoryAccess {
        /// Tag of the released location.
        tag: String,
    },

    /// A structural invariant was broken. Fatal: the session tears down.
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// The input statement tree could not be flattened.
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl RuntimeError {
    /// True when the session must tear down rather than recover locally.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RuntimeError::Invariant(_))
    }
}

/// Structural invariants of the runtime stack. Violations clear the stack and
/// mark the session complete with error.
#[derive(Debug, thiserror::Error)]
pub enum InvariantViolation {
    /// Pop was requested on an empty stack.
    #[error("pop on empty stack")]
    EmptyStackPop,

    /// Two live blocks share a key.
    #[error("duplicate block key {0} on push")]
    DuplicateBlockKey(BlockKey),

    /// A lifecycle hook was invoked out of order (e.g. `next` before `mount`,
    /// a second `dispose`).
    #[error("block {0}: {1}")]
    Lifecycle(BlockKey, &'static str),
}
