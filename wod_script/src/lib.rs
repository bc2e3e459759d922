#![warn(missing_docs)]

//! Data model for the wod-run workout-script runtime.
//!
//! A parsed workout script is a tree of [`Statement`]s, each carrying typed
//! [`Fragment`]s (timers, rounds, reps, efforts, ...). The runtime crate never
//! consumes the tree directly; it consumes a [`Script`], the flattened
//! id-indexed arena built by [`Script::from_statements`]. Everything in this
//! crate is immutable during execution and `serde`-serializable, since the
//! same shapes travel to UI subscribers.

pub mod fragment;
pub mod script;
pub mod statement;
pub mod time;

pub use fragment::{Fragment, FragmentKind, FragmentValue, Origin};
pub use script::{Script, ScriptError, StatementNode};
pub use statement::{Statement, StatementId};
pub use time::{DurationMs, EpochMs, TimeSpan, TimerDirection};
