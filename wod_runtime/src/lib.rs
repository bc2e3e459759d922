#![warn(missing_docs)]

//! A block-stack interpreter runtime for structured workout scripts.
//!
//! The primary item in this crate is the [`Session`](session::Session): it
//! owns the runtime stack, clock, event bus, action processor, and output
//! log. A parsed [`wod_script`] statement tree goes in; a stream of stack
//! snapshots, UI state, and append-only history comes out.
//!
//! ```no_run
//! use wod_runtime::clock::ManualClock;
//! use wod_runtime::event::{Event, EventKind};
//! use wod_runtime::session::{Session, SessionOptions};
//! use wod_script::{DurationMs, Fragment, FragmentValue, Statement, StatementId, TimerDirection};
//!
//! let clock = ManualClock::new();
//! let mut session = Session::with_clock(Box::new(clock.clone()), SessionOptions::default());
//! session
//!     .execute(vec![Statement::leaf(
//!         StatementId(1),
//!         vec![Fragment::parser(FragmentValue::Timer {
//!             duration_ms: Some(DurationMs::from_secs(60)),
//!             direction: TimerDirection::Down,
//!         })],
//!     )])
//!     .unwrap();
//! session.handle(Event::new(EventKind::Start, clock.now()));
//! ```

pub mod action;
pub mod behaviors;
pub mod block;
pub mod bus;
pub mod clock;
pub mod error;
pub mod event;
pub mod jit;
pub mod memory;
pub mod output;
pub mod processor;
pub mod session;
pub mod snapshot;
mod subscriber;
pub mod ui;

pub use action::{Action, Phase};
pub use block::{Behavior, BehaviorContext, Block, BlockKey, BlockKind, CompletionReason};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{InvariantViolation, RuntimeError};
pub use event::{Event, EventKind, HandlerResponse, HandlerScope};
pub use memory::{MemoryTag, MemoryValue, Visibility};
pub use output::{OutputKind, OutputStatement};
pub use session::{Session, SessionOptions, SessionRemote};
pub use snapshot::{SnapshotKind, StackSnapshot};
pub use subscriber::FeedSubscription;
pub use wod_script;
