//! The behavior library: the concrete capabilities the block factory
//! composes into blocks.
//!
//! Composition order matters and is owned by the factory: the selection
//! behavior must run before round advancement (which consumes the pass-end
//! flag it sets), and the rest behavior before the selection (which reads the
//! rest flags it writes).

pub mod buttons;
pub mod children;
pub mod completion;
pub mod history;
pub mod label;
pub mod report;
pub mod rest;
pub mod rounds;
pub mod timer;
pub mod waiting;

pub use buttons::{ButtonBehavior, ButtonSpec};
pub use children::{ChildGroup, ChildSelectionBehavior, ChildSelectionConfig, LoopCondition};
pub use completion::{ChildrenCompletionBehavior, CompletionBehavior};
pub use history::HistoryRecordBehavior;
pub use label::LabelingBehavior;
pub use report::ReportOutputBehavior;
pub use rest::RestBlockBehavior;
pub use rounds::{RoundAdvanceBehavior, RoundCompletionBehavior, RoundInitBehavior};
pub use timer::{TimerBehavior, TimerConfig};
pub use waiting::{IdleGateBehavior, WaitingToStartInjectorBehavior};
