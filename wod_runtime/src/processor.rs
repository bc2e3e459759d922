//! Phase-ordered action queues.
//!
//! The processor only holds and orders actions; executing them requires the
//! session, so the session drains it phase by phase via
//! [`ActionProcessor::begin_phase`] / [`ActionProcessor::pop_current`].
//! Actions enqueued *while* a phase drains land behind a watermark: an action
//! for the currently-draining or an earlier phase waits for the next pass.

use std::collections::VecDeque;

use crate::action::{Action, Phase};

/// Queues actions under their phase and drains them in strict phase order.
#[derive(Debug, Default)]
pub struct ActionProcessor {
    queues: [VecDeque<Action>; Phase::ALL.len()],
    current: Option<Phase>,
    /// How many actions of the current phase belong to this pass.
    watermark: usize,
}

impl ActionProcessor {
    /// New, empty processor.
    pub fn new() -> ActionProcessor {
        ActionProcessor::default()
    }

    /// Enqueues one action under its phase.
    pub fn queue(&mut self, action: Action) {
        self.queues[action.phase() as usize].push_back(action);
    }

    /// Enqueues a batch, preserving order within each phase.
    pub fn queue_many(&mut self, actions: impl IntoIterator<Item = Action>) {
        for action in actions {
            self.queue(action);
        }
    }

    /// The phase currently draining, if any.
    pub fn current_phase(&self) -> Option<Phase> {
        self.current
    }

    /// True when any phase holds a pending action.
    pub fn has_pending(&self) -> bool {
        self.queues.iter().any(|queue| !queue.is_empty())
    }

    /// Pending count across all phases.
    pub fn pending(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// Marks `phase` as draining and snapshots its current length; only that
    /// many actions are handed out this pass.
    pub(crate) fn begin_phase(&mut self, phase: Phase) {
        self.current = Some(phase);
        self.watermark = self.queues[phase as usize].len();
    }

    /// Pops the next action of the current phase belonging to this pass.
    pub(crate) fn pop_current(&mut self) -> Option<Action> {
        let phase = self.current?;
        if self.watermark == 0 {
            return None;
        }
        self.watermark -= 1;
        self.queues[phase as usize].pop_front()
    }

    /// Ends the current phase.
    pub(crate) fn end_phase(&mut self) {
        self.current = None;
        self.watermark = 0;
    }

    /// Drops everything pending. Teardown only.
    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.current = None;
        self.watermark = 0;
    }
}
