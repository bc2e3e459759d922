//! The session: owner of stack, clock, bus, processor, outputs, and UI state.
//!
//! All runtime mutation funnels through `&mut Session` methods on one logical
//! thread. External code talks to a session three ways: direct calls
//! ([`Session::handle`], [`Session::press`]), the event channel
//! ([`SessionRemote`]), and subscriptions (stack, outputs, UI, block memory).

use std::collections::VecDeque;

use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, trace, warn};
use wod_script::{DurationMs, Fragment, FragmentValue, Origin, Script, Statement};

use crate::action::{Action, Phase};
use crate::block::{Block, BlockKey, BlockKind, CompletionReason, HostEnv, KeySource};
use crate::bus::{EventBus, HandlerRegistration};
use crate::clock::{Clock, ClockHandle, SystemClock};
use crate::error::{InvariantViolation, RuntimeError};
use crate::event::{Event, EventKind};
use crate::jit;
use crate::memory::{MemoryHandle, MemoryTag, MemoryValue, Visibility};
use crate::output::{OutputId, OutputKind, OutputLog, OutputStatement};
use crate::processor::ActionProcessor;
use crate::snapshot::{BlockSummary, SnapshotKind, StackSnapshot};
use crate::subscriber::{FeedSubscription, SubscriberSet};
use crate::ui::{CardDisplay, TimerDisplay, UiState, WorkoutState};

/// Hard ceiling on pump cycles per entry point; hitting it is a livelock and
/// is reported as a `system` output.
const PUMP_CYCLE_LIMIT: usize = 1024;

/// Runtime tuning. No file or environment loading; construct and pass in.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Tick cadence while anything is running.
    pub tick_interval: DurationMs,
    /// Maximum action-processor passes per drain before declaring livelock.
    pub max_action_passes: usize,
    /// Minimum countdown remainder that still earns an injected rest.
    pub min_rest_ms: DurationMs,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            tick_interval: DurationMs(200),
            max_action_passes: 8,
            min_rest_ms: DurationMs::from_secs(5),
        }
    }
}

/// Clonable event injector: the only cross-task handle into a session.
#[derive(Clone, Debug)]
pub struct SessionRemote {
    sender: UnboundedSender<Event>,
}

impl SessionRemote {
    /// Enqueues an event; returns false once the session is gone.
    pub fn send(&self, event: Event) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Payload of a `memory:set` event: a user write into a block's display
/// overrides.
#[derive(Debug, Deserialize)]
struct MemorySetPayload {
    /// Target block; defaults to the top of the stack.
    block: Option<u64>,
    fragments: Vec<Fragment>,
}

/// The top-level executive.
pub struct Session {
    options: SessionOptions,
    clock: Box<dyn Clock>,
    script: Script,
    stack: Vec<Block>,
    bus: EventBus,
    processor: ActionProcessor,
    outputs: OutputLog,
    ui: UiState,
    keys: KeySource,
    dispatching: bool,
    draining: bool,
    pending_events: VecDeque<Event>,
    stack_subs: SubscriberSet<StackSnapshot>,
    output_subs: SubscriberSet<OutputStatement>,
    ui_subs: SubscriberSet<UiState>,
    event_tx: UnboundedSender<Event>,
    event_rx: UnboundedReceiver<Event>,
    ticker: Option<ClockHandle>,
    root_finished: bool,
    failure: Option<String>,
}

impl Session {
    /// A session on the production clock. Must run inside a tokio `LocalSet`
    /// for tick scheduling to work.
    pub fn new(options: SessionOptions) -> Session {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let clock = Box::new(SystemClock::new(event_tx.clone()));
        Session::build(clock, options, event_tx, event_rx)
    }

    /// A session on a caller-supplied clock (tests use `ManualClock`).
    pub fn with_clock(clock: Box<dyn Clock>, options: SessionOptions) -> Session {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Session::build(clock, options, event_tx, event_rx)
    }

    fn build(
        clock: Box<dyn Clock>,
        options: SessionOptions,
        event_tx: UnboundedSender<Event>,
        event_rx: UnboundedReceiver<Event>,
    ) -> Session {
        Session {
            options,
            clock,
            script: Script::default(),
            stack: Vec::new(),
            bus: EventBus::new(),
            processor: ActionProcessor::new(),
            outputs: OutputLog::default(),
            ui: UiState::default(),
            keys: KeySource::default(),
            dispatching: false,
            draining: false,
            pending_events: VecDeque::new(),
            stack_subs: SubscriberSet::default(),
            output_subs: SubscriberSet::default(),
            ui_subs: SubscriberSet::default(),
            event_tx,
            event_rx,
            ticker: None,
            root_finished: false,
            failure: None,
        }
    }

    // ---- public surface ----------------------------------------------------

    /// Compiles and starts executing a parsed script. The session idles on
    /// its gate until a `start` event arrives.
    #[tracing::instrument(level = "debug", skip_all, fields(statements = statements.len()))]
    pub fn execute(&mut self, statements: Vec<Statement>) -> Result<(), RuntimeError> {
        if !self.stack.is_empty() {
            self.dispose();
        }
        self.script = Script::from_statements(statements)?;
        self.root_finished = false;
        self.failure = None;
        self.publish_snapshot(SnapshotKind::Initial, None);

        let root = jit::compile_root(&self.script, self.keys.alloc(), &self.options);
        self.push_block(root).map_err(|error| {
            self.teardown(&error);
            error
        })?;
        self.drain();
        self.pump();
        self.after_work();
        Ok(())
    }

    /// Feeds one event through the bus and runs the machine to quiescence.
    #[tracing::instrument(level = "trace", skip(self), fields(kind = %event.kind))]
    pub fn handle(&mut self, event: Event) {
        match event.kind {
            EventKind::Skip => self.intercept_skip(&event),
            EventKind::MemorySet => self.intercept_memory_set(&event),
            EventKind::Reset => self.intercept_reset(),
            _ => self.publish(event),
        }
        self.drain();
        self.pump();
        self.after_work();
    }

    /// Presses a registered button: publishes its bound event.
    pub fn press(&mut self, button_id: &str) {
        let Some(button) = self.ui.button(button_id) else {
            debug!(button_id, "press on unknown button ignored");
            return;
        };
        let event = Event::new(button.event, self.clock.now());
        self.handle(event);
    }

    /// Drains events injected through [`SessionRemote`] handles (and the
    /// production clock), without blocking.
    pub fn poll_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle(event);
        }
    }

    /// Runs until the session completes: parks on the event channel, handling
    /// ticks and injected events as they arrive.
    pub async fn run_async(&mut self) {
        while !self.is_complete() {
            let Some(event) = self.event_rx.recv().await else {
                break;
            };
            self.handle(event);
            self.poll_events();
        }
    }

    /// A clonable event injector.
    pub fn remote(&self) -> SessionRemote {
        SessionRemote {
            sender: self.event_tx.clone(),
        }
    }

    /// Subscribes to stack snapshots.
    pub fn subscribe_stack(&self, listener: impl FnMut(&StackSnapshot) + 'static) -> FeedSubscription {
        self.stack_subs.subscribe(listener)
    }

    /// Subscribes to appended output statements.
    pub fn subscribe_output(
        &self,
        listener: impl FnMut(&OutputStatement) + 'static,
    ) -> FeedSubscription {
        self.output_subs.subscribe(listener)
    }

    /// Subscribes to UI-state changes.
    pub fn subscribe_ui(&self, listener: impl FnMut(&UiState) + 'static) -> FeedSubscription {
        self.ui_subs.subscribe(listener)
    }

    /// Appends an externally-produced output statement (id is reassigned).
    pub fn add_output(&mut self, statement: OutputStatement) -> OutputId {
        let id = self.outputs.append(statement).id;
        let stored = self.outputs.entries().last().expect("just appended").clone();
        self.output_subs.notify(&stored);
        id
    }

    /// The history so far.
    pub fn outputs(&self) -> &[OutputStatement] {
        self.outputs.entries()
    }

    /// The current UI state.
    pub fn ui(&self) -> &UiState {
        &self.ui
    }

    /// Bottom-up live blocks.
    pub fn blocks(&self) -> &[Block] {
        &self.stack
    }

    /// A live block by key.
    pub fn block(&self, key: BlockKey) -> Option<&Block> {
        self.stack.iter().find(|block| block.key() == key)
    }

    /// The top of the stack.
    pub fn top(&self) -> Option<&Block> {
        self.stack.last()
    }

    /// Current stack depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Memory visible to the block with `key`: its own slots plus every
    /// non-private slot of the blocks below it. Private never leaks.
    pub fn visible_memory(&self, key: BlockKey) -> Vec<MemoryHandle> {
        let Some(index) = self.stack.iter().position(|block| block.key() == key) else {
            return Vec::new();
        };
        let mut handles = Vec::new();
        for (i, block) in self.stack.iter().enumerate().take(index + 1) {
            for location in block.memory().locations() {
                if i == index || location.tag().visibility() != Visibility::Private {
                    handles.push(location.handle());
                }
            }
        }
        handles
    }

    /// True once the stack is empty and the root finished (or the session
    /// failed).
    pub fn is_complete(&self) -> bool {
        self.stack.is_empty() && (self.root_finished || self.failure.is_some())
    }

    /// The teardown reason, if an invariant violation killed the session.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Pops every block and drops pending work. Terminal.
    pub fn dispose(&mut self) {
        while !self.stack.is_empty() {
            if let Err(error) = self.pop_block(None) {
                error!(%error, "pop during dispose failed");
                break;
            }
        }
        self.processor.clear();
        self.pending_events.clear();
        self.ticker = None;
        self.root_finished = true;
    }

    // ---- event interception ------------------------------------------------

    fn intercept_skip(&mut self, event: &Event) {
        let Some(top_kind) = self.stack.last().map(Block::kind) else {
            return;
        };
        if top_kind == BlockKind::Idle {
            // Skipping the idle gate means "just go".
            self.publish(Event::new(EventKind::Start, event.timestamp));
        } else {
            self.stack
                .last_mut()
                .expect("checked non-empty")
                .force_complete(CompletionReason::UserSkipped);
            self.publish(event.clone());
        }
    }

    fn intercept_memory_set(&mut self, event: &Event) {
        let payload = event
            .data
            .clone()
            .and_then(|data| serde_json::from_value::<MemorySetPayload>(data).ok());
        let Some(payload) = payload else {
            self.system_output("memory:set with missing or malformed payload".to_string());
            return;
        };
        let target = payload
            .block
            .map(BlockKey)
            .or_else(|| self.stack.last().map(Block::key));
        let Some(target) = target else {
            return;
        };
        // External writes are user-origin by definition.
        let fragments: Vec<Fragment> = payload
            .fragments
            .into_iter()
            .map(|fragment| Fragment::new(fragment.value, Origin::User))
            .collect();
        let result = self
            .stack
            .iter_mut()
            .find(|block| block.key() == target)
            .map(|block| block.apply_user_display(fragments));
        match result {
            Some(Ok(())) => {}
            Some(Err(tag)) => {
                let error = RuntimeError::MemoryAccess {
                    tag: tag.to_string(),
                };
                self.system_output(error.to_string());
            }
            None => {
                self.system_output(format!("memory:set for unknown block {target}"));
            }
        }
    }

    fn intercept_reset(&mut self) {
        if !self.is_complete() || self.script.is_empty() {
            trace!("reset ignored: session still live or no script");
            return;
        }
        self.outputs.clear();
        self.ui = UiState::default();
        self.root_finished = false;
        self.failure = None;
        self.publish_snapshot(SnapshotKind::Initial, None);
        let root = jit::compile_root(&self.script, self.keys.alloc(), &self.options);
        if let Err(error) = self.push_block(root) {
            self.teardown(&error);
        }
    }

    // ---- event dispatch ----------------------------------------------------

    /// Publishes an event. Non-reentrant: a publish during dispatch queues the
    /// event behind the current batch.
    fn publish(&mut self, event: Event) {
        if self.dispatching {
            self.pending_events.push_back(event);
            return;
        }
        self.dispatching = true;
        let mut current = Some(event);
        while let Some(event) = current {
            self.dispatch_one(&event);
            current = self.pending_events.pop_front();
        }
        self.dispatching = false;
    }

    fn dispatch_one(&mut self, event: &Event) {
        let stack_keys: Vec<BlockKey> = self.stack.iter().map(Block::key).collect();
        let matches = self.bus.matching(event.kind, &stack_keys);
        trace!(kind = %event.kind, handlers = matches.len(), "dispatching event");

        for matched in matches {
            let Some(index) = self
                .stack
                .iter()
                .position(|block| block.key() == matched.owner)
            else {
                continue;
            };
            let depth = self.stack.len();
            let mut requests = Vec::new();
            let mut env = HostEnv {
                clock: &*self.clock,
                stack_index: index,
                stack_depth: depth,
                keys: &mut self.keys,
                handler_requests: &mut requests,
            };
            let response = self.stack[index].deliver(matched.behavior_index, event, &mut env);
            self.register_requests(requests);

            let Some(response) = response else {
                continue;
            };
            self.processor.queue_many(response.actions);
            if !response.should_continue {
                trace!(kind = %event.kind, owner = %matched.owner, "handler consumed event");
                break;
            }
        }
    }

    fn register_requests(&mut self, requests: Vec<crate::block::HandlerRequest>) {
        for request in requests {
            self.bus.register(HandlerRegistration {
                kind: request.kind,
                owner: request.owner,
                behavior_index: request.behavior_index,
                scope: request.scope,
            });
        }
    }

    // ---- action draining ---------------------------------------------------

    /// Drains all phases to quiescence, bounded by the pass limit.
    fn drain(&mut self) -> bool {
        if self.draining {
            return false;
        }
        self.draining = true;
        let mut any_work = false;
        let mut pass = 0;
        while self.processor.has_pending() {
            pass += 1;
            if pass > self.options.max_action_passes {
                warn!(
                    passes = pass - 1,
                    pending = self.processor.pending(),
                    "action processor exceeded pass limit; dropping remainder"
                );
                self.system_output(format!(
                    "action livelock after {} passes; {} actions dropped",
                    pass - 1,
                    self.processor.pending()
                ));
                self.processor.clear();
                break;
            }
            for phase in Phase::ALL {
                self.processor.begin_phase(phase);
                while let Some(action) = self.processor.pop_current() {
                    any_work = true;
                    let name = action.name();
                    if let Err(error) = self.apply_action(action) {
                        if error.is_fatal() {
                            self.processor.end_phase();
                            self.draining = false;
                            self.teardown(&error);
                            return any_work;
                        }
                        warn!(action = name, %error, "action failed; continuing");
                        self.system_output(format!("{name}: {error}"));
                    }
                }
                self.processor.end_phase();
            }
        }
        self.draining = false;
        any_work
    }

    fn apply_action(&mut self, action: Action) -> Result<(), RuntimeError> {
        trace!(action = action.name(), phase = %action.phase(), "applying action");
        match action {
            Action::UpdateNextPreview { fragments } => self.ui.set_next_preview(fragments),
            Action::PushTimerDisplay { source, label, role } => {
                self.ui.push_timer(TimerDisplay { source, label, role });
            }
            Action::PopTimerDisplay { source } => self.ui.pop_timer(source),
            Action::PushCardDisplay { source, fragments } => {
                self.ui.push_card(CardDisplay { source, fragments });
            }
            Action::PopCardDisplay { source } => self.ui.pop_card(source),
            Action::UpdateDisplayMode { mode } => self.ui.set_display_mode(mode),

            Action::SetMemory { block, tag, value } => {
                let found = self
                    .stack
                    .iter_mut()
                    .find(|candidate| candidate.key() == block);
                match found {
                    Some(target) => {
                        target.write_memory(tag, value).map_err(|tag| {
                            RuntimeError::MemoryAccess {
                                tag: tag.to_string(),
                            }
                        })?;
                        self.publish(Event::with_data(
                            EventKind::MemorySet,
                            self.clock.now(),
                            serde_json::json!({ "block": block.0 }),
                        ));
                    }
                    None => {
                        return Err(RuntimeError::ActionFailure {
                            action: "set-memory",
                            reason: format!("no live block {block}"),
                        });
                    }
                }
            }

            Action::SetWorkoutState { state } => self.ui.set_workout_state(state),
            Action::RegisterButton { button } => self.ui.register_button(button),
            Action::ClearButtons { source } => self.ui.clear_buttons(source),
            Action::PushActionPanel { panel } => self.ui.push_panel(panel),
            Action::PopActionPanel { source } => self.ui.pop_panel(source),
            Action::UpdateActionPanel { panel } => self.ui.update_panel(panel),

            Action::StartAllSpans => {
                let now = self.clock.now();
                for block in &mut self.stack {
                    block.start_spans(now);
                }
            }
            Action::StopAllSpans => {
                let now = self.clock.now();
                for block in &mut self.stack {
                    block.stop_spans(now);
                }
            }
            Action::EmitOutput {
                kind,
                source,
                stack_level,
                span,
                fragments,
            } => {
                self.emit_output(kind, Some(source), stack_level, span, fragments);
            }

            Action::Publish { event } => self.publish(event),

            Action::PushBlock { block } => self.push_block(block)?,
            Action::PopBlock { key } => self.pop_block(key)?,
            Action::CompileChild { parent, statements } => {
                let inherited = self.inherited_fragments();
                let key = self.keys.alloc();
                let block =
                    jit::compile_statements(&self.script, &statements, &inherited, key, &self.options)?;
                debug!(parent = %parent, child = %block.key(), kind = %block.kind(), "compiled child block");
                self.push_block(block)?;
            }
            Action::PushRestBlock {
                parent,
                duration_ms,
                label,
            } => {
                let key = self.keys.alloc();
                debug!(parent = %parent, rest = %key, %duration_ms, "pushing rest block");
                self.push_block(jit::rest_block(key, duration_ms, label))?;
            }
        }
        Ok(())
    }

    /// Promote-tier fragments visible from the current stack, for child
    /// compilation.
    fn inherited_fragments(&self) -> Vec<Fragment> {
        self.stack
            .iter()
            .flat_map(|block| block.memory().all_by_visibility(Visibility::Promote))
            .filter_map(|location| location.value())
            .filter_map(|value| match value {
                MemoryValue::Fragments(fragments) => Some(fragments),
                _ => None,
            })
            .flatten()
            .collect()
    }

    // ---- stack mutation ----------------------------------------------------

    fn push_block(&mut self, block: Block) -> Result<(), RuntimeError> {
        let key = block.key();
        if self.stack.iter().any(|existing| existing.key() == key) {
            return Err(InvariantViolation::DuplicateBlockKey(key).into());
        }
        debug!(block = %key, kind = %block.kind(), depth = self.stack.len() + 1, "push");
        self.stack.push(block);

        let index = self.stack.len() - 1;
        let depth = self.stack.len();
        let mut requests = Vec::new();
        let mut env = HostEnv {
            clock: &*self.clock,
            stack_index: index,
            stack_depth: depth,
            keys: &mut self.keys,
            handler_requests: &mut requests,
        };
        let actions = self.stack[index].mount(&mut env)?;

        // Snapshot first: subscribers see the new block before any of its
        // actions take effect.
        let summary = self.stack[index].summary();
        self.publish_snapshot(SnapshotKind::Push, Some(summary));
        self.processor.queue_many(actions);
        self.register_requests(requests);

        self.publish(Event::with_data(
            EventKind::StackPush,
            self.clock.now(),
            serde_json::json!({ "block": key.0 }),
        ));
        self.publish(Event::with_data(
            EventKind::MemoryAllocate,
            self.clock.now(),
            serde_json::json!({ "block": key.0 }),
        ));
        Ok(())
    }

    fn pop_block(&mut self, expected: Option<BlockKey>) -> Result<(), RuntimeError> {
        let Some(top) = self.stack.last() else {
            return Err(InvariantViolation::EmptyStackPop.into());
        };
        let key = top.key();
        if let Some(expected) = expected {
            if expected != key {
                // Stale pop (e.g. queued twice for an already-gone block).
                warn!(expected = %expected, top = %key, "stale pop ignored");
                return Ok(());
            }
        }
        debug!(block = %key, depth = self.stack.len(), "pop");

        let index = self.stack.len() - 1;
        let depth = self.stack.len();
        let mut requests = Vec::new();
        let mut env = HostEnv {
            clock: &*self.clock,
            stack_index: index,
            stack_depth: depth,
            keys: &mut self.keys,
            handler_requests: &mut requests,
        };
        let actions = self.stack[index].unmount(&mut env)?;
        drop(requests);
        self.processor.queue_many(actions);
        self.bus.unregister_owner(key);

        let mut block = self.stack.pop().expect("checked non-empty");
        self.publish_snapshot(SnapshotKind::Pop, Some(block.summary()));

        let mut requests = Vec::new();
        let mut env = HostEnv {
            clock: &*self.clock,
            stack_index: index,
            stack_depth: self.stack.len(),
            keys: &mut self.keys,
            handler_requests: &mut requests,
        };
        block.dispose(&mut env)?;

        self.publish(Event::with_data(
            EventKind::StackPop,
            self.clock.now(),
            serde_json::json!({ "block": key.0 }),
        ));
        self.publish(Event::with_data(
            EventKind::MemoryRelease,
            self.clock.now(),
            serde_json::json!({ "block": key.0 }),
        ));

        if self.stack.is_empty() {
            self.root_finished = block.is_complete();
        }
        Ok(())
    }

    // ---- the pump ----------------------------------------------------------

    /// Cycles the top block's `next` while it makes progress. A complete
    /// ancestor force-completes everything above it so the normal auto-pop
    /// path unwinds the stack.
    fn pump(&mut self) {
        for cycle in 0.. {
            if cycle >= PUMP_CYCLE_LIMIT {
                error!("pump cycle limit hit; stopping");
                self.system_output(format!("pump livelock after {PUMP_CYCLE_LIMIT} cycles"));
                break;
            }
            if self.stack.is_empty() {
                break;
            }
            let top_index = self.stack.len() - 1;
            if self.stack[..top_index].iter().any(Block::is_complete)
                && !self.stack[top_index].is_complete()
            {
                debug!(top = %self.stack[top_index].key(), "ancestor complete; force-completing top");
                self.stack[top_index].force_complete(CompletionReason::ParentCompleted);
            }

            let depth = self.stack.len();
            let mut requests = Vec::new();
            let mut env = HostEnv {
                clock: &*self.clock,
                stack_index: top_index,
                stack_depth: depth,
                keys: &mut self.keys,
                handler_requests: &mut requests,
            };
            let outcome = match self.stack[top_index].next(&mut env) {
                Ok(outcome) => outcome,
                Err(violation) => {
                    self.teardown(&violation.into());
                    return;
                }
            };
            self.register_requests(requests);

            if outcome.actions.is_empty() && !outcome.progressed {
                break;
            }
            self.processor.queue_many(outcome.actions);
            self.drain();
        }
    }

    // ---- outputs, snapshots, teardown --------------------------------------

    fn emit_output(
        &mut self,
        kind: OutputKind,
        source_block: Option<BlockKey>,
        stack_level: usize,
        span: Option<wod_script::TimeSpan>,
        fragments: Vec<Vec<Fragment>>,
    ) {
        let stored = self
            .outputs
            .append(OutputStatement {
                id: OutputId(0),
                kind,
                source_block,
                stack_level,
                span,
                fragments,
            })
            .clone();
        self.output_subs.notify(&stored);
    }

    fn system_output(&mut self, message: String) {
        let level = self.stack.len();
        self.emit_output(
            OutputKind::System,
            None,
            level,
            None,
            vec![vec![Fragment::runtime(FragmentValue::Text(message))]],
        );
    }

    fn publish_snapshot(&mut self, kind: SnapshotKind, affected: Option<BlockSummary>) {
        let snapshot = StackSnapshot::capture(kind, &self.stack, affected, self.clock.now());
        trace!(kind = ?snapshot.kind, depth = snapshot.depth, "publishing snapshot");
        self.stack_subs.notify(&snapshot);
    }

    /// Fatal path: record the cause, unwind every block, clear the stack.
    fn teardown(&mut self, error: &RuntimeError) {
        error!(%error, "invariant violation; tearing down session");
        self.system_output(format!("session teardown: {error}"));
        self.processor.clear();
        self.pending_events.clear();

        while let Some(mut block) = self.stack.pop() {
            let index = self.stack.len();
            let mut requests = Vec::new();
            let mut env = HostEnv {
                clock: &*self.clock,
                stack_index: index,
                stack_depth: self.stack.len() + 1,
                keys: &mut self.keys,
                handler_requests: &mut requests,
            };
            block.force_complete(CompletionReason::Failed);
            if block.unmount(&mut env).is_ok() {
                let _ = block.dispose(&mut env);
            }
            self.bus.unregister_owner(block.key());
            // Unmount/dispose actions are part of what we are abandoning.
            self.processor.clear();
        }
        self.publish_snapshot(SnapshotKind::Clear, None);
        self.publish(Event::new(EventKind::StackClear, self.clock.now()));
        self.ui.set_workout_state(WorkoutState::Done);
        self.failure = Some(error.to_string());
        self.ticker = None;
    }

    /// Post-work housekeeping: tick cadence and UI publication.
    fn after_work(&mut self) {
        let running = self.stack.iter().any(Block::has_running_timer);
        match (&self.ticker, running) {
            (None, true) => {
                trace!("starting tick cadence");
                self.ticker = Some(self.clock.every(self.options.tick_interval));
            }
            (Some(_), false) => {
                trace!("stopping tick cadence");
                self.ticker = None;
            }
            _ => {}
        }
        if self.ui.take_dirty() {
            let ui = self.ui.clone();
            self.ui_subs.notify(&ui);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.ticker = None;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::clock::ManualClock;

    fn session() -> (Session, ManualClock) {
        let clock = ManualClock::new();
        let session = Session::with_clock(Box::new(clock.clone()), SessionOptions::default());
        (session, clock)
    }

    fn gate(session: &mut Session) -> BlockKey {
        let key = session.keys.alloc();
        session.push_block(jit::idle_gate_block(key)).unwrap();
        key
    }

    #[test]
    fn phases_drain_in_declared_order() {
        assert_eq!(
            Phase::ALL,
            [
                Phase::Display,
                Phase::Memory,
                Phase::SideEffect,
                Phase::Event,
                Phase::Stack
            ]
        );
        let mut sorted = vec![Phase::Stack, Phase::Display, Phase::Event, Phase::Memory];
        sorted.sort();
        assert_eq!(
            sorted,
            vec![Phase::Display, Phase::Memory, Phase::Event, Phase::Stack]
        );
    }

    #[test]
    fn effects_observe_phase_order() {
        let (mut session, _clock) = session();
        let first = gate(&mut session);

        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&log);
        let _mem_sub = session
            .block(first)
            .unwrap()
            .memory()
            .first(&MemoryTag::FragmentDisplay)
            .unwrap()
            .handle()
            .subscribe(move |new, _| {
                if new.is_some() {
                    l.borrow_mut().push("memory");
                }
            })
            .unwrap();
        let l = Rc::clone(&log);
        let _out_sub = session.subscribe_output(move |_| l.borrow_mut().push("side_effect"));
        let l = Rc::clone(&log);
        let _stack_sub = session.subscribe_stack(move |_| l.borrow_mut().push("stack"));

        // Scrambled queue order; phase order must win.
        let second_key = session.keys.alloc();
        session.processor.queue_many([
            Action::PushBlock {
                block: jit::idle_gate_block(second_key),
            },
            Action::EmitOutput {
                kind: OutputKind::Metric,
                source: first,
                stack_level: 0,
                span: None,
                fragments: vec![],
            },
            Action::SetMemory {
                block: first,
                tag: MemoryTag::FragmentDisplay,
                value: MemoryValue::Fragments(vec![Fragment::user(FragmentValue::Rep(5))]),
            },
        ]);
        session.drain();

        assert_eq!(*log.borrow(), vec!["memory", "side_effect", "stack"]);
    }

    #[test]
    fn duplicate_key_push_tears_the_session_down() {
        let (mut session, _clock) = session();
        let key = gate(&mut session);

        session.processor.queue(Action::PushBlock {
            block: jit::idle_gate_block(key),
        });
        session.drain();

        assert!(session.failure().is_some());
        assert_eq!(session.depth(), 0);
        assert!(session.is_complete());
        assert!(session
            .outputs()
            .iter()
            .any(|output| output.kind == OutputKind::System));
    }

    #[test]
    fn pop_on_empty_stack_is_fatal() {
        let (mut session, _clock) = session();
        session.processor.queue(Action::PopBlock { key: None });
        session.drain();
        assert!(session.failure().is_some());
    }

    #[test]
    fn snapshots_track_depth_through_random_push_pop() {
        let (mut session, _clock) = session();
        let snapshots: Rc<RefCell<Vec<(SnapshotKind, usize, usize)>>> =
            Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&snapshots);
        let _sub = session.subscribe_stack(move |snapshot| {
            s.borrow_mut()
                .push((snapshot.kind, snapshot.depth, snapshot.blocks.len()));
        });

        let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
        let mut expected_depth = 0_usize;
        for _ in 0..200 {
            if expected_depth == 0 || rng.gen_bool(0.6) {
                gate(&mut session);
                expected_depth += 1;
            } else {
                session.pop_block(None).unwrap();
                expected_depth -= 1;
            }
            assert_eq!(session.depth(), expected_depth);
        }

        for (_, depth, blocks) in snapshots.borrow().iter() {
            assert_eq!(depth, blocks);
        }
    }

    #[test]
    fn push_snapshot_names_the_new_top() {
        let (mut session, _clock) = session();
        let affected: Rc<RefCell<Vec<(SnapshotKind, Option<BlockKey>, Option<BlockKey>)>>> =
            Rc::new(RefCell::new(Vec::new()));
        let a = Rc::clone(&affected);
        let _sub = session.subscribe_stack(move |snapshot| {
            a.borrow_mut().push((
                snapshot.kind,
                snapshot.affected.as_ref().map(|block| block.key),
                snapshot.blocks.last().map(|block| block.key),
            ));
        });

        let key = gate(&mut session);
        let (kind, affected_key, top_key) = affected.borrow()[0];
        assert_eq!(kind, SnapshotKind::Push);
        assert_eq!(affected_key, Some(key));
        assert_eq!(top_key, Some(key));
    }

    #[test]
    fn visible_memory_hides_private_ancestor_slots() {
        let (mut session, _clock) = session();
        let bottom = session.keys.alloc();
        session
            .push_block(jit::rest_block(bottom, DurationMs::from_secs(60), "Rest".into()))
            .unwrap();
        session.drain();
        let top = session.keys.alloc();
        session
            .push_block(jit::rest_block(top, DurationMs::from_secs(30), "Rest".into()))
            .unwrap();
        session.drain();

        // The bottom block sees only its own slots.
        let bottom_visible = session.visible_memory(bottom);
        let bottom_own = session.block(bottom).unwrap().memory().len();
        assert_eq!(bottom_visible.len(), bottom_own);

        // The top block sees its own slots plus the bottom's public ones;
        // the bottom's `timer` slot stays hidden.
        let top_visible = session.visible_memory(top);
        let top_own = session.block(top).unwrap().memory().len();
        let bottom_public = session
            .block(bottom)
            .unwrap()
            .memory()
            .locations()
            .iter()
            .filter(|location| location.tag().visibility() != Visibility::Private)
            .count();
        assert_eq!(top_visible.len(), top_own + bottom_public);
        assert!(top_visible
            .iter()
            .filter(|handle| *handle.tag() == MemoryTag::Timer)
            .count()
            .eq(&1));
    }

    #[test]
    fn user_memory_set_overrides_display() {
        let (mut session, clock) = session();
        let key = gate(&mut session);

        session.handle(Event::with_data(
            EventKind::MemorySet,
            clock.now(),
            serde_json::json!({
                "block": key.0,
                "fragments": [
                    { "value": { "label": "My title" }, "origin": "parser" }
                ]
            }),
        ));

        let view = session.block(key).unwrap().display_view();
        let label = view.get_fragment(wod_script::FragmentKind::Label).unwrap();
        // Origin is forced to user regardless of what the payload claimed.
        assert_eq!(label.origin, Origin::User);
    }
}
