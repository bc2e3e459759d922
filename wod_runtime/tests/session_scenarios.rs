//! End-to-end scenarios driven through the public session API on a manual
//! clock.

use std::cell::RefCell;
use std::rc::Rc;

use wod_runtime::clock::ManualClock;
use wod_runtime::event::{Event, EventKind};
use wod_runtime::memory::{MemoryTag, MemoryValue, MemoryView, TimerState};
use wod_runtime::output::OutputKind;
use wod_runtime::session::{Session, SessionOptions};
use wod_runtime::snapshot::SnapshotKind;
use wod_runtime::{BlockKind, ui::WorkoutState};
use wod_script::{
    DurationMs, EpochMs, Fragment, FragmentKind, FragmentValue, Statement, StatementId, TimeSpan,
    TimerDirection,
};

fn new_session() -> (Session, ManualClock) {
    // `RUST_LOG=wod_runtime=trace cargo test` shows the scheduler decisions.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let clock = ManualClock::new();
    let session = Session::with_clock(Box::new(clock.clone()), SessionOptions::default());
    (session, clock)
}

fn timer_statement(id: u64, duration: Option<DurationMs>, direction: TimerDirection) -> Statement {
    Statement::leaf(
        StatementId(id),
        vec![Fragment::parser(FragmentValue::Timer {
            duration_ms: duration,
            direction,
        })],
    )
}

fn effort(id: u64, name: &str) -> Statement {
    Statement::leaf(
        StatementId(id),
        vec![Fragment::parser(FragmentValue::Effort(name.into()))],
    )
}

fn start(session: &mut Session, clock: &ManualClock) {
    session.handle(Event::new(EventKind::Start, clock.now()));
}

fn tick_after(session: &mut Session, clock: &ManualClock, advance: DurationMs) {
    clock.advance(advance);
    session.handle(clock.tick_event());
}

fn top_timer(session: &Session) -> TimerState {
    session
        .top()
        .expect("stack not empty")
        .view::<TimerState>(&MemoryTag::Timer)
        .expect("top block has timer memory")
        .value()
        .expect("timer memory is live")
}

/// S1: a single 60-second countdown runs to completion and leaves a segment
/// plus a completion entry carrying the exact spans.
#[test]
fn pure_timer_runs_to_completion() {
    let (mut session, clock) = new_session();
    session
        .execute(vec![timer_statement(
            1,
            Some(DurationMs::from_secs(60)),
            TimerDirection::Down,
        )])
        .unwrap();

    // Idle gate on top until start.
    assert_eq!(session.depth(), 2);
    assert_eq!(session.ui().workout_state, WorkoutState::Idle);
    assert_eq!(session.top().unwrap().kind(), BlockKind::Idle);

    start(&mut session, &clock);
    assert_eq!(session.ui().workout_state, WorkoutState::Running);
    assert_eq!(session.top().unwrap().kind(), BlockKind::Timer);
    assert!(top_timer(&session).is_running());

    // Coarse ticks to (and past) expiry.
    tick_after(&mut session, &clock, DurationMs::from_secs(30));
    assert!(!session.is_complete());
    tick_after(&mut session, &clock, DurationMs::from_secs(30));

    assert!(session.is_complete());
    assert_eq!(session.depth(), 0);

    let segments: Vec<_> = session
        .outputs()
        .iter()
        .filter(|output| output.kind == OutputKind::Segment)
        .collect();
    assert_eq!(segments.len(), 1);
    assert!(segments[0].fragments[0]
        .iter()
        .any(|fragment| fragment.kind() == FragmentKind::Timer));

    let completion = session
        .outputs()
        .iter()
        .find(|output| output.kind == OutputKind::Completion)
        .expect("timer completion output");
    let result = &completion.fragments[0];
    assert!(result.contains(&Fragment::runtime(FragmentValue::Elapsed(DurationMs::from_secs(60)))));
    assert!(result.contains(&Fragment::runtime(FragmentValue::Total(DurationMs::from_secs(60)))));
    assert!(result.contains(&Fragment::runtime(FragmentValue::Spans(vec![
        TimeSpan::closed(EpochMs(0), EpochMs(60_000))
    ]))));
}

/// S2: a 21-15-9 rep scheme survives display resolution on the compiled
/// effort block, alongside the effort fragment.
#[test]
fn rep_scheme_resolves_with_all_parser_reps() {
    let (mut session, clock) = new_session();
    let thrusters = Statement::leaf(
        StatementId(2),
        vec![
            Fragment::parser(FragmentValue::Rep(21)).with_image("21"),
            Fragment::parser(FragmentValue::Rep(15)).with_image("15"),
            Fragment::parser(FragmentValue::Rep(9)).with_image("9"),
            Fragment::parser(FragmentValue::Effort("Thrusters".into())),
        ],
    );
    session
        .execute(vec![Statement::with_children(
            StatementId(1),
            vec![Fragment::parser(FragmentValue::Rounds(3))],
            vec![thrusters],
        )])
        .unwrap();
    start(&mut session, &clock);

    let top = session.top().unwrap();
    assert_eq!(top.kind(), BlockKind::Effort);

    let view = top.display_view();
    let reps = view.all_by_kind(FragmentKind::Rep);
    assert_eq!(reps.len(), 3);
    assert_eq!(
        reps.iter()
            .map(|fragment| match fragment.value {
                FragmentValue::Rep(n) => n,
                _ => unreachable!(),
            })
            .collect::<Vec<_>>(),
        vec![21, 15, 9]
    );
    assert!(view.has(FragmentKind::Effort));
}

/// S3: an AMRAP injects a rest block sized to the remaining countdown, loops
/// after the rest, and completes when the countdown expires.
#[test]
fn amrap_with_rest_insertion() {
    let (mut session, clock) = new_session();
    session
        .execute(vec![Statement::with_children(
            StatementId(1),
            vec![Fragment::parser(FragmentValue::Timer {
                duration_ms: Some(DurationMs::from_secs(600)),
                direction: TimerDirection::Down,
            })],
            vec![effort(2, "Row")],
        )])
        .unwrap();
    start(&mut session, &clock);

    // First pass in flight.
    assert_eq!(session.top().unwrap().kind(), BlockKind::Effort);

    // 30 seconds in, the athlete finishes the pass.
    tick_after(&mut session, &clock, DurationMs::from_secs(30));
    session.handle(Event::new(EventKind::Complete, clock.now()));

    // A rest countdown sized to the remaining 570 s lands on top.
    assert_eq!(session.top().unwrap().kind(), BlockKind::Rest);
    let rest_timer = top_timer(&session);
    assert_eq!(rest_timer.duration_ms, Some(DurationMs::from_secs(570)));

    // Athlete cuts the rest short; the loop continues with round 2.
    session.handle(Event::new(EventKind::Complete, clock.now()));
    assert_eq!(session.top().unwrap().kind(), BlockKind::Effort);
    let amrap = &session.blocks()[1];
    assert_eq!(amrap.kind(), BlockKind::Timer);
    match amrap.memory().first(&MemoryTag::Round).unwrap().value() {
        Some(MemoryValue::Round(round)) => {
            assert_eq!(round.current, 2);
            assert_eq!(round.total, None);
        }
        other => panic!("unexpected round memory: {other:?}"),
    }

    // Countdown hits zero mid-pass: everything unwinds.
    tick_after(&mut session, &clock, DurationMs::from_secs(570));
    assert!(session.is_complete());
}

/// S4: pause/resume/stop bookkeeping produces the exact span list, and the
/// block-scoped handlers reach the root timer below the top block.
#[test]
fn pause_resume_records_spans() {
    let (mut session, clock) = new_session();
    session
        .execute(vec![timer_statement(1, None, TimerDirection::Up)])
        .unwrap();
    start(&mut session, &clock);

    clock.advance(DurationMs::from_secs(10));
    session.handle(Event::new(EventKind::Pause, clock.now()));
    clock.advance(DurationMs::from_secs(5));
    session.handle(Event::new(EventKind::Resume, clock.now()));
    clock.advance(DurationMs::from_secs(10));
    session.handle(Event::new(EventKind::Stop, clock.now()));

    let timer = top_timer(&session);
    assert_eq!(
        timer.spans,
        vec![
            TimeSpan::closed(EpochMs(0), EpochMs(10_000)),
            TimeSpan::closed(EpochMs(15_000), EpochMs(25_000)),
        ]
    );
    assert_eq!(timer.elapsed(clock.now()), DurationMs::from_secs(20));
    assert!(!timer.is_running());

    // Block scope: the root stopwatch below the top block tracked the same
    // pauses.
    let root_timer = match session.blocks()[0]
        .memory()
        .first(&MemoryTag::Timer)
        .unwrap()
        .value()
    {
        Some(MemoryValue::Timer(timer)) => timer,
        other => panic!("unexpected root timer memory: {other:?}"),
    };
    assert_eq!(root_timer.spans.len(), 2);
    assert!(!root_timer.is_running());
}

/// S5: active-scope handlers fire only for the top block; block-scope
/// handlers fire from anywhere on the stack.
#[test]
fn handler_scopes_route_advancement() {
    let (mut session, clock) = new_session();
    session
        .execute(vec![Statement::with_children(
            StatementId(1),
            vec![Fragment::parser(FragmentValue::Rounds(1))],
            vec![effort(2, "Pull-ups"), effort(3, "Push-ups")],
        )])
        .unwrap();
    start(&mut session, &clock);

    // Pull-ups on top; the rounds container and root sit below with their own
    // handlers.
    let first_top = session.top().unwrap().key();
    session.handle(Event::new(EventKind::Complete, clock.now()));

    // Only the top (active scope) consumed the advance: push-ups replace
    // pull-ups, the containers below are untouched.
    let second_top = session.top().unwrap().key();
    assert_ne!(first_top, second_top);
    assert_eq!(session.top().unwrap().kind(), BlockKind::Effort);
    assert_eq!(session.blocks()[1].kind(), BlockKind::Rounds);
    assert!(!session.blocks()[1].is_complete());

    session.handle(Event::new(EventKind::Complete, clock.now()));
    // Single round: the pass ends, the container and session finish.
    assert!(session.is_complete());
}

/// S6: snapshot stream ordering across a full push/pop cycle.
#[test]
fn snapshot_ordering_across_structural_changes() {
    let (mut session, clock) = new_session();
    let seen: Rc<RefCell<Vec<(SnapshotKind, usize)>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&seen);
    let _sub = session.subscribe_stack(move |snapshot| {
        assert_eq!(snapshot.depth, snapshot.blocks.len());
        if snapshot.kind == SnapshotKind::Push {
            assert_eq!(snapshot.blocks.last(), snapshot.affected.as_ref());
        }
        log.borrow_mut().push((snapshot.kind, snapshot.depth));
    });

    session.execute(vec![effort(1, "Burpees")]).unwrap();
    start(&mut session, &clock);
    session.handle(Event::new(EventKind::Complete, clock.now()));

    assert_eq!(
        *seen.borrow(),
        vec![
            (SnapshotKind::Initial, 0),
            (SnapshotKind::Push, 1),  // root
            (SnapshotKind::Push, 2),  // idle gate
            (SnapshotKind::Pop, 1),   // gate leaves on start
            (SnapshotKind::Push, 2),  // burpees
            (SnapshotKind::Pop, 1),   // burpees complete
            (SnapshotKind::Pop, 0),   // root completes the session
        ]
    );
    assert!(session.is_complete());
}
