//! Invariant coverage driven through the public API: subscription release,
//! output monotonicity, precedence resolution, skip/reset flows, and the
//! production clock.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use wod_runtime::clock::ManualClock;
use wod_runtime::event::{Event, EventKind};
use wod_runtime::memory::display::resolve;
use wod_runtime::memory::MemoryTag;
use wod_runtime::session::{Session, SessionOptions};
use wod_runtime::{BlockKind, CompletionReason};
use wod_script::{
    DurationMs, Fragment, FragmentValue, Origin, Statement, StatementId, TimerDirection,
};

fn new_session() -> (Session, ManualClock) {
    let clock = ManualClock::new();
    let session = Session::with_clock(Box::new(clock.clone()), SessionOptions::default());
    (session, clock)
}

fn countdown(id: u64, secs: u64) -> Statement {
    Statement::leaf(
        StatementId(id),
        vec![Fragment::parser(FragmentValue::Timer {
            duration_ms: Some(DurationMs::from_secs(secs)),
            direction: TimerDirection::Down,
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

/// Released memory notifies each subscriber exactly once with `(None, last)`.
#[test]
fn memory_release_notifies_once() {
    let (mut session, clock) = new_session();
    session.execute(vec![countdown(1, 60)]).unwrap();
    start(&mut session, &clock);

    let timer_location = session
        .top()
        .unwrap()
        .memory()
        .first(&MemoryTag::Timer)
        .unwrap()
        .handle();

    let changes = Rc::new(RefCell::new(0_u32));
    let releases = Rc::new(RefCell::new(0_u32));
    let (c, r) = (Rc::clone(&changes), Rc::clone(&releases));
    let _sub = timer_location
        .subscribe(move |new, old| {
            if new.is_some() {
                *c.borrow_mut() += 1;
            } else {
                assert!(old.is_some());
                *r.borrow_mut() += 1;
            }
        })
        .unwrap();

    clock.advance(DurationMs::from_secs(60));
    session.handle(clock.tick_event());

    assert!(session.is_complete());
    assert!(*changes.borrow() >= 1);
    assert_eq!(*releases.borrow(), 1);
    assert!(timer_location.is_released());
}

/// Output ids are strictly increasing and the subscription sees every append
/// in order.
#[test]
fn output_ids_are_monotonic() {
    let (mut session, clock) = new_session();
    let seen: Rc<RefCell<Vec<u64>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    let _sub = session.subscribe_output(move |output| s.borrow_mut().push(output.id.0));

    session
        .execute(vec![effort(1, "Row"), effort(2, "Run"), effort(3, "Bike")])
        .unwrap();
    start(&mut session, &clock);
    for _ in 0..3 {
        session.handle(Event::new(EventKind::Complete, clock.now()));
    }
    assert!(session.is_complete());

    let seen = seen.borrow();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    let stored: Vec<u64> = session.outputs().iter().map(|output| output.id.0).collect();
    assert_eq!(*seen, stored);
}

/// Randomized precedence resolution: exactly the max-rank fragments of each
/// kind survive, and every survivor shares that rank.
#[test]
fn precedence_resolution_keeps_max_rank_only() {
    let origins = [Origin::Parser, Origin::Compiler, Origin::Runtime, Origin::User];
    let mut rng = SmallRng::seed_from_u64(42);

    for _ in 0..500 {
        let count = rng.gen_range(1..8);
        let fragments: Vec<Fragment> = (0..count)
            .map(|i| {
                Fragment::new(
                    FragmentValue::Rep(i as u32),
                    origins[rng.gen_range(0..origins.len())],
                )
            })
            .collect();
        let max_rank = fragments.iter().map(|f| f.origin.rank()).max().unwrap();
        let expected: Vec<&Fragment> = fragments
            .iter()
            .filter(|f| f.origin.rank() == max_rank)
            .collect();

        let resolved = resolve(&fragments);
        assert_eq!(resolved.len(), expected.len());
        assert!(resolved.iter().all(|f| f.origin.rank() == max_rank));
    }
}

/// Skip pops the current block with a recorded reason; the session then
/// finishes normally.
#[test]
fn skip_abandons_the_top_block() {
    let (mut session, clock) = new_session();
    let skipped: Rc<RefCell<Vec<CompletionReason>>> = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&skipped);
    let _sub = session.subscribe_stack(move |snapshot| {
        // Pop snapshots carry the departed block's summary, reason included.
        if let Some(reason) = snapshot
            .affected
            .as_ref()
            .and_then(|block| block.completion_reason)
        {
            log.borrow_mut().push(reason);
        }
    });

    session.execute(vec![countdown(1, 600), effort(2, "Run")]).unwrap();
    start(&mut session, &clock);
    assert_eq!(session.top().unwrap().kind(), BlockKind::Timer);

    session.handle(Event::new(EventKind::Skip, clock.now()));
    // The countdown was abandoned; the next statement is live.
    assert_eq!(session.top().unwrap().kind(), BlockKind::Effort);

    session.handle(Event::new(EventKind::Complete, clock.now()));
    assert!(session.is_complete());
    assert!(skipped
        .borrow()
        .contains(&CompletionReason::UserSkipped));
}

/// Reset on a finished session clears history and re-arms the same script.
#[test]
fn reset_rearms_a_finished_session() {
    let (mut session, clock) = new_session();
    session.execute(vec![effort(1, "Burpees")]).unwrap();
    start(&mut session, &clock);
    session.handle(Event::new(EventKind::Complete, clock.now()));
    assert!(session.is_complete());
    assert!(!session.outputs().is_empty());

    session.handle(Event::new(EventKind::Reset, clock.now()));
    assert!(!session.is_complete());
    assert_eq!(session.depth(), 2);
    assert!(session.outputs().is_empty());

    start(&mut session, &clock);
    session.handle(Event::new(EventKind::Complete, clock.now()));
    assert!(session.is_complete());
}

/// Buttons route presses to their bound events.
#[test]
fn press_routes_through_registered_buttons() {
    let (mut session, _clock) = new_session();
    session.execute(vec![effort(1, "Row")]).unwrap();

    assert!(session.ui().button("start").is_some());
    session.press("start");
    assert_eq!(session.top().unwrap().kind(), BlockKind::Effort);

    assert!(session.ui().button("done").is_some());
    session.press("done");
    assert!(session.is_complete());

    // Unknown ids are ignored.
    session.press("no-such-button");
}

/// The next-up preview names the following statement while one is running.
#[test]
fn next_preview_tracks_upcoming_statement() {
    let (mut session, clock) = new_session();
    session
        .execute(vec![effort(1, "Row"), effort(2, "Run")])
        .unwrap();
    start(&mut session, &clock);

    let preview = &session.ui().next_preview;
    assert!(preview.iter().any(|fragment| matches!(
        &fragment.value,
        FragmentValue::Effort(name) if name == "Run"
    )));

    session.handle(Event::new(EventKind::Complete, clock.now()));
    assert!(session.ui().next_preview.is_empty());
}

/// The production clock drives a short countdown end to end.
#[tokio::test]
async fn system_clock_drives_countdown() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let mut session = Session::new(SessionOptions {
                tick_interval: DurationMs(20),
                ..SessionOptions::default()
            });
            session
                .execute(vec![Statement::leaf(
                    StatementId(1),
                    vec![Fragment::parser(FragmentValue::Timer {
                        duration_ms: Some(DurationMs(150)),
                        direction: TimerDirection::Down,
                    })],
                )])
                .unwrap();

            let remote = session.remote();
            assert!(remote.send(Event::new(EventKind::Start, wod_script::EpochMs(0))));

            tokio::time::timeout(std::time::Duration::from_secs(5), session.run_async())
                .await
                .expect("countdown should complete well within the timeout");
            assert!(session.is_complete());
        })
        .await;
}
