//! End-to-end task-tree runs: bounded fan-out, the in-line fallback,
//! nested scopes, and downstream-driven stops.

mod common;

use common::init_test_logging;
use ramify::{
    parallel, sync, threads, Action, StreamData, TreeRuntime,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An action yielding `More` for every value but the last, then `Last`.
fn scripted(values: Vec<i32>) -> Action<i32> {
    let mut queue = values.into_iter().peekable();
    Action::new(move || match queue.next() {
        Some(value) if queue.peek().is_some() => StreamData::More(value),
        Some(value) => StreamData::Last(value),
        None => StreamData::Done,
    })
}

#[test]
fn bounded_fanout_collects_every_value() {
    init_test_logging();
    ramify::test_phase!("bounded_fanout_collects_every_value");
    let runtime = TreeRuntime::new(4);
    let action = scripted(vec![1, 2, 3]);
    let mut results = runtime
        .run(move |cx| {
            if let Some(event) = parallel(cx, &action)? {
                if let Some(value) = event.into_result()? {
                    cx.emit(value);
                }
            }
            Ok(())
        })
        .expect("tree ran");
    results.sort_unstable();
    assert_eq!(results, vec![1, 2, 3]);
    assert_eq!(runtime.credit_available(), 4);
    ramify::test_complete!("bounded_fanout_collects_every_value");
}

#[test]
fn zero_credit_preserves_order() {
    init_test_logging();
    ramify::test_phase!("zero_credit_preserves_order");
    let runtime = TreeRuntime::new(0);
    let action = scripted(vec![1, 2, 3]);
    let results = runtime
        .run(move |cx| {
            if let Some(event) = parallel(cx, &action)? {
                if let Some(value) = event.into_result()? {
                    cx.emit(value);
                }
            }
            Ok(())
        })
        .expect("tree ran");
    // Every branch ran in line on the producer, so insertion order survives.
    assert_eq!(results, vec![1, 2, 3]);
    assert_eq!(runtime.credit_available(), 0);
    ramify::test_complete!("zero_credit_preserves_order");
}

#[test]
fn credit_two_bounds_live_workers() {
    init_test_logging();
    ramify::test_phase!("credit_two_bounds_live_workers");
    let runtime = TreeRuntime::new(8);
    let peak_pending = Arc::new(AtomicUsize::new(0));
    let peak_probe = Arc::clone(&peak_pending);
    let action = scripted(vec![1, 2, 3, 4]);
    let results = runtime
        .run(move |cx| {
            threads(cx, 2, |cx| {
                if let Some(event) = parallel(cx, &action)? {
                    if let Some(value) = event.into_result()? {
                        cx.emit(value);
                    }
                }
                peak_probe.fetch_max(cx.pending_count(), Ordering::SeqCst);
                Ok(())
            })
        })
        .expect("tree ran");
    let sum: i32 = results.iter().sum();
    assert_eq!(sum, 10);
    assert!(
        peak_pending.load(Ordering::SeqCst) <= 2,
        "at most two workers pending under a credit of two"
    );
    assert_eq!(runtime.credit_available(), 8);
    ramify::test_complete!("credit_two_bounds_live_workers");
}

#[test]
fn sync_scope_runs_fully_in_line() {
    init_test_logging();
    ramify::test_phase!("sync_scope_runs_fully_in_line");
    let runtime = TreeRuntime::new(4);
    let spawned = Arc::new(AtomicUsize::new(0));
    let spawned_probe = Arc::clone(&spawned);
    let root_thread = std::thread::current().id();
    let action = scripted(vec![10, 20, 30]);
    let results = runtime
        .run(move |cx| {
            sync(cx, |cx| {
                if let Some(event) = parallel(cx, &action)? {
                    if let Some(value) = event.into_result()? {
                        if std::thread::current().id() != root_thread {
                            spawned_probe.fetch_add(1, Ordering::SeqCst);
                        }
                        cx.emit(value);
                    }
                }
                Ok(())
            })
        })
        .expect("tree ran");
    assert_eq!(results, vec![10, 20, 30]);
    assert_eq!(
        spawned.load(Ordering::SeqCst),
        0,
        "no branch left the pinned worker"
    );
    assert_eq!(runtime.credit_available(), 4);
    ramify::test_complete!("sync_scope_runs_fully_in_line");
}

#[test]
fn nested_thread_scopes_restore_outer_credit() {
    init_test_logging();
    ramify::test_phase!("nested_thread_scopes_restore_outer_credit");
    let runtime = TreeRuntime::new(3);
    let inner_credit = Arc::new(AtomicUsize::new(usize::MAX));
    let outer_credit = Arc::new(AtomicUsize::new(usize::MAX));
    let inner_probe = Arc::clone(&inner_credit);
    let outer_probe = Arc::clone(&outer_credit);
    let action = scripted(vec![1, 2]);
    let results = runtime
        .run(move |cx| {
            threads(cx, 1, |cx| {
                inner_probe.store(cx.credit_available(), Ordering::SeqCst);
                if let Some(event) = parallel(cx, &action)? {
                    if let Some(value) = event.into_result()? {
                        cx.emit(value * 100);
                    }
                }
                Ok(())
            })?;
            if cx.is_root() {
                outer_probe.store(cx.credit_available(), Ordering::SeqCst);
            }
            Ok(())
        })
        .expect("tree ran");
    let mut sorted = results.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![100, 200]);
    assert!(inner_credit.load(Ordering::SeqCst) <= 1);
    assert_eq!(outer_credit.load(Ordering::SeqCst), 3);
    assert_eq!(runtime.credit_available(), 3);
    ramify::test_complete!("nested_thread_scopes_restore_outer_credit");
}

#[test]
fn downstream_stop_unwinds_cleanly() {
    init_test_logging();
    ramify::test_phase!("downstream_stop_unwinds_cleanly");
    let runtime = TreeRuntime::new(8);
    let taken = Arc::new(AtomicUsize::new(0));
    let taken_probe = Arc::clone(&taken);
    let next = Arc::new(AtomicUsize::new(0));
    let source = Arc::clone(&next);
    let action = Action::new(move || {
        StreamData::More(i32::try_from(source.fetch_add(1, Ordering::SeqCst)).unwrap())
    });
    let results = runtime
        .run(move |cx| {
            threads(cx, 1, |cx| {
                if let Some(event) = parallel(cx, &action)? {
                    if let Some(value) = event.into_result()? {
                        let seen = taken_probe.fetch_add(1, Ordering::SeqCst);
                        if seen < 10 {
                            cx.emit(value);
                        }
                        if seen + 1 >= 10 {
                            cx.request_stop();
                        }
                    }
                }
                Ok(())
            })
        })
        .expect("tree ran");
    assert_eq!(results.len(), 10, "exactly ten values reach the sink");
    assert_eq!(runtime.credit_available(), 8);
    ramify::test_complete!("downstream_stop_unwinds_cleanly");
}

#[test]
fn sequential_deferred_values_compose() {
    init_test_logging();
    ramify::test_phase!("sequential_deferred_values_compose");
    let runtime = TreeRuntime::new(2);
    let first = ramify::IoAction::new(|| Ok(1));
    let second = ramify::IoAction::new(|| Ok(2));
    let results = runtime
        .run(move |cx| {
            if let Some(value) = ramify::async_once(cx, &first)? {
                cx.emit(value);
            }
            if let Some(value) = ramify::async_once(cx, &second)? {
                cx.emit(value * 10);
            }
            Ok(())
        })
        .expect("both deferred values resolve");
    let mut sorted = results.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![1, 20], "each value recorded exactly once");
    assert_eq!(runtime.credit_available(), 2);
    ramify::test_complete!("sequential_deferred_values_compose");
}

#[test]
fn wait_events_streams_until_stopped() {
    init_test_logging();
    ramify::test_phase!("wait_events_streams_until_stopped");
    let runtime = TreeRuntime::new(2);
    let next = Arc::new(AtomicUsize::new(0));
    let source = Arc::clone(&next);
    let io = ramify::IoAction::new(move || {
        Ok(i32::try_from(source.fetch_add(1, Ordering::SeqCst)).unwrap())
    });
    let seen = Arc::new(AtomicUsize::new(0));
    let seen_probe = Arc::clone(&seen);
    let results = runtime
        .run(move |cx| {
            if let Some(value) = ramify::wait_events(cx, &io)? {
                if seen_probe.fetch_add(1, Ordering::SeqCst) < 5 {
                    cx.emit(value);
                }
                if seen_probe.load(Ordering::SeqCst) >= 5 {
                    cx.request_stop();
                }
            }
            Ok(())
        })
        .expect("stream stopped cleanly");
    assert_eq!(results.len(), 5, "five values reach the sink");
    assert_eq!(runtime.credit_available(), 2);
    ramify::test_complete!("wait_events_streams_until_stopped");
}

#[test]
fn two_generators_in_sequence_compose() {
    init_test_logging();
    ramify::test_phase!("two_generators_in_sequence_compose");
    let runtime = TreeRuntime::new(4);
    let outer = scripted(vec![1, 2]);
    let inner = Arc::new(move || scripted(vec![10, 20]));
    let results = runtime
        .run(move |cx| {
            if let Some(event) = parallel(cx, &outer)? {
                if let Some(left) = event.into_result()? {
                    let inner_action = inner();
                    if let Some(event) = parallel(cx, &inner_action)? {
                        if let Some(right) = event.into_result()? {
                            cx.emit(left * right);
                        }
                    }
                }
            }
            Ok(())
        })
        .expect("tree ran");
    let mut sorted = results.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![10, 20, 20, 40]);
    assert_eq!(runtime.credit_available(), 4);
    ramify::test_complete!("two_generators_in_sequence_compose");
}
