//! Integration Tests for Gated and Async Reactors
//!
//! Throttled and async reactors schedule work on `tokio` local tasks, so
//! these tests run on a paused clock inside a `LocalSet`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::LocalSet;
use tokio::time::sleep;
use weft_core::{
    batch, clock_gated, run_async, run_count, throttled, wrap, Error, ReactorBuilder, Value, CURRENT,
};

fn source(value: i32) -> weft_core::Container {
    wrap(Value::object([("value", Value::from(value))])).unwrap()
}

/// Test that a burst of changes produces one immediate and one trailing run.
#[tokio::test(start_paused = true)]
async fn throttle_coalesces_a_burst() {
    LocalSet::new()
        .run_until(async {
            let foo = source(1);
            let runs = Rc::new(Cell::new(0));
            let (reader, counted) = (foo.clone(), runs.clone());
            let output = throttled(
                move || {
                    let run = counted.get();
                    counted.set(run + 1);
                    Ok(format!("{}:{}", reader.get("value"), run))
                },
                Duration::from_millis(10),
            )
            .unwrap();
            assert_eq!(output.get(CURRENT), Value::from("1:0"));

            for value in 2..=11 {
                foo.set("value", value).unwrap();
            }
            assert_eq!(output.get(CURRENT), Value::from("1:0"));

            sleep(Duration::from_millis(20)).await;
            assert_eq!(output.get(CURRENT), Value::from("11:1"));

            // idle window: no further run
            sleep(Duration::from_millis(20)).await;
            assert_eq!(output.get(CURRENT), Value::from("11:1"));
            assert_eq!(runs.get(), 2);
        })
        .await;
}

/// Test that a change after the window has closed runs immediately.
#[tokio::test(start_paused = true)]
async fn throttle_runs_immediately_after_quiet_period() {
    LocalSet::new()
        .run_until(async {
            let foo = source(1);
            let reader = foo.clone();
            let output = throttled(move || Ok(reader.get("value")), Duration::from_millis(10)).unwrap();

            sleep(Duration::from_millis(15)).await;
            foo.set("value", 2).unwrap();
            assert_eq!(output.get(CURRENT), Value::from(2));

            // inside the new window
            foo.set("value", 3).unwrap();
            assert_eq!(output.get(CURRENT), Value::from(2));
            sleep(Duration::from_millis(12)).await;
            assert_eq!(output.get(CURRENT), Value::from(3));
            assert_eq!(run_count(&output), Some(3));
        })
        .await;
}

/// Test that a clock-gated reactor runs only when the clock ticks.
#[test]
fn clock_gate_waits_for_the_tick() {
    let clock = wrap(Value::object([("time", Value::from(0))])).unwrap();
    let foo = source(1);

    let (reader, ticks) = (foo.clone(), clock.clone());
    let output = clock_gated(
        move || Ok(format!("{}:{}", reader.get("value"), ticks.get("time"))),
        &clock,
    )
    .unwrap();
    assert_eq!(output.get(CURRENT), Value::from("1:0"));

    foo.set("value", 2).unwrap();
    foo.set("value", 3).unwrap();
    assert_eq!(output.get(CURRENT), Value::from("1:0"));

    clock.set("time", 1).unwrap();
    assert_eq!(output.get(CURRENT), Value::from("3:1"));
    assert_eq!(run_count(&output), Some(2));

    // nothing changed since the last tick
    clock.set("time", 2).unwrap();
    assert_eq!(output.get(CURRENT), Value::from("3:1"));
    assert_eq!(run_count(&output), Some(2));
}

/// Test that a clock stepping backwards does not run the reactor.
#[test]
fn clock_gate_ignores_backwards_ticks() {
    let clock = wrap(Value::object([("time", Value::from(10))])).unwrap();
    let foo = source(1);

    let reader = foo.clone();
    let output = clock_gated(move || Ok(reader.get("value")), &clock).unwrap();

    foo.set("value", 2).unwrap();
    clock.set("time", 4).unwrap();
    assert_eq!(output.get(CURRENT), Value::from(1));
    assert_eq!(run_count(&output), Some(1));

    clock.set("time", 11).unwrap();
    assert_eq!(output.get(CURRENT), Value::from(2));
    assert_eq!(run_count(&output), Some(2));
}

/// Test that the tick member can be configured.
#[test]
fn clock_member_is_configurable() {
    let clock = wrap(Value::object([("generation", Value::from(0))])).unwrap();
    let foo = source(1);

    let reader = foo.clone();
    let output = ReactorBuilder::new()
        .compute(move || Ok(reader.get("value")))
        .clock(&clock)
        .clock_member("generation")
        .build()
        .unwrap();

    foo.set("value", 5).unwrap();
    clock.set("time", 1).unwrap();
    assert_eq!(output.get(CURRENT), Value::from(1));

    clock.set("generation", 1).unwrap();
    assert_eq!(output.get(CURRENT), Value::from(5));
}

/// Test that a tick inside a batch runs the reactor once, at the end.
#[test]
fn clock_tick_inside_batch() {
    let clock = wrap(Value::object([("time", Value::from(0))])).unwrap();
    let foo = source(1);

    let reader = foo.clone();
    let output = clock_gated(move || Ok(reader.get("value")), &clock).unwrap();

    batch(|| {
        foo.set("value", 2)?;
        clock.set("time", 1)?;
        foo.set("value", 3)?;
        assert_eq!(output.get(CURRENT), Value::from(1));
        Ok(())
    })
    .unwrap();

    assert_eq!(output.get(CURRENT), Value::from(3));
    assert_eq!(run_count(&output), Some(2));
}

/// Test that an async reactor starts with a placeholder and settles later.
#[tokio::test(start_paused = true)]
async fn async_reactor_settles_later() {
    LocalSet::new()
        .run_until(async {
            let foo = wrap(Value::object([("value", Value::from("A"))])).unwrap();
            let reader = foo.clone();
            let output = run_async(move || {
                let reader = reader.clone();
                async move {
                    // read before the first suspension point: tracked
                    let value = reader.get("value");
                    sleep(Duration::from_millis(5)).await;
                    Ok::<_, Error>(format!("{}!", value))
                }
            })
            .unwrap();
            assert_eq!(output.get(CURRENT), Value::Null);

            sleep(Duration::from_millis(10)).await;
            assert_eq!(output.get(CURRENT), Value::from("A!"));

            foo.set("value", "B").unwrap();
            assert_eq!(output.get(CURRENT), Value::from("A!"));
            sleep(Duration::from_millis(10)).await;
            assert_eq!(output.get(CURRENT), Value::from("B!"));
        })
        .await;
}

/// Test that results of superseded async runs are discarded.
#[tokio::test(start_paused = true)]
async fn superseded_async_results_are_discarded() {
    LocalSet::new()
        .run_until(async {
            let foo = wrap(Value::object([("value", Value::from("A"))])).unwrap();
            let settled = Rc::new(Cell::new(0));
            let (reader, count) = (foo.clone(), settled.clone());
            let output = run_async(move || {
                let value = reader.get("value");
                let count = count.clone();
                async move {
                    sleep(Duration::from_millis(5)).await;
                    count.set(count.get() + 1);
                    Ok::<_, Error>(value)
                }
            })
            .unwrap();

            foo.set("value", "B").unwrap();
            foo.set("value", "C").unwrap();
            sleep(Duration::from_millis(10)).await;

            // all three futures completed, only the latest was merged
            assert_eq!(settled.get(), 3);
            assert_eq!(output.get(CURRENT), Value::from("C"));
        })
        .await;
}

/// Test that an async computation that never suspends merges at once.
#[tokio::test]
async fn ready_async_results_merge_immediately() {
    LocalSet::new()
        .run_until(async {
            let output = run_async(|| async { Ok::<_, Error>(42) }).unwrap();
            assert_eq!(output.get(CURRENT), Value::from(42));
        })
        .await;
}

/// Test that gated reactors still require a computation.
#[test]
fn gated_builders_require_a_computation() {
    let clock = wrap(Value::object([("time", Value::from(0))])).unwrap();
    let err = ReactorBuilder::new().clock(&clock).build().unwrap_err();
    assert_eq!(err, Error::MissingComputation);
}
