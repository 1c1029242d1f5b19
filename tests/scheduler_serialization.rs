//! Serialization and teardown guarantees of the resource scheduler.

use acq_core::sched::{CancelToken, ResourceScheduler, SchedulerConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn wait_all(workers: &[acq_core::sched::Worker]) {
    let deadline = Instant::now() + Duration::from_secs(3);
    for worker in workers {
        while !worker.is_finished() {
            assert!(Instant::now() < deadline, "worker never finished");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

#[test]
fn test_stage_bodies_serialize_in_submission_order() {
    // t1 sleeps 50ms; t2 and t3 must not begin until it completes, and
    // must begin in submission order.
    init_tracing();
    let sched = ResourceScheduler::default();
    let events = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&events);
    let t1 = sched
        .submit("stage", move |_| {
            log.lock().push(("t1:start", Instant::now()));
            thread::sleep(Duration::from_millis(50));
            log.lock().push(("t1:end", Instant::now()));
        })
        .unwrap();
    let log = Arc::clone(&events);
    let t2 = sched
        .submit("stage", move |_| {
            log.lock().push(("t2:start", Instant::now()));
        })
        .unwrap();
    let log = Arc::clone(&events);
    let t3 = sched
        .submit("stage", move |_| {
            log.lock().push(("t3:start", Instant::now()));
        })
        .unwrap();

    wait_all(&[t1, t2, t3]);

    let events = events.lock();
    let names: Vec<&str> = events.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec!["t1:start", "t1:end", "t2:start", "t3:start"]);

    let at = |name: &str| {
        events
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, t)| *t)
            .unwrap()
    };
    assert!(at("t2:start") >= at("t1:end"));
    assert!(at("t3:start") >= at("t2:start"));
}

#[test]
fn test_queues_for_different_resources_are_independent() {
    let sched = ResourceScheduler::default();
    let camera_started = Arc::new(AtomicBool::new(false));

    // A long stage operation must not delay camera work.
    let stage = sched
        .submit("stage", |_| thread::sleep(Duration::from_millis(100)))
        .unwrap();
    let flag = Arc::clone(&camera_started);
    let camera = sched
        .submit("camera", move |_| flag.store(true, Ordering::SeqCst))
        .unwrap();

    let deadline = Instant::now() + Duration::from_millis(80);
    while !camera_started.load(Ordering::SeqCst) {
        assert!(
            Instant::now() < deadline,
            "camera work waited on the stage queue"
        );
        thread::sleep(Duration::from_millis(1));
    }
    wait_all(&[stage, camera]);
}

#[test]
fn test_shutdown_tears_down_every_resource_queue() {
    init_tracing();
    let sched = ResourceScheduler::new(SchedulerConfig {
        kill_retries: 10,
        kill_backoff: Duration::from_millis(5),
    });
    let bodies_run = Arc::new(Mutex::new(Vec::new()));

    let mut workers = Vec::new();
    for resource in ["stage_x", "stage_y", "camera"] {
        // Head: cooperative spin until cancelled.
        let log = Arc::clone(&bodies_run);
        workers.push(
            sched
                .submit(resource, move |token: &CancelToken| {
                    log.lock().push(format!("{resource}:head"));
                    while !token.is_cancelled() {
                        thread::sleep(Duration::from_millis(1));
                    }
                })
                .unwrap(),
        );
        // Two waiting workers that must never run.
        for _ in 0..2 {
            let log = Arc::clone(&bodies_run);
            workers.push(
                sched
                    .submit(resource, move |_| log.lock().push(format!("{resource}:waiter")))
                    .unwrap(),
            );
        }
    }

    // Let every head enter its body.
    thread::sleep(Duration::from_millis(20));
    sched.shutdown();
    wait_all(&workers);

    let run = bodies_run.lock();
    assert_eq!(run.len(), 3, "only the heads should have executed: {run:?}");
    assert!(run.iter().all(|name| name.ends_with(":head")));

    assert!(sched.submit("stage_x", |_| {}).is_err());
}

#[test]
fn test_termination_is_best_effort_not_synchronous() {
    let sched = ResourceScheduler::new(SchedulerConfig {
        kill_retries: 3,
        kill_backoff: Duration::from_millis(5),
    });

    let worker = sched
        .submit("stage", |_| thread::sleep(Duration::from_millis(150)))
        .unwrap();
    thread::sleep(Duration::from_millis(10));

    let started = Instant::now();
    let terminated = sched.terminate(&worker);
    assert!(!terminated, "a token-ignoring body cannot be terminated");
    // The retry bound keeps terminate() from blocking for the body's
    // full duration.
    assert!(started.elapsed() < Duration::from_millis(120));
    // The stubborn worker stays tracked until it really exits.
    assert!(sched.running_worker("stage").is_some());

    wait_all(&[worker]);
    assert!(sched.running_worker("stage").is_none());
}
