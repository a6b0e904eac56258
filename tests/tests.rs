use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::unbounded;
use threadmill::{StartError, WorkerPool};

fn single_worker() -> WorkerPool {
    WorkerPool::builder().size(1).build()
}

#[test]
#[should_panic(expected = "worker pool name must not contain null bytes")]
fn name_with_null_bytes_panics() {
    WorkerPool::builder().name("uh\0oh").build();
}

#[test]
fn default_pool_has_at_least_one_worker() {
    let pool = WorkerPool::new();

    assert!(pool.size() >= 1);
}

#[test]
fn tasks_submitted_before_start_all_run() {
    let pool = WorkerPool::builder().size(4).build();
    let (tx, rx) = unbounded();

    for i in 1..=10 {
        let tx = tx.clone();
        pool.submit(move || tx.send(i).unwrap()).unwrap();
    }
    drop(tx);

    pool.stop();
    pool.start().unwrap();

    let mut seen: Vec<i32> = rx.iter().collect();
    seen.sort_unstable();
    assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    assert_eq!(pool.completed_tasks(), 10);
    assert_eq!(pool.running_tasks(), 0);
}

#[test]
fn single_worker_dequeues_in_submission_order() {
    let pool = single_worker();
    let (tx, rx) = unbounded();

    for i in 0..100 {
        let tx = tx.clone();
        pool.submit(move || tx.send(i).unwrap()).unwrap();
    }
    drop(tx);

    pool.stop();
    pool.start().unwrap();

    let seen: Vec<i32> = rx.iter().collect();
    assert_eq!(seen, (0..100).collect::<Vec<_>>());
}

#[test]
fn queue_drains_fully_before_shutdown_completes() {
    let pool = single_worker();
    let (tx, rx) = unbounded();

    let first = tx.clone();
    pool.submit(move || {
        thread::sleep(Duration::from_millis(50));
        first.send(Instant::now()).unwrap();
    })
    .unwrap();

    let second = tx;
    pool.submit(move || second.send(Instant::now()).unwrap()).unwrap();

    // Stopping right after submission must not discard the queued tasks.
    pool.stop();
    pool.start().unwrap();

    let first_done = rx.recv().unwrap();
    let second_done = rx.recv().unwrap();
    assert!(second_done >= first_done);
    assert!(rx.recv().is_err());
}

#[test]
fn concurrent_submissions_all_run_exactly_once() {
    const PRODUCERS: usize = 4;
    const TASKS_PER_PRODUCER: usize = 250;

    let pool = WorkerPool::builder().size(4).build();
    let counter = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        let pool = &pool;

        let runner = s.spawn(move || pool.start());

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|_| {
                let counter = counter.clone();
                s.spawn(move || {
                    for _ in 0..TASKS_PER_PRODUCER {
                        let counter = counter.clone();
                        pool.submit(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        })
                        .unwrap();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        pool.stop();
        runner.join().unwrap().unwrap();
    });

    assert_eq!(
        counter.load(Ordering::SeqCst),
        PRODUCERS * TASKS_PER_PRODUCER
    );
    assert_eq!(
        pool.completed_tasks() as usize,
        PRODUCERS * TASKS_PER_PRODUCER
    );
}

#[test]
fn stop_from_another_thread_drains_pending_tasks() {
    let pool = WorkerPool::builder().size(2).build();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..50 {
        let counter = counter.clone();
        pool.submit(move || {
            thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    thread::scope(|s| {
        let pool = &pool;
        let runner = s.spawn(move || pool.start());

        thread::sleep(Duration::from_millis(5));
        pool.stop();

        runner.join().unwrap().unwrap();
    });

    assert_eq!(counter.load(Ordering::SeqCst), 50);
}

#[test]
fn stop_is_idempotent() {
    let pool = single_worker();
    let (tx, rx) = unbounded();

    pool.submit(move || tx.send(()).unwrap()).unwrap();

    pool.stop();
    pool.stop();
    assert!(pool.is_stopped());

    pool.start().unwrap();

    assert_eq!(rx.iter().count(), 1);
}

#[test]
fn submission_after_stop_returns_the_closure() {
    let pool = single_worker();
    pool.stop();

    let counter = Arc::new(AtomicUsize::new(0));
    let task_counter = counter.clone();
    let rejected = pool
        .submit(move || {
            task_counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();

    // Nothing was queued.
    assert_eq!(pool.queued_tasks(), 0);

    // The caller gets the closure back and can run it inline.
    rejected.into_inner()();
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn panicking_task_does_not_kill_the_worker() {
    let pool = single_worker();
    let (tx, rx) = unbounded();

    pool.submit(|| panic!("oh no!")).unwrap();
    pool.submit(move || tx.send("still alive").unwrap()).unwrap();

    pool.stop();
    pool.start().unwrap();

    assert_eq!(rx.recv().unwrap(), "still alive");
    assert_eq!(pool.panicked_tasks(), 1);
    assert_eq!(pool.completed_tasks(), 2);
}

#[test]
fn double_start_is_an_error() {
    let pool = single_worker();

    pool.stop();
    pool.start().unwrap();

    match pool.start() {
        Err(StartError::AlreadyStarted) => {}
        other => panic!("expected AlreadyStarted, got {:?}", other),
    }
}

#[test]
fn zero_worker_pool_accepts_tasks_and_does_not_hang() {
    let pool = WorkerPool::builder().size(0).build();
    assert_eq!(pool.size(), 0);

    pool.submit(|| unreachable!("no worker should ever run this"))
        .unwrap();
    assert_eq!(pool.queued_tasks(), 1);

    pool.stop();
    pool.start().unwrap();

    // Nothing executed the task; it is still queued.
    assert_eq!(pool.queued_tasks(), 1);
    assert_eq!(pool.completed_tasks(), 0);
}

#[test]
fn workers_use_the_configured_thread_name() {
    let pool = WorkerPool::builder().name("mill").size(1).build();
    let (tx, rx) = unbounded();

    pool.submit(move || {
        tx.send(thread::current().name().map(str::to_owned))
            .unwrap();
    })
    .unwrap();

    pool.stop();
    pool.start().unwrap();

    assert_eq!(rx.recv().unwrap().as_deref(), Some("mill"));
}
