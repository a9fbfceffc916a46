//! Scheduling behaviour observed through the public API.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use qthread::{
    Config, Error, JoinHandle, Scheduler, ThreadState, current, exit, join, spawn, yield_now,
};

#[test]
fn test_empty_scheduler_is_noop() {
    let scheduler = Scheduler::new().unwrap();
    scheduler.schedule();
    yield_now();
    assert!(scheduler.is_empty());
    assert_eq!(scheduler.current(), None);
}

#[test]
fn test_single_thread_completes_after_one_schedule() {
    let scheduler = Scheduler::new().unwrap();
    let ran = Rc::new(Cell::new(false));

    let flag = ran.clone();
    let handle = scheduler.create(move || flag.set(true)).unwrap();
    assert_eq!(scheduler.state(&handle), Some(ThreadState::Ready));

    scheduler.schedule();

    assert!(ran.get());
    assert_eq!(scheduler.state(&handle), Some(ThreadState::Finished));
    // Control came back to the host, which is not a registered thread.
    assert_eq!(scheduler.current(), None);
    assert_eq!(scheduler.join(handle).unwrap(), 0);
}

#[test]
fn test_single_thread_completes_with_adopted_host() {
    let scheduler = Scheduler::new().unwrap();
    let host = scheduler.init().unwrap();
    let handle = scheduler.create(|| {}).unwrap();

    scheduler.schedule();

    assert_eq!(scheduler.state(&handle), Some(ThreadState::Finished));
    assert_eq!(scheduler.current(), Some(host));
    scheduler.join(handle).unwrap();
}

#[test]
fn test_round_robin_is_fair() {
    const THREADS: u64 = 4;
    const ROUNDS: usize = 10;

    let scheduler = Scheduler::new().unwrap();
    let log = Rc::new(RefCell::new(Vec::new()));

    let handles: Vec<_> = (1..=THREADS)
        .map(|n| {
            let log = log.clone();
            scheduler
                .create(move || {
                    for _ in 0..ROUNDS {
                        log.borrow_mut().push(n);
                        yield_now();
                    }
                })
                .unwrap()
        })
        .collect();

    for handle in handles {
        scheduler.join(handle).unwrap();
    }

    let log = log.borrow();
    let expected: Vec<u64> = (0..ROUNDS).flat_map(|_| 1..=THREADS).collect();
    assert_eq!(*log, expected);

    // Every window of N dispatches covers all N threads.
    for window in log.windows(THREADS as usize) {
        let mut seen = window.to_vec();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), THREADS as usize);
    }
}

#[test]
fn test_only_the_dispatched_thread_is_running() {
    const WORKERS: usize = 4;
    const TURNS: usize = 3;

    let scheduler = Rc::new(Scheduler::new().unwrap());
    let host = scheduler.init().unwrap();
    let handles: Rc<RefCell<Vec<JoinHandle>>> = Rc::default();
    let turns = Rc::new(RefCell::new(Vec::new()));

    for index in 0..WORKERS {
        let own = scheduler.clone();
        let worker_handles = handles.clone();
        let turns = turns.clone();
        let handle = scheduler
            .create(move || {
                for _ in 0..TURNS {
                    let handles = worker_handles.borrow();
                    let states: Vec<_> = handles.iter().map(|h| own.state(h)).collect();
                    assert_eq!(own.current(), Some(handles[index].id()));
                    turns.borrow_mut().push((index, states));
                    drop(handles);
                    yield_now();
                }
            })
            .unwrap();
        handles.borrow_mut().push(handle);
    }

    // Nothing has been dispatched yet.
    for handle in handles.borrow().iter() {
        assert_eq!(scheduler.state(handle), Some(ThreadState::Ready));
    }

    // Workers index into `handles`, so keep them registered until all finish.
    loop {
        scheduler.schedule();

        // Back on the host: it is the running thread, none of the workers is.
        assert_eq!(scheduler.current(), Some(host));
        let handles = handles.borrow();
        assert!(
            handles
                .iter()
                .all(|h| scheduler.state(h) != Some(ThreadState::Running))
        );
        if handles
            .iter()
            .all(|h| scheduler.state(h) == Some(ThreadState::Finished))
        {
            break;
        }
    }

    let remaining = std::mem::take(&mut *handles.borrow_mut());
    for handle in remaining {
        scheduler.join(handle).unwrap();
    }

    let turns = turns.borrow();
    assert_eq!(turns.len(), WORKERS * TURNS);
    for (index, states) in turns.iter() {
        let running: Vec<_> = states
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == Some(ThreadState::Running))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(running, [*index]);
    }
}

#[test]
fn test_lone_yielding_thread_keeps_running() {
    let scheduler = Scheduler::new().unwrap();
    let turns = Rc::new(Cell::new(0));

    let counter = turns.clone();
    let handle = scheduler
        .create(move || {
            for _ in 0..5 {
                counter.set(counter.get() + 1);
                yield_now();
            }
        })
        .unwrap();

    scheduler.schedule();
    assert_eq!(turns.get(), 5);
    scheduler.join(handle).unwrap();
}

#[test]
fn test_exit_value_is_returned_unchanged() {
    let scheduler = Scheduler::new().unwrap();

    let boxed = Box::into_raw(Box::new(String::from("payload"))) as usize;
    let values = [0, 1, usize::MAX, 0xDEAD_BEEF, boxed];
    let handles: Vec<_> = values
        .iter()
        .map(|&value| {
            scheduler
                .create(move || {
                    yield_now();
                    exit(value);
                })
                .unwrap()
        })
        .collect();

    for (handle, &value) in handles.into_iter().zip(&values) {
        assert_eq!(scheduler.join(handle).unwrap(), value);
    }

    let payload = unsafe { Box::from_raw(boxed as *mut String) };
    assert_eq!(*payload, "payload");
}

#[test]
fn test_exit_abandons_live_values() {
    let scheduler = Scheduler::new().unwrap();
    let captured = Rc::new(());
    let local = Rc::new(());

    let (held, kept) = (captured.clone(), local.clone());
    let handle = scheduler
        .create(move || {
            let _held = held;
            let _kept = kept;
            exit(3);
        })
        .unwrap();

    assert_eq!(scheduler.join(handle).unwrap(), 3);
    // Neither clone was dropped: the thread's frame was never unwound.
    assert_eq!(Rc::strong_count(&captured), 2);
    assert_eq!(Rc::strong_count(&local), 2);
}

#[test]
fn test_create_with_start_function() {
    fn double(n: usize) {
        exit(n * 2);
    }

    let scheduler = Scheduler::new().unwrap();
    let handle = scheduler.create_with(double, 21).unwrap();
    assert_eq!(scheduler.join(handle).unwrap(), 42);
}

#[test]
fn test_stack_size_applies_to_later_threads_only() {
    let scheduler = Scheduler::with_config(Config::default().with_stack_size(64 * 1024)).unwrap();

    let before = scheduler.create(|| {}).unwrap();
    scheduler.set_stack_size(256 * 1024);
    let after = scheduler.create(|| {}).unwrap();

    let before_size = scheduler.stack_size_of(&before).unwrap();
    let after_size = scheduler.stack_size_of(&after).unwrap();
    assert!(before_size >= 64 * 1024);
    assert!(before_size < 256 * 1024);
    assert!(after_size >= 256 * 1024);
    assert_eq!(scheduler.stack_size(), 256 * 1024);

    scheduler.join(before).unwrap();
    scheduler.join(after).unwrap();
}

#[test]
fn test_deep_stack_use_on_large_stack() {
    fn depth(n: u64) -> u64 {
        let pad = std::hint::black_box([n; 64]);
        if n == 0 { pad[0] } else { depth(n - 1) + pad[63] }
    }

    let scheduler = Scheduler::new().unwrap();
    scheduler.set_stack_size(1024 * 1024);
    let handle = scheduler
        .create(|| exit(depth(500) as usize))
        .unwrap();
    assert_eq!(scheduler.join(handle).unwrap(), (1..=500).sum::<u64>() as usize);
}

#[test]
fn test_current_names_the_running_thread() {
    let scheduler = Scheduler::new().unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let seen = seen.clone();
            scheduler
                .create(move || {
                    seen.borrow_mut().push(current().unwrap());
                    yield_now();
                    seen.borrow_mut().push(current().unwrap());
                })
                .unwrap()
        })
        .collect();

    let ids: Vec<_> = handles.iter().map(|handle| handle.id()).collect();
    for handle in handles {
        scheduler.join(handle).unwrap();
    }

    let expected: Vec<_> = ids.iter().chain(&ids).copied().collect();
    assert_eq!(*seen.borrow(), expected);
}

#[test]
fn test_threads_spawn_and_join_each_other() {
    let scheduler = Scheduler::new().unwrap();

    let outer = scheduler
        .create(|| {
            let inner = spawn(|| {
                yield_now();
                exit(41);
            })
            .unwrap();
            let value = join(inner).unwrap();
            exit(value + 1);
        })
        .unwrap();

    assert_eq!(scheduler.join(outer).unwrap(), 42);
    assert!(scheduler.is_empty());
}

#[test]
fn test_join_releases_every_thread() {
    const THREADS: usize = 10;

    let scheduler = Scheduler::new().unwrap();
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            scheduler
                .create(move || {
                    for _ in 0..i {
                        yield_now();
                    }
                })
                .unwrap()
        })
        .collect();
    assert_eq!(scheduler.len(), THREADS);

    // Join in reverse so records leave from the tail and the middle.
    for handle in handles.into_iter().rev() {
        scheduler.join(handle).unwrap();
    }
    assert!(scheduler.is_empty());
}

#[test]
fn test_join_with_adopted_host_leaves_only_host() {
    let scheduler = Scheduler::new().unwrap();
    scheduler.init().unwrap();

    let handles: Vec<_> = (0..5)
        .map(|_| scheduler.create(yield_now).unwrap())
        .collect();
    for handle in handles {
        scheduler.join(handle).unwrap();
    }
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn test_freed_slot_does_not_alias_old_handle() {
    let scheduler = Scheduler::new().unwrap();

    let first = scheduler.create(|| {}).unwrap();
    let first_id = first.id();
    scheduler.join(first).unwrap();

    let second = scheduler.create(|| {}).unwrap();
    assert_ne!(second.id(), first_id);
    assert_eq!(scheduler.join(second).unwrap(), 0);
}

#[test]
fn test_join_rejects_foreign_handle() {
    let first = Scheduler::new().unwrap();
    let foreign = first.create(|| {}).unwrap();
    drop(first);

    let second = Scheduler::new().unwrap();
    let _local = second.create(|| {}).unwrap();
    let id = foreign.id();
    // Same slot, different thread.
    match second.join(foreign) {
        Err(Error::UnknownThread(unknown)) => assert_eq!(unknown, id),
        other => panic!("expected UnknownThread, got {other:?}"),
    }
}

#[test]
#[should_panic(expected = "exit called outside of a dispatched thread")]
fn test_exit_before_dispatch_panics() {
    let _scheduler = Scheduler::new().unwrap();
    exit(1);
}

#[test]
#[should_panic(expected = "the host thread cannot exit")]
fn test_adopted_host_cannot_exit() {
    let scheduler = Scheduler::new().unwrap();
    scheduler.init().unwrap();
    scheduler.schedule();
    scheduler.exit(1);
}

#[test]
#[should_panic(expected = "with no scheduler active")]
fn test_exit_without_scheduler_panics() {
    exit(1);
}
