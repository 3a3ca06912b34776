mod common;

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use common::{boot, boot_with, entry, set_core, spawn, stack, MockPlatform};
use hartsched::{Affinity, Deadline, Dispatch, EventFlags, Pid, ProcessConfig, SchedGuard};

fn spawn_pinned(
    sch: &'static hartsched::Scheduler<MockPlatform>,
    priority: i32,
    core: usize,
) -> Pid {
    sch.spawn_with(
        stack(1024),
        entry,
        0,
        ProcessConfig::with_priority(priority).pinned(core),
    )
}

#[test]
fn every_core_owns_system_and_sleep_process() {
    let sch = boot(2);
    assert_eq!(sch.process_count(), 4);
    for core in 0..2 {
        let system = sch.process(sch.system_pid(core)).unwrap();
        assert_eq!(system.affinity(), Affinity::Exclusive(core));
        let sleep = sch.process(sch.sleep_pid(core).unwrap()).unwrap();
        assert_eq!(sleep.affinity(), Affinity::Exclusive(core));
        assert!(sch.events(core).check(EventFlags::CONTEXT_SWITCH));
    }
}

#[test]
fn own_sleep_process_is_preferred() {
    let sch = boot(2);
    let sleep0 = sch.sleep_pid(0).unwrap();
    let sleep1 = sch.sleep_pid(1).unwrap();

    set_core(1);
    assert_eq!(sch.schedule_once(), Dispatch::Dispatched(sleep1));
    set_core(0);
    assert_eq!(sch.schedule_once(), Dispatch::Dispatched(sleep0));
}

#[test]
fn work_pinned_elsewhere_is_deferred() {
    let sch = boot(2);
    let pinned = spawn_pinned(sch, 1, 1);

    // the most urgent process belongs to core 1: core 0 backs off
    set_core(0);
    assert_eq!(sch.schedule_once(), Dispatch::Deferred);
    assert_eq!(sch.cpu(0).current(), None);
    assert_eq!(sch.permit_holder(), None);
    assert!(!sch.events(0).check(EventFlags::PREEMPT_DISABLED));
    assert!(sch.events(0).check(EventFlags::CONTEXT_SWITCH));
    assert!(sch.events(1).check(EventFlags::SCH_AVAILABLE));

    set_core(1);
    assert_eq!(sch.schedule_once(), Dispatch::Dispatched(pinned));
    assert_eq!(sch.process(pinned).unwrap().core_id(), Some(1));

    set_core(0);
    assert_eq!(
        sch.schedule_once(),
        Dispatch::Dispatched(sch.sleep_pid(0).unwrap())
    );
}

#[test]
fn unpinned_work_runs_on_either_core() {
    let sch = boot(2);
    let first = spawn(sch, 3);
    let second = spawn(sch, 3);

    set_core(1);
    assert_eq!(sch.schedule_once(), Dispatch::Dispatched(first));
    set_core(0);
    assert_eq!(sch.schedule_once(), Dispatch::Dispatched(second));
}

#[test]
fn dispatch_always_respects_affinity() {
    let sch = boot(2);
    let users = [
        spawn(sch, 3),
        spawn(sch, 4),
        spawn_pinned(sch, 2, 0),
        spawn_pinned(sch, 2, 1),
        spawn_pinned(sch, 6, 1),
    ];
    let mut dispatched = Vec::new();

    for round in 0..30 {
        for core in 0..2 {
            set_core(core);
            if round % 4 == 0 {
                for pid in users {
                    sch.notify_pid(pid);
                }
            }
            match sch.cpu(core).current() {
                Some(pid) if users.contains(&pid) && round % 3 == 1 => {
                    sch.wait(Deadline::Forever)
                }
                Some(_) => sch.yield_now(),
                None => {}
            }

            if let Dispatch::Dispatched(pid) = sch.schedule_once() {
                let pcb = sch.process(pid).unwrap();
                assert!(
                    pcb.affinity().permits(core),
                    "pid {} ({:?}) dispatched on core {}",
                    pid,
                    pcb.affinity(),
                    core
                );
                dispatched.push((core, pid));
            }
            if let (Some(a), Some(b)) = (sch.cpu(0).current(), sch.cpu(1).current()) {
                assert_ne!(a, b);
            }
            assert_eq!(sch.permit_holder(), None);
        }
    }

    let sleep1 = sch.sleep_pid(1).unwrap();
    assert!(!dispatched.contains(&(0, sleep1)));
    assert!(dispatched.contains(&(0, users[2])));
    assert!(dispatched.contains(&(1, users[3])));
}

#[test]
fn notify_from_other_core_wakes_pinned_process() {
    let sch = boot(2);
    let worker = spawn_pinned(sch, 2, 1);

    set_core(1);
    assert_eq!(sch.schedule_once(), Dispatch::Dispatched(worker));
    sch.wait(Deadline::Forever);
    assert_eq!(
        sch.schedule_once(),
        Dispatch::Dispatched(sch.sleep_pid(1).unwrap())
    );
    sch.events(1).clear_all();

    // interrupt on core 0, which only runs its system process
    set_core(0);
    assert!(sch.notify_pid(worker));
    assert!(sch.events(1).check(EventFlags::CONTEXT_SWITCH));
    assert_eq!(sch.permit_holder(), None);

    // core 1's sleep process reacts to the context switch request
    set_core(1);
    sch.yield_now();
    assert_eq!(sch.schedule_once(), Dispatch::Dispatched(worker));
}

#[test]
fn set_affinity_moves_queued_process() {
    let sch = boot(2);
    let worker = spawn(sch, 1);
    assert!(sch.set_affinity(worker, Affinity::Pinned(1)));

    set_core(0);
    assert_eq!(sch.schedule_once(), Dispatch::Deferred);
    set_core(1);
    assert_eq!(sch.schedule_once(), Dispatch::Dispatched(worker));
}

#[test]
fn set_affinity_to_unconfigured_core_is_rejected() {
    let sch = boot(2);
    let worker = spawn(sch, 1);

    assert!(!sch.set_affinity(worker, Affinity::Pinned(2)));
    assert!(!sch.set_affinity(worker, Affinity::Pinned(usize::MAX)));
    assert!(!sch.set_affinity(worker, Affinity::Exclusive(7)));
    assert_eq!(sch.process(worker).unwrap().affinity(), Affinity::Any);
    assert!(sch.bridge().is_idle());
    assert_eq!(sch.permit_holder(), None);
}

#[test]
#[should_panic(expected = "affinity to unconfigured core")]
fn spawn_pinned_to_unconfigured_core_is_fatal() {
    let sch = boot(2);
    spawn_pinned(sch, 1, usize::MAX);
}

#[test]
fn permit_is_held_by_one_core_at_a_time() {
    let sch = boot(2);
    let inside = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..2)
        .map(|core| {
            let inside = inside.clone();
            thread::spawn(move || {
                set_core(core);
                for _ in 0..500 {
                    sch.with_queue(|_| {
                        assert_eq!(sch.permit_holder(), Some(core));
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    });
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(sch.permit_holder(), None);
    assert_eq!(sch.platform().permits(), 1);
}

static BUMPS: AtomicI32 = AtomicI32::new(0);

fn bump(guard: &mut SchedGuard<'_, MockPlatform>, _args: &[usize]) -> i32 {
    assert_eq!(guard.scheduler().permit_holder(), Some(guard.core()));
    BUMPS.fetch_add(1, Ordering::SeqCst) + 1
}

#[test]
fn concurrent_system_calls_run_once_each() {
    let sch = boot(2);
    let workers: Vec<_> = (0..2)
        .map(|core| {
            thread::spawn(move || {
                set_core(core);
                (0..200).map(|_| sch.system_call(bump, &[])).collect::<Vec<_>>()
            })
        })
        .collect();

    let mut results: Vec<i32> = workers
        .into_iter()
        .flat_map(|worker| worker.join().unwrap())
        .collect();
    results.sort_unstable();
    assert_eq!(results, (1..=400).collect::<Vec<_>>());
    assert!(sch.bridge().is_idle());
}

#[test]
fn launch_core_starts_secondary() {
    let sch = boot_with(MockPlatform::with_launch(), 2);
    sch.launch_core(1);
    assert_eq!(*sch.platform().launches.lock().unwrap(), vec![1]);
}

#[test]
fn launch_without_platform_support_is_ignored() {
    let sch = boot(2);
    sch.launch_core(1);
    assert!(sch.platform().launches.lock().unwrap().is_empty());
}

#[test]
#[should_panic(expected = "invalid core id")]
fn launching_own_core_is_fatal() {
    let sch = boot_with(MockPlatform::with_launch(), 2);
    sch.launch_core(0);
}

#[test]
#[should_panic(expected = "invalid core id")]
fn launching_unconfigured_core_is_fatal() {
    let sch = boot_with(MockPlatform::with_launch(), 2);
    sch.launch_core(2);
}

#[test]
#[should_panic(expected = "not configured")]
fn unconfigured_calling_core_is_fatal() {
    let sch = boot(2);
    set_core(3);
    sch.core_id();
}

#[test]
#[should_panic(expected = "cannot leave the host thread")]
fn start_enters_the_system_stack() {
    let sch = boot_with(MockPlatform::with_launch(), 2);
    sch.start();
}
