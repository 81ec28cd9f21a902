//! Host-side kernel tests
//!
//! The stub port simulates PRIMASK and records context-switch requests
//! without performing them, so these tests drive the kernel by staging
//! `cur_tcb` and calling the tick handler directly. Kernel state is
//! process-wide; every test holds `KERNEL_LOCK` and reinitializes.

use core::ptr::NonNull;
use std::sync::{Mutex as StdMutex, MutexGuard as StdMutexGuard};

use mos::sync::{Barrier, CondVar, Lock, Mutex, Sema};
use mos::task::Tcb;
use mos::types::Status;

static KERNEL_LOCK: StdMutex<()> = StdMutex::new(());

/// Reinitialize the kernel and start it; `cur_tcb` ends up on the idle
/// task, exactly as on hardware before the first switch.
fn setup() -> StdMutexGuard<'static, ()> {
    // A should_panic test poisons the lock; the kernel state it guards is
    // reinitialized below anyway.
    let guard = KERNEL_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    mos::os_init().expect("kernel init");
    mos::os_start().expect("kernel start");
    guard
}

/// Pretend the context switch happened and `tcb` won the CPU.
unsafe fn stage_current(tcb: NonNull<Tcb>) {
    if let Some(old) = mos::kernel::current() {
        let old = unsafe { &mut *old.as_ptr() };
        if old.status == Status::Running {
            old.status = Status::Ready;
        }
    }
    unsafe {
        (*tcb.as_ptr()).status = Status::Running;
        mos::kernel::set_current(Some(tcb));
    }
}

fn noop_entry(_: *mut ()) {}

mod config_tests {
    use mos::config::*;

    #[test]
    fn config_values_are_sane() {
        assert!(PRI_MAX < PRI_MIN);
        assert!(TIME_SLICE > 0);
        assert!(PAGE_SIZE % 8 == 0, "pages must hold an aligned stack");
        assert!(PAGE_SIZE / 4 > 64, "page must fit a TCB and a frame");
        assert!(SYSTICK >= 10 && SYSTICK <= 10_000);
        assert!(ASYNC_TASK_SIZE >= core::mem::size_of::<usize>() * 3);
        assert!(MAX_TASK_NUM >= 2, "idle plus at least one task");
    }
}

mod error_tests {
    use mos::error::KernelError;

    #[test]
    fn error_variants_compare_and_format() {
        assert_eq!(KernelError::Oom, KernelError::Oom);
        assert_ne!(KernelError::Oom, KernelError::CapacityExceeded);
        let _ = format!("{:?}", KernelError::InvariantViolation);
    }
}

mod task_tests {
    use super::*;
    use mos::config::{MAX_TASK_NUM, TIME_SLICE};

    #[test]
    fn create_links_ready_and_find_matches_truncated_names() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 10, "sensor/acc")
            .expect("create");
        let tcb = unsafe { t.as_ref() };

        assert_eq!(tcb.name.as_str(), "sensor/acc");
        assert_eq!(tcb.pri, 10);
        assert_eq!(tcb.base_pri, 10);
        assert_eq!(tcb.status, Status::Ready);
        assert_eq!(tcb.slice, TIME_SLICE);
        assert_eq!(tcb.parent, 0, "created from the idle task");

        assert_eq!(mos::task::find("sensor/acc"), Some(t));
        assert_eq!(mos::task::find("nonexistent"), None);

        // Names beyond 16 bytes are stored truncated and found truncated.
        let long = mos::task::create(
            noop_entry,
            core::ptr::null_mut(),
            11,
            "a-name-that-is-way-too-long",
        )
        .expect("create");
        assert_eq!(unsafe { long.as_ref() }.name.as_str(), "a-name-that-is-w");
        assert_eq!(mos::task::find("a-name-that-is-way-too-long"), Some(long));
    }

    #[test]
    fn terminated_pages_are_recycled_head_word_first() {
        let _guard = setup();

        let t1 = mos::task::create(noop_entry, core::ptr::null_mut(), 10, "ephemeral")
            .expect("create");
        let base = t1.as_ptr() as usize;

        mos::task::terminate(Some(t1));

        // The head word of the freed page points back at the page base.
        let head = unsafe { *(base as *const u32) };
        assert_eq!(head, base as u32);
        assert_eq!(mos::task::find("ephemeral"), None);

        // The next creation reuses the same page.
        let t2 = mos::task::create(noop_entry, core::ptr::null_mut(), 10, "replacement")
            .expect("create");
        assert_eq!(t2.as_ptr() as usize, base);
    }

    #[test]
    fn creation_stops_at_max_task_num() {
        let _guard = setup();

        // The idle task occupies one slot.
        for i in 1..MAX_TASK_NUM {
            mos::task::create(noop_entry, core::ptr::null_mut(), 20, "filler")
                .unwrap_or_else(|e| panic!("task {i} failed: {e:?}"));
        }
        assert_eq!(
            mos::task::create(noop_entry, core::ptr::null_mut(), 20, "overflow"),
            Err(mos::error::KernelError::CapacityExceeded)
        );
    }

    #[test]
    fn delay_parks_on_the_sleeping_list_until_its_tick() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 5, "sleeper")
            .expect("create");
        unsafe { stage_current(t) };

        mos::task::delay(3);
        assert_eq!(unsafe { t.as_ref() }.status, Status::Blocked);

        mos::time::os_tick_handler();
        mos::time::os_tick_handler();
        assert_eq!(unsafe { t.as_ref() }.status, Status::Blocked, "one tick early");

        mos::time::os_tick_handler();
        assert_eq!(unsafe { t.as_ref() }.status, Status::Ready, "due at tick 3");
    }

    #[test]
    fn block_and_resume_move_between_lists() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 7, "worker")
            .expect("create");

        mos::task::block(Some(t));
        assert_eq!(unsafe { t.as_ref() }.status, Status::Blocked);

        mos::task::resume(t);
        assert_eq!(unsafe { t.as_ref() }.status, Status::Ready);

        // Resuming a ready task is a no-op.
        mos::task::resume(t);
        assert_eq!(unsafe { t.as_ref() }.status, Status::Ready);
    }

    #[test]
    fn yield_requests_a_context_switch() {
        let _guard = setup();
        let before = mos::port::switch_requests();
        mos::task::yield_now();
        assert!(mos::port::switch_requests() > before);
    }
}

mod sched_tests {
    use super::*;
    use mos::config::TIME_SLICE;

    #[cfg(not(feature = "sched-round-robin"))]
    #[test]
    fn next_tcb_prefers_priority_then_rotates_spent_quanta() {
        let _guard = setup();

        let a = mos::task::create(noop_entry, core::ptr::null_mut(), 5, "a").unwrap();
        let b = mos::task::create(noop_entry, core::ptr::null_mut(), 10, "b").unwrap();

        mos::sched::next_tcb();
        assert_eq!(mos::kernel::current(), Some(a), "highest priority wins");
        assert_eq!(unsafe { a.as_ref() }.status, Status::Running);

        // An equal-priority peer takes over only once the quantum is spent.
        let a2 = mos::task::create(noop_entry, core::ptr::null_mut(), 5, "a2").unwrap();
        mos::sched::next_tcb();
        assert_eq!(mos::kernel::current(), Some(a), "quantum not yet spent");

        unsafe { (*a.as_ptr()).slice = 0 };
        mos::sched::next_tcb();
        assert_eq!(mos::kernel::current(), Some(a2), "band rotates on empty slice");
        assert_eq!(unsafe { a.as_ref() }.slice, TIME_SLICE, "quantum recharged");

        // `b` never outranks the 5s.
        assert_eq!(unsafe { b.as_ref() }.status, Status::Ready);
    }

    #[cfg(not(feature = "sched-round-robin"))]
    #[test]
    fn any_higher_sees_only_strictly_higher_ready_tasks() {
        let _guard = setup();

        let a = mos::task::create(noop_entry, core::ptr::null_mut(), 8, "a").unwrap();
        unsafe { stage_current(a) };
        assert!(!mos::sched::any_higher(), "alone in the ready set");

        mos::task::create(noop_entry, core::ptr::null_mut(), 8, "peer").unwrap();
        assert!(!mos::sched::any_higher(), "equal priority is not higher");

        mos::task::create(noop_entry, core::ptr::null_mut(), 3, "boss").unwrap();
        assert!(mos::sched::any_higher());
    }

    #[cfg(feature = "sched-round-robin")]
    #[test]
    fn round_robin_rotates_on_every_switch() {
        let _guard = setup();

        let a = mos::task::create(noop_entry, core::ptr::null_mut(), 5, "a").unwrap();
        let b = mos::task::create(noop_entry, core::ptr::null_mut(), 5, "b").unwrap();
        let c = mos::task::create(noop_entry, core::ptr::null_mut(), 5, "c").unwrap();

        mos::sched::next_tcb();
        assert_eq!(mos::kernel::current(), Some(a));
        mos::sched::next_tcb();
        assert_eq!(mos::kernel::current(), Some(b));
        mos::sched::next_tcb();
        assert_eq!(mos::kernel::current(), Some(c));
    }
}

mod sema_tests {
    use super::*;

    #[test]
    fn counter_and_waiting_list_stay_in_step() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 6, "taker").unwrap();
        unsafe { stage_current(t) };

        let sema = Sema::new(1);
        assert_eq!(sema.count(), 1);

        sema.down();
        assert_eq!(sema.count(), 0);
        assert_eq!(sema.waiters(), 0);
        assert_eq!(unsafe { t.as_ref() }.status, Status::Running, "no contention");

        // Second down has no permit: the caller parks and cnt goes negative.
        sema.down();
        assert_eq!(sema.count(), -1);
        assert_eq!(sema.waiters(), 1, "negative count mirrors the waiting list");
        assert_eq!(unsafe { t.as_ref() }.status, Status::Blocked);

        sema.up();
        assert_eq!(sema.count(), 0);
        assert_eq!(sema.waiters(), 0);
        assert_eq!(unsafe { t.as_ref() }.status, Status::Ready, "first waiter woken");

        sema.up();
        assert_eq!(sema.count(), 1);
    }

    #[test]
    fn up_from_isr_skips_the_yield() {
        let _guard = setup();

        let sema = Sema::new(0);
        let before = mos::port::switch_requests();
        sema.up_from_isr();
        assert_eq!(sema.count(), 1);
        assert_eq!(mos::port::switch_requests(), before);
    }

    #[test]
    fn waiters_are_woken_in_priority_order() {
        let _guard = setup();

        let low = mos::task::create(noop_entry, core::ptr::null_mut(), 20, "low").unwrap();
        let high = mos::task::create(noop_entry, core::ptr::null_mut(), 4, "high").unwrap();

        let sema = Sema::new(0);

        unsafe { stage_current(low) };
        sema.down();
        unsafe { stage_current(high) };
        sema.down();
        assert_eq!(sema.count(), -2);

        sema.up();
        assert_eq!(unsafe { high.as_ref() }.status, Status::Ready, "priority first");
        assert_eq!(unsafe { low.as_ref() }.status, Status::Blocked);

        sema.up();
        assert_eq!(unsafe { low.as_ref() }.status, Status::Ready);
    }
}

mod lock_tests {
    use super::*;

    #[test]
    fn acquire_and_release_track_the_holder() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "holder").unwrap();
        unsafe { stage_current(t) };

        let lock = Lock::new();
        assert!(!lock.is_held());
        lock.acquire();
        assert!(lock.is_held());
        lock.release();
        assert!(!lock.is_held());
    }

    #[test]
    #[should_panic(expected = "non-recursive lock re-entered")]
    fn reentry_is_an_invariant_violation() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "holder").unwrap();
        unsafe { stage_current(t) };

        let lock = Lock::new();
        lock.acquire();
        lock.acquire();
    }

    #[test]
    #[should_panic(expected = "released by non-holder")]
    fn release_by_non_holder_is_an_invariant_violation() {
        let _guard = setup();

        let a = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "a").unwrap();
        let b = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "b").unwrap();

        unsafe { stage_current(a) };
        let lock = Lock::new();
        lock.acquire();

        unsafe { stage_current(b) };
        lock.release();
    }
}

mod mutex_tests {
    use super::*;

    #[test]
    fn priority_inheritance_boosts_and_hands_off() {
        let _guard = setup();

        let a = mos::task::create(noop_entry, core::ptr::null_mut(), 10, "a").unwrap();
        let b = mos::task::create(noop_entry, core::ptr::null_mut(), 20, "b").unwrap();
        let c = mos::task::create(noop_entry, core::ptr::null_mut(), 5, "c").unwrap();

        let mtx: Mutex = Mutex::new();

        // B takes the mutex at its own priority.
        unsafe { stage_current(b) };
        mtx.raw_lock();
        assert_eq!(mtx.owner(), Some(b));
        assert_eq!(mtx.hold_count(), 1);

        // A contends: B inherits A's priority, A parks.
        unsafe { stage_current(a) };
        mtx.raw_lock();
        assert_eq!(unsafe { a.as_ref() }.status, Status::Blocked);
        assert_eq!(unsafe { b.as_ref() }.pri, 10, "owner boosted to waiter");
        assert_eq!(unsafe { b.as_ref() }.base_pri, 20, "original remembered");
        assert_eq!(unsafe { c.as_ref() }.pri, 5, "bystander untouched");

        // B releases: priority restored, ownership handed straight to A.
        unsafe { stage_current(b) };
        mtx.raw_unlock();
        assert_eq!(unsafe { b.as_ref() }.pri, 20);
        assert_eq!(mtx.owner(), Some(a), "direct hand-off");
        assert_eq!(mtx.hold_count(), 1);
        assert_eq!(unsafe { a.as_ref() }.status, Status::Ready);
    }

    #[test]
    fn boost_is_raise_only() {
        let _guard = setup();

        let owner = mos::task::create(noop_entry, core::ptr::null_mut(), 5, "owner").unwrap();
        let waiter = mos::task::create(noop_entry, core::ptr::null_mut(), 10, "waiter").unwrap();

        let mtx: Mutex = Mutex::new();
        unsafe { stage_current(owner) };
        mtx.raw_lock();

        unsafe { stage_current(waiter) };
        mtx.raw_lock();
        assert_eq!(
            unsafe { owner.as_ref() }.pri,
            5,
            "a weaker waiter must not drag the owner down"
        );
    }

    #[test]
    fn recursion_counts_to_the_final_unlock() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "nest").unwrap();
        unsafe { stage_current(t) };

        let mtx: Mutex = Mutex::new();
        mtx.raw_lock();
        mtx.raw_lock();
        assert_eq!(mtx.hold_count(), 2);

        mtx.raw_unlock();
        assert!(mtx.is_owned(), "still held after the inner unlock");

        mtx.raw_unlock();
        assert!(!mtx.is_owned());
    }

    #[test]
    #[should_panic(expected = "released by non-holder")]
    fn unlock_by_non_owner_is_an_invariant_violation() {
        let _guard = setup();

        let a = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "a").unwrap();
        let b = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "b").unwrap();

        unsafe { stage_current(a) };
        let mtx: Mutex = Mutex::new();
        mtx.raw_lock();

        unsafe { stage_current(b) };
        mtx.raw_unlock();
    }

    #[test]
    fn guard_protects_data_and_releases_on_drop() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "data").unwrap();
        unsafe { stage_current(t) };

        let counter = Mutex::with(0u32);
        {
            let mut guard = counter.lock();
            *guard += 41;
            *guard += 1;
        }
        assert!(!counter.is_owned());
        assert_eq!(counter.lock_with(|v| *v), 42);
    }
}

mod condvar_tests {
    use super::*;

    #[test]
    fn notify_without_waiters_is_harmless() {
        let _guard = setup();

        let cv = CondVar::new();
        assert!(!cv.has_waiters());
        cv.notify();
        cv.notify_all();
        assert!(!cv.has_waiters());
    }
}

mod barrier_tests {
    use super::*;

    #[test]
    fn a_cohort_of_one_advances_the_generation_every_wait() {
        let _guard = setup();

        let t = mos::task::create(noop_entry, core::ptr::null_mut(), 9, "solo").unwrap();
        unsafe { stage_current(t) };

        let barrier = Barrier::new(1);
        assert_eq!(barrier.generation(), 0);

        barrier.wait();
        assert_eq!(barrier.generation(), 1);

        // Reusable: no stuck count from the previous cohort.
        barrier.wait();
        assert_eq!(barrier.generation(), 2);
    }
}
