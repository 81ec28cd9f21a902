//! Priority inversion demo - mutex priority inheritance
//!
//! Three tasks: high(10), mid(15), low(20). Low holds the mutex while
//! high contends, so low runs boosted to 10 until it releases; mid's
//! busy loop cannot starve the hand-off.

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
#[allow(unused_variables)]
mod demo {
    use core::sync::atomic::{AtomicU32, Ordering};

    use cortex_m_rt::entry;

    use mos::info;
    use mos::sync::Mutex;
    use mos::task;

    static MTX: Mutex = Mutex::new();
    static HIGH_RUNS: AtomicU32 = AtomicU32::new(0);
    static LOW_RUNS: AtomicU32 = AtomicU32::new(0);

    fn high_task(_: *mut ()) {
        task::delay(50);
        loop {
            let n = HIGH_RUNS.fetch_add(1, Ordering::Relaxed) + 1;
            MTX.lock_with(|_| {
                info!("[high] acquired #{=u32}", n);
            });
            task::delay(100);
        }
    }

    fn mid_task(_: *mut ()) {
        loop {
            for _ in 0..50_000 {
                mos::port::nop();
            }
            task::delay(10);
        }
    }

    fn low_task(_: *mut ()) {
        loop {
            let n = LOW_RUNS.fetch_add(1, Ordering::Relaxed) + 1;
            MTX.lock_with(|_| {
                info!("[low] holding #{=u32}", n);
                for _ in 0..100_000 {
                    mos::port::nop();
                }
            });
            task::delay(200);
        }
    }

    #[entry]
    fn main() -> ! {
        info!("priority inversion demo: high(10) mid(15) low(20)");

        mos::os_init().expect("kernel init failed");

        task::create(low_task, core::ptr::null_mut(), 20, "low").unwrap();
        task::create(mid_task, core::ptr::null_mut(), 15, "mid").unwrap();
        task::create(high_task, core::ptr::null_mut(), 10, "high").unwrap();

        mos::os_start().expect("kernel start failed");

        loop {
            mos::port::wfi();
        }
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
