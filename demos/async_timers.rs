//! Async executor demo - coroutines over one kernel task
//!
//! Spawns two coroutines that tick at different periods plus a plain
//! posted callback. Everything runs on the "async/exec" task; the rest
//! of the system keeps preemptive scheduling.
//!
//! On hardware, build with the frame pool so no global allocator is
//! needed:
//!
//! ```text
//! cargo build --target thumbv7em-none-eabihf --example async_timers \
//!     --no-default-features --features async-pool,defmt
//! ```

#![cfg_attr(target_arch = "arm", no_std)]
#![cfg_attr(target_arch = "arm", no_main)]

#[cfg(target_arch = "arm")]
#[allow(unused_variables)]
mod demo {
    use cortex_m_rt::entry;

    use mos::exec::{self, coro, FixedFn};
    use mos::info;

    async fn beat(label: &'static str, period: u32) {
        let mut count = 0u32;
        loop {
            coro::delay(period).await;
            count += 1;
            info!("[{=str}] beat #{=u32}", label, count);
        }
    }

    fn boot_task(_: *mut ()) {
        coro::spawn(beat("fast", 100));
        coro::spawn(beat("slow", 1000));

        exec::delay_ms(
            5000,
            FixedFn::new(|| {
                info!("five seconds in, printing tasks");
                mos::task::print_all();
            }),
        );

        mos::task::terminate(None);
    }

    #[entry]
    fn main() -> ! {
        info!("async timers demo");

        mos::os_init().expect("kernel init failed");

        // The executor task is armed lazily by the first post; boot_task
        // just seeds the work.
        mos::task::create(boot_task, core::ptr::null_mut(), 30, "boot").unwrap();

        mos::os_start().expect("kernel start failed");

        loop {
            mos::port::wfi();
        }
    }
}

#[cfg(not(target_arch = "arm"))]
fn main() {}
