//! Generation barrier
//!
//! Tasks rendezvous in cohorts of `total`. Each cohort is a generation:
//! arrivals snapshot the generation and wait for it to change, so a fast
//! task re-entering the barrier lands in the next cohort instead of
//! corrupting the count of the current one.

use crate::sync::cond::CondVar;
use crate::sync::mutex::Mutex;

struct BarrierState {
    cnt: i32,
    gen: u32,
}

/// Reusable generation barrier
pub struct Barrier {
    mtx: Mutex<BarrierState>,
    cv: CondVar,
    total: i32,
}

impl Barrier {
    /// Create a barrier for cohorts of `total` tasks.
    pub const fn new(total: i32) -> Self {
        assert!(total > 0, "barrier needs at least one participant");
        Barrier {
            mtx: Mutex::with(BarrierState { cnt: 0, gen: 0 }),
            cv: CondVar::new(),
            total,
        }
    }

    /// Arrive and wait for the rest of the cohort.
    ///
    /// The last arrival resets the count, advances the generation, and
    /// releases everyone.
    pub fn wait(&self) {
        self.mtx.raw_lock();
        let st = unsafe { &mut *self.mtx.data_ptr() };
        let my_gen = st.gen;

        st.cnt += 1;
        if st.cnt == self.total {
            st.cnt = 0;
            st.gen = st.gen.wrapping_add(1);
            self.mtx.raw_unlock();
            self.cv.notify_all();
        } else {
            let gen_cell = self.mtx.data_ptr();
            self.cv
                .wait(&self.mtx, || unsafe { (*gen_cell).gen } != my_gen);
            self.mtx.raw_unlock();
        }
    }

    /// The generation currently gathering.
    pub fn generation(&self) -> u32 {
        self.mtx.lock_with(|st| st.gen)
    }
}
