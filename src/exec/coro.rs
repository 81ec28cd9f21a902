//! Stackless coroutine glue
//!
//! Coroutines are `async` blocks driven by the executor. [`spawn`] parks
//! the state machine in a frame (heap or fixed-block pool) headed by
//! type-erased poll/drop entry points; its waker posts a re-poll thunk to
//! the executor, which is how a completed awaitable transfers control
//! back to the suspended coroutine. [`CallbackAwaiter`] turns any
//! callback-taking function into a suspension point.

use core::alloc::Layout;
use core::future::Future;
use core::marker::PhantomPinned;
use core::pin::Pin;
use core::ptr::{self, NonNull};
use core::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::exec::pool::{frame_alloc, frame_dealloc};
use crate::exec::{self, FixedFn};
use crate::types::Tick;

#[repr(C)]
struct Header {
    poll: unsafe fn(NonNull<Header>),
}

#[repr(C)]
struct Frame<F: Future<Output = ()>> {
    header: Header,
    fut: F,
}

static WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(clone_waker, wake_waker, wake_waker, drop_waker);

fn raw_waker(header: NonNull<Header>) -> RawWaker {
    RawWaker::new(header.as_ptr() as *const (), &WAKER_VTABLE)
}

unsafe fn clone_waker(p: *const ()) -> RawWaker {
    RawWaker::new(p, &WAKER_VTABLE)
}

/// Waking a coroutine posts its re-poll thunk; the continuation runs on
/// the executor's next cycle, never inline in the waker.
unsafe fn wake_waker(p: *const ()) {
    let header = unsafe { NonNull::new_unchecked(p as *mut Header) };
    exec::post(FixedFn::new(move || unsafe {
        ((*header.as_ptr()).poll)(header)
    }));
}

unsafe fn drop_waker(_: *const ()) {}

unsafe fn poll_frame<F: Future<Output = ()> + 'static>(header: NonNull<Header>) {
    let frame = header.as_ptr() as *mut Frame<F>;
    let waker = unsafe { Waker::from_raw(raw_waker(header)) };
    let mut cx = Context::from_waker(&waker);
    let fut = unsafe { Pin::new_unchecked(&mut (*frame).fut) };
    if fut.poll(&mut cx).is_ready() {
        unsafe {
            ptr::drop_in_place(frame);
            frame_dealloc(header.cast::<u8>(), Layout::new::<Frame<F>>());
        }
    }
}

/// Launch a coroutine.
///
/// The future moves into a frame and its first poll is queued; like every
/// posted work item it runs on the executor task, not in the caller.
pub fn spawn<F: Future<Output = ()> + 'static>(fut: F) {
    let mem = frame_alloc(Layout::new::<Frame<F>>());
    let frame = mem.cast::<Frame<F>>();
    unsafe {
        ptr::write(
            frame.as_ptr(),
            Frame {
                header: Header {
                    poll: poll_frame::<F>,
                },
                fut,
            },
        );
    }
    let header = frame.cast::<Header>();
    exec::post(FixedFn::new(move || unsafe {
        ((*header.as_ptr()).poll)(header)
    }));
}

/// Completion handle given to the callback side of a [`CallbackAwaiter`]
///
/// Stores the value into the suspended coroutine and resumes it.
pub struct ResultSink<T: 'static> {
    slot: NonNull<Option<T>>,
    waker: Waker,
}

impl<T> Clone for ResultSink<T> {
    fn clone(&self) -> Self {
        ResultSink {
            slot: self.slot,
            waker: self.waker.clone(),
        }
    }
}

impl<T> ResultSink<T> {
    /// Deliver the value and wake the awaiting coroutine.
    pub fn complete(&self, value: T) {
        unsafe { *self.slot.as_ptr() = Some(value) };
        self.waker.wake_by_ref();
    }
}

/// Adapter from callback style to `await` style
///
/// Awaiting calls `register` once with a [`ResultSink`]; the coroutine
/// stays suspended until some context calls `complete` on it.
pub struct CallbackAwaiter<T: 'static, F: FnOnce(ResultSink<T>)> {
    register: Option<F>,
    result: Option<T>,
    // The sink holds a raw pointer to `result`.
    _pin: PhantomPinned,
}

impl<T, F: FnOnce(ResultSink<T>)> CallbackAwaiter<T, F> {
    pub fn new(register: F) -> Self {
        CallbackAwaiter {
            register: Some(register),
            result: None,
            _pin: PhantomPinned,
        }
    }
}

impl<T, F: FnOnce(ResultSink<T>)> Future for CallbackAwaiter<T, F> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(value) = this.result.take() {
            return Poll::Ready(value);
        }

        if let Some(register) = this.register.take() {
            let sink = ResultSink {
                slot: NonNull::from(&mut this.result),
                waker: cx.waker().clone(),
            };
            register(sink);
            // The callback may have completed synchronously.
            if let Some(value) = this.result.take() {
                return Poll::Ready(value);
            }
        }

        Poll::Pending
    }
}

/// Suspend the calling coroutine for `ticks` system ticks.
pub async fn delay(ticks: Tick) {
    CallbackAwaiter::new(move |sink: ResultSink<()>| {
        exec::delay_ticks(ticks, FixedFn::new(move || sink.complete(())));
    })
    .await
}

/// Let the executor finish its cycle, resuming on the next one.
pub async fn yield_once() {
    CallbackAwaiter::new(|sink: ResultSink<()>| {
        exec::post(FixedFn::new(move || sink.complete(())));
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::critical::IrqGuard;
    use crate::kernel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn coroutines_chain_awaits_across_polls() {
        let _lock = exec::TEST_LOCK.lock().unwrap();
        {
            let guard = IrqGuard::new();
            exec::reset(&guard);
        }

        static STAGE: AtomicUsize = AtomicUsize::new(0);
        STAGE.store(0, Ordering::SeqCst);

        spawn(async {
            STAGE.store(1, Ordering::SeqCst);
            yield_once().await;
            STAGE.store(2, Ordering::SeqCst);
        });

        assert_eq!(STAGE.load(Ordering::SeqCst), 0, "spawn is lazy");
        assert!(exec::poll());
        assert_eq!(STAGE.load(Ordering::SeqCst), 1, "suspended at the yield");
        assert!(exec::poll()); // completion thunk wakes the coroutine
        assert!(exec::poll()); // coroutine resumes past the yield
        assert_eq!(STAGE.load(Ordering::SeqCst), 2);
        assert!(!exec::poll());
    }

    #[test]
    fn callback_awaiter_carries_a_value() {
        let _lock = exec::TEST_LOCK.lock().unwrap();
        {
            let guard = IrqGuard::new();
            exec::reset(&guard);
        }

        static GOT: AtomicUsize = AtomicUsize::new(0);
        GOT.store(0, Ordering::SeqCst);

        spawn(async {
            let value: usize = CallbackAwaiter::new(|sink: ResultSink<usize>| {
                // Complete through a posted callback, like a driver would.
                exec::post(FixedFn::new(move || sink.complete(42)));
            })
            .await;
            GOT.store(value, Ordering::SeqCst);
        });

        assert!(exec::poll()); // runs the coroutine up to the await
        assert!(exec::poll()); // runs the completion callback
        assert!(exec::poll()); // resumes the coroutine with the value
        assert_eq!(GOT.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn delayed_coroutine_fires_only_after_its_tick() {
        let _lock = exec::TEST_LOCK.lock().unwrap();
        {
            let guard = IrqGuard::new();
            exec::reset(&guard);
        }

        static DONE: AtomicUsize = AtomicUsize::new(0);
        DONE.store(0, Ordering::SeqCst);

        kernel::KERNEL.tick_set(100);
        spawn(async {
            delay(5).await;
            DONE.store(1, Ordering::SeqCst);
        });

        assert!(exec::poll()); // coroutine parks itself in the sleepers
        assert!(!exec::poll());
        assert_eq!(DONE.load(Ordering::SeqCst), 0);

        kernel::KERNEL.tick_set(105);
        assert!(exec::poll()); // wake thunk posts the resume
        assert!(exec::poll()); // coroutine finishes
        assert_eq!(DONE.load(Ordering::SeqCst), 1);

        kernel::KERNEL.tick_set(0);
    }
}
