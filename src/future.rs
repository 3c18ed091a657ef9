use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    scheduler::{global_scheduler, TimerScheduler},
    timer::{send_time, TimerHandle},
};

/// Future that resolves once its timer fires.
///
/// Dropping a pending `Timeout` stops the underlying timer.
pub struct Timeout {
    timer: TimerHandle,
    waker: Arc<Mutex<Option<Waker>>>,
    fired: bool,
}

impl Timeout {
    /// Create a timeout on `scheduler`.
    pub fn new_in(scheduler: &TimerScheduler, duration: Duration) -> Self {
        let waker: Arc<Mutex<Option<Waker>>> = Arc::default();

        let fire_waker = waker.clone();
        let (timer, _) = scheduler.create(duration, move |now, notify| {
            send_time(now, notify);

            if let Some(waker) = fire_waker.lock().take() {
                log::trace!("wake up timeout");
                waker.wake();
            }
        });

        Self {
            timer,
            waker,
            fired: false,
        }
    }

    /// Rearm for `duration` from now; an already fired timeout becomes
    /// pending again.
    pub fn reset(&mut self, duration: Duration) {
        // The timer reset drops a notification left by the previous arm.
        self.timer.reset(duration);
        self.fired = false;
    }
}

impl Future for Timeout {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.fired {
            return Poll::Ready(());
        }

        // Register before checking, a firing in between then finds the waker.
        {
            let mut waker = self.waker.lock();
            match &mut *waker {
                Some(waker) if waker.will_wake(cx.waker()) => {}
                waker => *waker = Some(cx.waker().clone()),
            }
        }

        if self.timer.receiver().try_recv().is_ok() {
            self.fired = true;
            return Poll::Ready(());
        }

        Poll::Pending
    }
}

impl Drop for Timeout {
    fn drop(&mut self) {
        if !self.fired {
            self.timer.stop();
        }
    }
}

impl crate::Timer for Timeout {
    fn new(duration: Duration) -> Self {
        Self::new_in(global_scheduler(), duration)
    }
}

impl crate::TimerWithContext for Timeout {
    type Context = TimerScheduler;

    fn new_with_context<C>(duration: Duration, mut context: C) -> Self
    where
        C: AsMut<Self::Context>,
    {
        Self::new_in(context.as_mut(), duration)
    }
}
