//! The single thread that owns every firing decision.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Weak,
    time::Instant,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::scheduler::Shared;

/// What the dispatcher blocks on after an evaluate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    /// Queue empty: block on the early-wake signal alone.
    Idle,
    /// Sleep until the head deadline or an early-wake signal.
    Until(Instant),
    /// Scheduler shut down or every handle to it dropped: exit the thread.
    Stop,
}

/// Dispatcher loop.
///
/// Only holds `shared` strongly while evaluating. Once the last scheduler
/// and timer handle are gone the wake sender drops with it and the wait below
/// reports disconnection.
pub(crate) fn run(shared: Weak<Shared>, wake_rx: Receiver<()>) {
    log::debug!("timer dispatcher started");

    loop {
        let wait = match shared.upgrade() {
            Some(shared) => evaluate(&shared),
            None => Wait::Stop,
        };

        match wait {
            Wait::Stop => break,
            Wait::Idle => {
                log::trace!("timer queue empty, waiting for wake signal");

                if wake_rx.recv().is_err() {
                    break;
                }
            }
            // A single wait covers both wake sources, so an elapsed sleep and
            // a wake signal racing each other still yield one evaluation.
            Wait::Until(deadline) => match wake_rx.recv_deadline(deadline) {
                Ok(()) => log::trace!("dispatcher woken early"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            },
        }
    }

    log::debug!("timer dispatcher stopped");
}

/// Fire every timer that is due right now, then report how to wait.
fn evaluate(shared: &Shared) -> Wait {
    loop {
        if shared.is_shutdown() {
            return Wait::Stop;
        }

        let now = Instant::now();
        let mut queue = shared.queue.lock();

        let Some(head) = queue.peek() else {
            return Wait::Idle;
        };

        if head.deadline > now {
            return Wait::Until(head.deadline);
        }

        // The callback runs with the lock held; the queue cannot change under it.
        // A panicking callback still counts as fired.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| head.node.fire(now))) {
            log::error!("timer callback panicked: {}", panic_message(&*payload));
        }

        if let Some(fired) = queue.pop_front() {
            log::trace!(
                "timer fired {:?} late, {} still queued",
                now.saturating_duration_since(fired.deadline),
                queue.len()
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
