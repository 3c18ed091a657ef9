//! Timer facility that multiplexes any number of timers onto a single
//! dispatcher thread.
//!
//! Timers live in a 4-ary min-heap keyed by deadline. Callers arm, stop and
//! rearm timers from any thread; the dispatcher sleeps until the earliest
//! deadline (or until an earlier timer is inserted), fires everything that is
//! due and goes back to sleep.
//!
//! ```no_run
//! use std::time::Duration;
//! use kairos_timer::TimerScheduler;
//!
//! let scheduler = TimerScheduler::start().unwrap();
//!
//! let (timer, fired) = scheduler.timer(Duration::from_millis(50));
//! assert!(timer.reset(Duration::from_millis(10)));
//! fired.recv().unwrap();
//!
//! scheduler.shutdown();
//! ```
use std::{future::Future, time::Duration};

/// Timer service provider trait.
pub trait Timer: Future {
    /// Create a timer future backed by the global scheduler.
    ///
    /// # Parameters
    /// * `duration` - Timer expiration interval
    fn new(duration: Duration) -> Self;
}

/// Timer service provider trait bound to an explicit scheduler.
pub trait TimerWithContext: Timer {
    /// Scheduler the timer is armed on.
    type Context;
    /// Create a timer future on the given scheduler.
    ///
    /// # Parameters
    /// * `duration` - Timer expiration interval
    /// * `context` - See [`TimerWithContext::Context`]
    fn new_with_context<C>(duration: Duration, context: C) -> Self
    where
        C: AsMut<Self::Context>;
}

mod config;
mod dispatcher;
mod error;
mod future;
mod heap;
mod scheduler;
mod timer;

pub use config::SchedulerConfig;
pub use crossbeam_channel::{Receiver, Sender};
pub use error::SchedulerError;
pub use future::Timeout;
pub use scheduler::{global_scheduler, TimerScheduler};
pub use timer::{send_time, Callback, TimerHandle};
