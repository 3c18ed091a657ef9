use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::{
    config::SchedulerConfig,
    dispatcher,
    error::SchedulerError,
    heap::TimerHeap,
    timer::{send_time, Callback, TimerHandle, TimerNode},
};

/// Deadlines past what `Instant` can represent are clamped to this horizon.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// State shared by the dispatcher and every caller.
pub(crate) struct Shared {
    pub(crate) queue: Mutex<TimerHeap>,
    // Capacity-1 early-wake signal, extra requests coalesce. The dispatcher
    // owns the receiving side.
    wake_tx: Sender<()>,
    shutdown: AtomicBool,
}

impl Shared {
    fn new(capacity: usize) -> (Self, Receiver<()>) {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);

        let shared = Self {
            queue: Mutex::new(TimerHeap::with_capacity(capacity)),
            wake_tx,
            shutdown: AtomicBool::new(false),
        };

        (shared, wake_rx)
    }

    /// Ask the dispatcher to re-evaluate; never blocks.
    fn reschedule(&self) {
        let _ = self.wake_tx.try_send(());
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn insert_locked(&self, queue: &mut TimerHeap, node: Arc<TimerNode>, delay: Duration) {
        let deadline = deadline_after(delay);

        // Only a new earliest timer can shorten the dispatcher's sleep.
        if queue.push(deadline, node) == 0 {
            self.reschedule();
        }

        log::trace!("timer armed for {:?}, {} queued", delay, queue.len());
    }
}

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();

    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Timer scheduler: one heap, one lock and one dispatcher thread.
///
/// Cheap to clone; clones share the same dispatcher. Every [`TimerHandle`]
/// keeps its scheduler alive. Once all clones and handles are dropped the
/// dispatcher exits as if [`shutdown`](Self::shutdown) had been called.
#[derive(Clone)]
pub struct TimerScheduler {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl TimerScheduler {
    /// Start a scheduler with [`SchedulerConfig::default`].
    pub fn start() -> Result<Self, SchedulerError> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Start a scheduler, spawning its dispatcher thread.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let (shared, wake_rx) = Shared::new(config.initial_capacity);
        let shared = Arc::new(shared);

        let mut builder = std::thread::Builder::new().name(config.thread_name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let dispatcher_shared = Arc::downgrade(&shared);
        let worker = builder
            .spawn(move || dispatcher::run(dispatcher_shared, wake_rx))
            .map_err(|source| SchedulerError::Spawn {
                name: config.thread_name.clone(),
                source,
            })?;

        log::debug!("timer scheduler '{}' started", config.thread_name);

        Ok(Self {
            shared,
            worker: Arc::new(Mutex::new(Some(worker))),
        })
    }

    /// Stop the dispatcher and wait for its thread to exit.
    ///
    /// Timers still queued never fire. Calling this more than once, or from
    /// any clone, is harmless.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.reschedule();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::warn!("timer dispatcher panicked");
            }

            log::debug!("timer scheduler stopped");
        }
    }

    /// Whether the dispatcher thread is still firing timers.
    pub fn is_running(&self) -> bool {
        !self.shared.is_shutdown()
            && self
                .worker
                .lock()
                .as_ref()
                .map_or(false, |worker| !worker.is_finished())
    }

    /// Number of queued timers.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Arm a new timer that runs `callback` after `delay`.
    ///
    /// See [`Callback`] for what the callback may do.
    pub fn create<F>(&self, delay: Duration, callback: F) -> (TimerHandle, Receiver<Instant>)
    where
        F: Fn(Instant, &Sender<Instant>) + Send + Sync + 'static,
    {
        let (handle, notify) = self.create_stopped(callback);

        let mut queue = self.shared.queue.lock();
        self.shared.insert_locked(&mut queue, handle.node.clone(), delay);

        (handle, notify)
    }

    /// Create a timer without arming it; arm it later with
    /// [`TimerHandle::reset`].
    pub fn create_stopped<F>(&self, callback: F) -> (TimerHandle, Receiver<Instant>)
    where
        F: Fn(Instant, &Sender<Instant>) + Send + Sync + 'static,
    {
        let callback: Callback = Box::new(callback);
        let (node, notify) = TimerNode::new(callback);

        (TimerHandle::new(node, self.clone(), notify.clone()), notify)
    }

    /// Arm a timer that posts its firing time to the returned receiver.
    pub fn timer(&self, delay: Duration) -> (TimerHandle, Receiver<Instant>) {
        self.create(delay, send_time)
    }

    /// Receiver that gets the firing time once, after `delay`.
    pub fn after(&self, delay: Duration) -> Receiver<Instant> {
        self.timer(delay).1
    }

    /// Run `f` on the dispatcher thread after `delay`.
    ///
    /// The notification buffer of the returned handle stays empty.
    pub fn after_fn<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: Fn(Instant) + Send + Sync + 'static,
    {
        self.create(delay, move |now, _| f(now)).0
    }

    /// Remove `timer` from the queue; `true` if it was pending.
    ///
    /// Never waits for a callback already in flight.
    pub fn stop(&self, timer: &TimerHandle) -> bool {
        if !self.owns(timer) {
            return false;
        }

        let removed = self.shared.queue.lock().remove(&timer.node).is_some();

        log::trace!("timer stop, removed: {}", removed);

        removed
    }

    /// Rearm `timer` to fire after `delay`; `true` if it was pending.
    ///
    /// On return the notification buffer holds nothing from a prior arm.
    /// A timer created by another scheduler is left untouched.
    pub fn reset(&self, timer: &TimerHandle, delay: Duration) -> bool {
        if !self.owns(timer) {
            return false;
        }

        let mut queue = self.shared.queue.lock();

        let was_active = queue.remove(&timer.node).is_some();

        // Drain under the lock: a concurrent firing of the old arm can't land
        // after this point, and a firing of the new arm can't land before it.
        if timer.node.drain() {
            log::trace!("discarded notification from previous arm");
        }

        self.shared.insert_locked(&mut queue, timer.node.clone(), delay);

        was_active
    }

    fn owns(&self, timer: &TimerHandle) -> bool {
        Arc::ptr_eq(&self.shared, &timer.scheduler.shared)
    }

    pub(crate) fn deadline_of(&self, timer: &TimerHandle) -> Option<Instant> {
        if !self.owns(timer) {
            return None;
        }

        self.shared.queue.lock().deadline_of(&timer.node)
    }
}

impl AsMut<TimerScheduler> for TimerScheduler {
    fn as_mut(&mut self) -> &mut TimerScheduler {
        self
    }
}

impl fmt::Debug for TimerScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerScheduler")
            .field("pending", &self.shared.queue.try_lock().map(|queue| queue.len()))
            .field("running", &self.is_running())
            .finish()
    }
}

/// Access the process-wide scheduler, starting it on first use.
///
/// It runs for the rest of the process and is never shut down.
///
/// # Panics
///
/// Panics if the dispatcher thread cannot be spawned, as
/// [`std::thread::spawn`] does.
pub fn global_scheduler() -> &'static TimerScheduler {
    use once_cell::sync::OnceCell;

    static INSTANCE: OnceCell<TimerScheduler> = OnceCell::new();

    INSTANCE.get_or_init(|| {
        TimerScheduler::start()
            .unwrap_or_else(|err| panic!("failed to start global timer scheduler: {err}"))
    })
}
