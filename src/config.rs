/// Default name given to the dispatcher thread.
pub const DEFAULT_THREAD_NAME: &str = "kairos-timer";

/// Default number of heap slots reserved up front.
pub const DEFAULT_INITIAL_CAPACITY: usize = 64;

/// Settings applied when a [`TimerScheduler`](crate::TimerScheduler) starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Name of the dispatcher thread.
    pub thread_name: String,
    /// Stack size of the dispatcher thread; the platform default when `None`.
    ///
    /// Callbacks run on this thread, so it only needs to be large enough for
    /// them.
    pub stack_size: Option<usize>,
    /// Number of timers the heap can hold before its first reallocation.
    pub initial_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            stack_size: None,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn initial_capacity(mut self, timers: usize) -> Self {
        self.initial_capacity = timers;
        self
    }
}
