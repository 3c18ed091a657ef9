/// Failure to bring a [`TimerScheduler`](crate::TimerScheduler) up.
///
/// Timer operations themselves never fail: stop and reset report whether the
/// timer was pending as a plain `bool`.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("failed to spawn timer dispatcher thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
