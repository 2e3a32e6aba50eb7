use std::time::{SystemTime, UNIX_EPOCH};

/// A trait for wall-clock time sources used to stamp released ids.
///
/// Cooldown deadlines are persisted as absolute timestamps, so the source
/// must agree across cluster members and survive restarts. The unit is
/// **seconds** since the Unix epoch.
///
/// # Example
///
/// ```
/// use idpool::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_secs(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_secs(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in seconds since the Unix epoch.
    fn current_secs(&self) -> u64;
}

/// A [`TimeSource`] backed by [`SystemTime`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_secs(&self) -> u64 {
        // A clock set before 1970 reports zero, which only makes released ids
        // wait longer.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs())
    }
}

impl<T: TimeSource + ?Sized> TimeSource for std::sync::Arc<T> {
    fn current_secs(&self) -> u64 {
        (**self).current_secs()
    }
}
