/*! Time structures.

The `time` module contains structures used to represent both absolute and relative time, and
the clock from which the protocol threads read the current time.

 - [Instant] is used to represent absolute time.
 - [Duration] is used to represet relative time.
 - [Clock] is the wall-clock service consumed by the stack.

[Instant]: struct.Instant.html
[Duration]: struct.Duration.html
[Clock]: trait.Clock.html
*/
use core::{fmt, ops};
use std::sync::atomic::{AtomicI64, Ordering};

pub use core::time::Duration;

/// A representation of an absolute time value.
///
/// The `Instant` type is a wrapper around a `i64` value that represents a number of
/// milliseconds, monotonically increasing since an arbitrary moment in time, such as the start of
/// the stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    /// Milliseconds since the epoch of the clock.
    pub millis: i64,
}

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Milliseconds passed since the clock was created.
#[derive(Debug)]
pub struct SystemClock {
    origin: std::time::Instant,
}

/// A clock that only moves when told to.
///
/// Makes timer behaviour reproducible in tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl Instant {
    /// Create a new `Instant` from a number of milliseconds.
    pub fn from_millis<T: Into<i64>>(millis: T) -> Instant {
        Instant { millis: millis.into() }
    }

    /// Create a new `Instant` from a number of seconds.
    pub fn from_secs<T: Into<i64>>(secs: T) -> Instant {
        Instant { millis: secs.into() * 1000 }
    }

    /// The fractional number of milliseconds that have passed
    /// since the beginning of time.
    pub fn millis(&self) -> i64 {
        self.millis % 1000
    }

    /// The number of whole seconds that have passed since the
    /// beginning of time.
    pub fn secs(&self) -> i64 {
        self.millis / 1000
    }
}

impl SystemClock {
    /// A clock starting at zero now.
    pub fn new() -> Self {
        SystemClock { origin: std::time::Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        SystemClock::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        let elapsed = self.origin.elapsed();
        Instant::from_millis(elapsed.as_millis() as i64)
    }
}

impl ManualClock {
    /// A clock standing at `start`.
    pub fn new(start: Instant) -> Self {
        ManualClock { millis: AtomicI64::new(start.millis) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Set the clock to some instant, possibly in the past.
    pub fn set(&self, to: Instant) {
        self.millis.store(to.millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:03}s", self.secs(), self.millis())
    }
}

impl ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis + rhs.as_millis() as i64)
    }
}

impl ops::AddAssign<Duration> for Instant {
    fn add_assign(&mut self, rhs: Duration) {
        self.millis += rhs.as_millis() as i64;
    }
}

impl ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Instant {
        Instant::from_millis(self.millis - rhs.as_millis() as i64)
    }
}

/// The time elapsed from `rhs` to `self`, zero if `rhs` is later.
impl ops::Sub<Instant> for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        Duration::from_millis((self.millis - rhs.millis).max(0) as u64)
    }
}
