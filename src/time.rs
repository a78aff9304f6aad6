//! Scheduler ticks and hardware polling
//!
//! Drivers never read a wall clock. Timestamps are scheduler ticks supplied
//! by the board through [`Clock`], and every busy-wait on a hardware flag goes
//! through [`poll_until`] with an explicit [`PollBudget`].

/// Scheduler tick count (wraps)
pub type Tick = u32;

/// Scheduler ticks per second
pub const HZ: Tick = 100;

/// Time services provided by the kernel/board
pub trait Clock {
    /// Current scheduler tick
    fn current_tick(&self) -> Tick;

    /// Block the calling thread for at least `ticks` ticks
    fn sleep(&self, ticks: Tick);

    /// Called once per iteration of a hardware busy-wait
    ///
    /// Real hardware typically spins for about a microsecond here.
    fn poll_pause(&self) {
        core::hint::spin_loop();
    }
}

/// Returns true if tick `a` lies strictly before tick `b` (wrap-safe)
#[inline]
pub const fn tick_before(a: Tick, b: Tick) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// How long a busy-wait may spin before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollBudget {
    /// Give up after this many polls
    Polls(u32),
    /// Spin until the condition holds, however long that takes
    Unbounded,
}

/// Spin until `done` returns true or the budget runs out
///
/// Returns `true` if the condition was met.
pub fn poll_until<C, F>(clock: &C, budget: PollBudget, mut done: F) -> bool
where
    C: Clock + ?Sized,
    F: FnMut() -> bool,
{
    match budget {
        PollBudget::Polls(limit) => {
            for _ in 0..limit {
                if done() {
                    return true;
                }
                clock.poll_pause();
            }
            done()
        }
        PollBudget::Unbounded => {
            while !done() {
                clock.poll_pause();
            }
            true
        }
    }
}
