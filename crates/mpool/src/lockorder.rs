//! Lock-order checking for the two lock levels.
//!
//! The pool mutex and a handle lock are never nested: the pool mutex is
//! released before a handle lock is taken, and no handle lock is held while
//! the pool mutex is taken. Debug builds track what each thread holds and
//! count, per thread, every acquisition that breaks the rule; release builds
//! compile the tracking away.

#[cfg(debug_assertions)]
use std::cell::Cell;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Level {
    Pool,
    Handle,
}

#[cfg(debug_assertions)]
thread_local! {
    static HELD: Cell<[u32; 2]> = const { Cell::new([0, 0]) };
    static VIOLATIONS: Cell<usize> = const { Cell::new(0) };
}

/// Proof that the current thread holds a lock at `level`.
///
/// Acquire it right after the lock and keep it next to the guard; dropping
/// it marks the level as released.
#[derive(Debug)]
pub(crate) struct Held {
    #[cfg(debug_assertions)]
    level: Level,
}

impl Held {
    #[cfg_attr(not(debug_assertions), allow(unused_variables))]
    pub(crate) fn acquire(level: Level) -> Self {
        #[cfg(debug_assertions)]
        HELD.with(|held| {
            let mut counts = held.get();
            let other = match level {
                Level::Pool => counts[Level::Handle as usize],
                Level::Handle => counts[Level::Pool as usize],
            };
            if other > 0 {
                VIOLATIONS.with(|v| v.set(v.get() + 1));
                tracing::error!(?level, "lock acquired while holding the other lock level");
            }
            counts[level as usize] += 1;
            held.set(counts);
        });
        Self {
            #[cfg(debug_assertions)]
            level,
        }
    }
}

impl Drop for Held {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        HELD.with(|held| {
            let mut counts = held.get();
            counts[self.level as usize] -= 1;
            held.set(counts);
        });
    }
}

/// Ordering violations observed on the current thread so far.
#[cfg(all(test, debug_assertions))]
pub(crate) fn violations() -> usize {
    VIOLATIONS.with(Cell::get)
}
