//! Blocking waits, behind a trait so retry and cooldown timing can be tested.
//!
//! Waits are also where an interrupt is noticed: a raised [`InterruptFlag`] cuts
//! a [`ThreadSleeper`] wait short, and callers poll [`Sleeper::interrupted`] to
//! abandon work at their next safe point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared stop request, raised from the Ctrl-C handler. Clones share one flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Something that can block the control thread for a duration.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);

    /// Whether the run has been asked to stop.
    fn interrupted(&self) -> bool {
        false
    }
}

/// Real wall-clock sleeping that wakes early once its flag is raised.
#[derive(Debug, Clone, Default)]
pub struct ThreadSleeper {
    interrupt: InterruptFlag,
}

impl ThreadSleeper {
    pub fn new(interrupt: InterruptFlag) -> Self {
        Self { interrupt }
    }
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.interrupt.is_raised() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }
}

impl<S: Sleeper + ?Sized> Sleeper for &S {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }

    fn interrupted(&self) -> bool {
        (**self).interrupted()
    }
}
