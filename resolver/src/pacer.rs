//! Outbound call pacing for a single upstream.
//!
//! The pacer is a leaky bucket holding one call: every call reserves the
//! next free slot, at least `min_interval` after the previous reservation,
//! and sleeps until that slot. A 429 from the upstream pushes every future
//! slot past the end of a cooldown window.
//!
//! All timing goes through `tokio::time`, so tests can pause and advance the
//! clock instead of sleeping for real.

use parking_lot::Mutex;
use tokio::time::{Duration, Instant, sleep_until};

pub struct Pacer {
    min_interval: Duration,
    cooldown: Duration,
    state: Mutex<PacerState>,
}

#[derive(Default)]
struct PacerState {
    // Earliest instant the next call may start
    next_slot: Option<Instant>,
    cooldown_until: Option<Instant>,
}

impl Pacer {
    pub fn new(min_interval: Duration, cooldown: Duration) -> Self {
        Pacer {
            min_interval,
            cooldown,
            state: Mutex::new(PacerState::default()),
        }
    }

    /// Waits until the caller may send one request and returns how long
    /// it waited.
    ///
    /// A caller that wakes up inside a cooldown started while it was
    /// waiting reserves a new slot after the cooldown.
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();

        loop {
            let now = Instant::now();
            let slot = self.reserve(now);
            if slot > now {
                sleep_until(slot).await;
            }

            if !self.is_cooling_down() {
                return start.elapsed();
            }
        }
    }

    /// Blocks every upstream call until the cooldown elapses.
    pub fn start_cooldown(&self) {
        let until = Instant::now() + self.cooldown;
        let mut state = self.state.lock();
        state.cooldown_until = Some(match state.cooldown_until {
            Some(existing) => existing.max(until),
            None => until,
        });
    }

    pub fn is_cooling_down(&self) -> bool {
        let mut state = self.state.lock();
        match state.cooldown_until {
            Some(until) if until > Instant::now() => true,
            Some(_) => {
                state.cooldown_until = None;
                false
            }
            None => false,
        }
    }

    fn reserve(&self, now: Instant) -> Instant {
        let mut state = self.state.lock();

        let mut slot = now;
        if let Some(next) = state.next_slot {
            slot = slot.max(next);
        }
        if let Some(until) = state.cooldown_until {
            slot = slot.max(until);
        }

        state.next_slot = Some(slot + self.min_interval);
        slot
    }
}
