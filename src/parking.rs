//! Wait queues for `memory.atomic.wait32/64` and `memory.atomic.notify`.
//!
//! One [`ParkingSpot`] belongs to one shared memory; waiters are keyed by
//! byte address. The expected-value check runs under the per-address lock
//! that `notify` also takes, so a notify that lands between the check and
//! the park cannot be lost.

use alloc::sync::Arc;
use hashbrown::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitResult {
    /// Woken by a notify.
    Ok,
    /// The expected value did not match; never parked.
    NotEqual,
    TimedOut,
}

impl WaitResult {
    pub fn as_i32(self) -> i32 {
        match self {
            WaitResult::Ok => 0,
            WaitResult::NotEqual => 1,
            WaitResult::TimedOut => 2,
        }
    }
}

#[derive(Debug, Default)]
struct SpotState {
    /// Threads currently parked on this address.
    parked: u64,
    /// Wake tokens issued by notifies and not yet consumed.
    wakes: u64,
}

#[derive(Debug, Default)]
struct Spot {
    state: Mutex<SpotState>,
    cvar: Condvar,
}

#[derive(Debug, Default)]
pub(crate) struct ParkingSpot {
    spots: Mutex<HashMap<u64, Arc<Spot>>>,
}

impl ParkingSpot {
    /// Parks the calling thread on `addr` until a notify or the timeout.
    ///
    /// `validate` is evaluated under the address lock; when it returns false
    /// the thread never parks and `NotEqual` is returned.
    pub fn wait(
        &self,
        addr: u64,
        validate: impl FnOnce() -> bool,
        timeout: Option<Duration>,
    ) -> WaitResult {
        let spot = self
            .spots
            .lock()
            .unwrap()
            .entry(addr)
            .or_default()
            .clone();

        let mut state = spot.state.lock().unwrap();
        if !validate() {
            drop(state);
            self.release(addr, &spot);
            return WaitResult::NotEqual;
        }

        state.parked += 1;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if state.wakes > 0 {
                state.wakes -= 1;
                state.parked -= 1;
                drop(state);
                self.release(addr, &spot);
                return WaitResult::Ok;
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.parked -= 1;
                        drop(state);
                        self.release(addr, &spot);
                        return WaitResult::TimedOut;
                    }
                    spot.cvar.wait_timeout(state, deadline - now).unwrap().0
                }
                None => spot.cvar.wait(state).unwrap(),
            };
        }
    }

    /// Wakes up to `count` threads parked on `addr`, returning how many wake
    /// tokens were issued. At least one parked thread is woken per issued
    /// token.
    pub fn notify(&self, addr: u64, count: u32) -> u32 {
        let spot = match self.spots.lock().unwrap().get(&addr) {
            Some(spot) => spot.clone(),
            None => return 0,
        };
        let mut state = spot.state.lock().unwrap();
        let issued = u64::from(count).min(state.parked.saturating_sub(state.wakes));
        state.wakes += issued;
        drop(state);
        if issued > 0 {
            spot.cvar.notify_all();
        }
        u32::try_from(issued).unwrap()
    }

    // Drop the map entry once nobody is parked and no token is pending.
    fn release(&self, addr: u64, spot: &Arc<Spot>) {
        let mut spots = self.spots.lock().unwrap();
        let state = spot.state.lock().unwrap();
        if state.parked == 0 && state.wakes == 0 {
            spots.remove(&addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    #[test]
    fn wait_not_equal() {
        let spot = ParkingSpot::default();
        let result = spot.wait(0, || false, None);
        assert_eq!(result, WaitResult::NotEqual);
        assert_eq!(spot.notify(0, 1), 0);
    }

    #[test]
    fn wait_times_out() {
        let spot = ParkingSpot::default();
        let result = spot.wait(0, || true, Some(Duration::from_millis(10)));
        assert_eq!(result, WaitResult::TimedOut);
    }

    #[test]
    fn notify_wakes_waiter() {
        let spot = Arc::new(ParkingSpot::default());
        let cell = Arc::new(AtomicU32::new(0));

        let waiter = {
            let spot = spot.clone();
            let cell = cell.clone();
            thread::spawn(move || {
                spot.wait(
                    8,
                    || cell.load(Ordering::SeqCst) == 0,
                    Some(Duration::from_secs(5)),
                )
            })
        };

        // Keep notifying until the waiter is actually parked.
        cell.store(1, Ordering::SeqCst);
        while spot.notify(8, 1) == 0 {
            if waiter.is_finished() {
                break;
            }
            thread::yield_now();
        }
        let result = waiter.join().unwrap();
        assert!(matches!(result, WaitResult::Ok | WaitResult::NotEqual));
    }
}
