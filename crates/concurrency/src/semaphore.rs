//! FIFO counting semaphore for partition admission
//!
//! Readers and writers take one permit; close and migration take the whole
//! pool. Waiters are served strictly in arrival order, so a bulk acquirer that
//! is waiting for in-flight holders to drain also blocks every later single
//! acquirer. That ordering is what makes a full-pool acquisition a drain.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct State {
    available: usize,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

/// Counting semaphore with FIFO hand-off
#[derive(Debug)]
pub struct AdmissionSemaphore {
    permits: usize,
    state: Mutex<State>,
    changed: Condvar,
}

impl AdmissionSemaphore {
    /// Create a semaphore holding `permits` permits
    pub fn new(permits: usize) -> Self {
        Self {
            permits,
            state: Mutex::new(State {
                available: permits,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// Total pool size
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Permits not currently held
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Block until `n` permits are held by the caller.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the pool size; such a request could never be served.
    pub fn acquire(&self, n: usize) {
        self.acquire_until(n, None);
    }

    /// Try to take `n` permits within `timeout`.
    ///
    /// Returns false on timeout, in which case nothing is held and the caller's
    /// place in line is given up.
    pub fn try_acquire_for(&self, n: usize, timeout: Duration) -> bool {
        self.acquire_until(n, Some(Instant::now() + timeout))
    }

    /// Return `n` permits to the pool
    pub fn release(&self, n: usize) {
        let mut state = self.state.lock();
        state.available += n;
        debug_assert!(state.available <= self.permits, "released more permits than held");
        drop(state);
        self.changed.notify_all();
    }

    fn acquire_until(&self, n: usize, deadline: Option<Instant>) -> bool {
        assert!(
            n <= self.permits,
            "requested {} permits from a pool of {}",
            n,
            self.permits
        );
        let mut state = self.state.lock();
        if state.waiters.is_empty() && state.available >= n {
            state.available -= n;
            return true;
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            if state.waiters.front() == Some(&ticket) && state.available >= n {
                state.waiters.pop_front();
                state.available -= n;
                drop(state);
                // The next waiter may be satisfiable with what is left
                self.changed.notify_all();
                return true;
            }
            match deadline {
                None => self.changed.wait(&mut state),
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out()
                        && !(state.waiters.front() == Some(&ticket) && state.available >= n)
                    {
                        state.waiters.retain(|t| *t != ticket);
                        drop(state);
                        self.changed.notify_all();
                        return false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let sem = AdmissionSemaphore::new(4);
        sem.acquire(1);
        sem.acquire(2);
        assert_eq!(sem.available(), 1);
        sem.release(3);
        assert_eq!(sem.available(), 4);
    }

    #[test]
    fn test_try_acquire_times_out() {
        let sem = AdmissionSemaphore::new(2);
        sem.acquire(1);
        assert!(!sem.try_acquire_for(2, Duration::from_millis(20)));
        assert_eq!(sem.available(), 1);
        assert!(sem.try_acquire_for(1, Duration::from_millis(20)));
        assert_eq!(sem.available(), 0);
    }

    #[test]
    fn test_timed_out_waiter_leaves_queue() {
        let sem = AdmissionSemaphore::new(2);
        sem.acquire(1);
        assert!(!sem.try_acquire_for(2, Duration::from_millis(10)));
        // The abandoned bulk request must not block later single acquirers
        assert!(sem.try_acquire_for(1, Duration::from_millis(10)));
    }

    #[test]
    #[should_panic(expected = "requested")]
    fn test_oversized_request_panics() {
        AdmissionSemaphore::new(1).acquire(2);
    }
}
