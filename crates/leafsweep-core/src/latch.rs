//! Latch: exclusive, non-reentrant, FIFO node latch
//!
//! A latch is a short-held mutual-exclusion primitive on one tree node. It
//! is not a transactional lock: nothing detects cycles, and a thread that
//! latches out of top-down order can deadlock. Reentrant acquisition is a
//! caller bug and fails instead of being granted.
//!
//! Ownership is tracked explicitly (owner thread plus a FIFO of waiting
//! threads) so that release hands the latch straight to the oldest waiter
//! and tests can ask who holds it.

use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

use crate::error::{SweepError, SweepResult};

thread_local! {
    static LATCHES_HELD: Cell<usize> = const { Cell::new(0) };
}

/// Number of latch acquisitions (exclusive or shared) the current thread
/// has not yet released. Diagnostic only.
pub fn latches_held() -> usize {
    LATCHES_HELD.with(|held| held.get())
}

pub(crate) fn note_latch() {
    LATCHES_HELD.with(|held| held.set(held.get() + 1));
}

pub(crate) fn unnote_latch() {
    LATCHES_HELD.with(|held| held.set(held.get().saturating_sub(1)));
}

/// Snapshot of latch acquisition statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LatchStats {
    /// Blocking acquires that found the latch free with nobody waiting
    pub acquires_no_waiters: u64,
    /// Acquires (blocking or not) refused because the caller already owned it
    pub acquires_self_owned: u64,
    /// Blocking acquires that had to wait
    pub acquires_with_contention: u64,
    /// Successful non-blocking acquires
    pub acquire_no_wait_successful: u64,
    /// Failed non-blocking acquires
    pub acquire_no_wait_unsuccessful: u64,
    /// Successful releases
    pub releases: u64,
}

#[derive(Default)]
struct Counters {
    acquires_no_waiters: AtomicU64,
    acquires_self_owned: AtomicU64,
    acquires_with_contention: AtomicU64,
    acquire_no_wait_successful: AtomicU64,
    acquire_no_wait_unsuccessful: AtomicU64,
    releases: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LatchStats {
        LatchStats {
            acquires_no_waiters: self.acquires_no_waiters.load(Ordering::Relaxed),
            acquires_self_owned: self.acquires_self_owned.load(Ordering::Relaxed),
            acquires_with_contention: self.acquires_with_contention.load(Ordering::Relaxed),
            acquire_no_wait_successful: self.acquire_no_wait_successful.load(Ordering::Relaxed),
            acquire_no_wait_unsuccessful: self
                .acquire_no_wait_unsuccessful
                .load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
struct LatchState {
    owner: Option<ThreadId>,
    waiters: VecDeque<ThreadId>,
}

/// Exclusive, non-reentrant latch with FIFO hand-off.
pub struct Latch {
    name: String,
    state: Mutex<LatchState>,
    granted: Condvar,
    counters: Counters,
}

impl Latch {
    /// Create a free latch. The name appears in errors and diagnostics.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(LatchState::default()),
            granted: Condvar::new(),
            counters: Counters::default(),
        }
    }

    /// Latch name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the latch is owned by the calling thread.
    ///
    /// Waiters are granted the latch in arrival order. Fails with
    /// `LatchAlreadyHeld` if the caller already owns it.
    pub fn acquire(&self) -> SweepResult<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            Counters::bump(&self.counters.acquires_self_owned);
            return Err(self.already_held());
        }

        if state.owner.is_none() && state.waiters.is_empty() {
            Counters::bump(&self.counters.acquires_no_waiters);
            state.owner = Some(me);
            note_latch();
            return Ok(());
        }

        Counters::bump(&self.counters.acquires_with_contention);
        state.waiters.push_back(me);
        // Ownership is handed over by release(); wait until it names us.
        while state.owner != Some(me) {
            self.granted.wait(&mut state);
        }
        note_latch();
        Ok(())
    }

    /// Take the latch if it is free right now.
    ///
    /// Never jumps ahead of queued waiters. Fails with `LatchAlreadyHeld`
    /// if the caller already owns it.
    pub fn try_acquire(&self) -> SweepResult<bool> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            Counters::bump(&self.counters.acquires_self_owned);
            return Err(self.already_held());
        }

        if state.owner.is_none() && state.waiters.is_empty() {
            state.owner = Some(me);
            Counters::bump(&self.counters.acquire_no_wait_successful);
            note_latch();
            Ok(true)
        } else {
            Counters::bump(&self.counters.acquire_no_wait_unsuccessful);
            Ok(false)
        }
    }

    /// Release the latch, handing it to the oldest waiter if there is one.
    ///
    /// Fails with `LatchNotHeld` if the caller is not the owner.
    pub fn release(&self) -> SweepResult<()> {
        if self.do_release() {
            Ok(())
        } else {
            Err(SweepError::LatchNotHeld {
                name: self.name.clone(),
            })
        }
    }

    /// Release the latch if the caller owns it; otherwise do nothing.
    ///
    /// For cleanup paths where ownership is uncertain.
    pub fn release_if_owner(&self) {
        self.do_release();
    }

    fn do_release(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return false;
        }

        state.owner = state.waiters.pop_front();
        let handed_off = state.owner.is_some();
        drop(state);

        Counters::bump(&self.counters.releases);
        unnote_latch();
        if handed_off {
            self.granted.notify_all();
        }
        true
    }

    /// True if the calling thread owns the latch.
    pub fn is_owner(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    /// Thread currently owning the latch, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    /// Number of threads blocked in `acquire`.
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Cumulative acquisition statistics.
    pub fn stats(&self) -> LatchStats {
        self.counters.snapshot()
    }

    fn already_held(&self) -> SweepError {
        SweepError::LatchAlreadyHeld {
            name: self.name.clone(),
        }
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Latch")
            .field("name", &self.name)
            .field("owner", &state.owner)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_for_waiters(latch: &Latch, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while latch.waiter_count() < n {
            assert!(Instant::now() < deadline, "waiters never queued");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_acquire_and_reacquire() {
        let latch = Latch::new("test-latch");
        latch.acquire().unwrap();
        assert!(latch.is_owner());
        assert_eq!(latches_held(), 1);

        let err = latch.acquire().unwrap_err();
        assert!(matches!(err, SweepError::LatchAlreadyHeld { .. }));
        assert_eq!(latch.stats().acquires_self_owned, 1);

        latch.release().unwrap();
        assert!(!latch.is_owner());
        assert_eq!(latches_held(), 0);

        let err = latch.release().unwrap_err();
        assert!(matches!(err, SweepError::LatchNotHeld { .. }));
    }

    #[test]
    fn test_release_if_owner_is_silent() {
        let latch = Latch::new("cleanup");
        latch.release_if_owner();
        assert_eq!(latch.stats().releases, 0);

        latch.acquire().unwrap();
        latch.release_if_owner();
        assert!(latch.owner().is_none());
        assert_eq!(latch.stats().releases, 1);
    }

    #[test]
    fn test_try_acquire() {
        let latch = Arc::new(Latch::new("no-wait"));
        assert!(latch.try_acquire().unwrap());
        assert!(latch.try_acquire().is_err());

        let other = Arc::clone(&latch);
        let got = thread::spawn(move || other.try_acquire().unwrap())
            .join()
            .unwrap();
        assert!(!got);

        latch.release().unwrap();
        let stats = latch.stats();
        assert_eq!(stats.acquire_no_wait_successful, 1);
        assert_eq!(stats.acquire_no_wait_unsuccessful, 1);
        assert_eq!(stats.acquires_self_owned, 1);
    }

    #[test]
    fn test_release_by_non_owner_fails() {
        let latch = Arc::new(Latch::new("owned"));
        latch.acquire().unwrap();

        let other = Arc::clone(&latch);
        let result = thread::spawn(move || other.release()).join().unwrap();
        assert!(matches!(result, Err(SweepError::LatchNotHeld { .. })));
        assert!(latch.is_owner());
        latch.release().unwrap();
    }

    #[test]
    fn test_waiter_blocks_until_release() {
        let latch = Arc::new(Latch::new("wait"));
        latch.acquire().unwrap();

        let other = Arc::clone(&latch);
        let waiter = thread::spawn(move || {
            other.acquire().unwrap();
            let owned = other.is_owner();
            other.release().unwrap();
            owned
        });

        wait_for_waiters(&latch, 1);
        assert_eq!(latch.stats().acquires_with_contention, 1);
        latch.release().unwrap();
        assert!(waiter.join().unwrap());
        assert!(latch.owner().is_none());
    }

    #[test]
    fn test_fifo_hand_off() {
        let latch = Arc::new(Latch::new("fifo"));
        let order = Arc::new(Mutex::new(Vec::new()));
        latch.acquire().unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let thread_latch = Arc::clone(&latch);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                thread_latch.acquire().unwrap();
                order.lock().push(i);
                thread_latch.release().unwrap();
            }));
            // Queue the threads one at a time so arrival order is known.
            wait_for_waiters(&latch, i + 1);
        }

        latch.release().unwrap();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_mutual_exclusion() {
        let latch = Arc::new(Latch::new("mutex"));
        let inside = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let latch = Arc::clone(&latch);
            let inside = Arc::clone(&inside);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    latch.acquire().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    latch.release().unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(latch.stats().releases, 1600);
    }
}
