//! SharedLatch: reader/writer node latch without upgrade
//!
//! Internal nodes are latched shared during a descent and exclusively when
//! they are modified. Leaves are built "exclusive-only": every shared request
//! on them is served as an exclusive one.
//!
//! Rules enforced here:
//! - a thread may nest shared acquisitions and must release each one,
//! - exclusive acquisition is never reentrant,
//! - a reader asking for exclusive access fails (no upgrade),
//! - requests are served in arrival order, so a shared request never
//!   overtakes an exclusive request that queued first.

use std::collections::VecDeque;
use std::fmt;
use std::thread::{self, ThreadId};

use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::{SweepError, SweepResult};
use crate::latch::{note_latch, unnote_latch};

#[derive(Debug)]
enum Holders {
    Free,
    Shared(HashMap<ThreadId, u32>),
    Exclusive(ThreadId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct Request {
    thread: ThreadId,
    access: Access,
}

#[derive(Debug)]
struct SharedState {
    holders: Holders,
    queue: VecDeque<Request>,
}

impl SharedState {
    fn holds_shared(&self, me: ThreadId) -> bool {
        matches!(&self.holders, Holders::Shared(readers) if readers.contains_key(&me))
    }

    fn holds_exclusive(&self, me: ThreadId) -> bool {
        matches!(self.holders, Holders::Exclusive(owner) if owner == me)
    }

    fn front_is(&self, me: ThreadId) -> bool {
        self.queue.front().map_or(false, |r| r.thread == me)
    }

    fn add_reader(&mut self, me: ThreadId) {
        match &mut self.holders {
            Holders::Shared(readers) => {
                *readers.entry(me).or_insert(0) += 1;
            }
            holders => {
                let mut readers = HashMap::new();
                readers.insert(me, 1);
                *holders = Holders::Shared(readers);
            }
        }
    }
}

/// Reader/writer latch with FIFO fairness and no shared-to-exclusive upgrade.
pub struct SharedLatch {
    name: String,
    exclusive_only: bool,
    state: Mutex<SharedState>,
    changed: Condvar,
}

impl SharedLatch {
    /// Create a latch that serves both shared and exclusive requests.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), false)
    }

    /// Create a latch on which shared requests are served as exclusive.
    pub fn exclusive_only(name: impl Into<String>) -> Self {
        Self::build(name.into(), true)
    }

    fn build(name: String, exclusive_only: bool) -> Self {
        Self {
            name,
            exclusive_only,
            state: Mutex::new(SharedState {
                holders: Holders::Free,
                queue: VecDeque::new(),
            }),
            changed: Condvar::new(),
        }
    }

    /// Latch name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if shared requests are promoted to exclusive.
    pub fn is_exclusive_only(&self) -> bool {
        self.exclusive_only
    }

    /// Block until the calling thread holds the latch exclusively.
    pub fn acquire_exclusive(&self) -> SweepResult<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        self.check_exclusive_request(&state, me)?;

        if matches!(state.holders, Holders::Free) && state.queue.is_empty() {
            state.holders = Holders::Exclusive(me);
            note_latch();
            return Ok(());
        }

        state.queue.push_back(Request {
            thread: me,
            access: Access::Exclusive,
        });
        loop {
            if state.front_is(me) && matches!(state.holders, Holders::Free) {
                state.queue.pop_front();
                state.holders = Holders::Exclusive(me);
                break;
            }
            self.changed.wait(&mut state);
        }
        note_latch();
        Ok(())
    }

    /// Take the latch exclusively if nobody holds it or waits for it.
    pub fn try_acquire_exclusive(&self) -> SweepResult<bool> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        self.check_exclusive_request(&state, me)?;

        if matches!(state.holders, Holders::Free) && state.queue.is_empty() {
            state.holders = Holders::Exclusive(me);
            note_latch();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Block until the calling thread holds shared access.
    ///
    /// Nests if the caller already holds shared access. On an exclusive-only
    /// latch this is `acquire_exclusive`.
    pub fn acquire_shared(&self) -> SweepResult<()> {
        if self.exclusive_only {
            return self.acquire_exclusive();
        }

        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.holds_exclusive(me) {
            return Err(SweepError::LatchAlreadyHeld {
                name: self.name.clone(),
            });
        }

        // Nested shared access is granted even past queued writers: the
        // writer cannot run until this reader is gone anyway.
        if state.holds_shared(me) {
            state.add_reader(me);
            note_latch();
            return Ok(());
        }

        if !matches!(state.holders, Holders::Exclusive(_)) && state.queue.is_empty() {
            state.add_reader(me);
            note_latch();
            return Ok(());
        }

        state.queue.push_back(Request {
            thread: me,
            access: Access::Shared,
        });
        loop {
            if state.front_is(me) && !matches!(state.holders, Holders::Exclusive(_)) {
                state.queue.pop_front();
                state.add_reader(me);
                break;
            }
            self.changed.wait(&mut state);
        }
        // A run of shared requests behind us may proceed too.
        let next_is_reader = state
            .queue
            .front()
            .map_or(false, |r| r.access == Access::Shared);
        drop(state);
        if next_is_reader {
            self.changed.notify_all();
        }
        note_latch();
        Ok(())
    }

    /// Release one shared acquisition, or exclusive ownership.
    pub fn release(&self) -> SweepResult<()> {
        if self.do_release() {
            Ok(())
        } else {
            Err(SweepError::LatchNotHeld {
                name: self.name.clone(),
            })
        }
    }

    /// Release if the caller holds the latch in any mode; otherwise do nothing.
    pub fn release_if_owner(&self) {
        self.do_release();
    }

    fn do_release(&self) -> bool {
        let me = thread::current().id();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (released, now_free) = match &mut state.holders {
            Holders::Exclusive(owner) => (*owner == me, *owner == me),
            Holders::Shared(readers) => match readers.get_mut(&me) {
                Some(count) => {
                    *count -= 1;
                    if *count == 0 {
                        readers.remove(&me);
                    }
                    (true, readers.is_empty())
                }
                None => (false, false),
            },
            Holders::Free => (false, false),
        };
        if now_free {
            state.holders = Holders::Free;
        }
        drop(guard);

        if released {
            unnote_latch();
            self.changed.notify_all();
        }
        released
    }

    /// True if the calling thread holds the latch exclusively.
    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.state.lock().holds_exclusive(thread::current().id())
    }

    /// True if the calling thread holds the latch in either mode.
    pub fn is_owner(&self) -> bool {
        let me = thread::current().id();
        let state = self.state.lock();
        state.holds_exclusive(me) || state.holds_shared(me)
    }

    /// Number of distinct threads holding shared access.
    pub fn reader_count(&self) -> usize {
        match &self.state.lock().holders {
            Holders::Shared(readers) => readers.len(),
            _ => 0,
        }
    }

    /// Number of threads queued behind the current holders.
    pub fn waiter_count(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn check_exclusive_request(&self, state: &SharedState, me: ThreadId) -> SweepResult<()> {
        if state.holds_exclusive(me) {
            return Err(SweepError::LatchAlreadyHeld {
                name: self.name.clone(),
            });
        }
        if state.holds_shared(me) {
            return Err(SweepError::LatchUpgrade {
                name: self.name.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for SharedLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SharedLatch")
            .field("name", &self.name)
            .field("exclusive_only", &self.exclusive_only)
            .field("holders", &state.holders)
            .field("queued", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latch::latches_held;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn wait_for_queue(latch: &SharedLatch, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while latch.waiter_count() < n {
            assert!(Instant::now() < deadline, "requests never queued");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_acquire_and_reacquire_shared() {
        let latch = SharedLatch::new("IN-1");
        latch.acquire_shared().unwrap();
        latch.acquire_shared().unwrap();
        assert!(latch.is_owner());
        assert!(!latch.is_write_locked_by_current_thread());
        assert_eq!(latch.reader_count(), 1);
        assert_eq!(latches_held(), 2);

        latch.release().unwrap();
        assert!(latch.is_owner());
        latch.release().unwrap();
        assert!(!latch.is_owner());
        assert!(matches!(latch.release(), Err(SweepError::LatchNotHeld { .. })));
        assert_eq!(latches_held(), 0);
    }

    #[test]
    fn test_exclusive_is_not_reentrant() {
        let latch = SharedLatch::new("IN-2");
        latch.acquire_exclusive().unwrap();
        assert!(latch.is_write_locked_by_current_thread());
        assert!(matches!(
            latch.acquire_exclusive(),
            Err(SweepError::LatchAlreadyHeld { .. })
        ));
        assert!(matches!(
            latch.acquire_shared(),
            Err(SweepError::LatchAlreadyHeld { .. })
        ));
        latch.release().unwrap();
    }

    #[test]
    fn test_upgrade_fails_fast() {
        let latch = SharedLatch::new("IN-3");
        latch.acquire_shared().unwrap();
        assert!(matches!(
            latch.acquire_exclusive(),
            Err(SweepError::LatchUpgrade { .. })
        ));
        assert!(matches!(
            latch.try_acquire_exclusive(),
            Err(SweepError::LatchUpgrade { .. })
        ));
        // State untouched by the failed upgrade.
        assert_eq!(latch.reader_count(), 1);
        latch.release().unwrap();
        assert!(latch.try_acquire_exclusive().unwrap());
        latch.release().unwrap();
    }

    #[test]
    fn test_exclusive_only_promotes_shared() {
        let latch = SharedLatch::exclusive_only("BIN-4");
        assert!(latch.is_exclusive_only());
        latch.acquire_shared().unwrap();
        assert!(latch.is_write_locked_by_current_thread());
        assert_eq!(latch.reader_count(), 0);
        assert!(matches!(
            latch.acquire_shared(),
            Err(SweepError::LatchAlreadyHeld { .. })
        ));
        latch.release().unwrap();
        assert!(!latch.is_owner());
    }

    #[test]
    fn test_release_if_owner() {
        let latch = SharedLatch::new("IN-5");
        latch.release_if_owner();
        latch.acquire_shared().unwrap();
        latch.release_if_owner();
        assert!(!latch.is_owner());
    }

    #[test]
    fn test_concurrent_readers_do_not_block() {
        let latch = Arc::new(SharedLatch::new("IN-6"));
        latch.acquire_shared().unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let latch = Arc::clone(&latch);
            handles.push(thread::spawn(move || {
                latch.acquire_shared().unwrap();
                let readers = latch.reader_count();
                latch.release().unwrap();
                readers
            }));
        }
        for h in handles {
            assert!(h.join().unwrap() >= 2);
        }
        latch.release().unwrap();
    }

    #[test]
    fn test_shared_does_not_barge_past_exclusive() {
        let latch = Arc::new(SharedLatch::new("IN-7"));
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        latch.acquire_shared().unwrap();

        let writer = {
            let latch = Arc::clone(&latch);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                latch.acquire_exclusive().unwrap();
                order.lock().push("writer");
                latch.release().unwrap();
            })
        };
        wait_for_queue(&latch, 1);

        let reader = {
            let latch = Arc::clone(&latch);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                latch.acquire_shared().unwrap();
                order.lock().push("reader");
                latch.release().unwrap();
            })
        };
        wait_for_queue(&latch, 2);

        latch.release().unwrap();
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(*order.lock(), vec!["writer", "reader"]);
    }

    #[test]
    fn test_exclusive_mutual_exclusion() {
        let latch = Arc::new(SharedLatch::new("IN-8"));
        let writers = Arc::new(AtomicUsize::new(0));
        let readers = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for i in 0..8 {
            let latch = Arc::clone(&latch);
            let writers = Arc::clone(&writers);
            let readers = Arc::clone(&readers);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    if i % 2 == 0 {
                        latch.acquire_exclusive().unwrap();
                        assert_eq!(writers.fetch_add(1, Ordering::SeqCst), 0);
                        assert_eq!(readers.load(Ordering::SeqCst), 0);
                        writers.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        latch.acquire_shared().unwrap();
                        readers.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(writers.load(Ordering::SeqCst), 0);
                        readers.fetch_sub(1, Ordering::SeqCst);
                    }
                    latch.release().unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(!latch.is_owner());
        assert_eq!(latch.waiter_count(), 0);
    }
}
