//! Virtual time for the memory host.
//!
//! `MemoryClock` implements [`Timer`]: sleeps complete only when time is
//! advanced explicitly with [`MemoryClock::advance_by`], which makes lazy
//! delays deterministic in tests.

use futures_channel::oneshot;
use futures_util::future::{self, FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::time::Duration;

use crate::env::Timer;

struct PendingSleep {
    /// Virtual time the sleep ends at, in ms
    wake_at_ms: u64,
    /// Registration order, to wake equal deadlines first-in first-out
    sequence: u64,
    wake: oneshot::Sender<()>,
}

impl PartialEq for PendingSleep {
    fn eq(&self, other: &Self) -> bool {
        (self.wake_at_ms, self.sequence) == (other.wake_at_ms, other.sequence)
    }
}

impl Eq for PendingSleep {}

impl PartialOrd for PendingSleep {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingSleep {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: the earliest deadline comes first
        (other.wake_at_ms, other.sequence).cmp(&(self.wake_at_ms, self.sequence))
    }
}

#[derive(Default)]
struct ClockState {
    now_ms: u64,
    next_sequence: u64,
    pending: BinaryHeap<PendingSleep>,
}

/// Controllable clock; clones share the same time line.
#[derive(Clone, Default)]
pub struct MemoryClock {
    state: Rc<RefCell<ClockState>>,
}

impl MemoryClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.state.borrow().now_ms
    }

    pub fn pending_sleeps(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Advance virtual time and wake every sleep ending by then.
    ///
    /// Returns the number of sleeps woken. Woken tasks run the next time
    /// their executor is driven.
    pub fn advance_by(&self, ms: u64) -> usize {
        let due = {
            let mut state = self.state.borrow_mut();
            let target_ms = state.now_ms + ms;
            let mut due = Vec::new();
            while state
                .pending
                .peek()
                .is_some_and(|sleep| sleep.wake_at_ms <= target_ms)
            {
                if let Some(sleep) = state.pending.pop() {
                    due.push(sleep);
                }
            }
            state.now_ms = target_ms;
            due
        };
        let woken = due.len();
        for sleep in due {
            // The sleeping task may be gone already.
            let _ = sleep.wake.send(());
        }
        woken
    }
}

impl Timer for MemoryClock {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        if ms == 0 {
            return future::ready(()).boxed_local();
        }
        let (wake, woken) = oneshot::channel();
        {
            let mut state = self.state.borrow_mut();
            let sleep = PendingSleep {
                wake_at_ms: state.now_ms.saturating_add(ms),
                sequence: state.next_sequence,
                wake,
            };
            state.next_sequence += 1;
            state.pending.push(sleep);
        }
        async move {
            if woken.await.is_err() {
                // Clock dropped: time never reaches the deadline.
                future::pending::<()>().await;
            }
        }
        .boxed_local()
    }
}
