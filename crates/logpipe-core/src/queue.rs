//! Bounded multi-producer queue used between producers, the dispatcher and
//! the sink workers.
//!
//! Besides events the queue carries flush markers. Markers do not count
//! against the capacity limit and are never evicted, so a flush request
//! cannot be lost to back-pressure.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// What `emit` does when the main queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum OverflowPolicy {
    /// Reject the new event
    #[default]
    DropNew,
    /// Evict the oldest queued event to make room
    DropOldest,
    /// Wait up to `timeout` for room, then reject
    Block {
        #[serde(with = "duration_millis", rename = "timeout_ms")]
        timeout: Duration,
    },
}

pub(crate) mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Queue entry.
pub(crate) enum Envelope<E> {
    Event(E),
    /// Flush everything queued before this marker, then acknowledge
    Flush(mpsc::Sender<()>),
}

/// Result of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest event
    Evicted,
    /// Queue full, item rejected
    Full,
    /// Waited for room until the timeout
    TimedOut,
    /// Queue closed, item rejected
    Closed,
}

struct State<E> {
    items: VecDeque<Envelope<E>>,
    /// Events in `items`; markers do not count against capacity
    events: usize,
    closed: bool,
}

pub(crate) struct BoundedQueue<E> {
    state: Mutex<State<E>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<E> BoundedQueue<E> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity.min(4096)),
                events: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Push an event under `policy`.
    pub(crate) fn push(&self, event: E, policy: OverflowPolicy) -> PushOutcome {
        let mut state = self.state.lock();
        if state.closed {
            return PushOutcome::Closed;
        }

        let mut outcome = PushOutcome::Queued;
        if state.events >= self.capacity {
            match policy {
                OverflowPolicy::DropNew => return PushOutcome::Full,
                OverflowPolicy::DropOldest => {
                    match state.items.iter().position(|e| matches!(e, Envelope::Event(_))) {
                        Some(oldest) => {
                            state.items.remove(oldest);
                            state.events -= 1;
                            outcome = PushOutcome::Evicted;
                        }
                        None => return PushOutcome::Full,
                    }
                }
                OverflowPolicy::Block { timeout } => {
                    // No representable deadline means wait for room indefinitely
                    let deadline = Instant::now().checked_add(timeout);
                    while state.events >= self.capacity && !state.closed {
                        match deadline {
                            Some(deadline) => {
                                if self.not_full.wait_until(&mut state, deadline).timed_out() {
                                    break;
                                }
                            }
                            None => self.not_full.wait(&mut state),
                        }
                    }
                    if state.closed {
                        return PushOutcome::Closed;
                    }
                    if state.events >= self.capacity {
                        return PushOutcome::TimedOut;
                    }
                }
            }
        }

        state.items.push_back(Envelope::Event(event));
        state.events += 1;
        drop(state);
        self.not_empty.notify_one();
        outcome
    }

    /// Push a flush marker, ignoring capacity.
    pub(crate) fn push_marker(&self, ack: mpsc::Sender<()>) -> PushOutcome {
        let mut state = self.state.lock();
        if state.closed {
            return PushOutcome::Closed;
        }
        state.items.push_back(Envelope::Flush(ack));
        drop(state);
        self.not_empty.notify_one();
        PushOutcome::Queued
    }

    /// Wait for the next entry. Returns `None` once the queue is closed and empty.
    pub(crate) fn pop(&self) -> Option<Envelope<E>> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                if matches!(item, Envelope::Event(_)) {
                    state.events -= 1;
                }
                drop(state);
                self.not_full.notify_one();
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Stop accepting entries and wake every waiter. Queued entries can
    /// still be popped.
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Remove everything still queued; returns the number of events removed.
    pub(crate) fn discard(&self) -> u64 {
        let removed = {
            let mut state = self.state.lock();
            state.items.clear();
            std::mem::take(&mut state.events)
        };
        self.not_full.notify_all();
        removed as u64
    }

    /// Queued events, not counting flush markers.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().events
    }
}
