// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Virtual time and the timer service used by send sessions.
//!
//! All times are offsets from the start of the simulation. Nothing in this
//! module sleeps: scheduling only registers an event for a future virtual
//! time, and the owner of the [`VirtualClock`] decides when time advances.

use std::cell::RefCell;
use std::fmt;
use std::time::Duration;

use log::trace;
use priority_queue::double_priority_queue::DoublePriorityQueue;
use rustc_hash::FxHashMap;
use strum_macros::EnumCount;
use strum_macros::EnumIter;

type Index = u64;

/// Store timers in a binary queue. Keep them sorted by which timer is going to
/// expire first. Timers expiring at the same time are ordered by index.
pub struct TimerQueue {
    timers: DoublePriorityQueue<Index, (Duration, Index)>,
}

impl TimerQueue {
    /// Create a new TimerQueue.
    pub fn new() -> Self {
        Self {
            timers: DoublePriorityQueue::new(),
        }
    }

    /// Creates an empty timer queue with a specific capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            timers: DoublePriorityQueue::with_capacity(capacity),
        }
    }

    /// Return the number of timers in the queue.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Return if the timer queue is empty.
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Add a timer into the queue, replacing any existing timer if one exists.
    pub fn add(&mut self, idx: Index, duration: Duration, now: Duration) {
        _ = self.timers.push(idx, (now.saturating_add(duration), idx));
    }

    /// Delete a timer by id. Return whether the timer was pending.
    pub fn del(&mut self, idx: &Index) -> bool {
        self.timers.remove(idx).is_some()
    }

    /// Check whether the timer is still pending.
    pub fn contains(&self, idx: &Index) -> bool {
        self.timers.get_priority(idx).is_some()
    }

    /// Return the expiration time of the earliest timer.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.timers.peek_min().map(|(_, (expires_at, _))| *expires_at)
    }

    /// Return the amount of time remaining for the earliest expiring timer.
    pub fn time_remaining(&self, now: Duration) -> Option<Duration> {
        self.next_timeout()
            .map(|expires_at| expires_at.saturating_sub(now))
    }

    /// Return the next expired timer if any.
    pub fn next_expire(&mut self, now: Duration) -> Option<Index> {
        let expired = matches!(
            self.timers.peek_min(),
            Some((_, (expires_at, _))) if *expires_at <= now
        );
        if !expired {
            return None;
        }
        self.timers.pop_min().map(|(idx, _)| idx)
    }

    /// Clear all the timers
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// What a scheduled callback does when it fires.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, EnumIter, EnumCount)]
pub enum TimerKind {
    /// Start a configured session.
    Start,

    /// Emit the next packet of a running session.
    Send,

    /// Stop a session regardless of its phase.
    Stop,

    /// Run one generation size adaptation epoch.
    Adaptation,
}

/// A scheduled callback: the timer kind and the identity of its owner.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TimerEvent {
    /// Owner of the timer, e.g. a session id.
    pub owner: u64,

    /// Timer kind.
    pub kind: TimerKind,
}

impl TimerEvent {
    pub fn new(owner: u64, kind: TimerKind) -> Self {
        Self { owner, kind }
    }
}

/// Handle of a scheduled timer, used to cancel it.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Return the sequence number of the handle.
    pub fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// The timer service consumed by send sessions.
///
/// Cancelling a handle before it fires guarantees that the event is never
/// returned by the service. Cancelling a fired or cancelled handle is a no-op.
pub trait TimerService {
    /// Current virtual time.
    fn now(&self) -> Duration;

    /// Schedule `event` to fire `delay` after the current virtual time.
    fn schedule_after(&self, delay: Duration, event: TimerEvent) -> TimerHandle;

    /// Cancel a scheduled timer.
    fn cancel(&self, handle: TimerHandle);
}

#[derive(Default)]
struct ClockState {
    now: Duration,
    next_seq: u64,
    queue: TimerQueue,
    events: FxHashMap<u64, TimerEvent>,
}

/// A discrete-event virtual clock.
///
/// The clock is shared by every session of a simulation through `Rc`, so its
/// state lives behind a `RefCell`. It is not `Sync`: one owner drives time.
#[derive(Default)]
pub struct VirtualClock {
    state: RefCell<ClockState>,
}

impl VirtualClock {
    /// Create a clock at virtual time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the current time forward to `time`. Time never goes backwards, and
    /// no timer is fired.
    pub fn advance_to(&self, time: Duration) {
        let mut st = self.state.borrow_mut();
        if time > st.now {
            st.now = time;
        }
    }

    /// Return the expiration time of the earliest pending timer.
    pub fn next_timeout(&self) -> Option<Duration> {
        self.state.borrow().queue.next_timeout()
    }

    /// Pop a timer that is already due at the current time.
    pub fn next_expired(&self) -> Option<(TimerHandle, TimerEvent)> {
        let mut st = self.state.borrow_mut();
        let now = st.now;
        Self::pop(&mut st, now)
    }

    /// Advance to the earliest pending timer if it expires no later than
    /// `deadline`, and pop it.
    pub fn fire_next(&self, deadline: Duration) -> Option<(TimerHandle, TimerEvent)> {
        let mut st = self.state.borrow_mut();
        let expires_at = st.queue.next_timeout()?;
        if expires_at > deadline {
            return None;
        }
        if expires_at > st.now {
            st.now = expires_at;
        }
        let now = st.now;
        Self::pop(&mut st, now)
    }

    /// Return the number of pending timers.
    pub fn pending(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Check whether a handle is still pending.
    pub fn is_pending(&self, handle: TimerHandle) -> bool {
        self.state.borrow().queue.contains(&handle.0)
    }

    fn pop(st: &mut ClockState, now: Duration) -> Option<(TimerHandle, TimerEvent)> {
        let idx = st.queue.next_expire(now)?;
        let event = st.events.remove(&idx)?;
        trace!("clock {:?} fire timer#{} {:?}", now, idx, event);
        Some((TimerHandle(idx), event))
    }
}

impl TimerService for VirtualClock {
    fn now(&self) -> Duration {
        self.state.borrow().now
    }

    fn schedule_after(&self, delay: Duration, event: TimerEvent) -> TimerHandle {
        let mut st = self.state.borrow_mut();
        let idx = st.next_seq;
        st.next_seq += 1;

        let now = st.now;
        st.queue.add(idx, delay, now);
        st.events.insert(idx, event);
        trace!(
            "clock {:?} schedule timer#{} {:?} after {:?}",
            now,
            idx,
            event,
            delay
        );
        TimerHandle(idx)
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut st = self.state.borrow_mut();
        if st.queue.del(&handle.0) {
            st.events.remove(&handle.0);
            trace!("clock {:?} cancel {:?}", st.now, handle);
        }
    }
}
