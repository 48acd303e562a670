//! Discrete-event timeline.
//!
//! Events are ordered by virtual time; events sharing a timestamp are
//! processed in the order they were scheduled. Cancellation is lazy: the
//! payload is dropped from the pending map and the stale heap entry is
//! skipped when it surfaces.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::{KernelError, KernelResult};
use crate::time::VirtualTime;

/// Handle to a scheduled event, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Entry in the event heap.
#[derive(Debug)]
struct QueueEntry {
    time: VirtualTime,
    /// Event IDs are allocated monotonically, so they double as insertion order.
    id: EventId,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: earliest time, then earliest insertion, wins.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.id.cmp(&self.id),
            ord => ord,
        }
    }
}

/// Why a call to [`Timeline::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No pending events remain.
    Exhausted,
    /// A handler called [`Timeline::halt`].
    Halted,
    /// The next event lies beyond the configured stop time.
    StopTime,
    /// The per-run event limit was reached.
    EventLimit,
}

/// Consumer of timeline events.
pub trait EventHandler<E> {
    /// Error that aborts the run.
    type Error;

    /// Process one event. `timeline.now()` is the event's time.
    fn handle(&mut self, timeline: &mut Timeline<E>, event: E) -> Result<(), Self::Error>;
}

/// A virtual clock with an ordered queue of pending events.
#[derive(Debug)]
pub struct Timeline<E> {
    now: VirtualTime,
    heap: BinaryHeap<QueueEntry>,
    pending: FxHashMap<EventId, (VirtualTime, E)>,
    next_id: u64,
    stop_time: Option<VirtualTime>,
    event_limit: Option<u64>,
    halted: bool,
    processed: u64,
}

impl<E> Default for Timeline<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Timeline<E> {
    /// Create an empty timeline at time zero.
    pub fn new() -> Self {
        Self {
            now: 0,
            heap: BinaryHeap::new(),
            pending: FxHashMap::default(),
            next_id: 0,
            stop_time: None,
            event_limit: None,
            halted: false,
            processed: 0,
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> VirtualTime {
        self.now
    }

    /// Set a time beyond which [`run`](Self::run) will not process events.
    pub fn set_stop_time(&mut self, stop_time: Option<VirtualTime>) {
        self.stop_time = stop_time;
    }

    /// Limit the number of events a single [`run`](Self::run) may process.
    pub fn set_event_limit(&mut self, limit: Option<u64>) {
        self.event_limit = limit;
    }

    /// Schedule `payload` at absolute time `time`.
    pub fn schedule(&mut self, time: VirtualTime, payload: E) -> KernelResult<EventId> {
        if time < self.now {
            return Err(KernelError::ScheduleInPast {
                time,
                now: self.now,
            });
        }
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.heap.push(QueueEntry { time, id });
        self.pending.insert(id, (time, payload));
        trace!(event = %id, time, "scheduled");
        Ok(id)
    }

    /// Schedule `payload` `delay` picoseconds from now.
    pub fn schedule_after(&mut self, delay: VirtualTime, payload: E) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        let time = self.now.saturating_add(delay);
        self.heap.push(QueueEntry { time, id });
        self.pending.insert(id, (time, payload));
        trace!(event = %id, time, "scheduled");
        id
    }

    /// Cancel a pending event, returning its payload if it had not yet run.
    pub fn cancel(&mut self, id: EventId) -> Option<E> {
        // The heap entry stays behind and is skipped by pop().
        self.pending.remove(&id).map(|(_, payload)| payload)
    }

    /// Whether an event is still pending.
    pub fn is_pending(&self, id: EventId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Scheduled time of a pending event.
    pub fn time_of(&self, id: EventId) -> Option<VirtualTime> {
        self.pending.get(&id).map(|(time, _)| *time)
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total events processed over the timeline's lifetime.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Time of the next pending event.
    pub fn peek_time(&mut self) -> Option<VirtualTime> {
        while let Some(entry) = self.heap.peek() {
            if self.pending.contains_key(&entry.id) {
                return Some(entry.time);
            }
            self.heap.pop();
        }
        None
    }

    /// Remove the next event and advance the clock to its time.
    pub fn pop(&mut self) -> Option<(VirtualTime, E)> {
        while let Some(entry) = self.heap.pop() {
            if let Some((time, payload)) = self.pending.remove(&entry.id) {
                self.now = time;
                self.processed += 1;
                return Some((time, payload));
            }
        }
        None
    }

    /// Ask the current [`run`](Self::run) to return after the event in progress.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Drop every pending event without touching the clock.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.pending.clear();
    }

    /// Set the stop time and [`run`](Self::run).
    pub fn run_until<H>(&mut self, stop_time: VirtualTime, handler: &mut H) -> Result<RunOutcome, H::Error>
    where
        H: EventHandler<E> + ?Sized,
    {
        self.stop_time = Some(stop_time);
        self.run(handler)
    }

    /// Process events until the queue empties, a handler halts the run, the
    /// stop time is reached, or the event limit is hit.
    pub fn run<H>(&mut self, handler: &mut H) -> Result<RunOutcome, H::Error>
    where
        H: EventHandler<E> + ?Sized,
    {
        self.halted = false;
        let mut count = 0u64;
        loop {
            if self.halted {
                return Ok(RunOutcome::Halted);
            }
            if self.event_limit.is_some_and(|limit| count >= limit) {
                return Ok(RunOutcome::EventLimit);
            }
            let Some(next) = self.peek_time() else {
                return Ok(RunOutcome::Exhausted);
            };
            if self.stop_time.is_some_and(|stop| next > stop) {
                return Ok(RunOutcome::StopTime);
            }
            let Some((_, payload)) = self.pop() else {
                return Ok(RunOutcome::Exhausted);
            };
            count += 1;
            handler.handle(self, payload)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        seen: Vec<(VirtualTime, &'static str)>,
    }

    impl EventHandler<&'static str> for Recorder {
        type Error = KernelError;

        fn handle(
            &mut self,
            timeline: &mut Timeline<&'static str>,
            event: &'static str,
        ) -> KernelResult<()> {
            self.seen.push((timeline.now(), event));
            if event == "spawn" {
                timeline.schedule_after(5, "child");
            }
            if event == "halt" {
                timeline.halt();
            }
            Ok(())
        }
    }

    #[test]
    fn test_time_ordering() {
        let mut tl = Timeline::new();
        tl.schedule(30, "c").unwrap();
        tl.schedule(10, "a").unwrap();
        tl.schedule(20, "b").unwrap();

        assert_eq!(tl.pop(), Some((10, "a")));
        assert_eq!(tl.pop(), Some((20, "b")));
        assert_eq!(tl.pop(), Some((30, "c")));
        assert!(tl.pop().is_none());
        assert_eq!(tl.now(), 30);
    }

    #[test]
    fn test_fifo_same_time() {
        let mut tl = Timeline::new();
        tl.schedule(7, "first").unwrap();
        tl.schedule(7, "second").unwrap();
        tl.schedule(7, "third").unwrap();

        assert_eq!(tl.pop().unwrap().1, "first");
        assert_eq!(tl.pop().unwrap().1, "second");
        assert_eq!(tl.pop().unwrap().1, "third");
    }

    #[test]
    fn test_cancel() {
        let mut tl = Timeline::new();
        let a = tl.schedule(1, "a").unwrap();
        tl.schedule(2, "b").unwrap();

        assert_eq!(tl.cancel(a), Some("a"));
        assert_eq!(tl.cancel(a), None);
        assert!(!tl.is_pending(a));
        assert_eq!(tl.len(), 1);
        assert_eq!(tl.peek_time(), Some(2));
        assert_eq!(tl.pop(), Some((2, "b")));
    }

    #[test]
    fn test_schedule_in_past_rejected() {
        let mut tl = Timeline::new();
        tl.schedule(100, "x").unwrap();
        tl.pop();
        let err = tl.schedule(50, "late").unwrap_err();
        assert!(matches!(err, KernelError::ScheduleInPast { time: 50, now: 100 }));
    }

    #[test]
    fn test_run_with_handler() {
        let mut tl = Timeline::new();
        tl.schedule(0, "spawn").unwrap();
        tl.schedule(3, "other").unwrap();
        let mut rec = Recorder { seen: vec![] };

        let outcome = tl.run(&mut rec).unwrap();
        assert_eq!(outcome, RunOutcome::Exhausted);
        assert_eq!(rec.seen, vec![(0, "spawn"), (3, "other"), (5, "child")]);
        assert_eq!(tl.processed(), 3);
    }

    #[test]
    fn test_run_halt_and_stop_time() {
        let mut tl = Timeline::new();
        tl.schedule(1, "halt").unwrap();
        tl.schedule(2, "after").unwrap();
        tl.schedule(50, "far").unwrap();
        let mut rec = Recorder { seen: vec![] };

        assert_eq!(tl.run(&mut rec).unwrap(), RunOutcome::Halted);
        assert_eq!(rec.seen.len(), 1);

        tl.set_stop_time(Some(10));
        assert_eq!(tl.run(&mut rec).unwrap(), RunOutcome::StopTime);
        assert_eq!(rec.seen, vec![(1, "halt"), (2, "after")]);
        assert_eq!(tl.len(), 1);
    }

    #[test]
    fn test_event_limit() {
        let mut tl = Timeline::new();
        for t in 0..10 {
            tl.schedule(t, "tick").unwrap();
        }
        tl.set_event_limit(Some(4));
        let mut rec = Recorder { seen: vec![] };
        assert_eq!(tl.run(&mut rec).unwrap(), RunOutcome::EventLimit);
        assert_eq!(rec.seen.len(), 4);
    }

    #[test]
    fn test_run_until() {
        let mut tl = Timeline::new();
        tl.schedule(5, "a").unwrap();
        tl.schedule(15, "b").unwrap();
        let mut rec = Recorder { seen: vec![] };
        assert_eq!(tl.run_until(10, &mut rec).unwrap(), RunOutcome::StopTime);
        assert_eq!(rec.seen, vec![(5, "a")]);
        assert_eq!(tl.run_until(20, &mut rec).unwrap(), RunOutcome::Exhausted);
        assert_eq!(tl.now(), 15);
    }
}
