// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! One-shot timers ordered by remaining interval.
//!
//! Each timer keeps a signed remaining interval that [`TimerQueue::advance`] decrements
//! by the wall-clock time that passed. A timer is due once its interval reaches zero or
//! goes negative. Insertion goes before the first entry with a strictly greater
//! interval, so timers with equal intervals fire in the order they were armed.

use std::{collections::VecDeque, time::Duration};

/// Identifies an armed timer. Ids are never reused within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    #[must_use]
    pub fn as_u64(self) -> u64 { self.0 }
}

#[derive(Debug)]
struct Timer<T> {
    id: TimerId,
    /// Microseconds until due. Negative means overdue.
    remaining: i64,
    payload: T,
}

/// Ordered collection of pending one-shot timers, generic over what a timer carries.
#[derive(Debug)]
pub struct TimerQueue<T> {
    timers: VecDeque<Timer<T>>,
    next_id: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            timers: VecDeque::new(),
            next_id: 1,
        }
    }
}

fn to_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

impl<T> TimerQueue<T> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Arms a timer due after `interval`. O(n) in the number of pending timers.
    pub fn insert(&mut self, interval: Duration, payload: T) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let remaining = to_micros(interval);
        let position = self
            .timers
            .iter()
            .position(|it| it.remaining > remaining)
            .unwrap_or(self.timers.len());
        self.timers.insert(
            position,
            Timer {
                id,
                remaining,
                payload,
            },
        );

        debug_assert_eq!(
            self.timers.iter().filter(|it| it.id == id).count(),
            1,
            "timer id {id:?} is live more than once"
        );
        id
    }

    /// Removes the timer with `id`. Returns `None` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        let position = self.timers.iter().position(|it| it.id == id)?;
        let timer = self.timers.remove(position)?;
        debug_assert!(
            self.timers.iter().all(|it| it.id != id),
            "timer id {id:?} was live more than once"
        );
        Some(timer.payload)
    }

    /// Subtracts `elapsed` from every pending interval. Order is unchanged since every
    /// entry moves by the same amount.
    pub fn advance(&mut self, elapsed: Duration) {
        let elapsed = to_micros(elapsed);
        for timer in &mut self.timers {
            timer.remaining = timer.remaining.saturating_sub(elapsed);
        }
    }

    /// Pops the front timer if it is due.
    pub fn pop_expired(&mut self) -> Option<(TimerId, T)> {
        if self.timers.front()?.remaining > 0 {
            return None;
        }
        self.timers.pop_front().map(|it| (it.id, it.payload))
    }

    /// Time until the front timer is due, clamped at zero. `None` when nothing is armed.
    #[must_use]
    pub fn next_timeout(&self) -> Option<Duration> {
        self.timers.front().map(|it| {
            Duration::from_micros(u64::try_from(it.remaining).unwrap_or(0))
        })
    }

    #[must_use]
    pub fn contains(&self, id: TimerId) -> bool { self.timers.iter().any(|it| it.id == id) }

    #[must_use]
    pub fn len(&self) -> usize { self.timers.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.timers.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(it: u64) -> Duration { Duration::from_millis(it) }

    fn drain<T>(queue: &mut TimerQueue<T>) -> Vec<T> {
        let mut acc = vec![];
        while let Some((_, it)) = queue.pop_expired() {
            acc.push(it);
        }
        acc
    }

    #[test]
    fn test_equal_intervals_fire_in_arming_order() {
        let mut queue = TimerQueue::new();
        queue.insert(ms(100), "100a");
        queue.insert(ms(50), "50");
        queue.insert(ms(100), "100b");
        queue.insert(ms(10), "10");

        queue.advance(ms(100));
        assert_eq!(drain(&mut queue), vec!["10", "50", "100a", "100b"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_only_due_timers_pop() {
        let mut queue = TimerQueue::new();
        queue.insert(ms(10), 1);
        queue.insert(ms(30), 2);

        queue.advance(ms(9));
        assert_eq!(drain(&mut queue), Vec::<i32>::new());
        assert_eq!(queue.next_timeout(), Some(ms(1)));

        queue.advance(ms(5));
        assert_eq!(drain(&mut queue), vec![1]);
        assert_eq!(queue.next_timeout(), Some(ms(16)));
    }

    #[test]
    fn test_overdue_timer_reports_zero_timeout() {
        let mut queue = TimerQueue::new();
        queue.insert(ms(5), ());
        queue.advance(ms(50));
        assert_eq!(queue.next_timeout(), Some(Duration::ZERO));
    }

    #[test]
    fn test_cancel_is_noop_after_fire() {
        let mut queue = TimerQueue::new();
        let id = queue.insert(Duration::ZERO, "now");
        let other = queue.insert(ms(10), "later");

        let (fired, _) = queue.pop_expired().unwrap();
        assert_eq!(fired, id);
        assert_eq!(queue.cancel(id), None);
        assert_eq!(queue.cancel(other), Some("later"));
        assert_eq!(queue.cancel(other), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut queue = TimerQueue::new();
        let first = queue.insert(ms(1), ());
        queue.cancel(first);
        let second = queue.insert(ms(1), ());
        assert!(second > first);
        assert!(queue.contains(second));
        assert!(!queue.contains(first));
    }
}
