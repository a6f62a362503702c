//! Leading and trailing debounce with a maximum wait.
//!
//! [`Debouncer`] is a clock-free state machine: callers pass the current
//! instant to every method and sleep until [`Debouncer::deadline`] between
//! events. A burst of events produces one leading flush, then at most one
//! flush per `max_wait`, then one trailing flush after `wait` of quiet.

use std::time::Duration;

use tokio::time::Instant;

/// Quiet window before the trailing flush.
pub const DEFAULT_WAIT: Duration = Duration::from_millis(500);

/// Upper bound on how long a pending flush may be delayed.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct Debouncer {
    wait: Duration,
    max_wait: Duration,
    last_event: Option<Instant>,
    last_flush: Option<Instant>,
    /// Events arrived since the last flush.
    dirty: bool,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT, DEFAULT_MAX_WAIT)
    }
}

impl Debouncer {
    pub fn new(wait: Duration, max_wait: Duration) -> Self {
        Self {
            wait,
            max_wait: max_wait.max(wait),
            last_event: None,
            last_flush: None,
            dirty: false,
        }
    }

    /// Returns true while a burst is in progress.
    pub fn is_active(&self) -> bool {
        self.last_event.is_some()
    }

    /// Record an event. Returns true if the caller should flush now.
    pub fn schedule(&mut self, now: Instant) -> bool {
        let idle = self.last_event.is_none();
        self.last_event = Some(now);

        if idle {
            self.last_flush = Some(now);
            self.dirty = false;
            return true;
        }

        if self
            .last_flush
            .is_some_and(|flushed| now.saturating_duration_since(flushed) >= self.max_wait)
        {
            self.last_flush = Some(now);
            self.dirty = false;
            return true;
        }

        self.dirty = true;
        false
    }

    /// When [`Debouncer::fire`] should next be called, if at all.
    pub fn deadline(&self) -> Option<Instant> {
        let last_event = self.last_event?;
        let quiet = last_event + self.wait;
        match (self.dirty, self.last_flush) {
            (true, Some(flushed)) => Some(quiet.min(flushed + self.max_wait)),
            _ => Some(quiet),
        }
    }

    /// Timer expiry. Returns true if the caller should flush now.
    pub fn fire(&mut self, now: Instant) -> bool {
        let Some(last_event) = self.last_event else {
            return false;
        };

        let quiet = now >= last_event + self.wait;
        let overdue = self
            .last_flush
            .is_some_and(|flushed| now >= flushed + self.max_wait);
        let flush = self.dirty && (quiet || overdue);

        if flush {
            self.dirty = false;
            self.last_flush = Some(now);
        }
        if quiet {
            self.last_event = None;
        }
        flush
    }

    /// Take any pending trailing flush immediately, e.g. at end of input.
    pub fn flush_pending(&mut self) -> bool {
        let pending = self.dirty;
        self.cancel();
        pending
    }

    /// Drop any pending flush and return to idle.
    pub fn cancel(&mut self) {
        self.last_event = None;
        self.last_flush = None;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Drive the debouncer with events at `events` (offsets from `t0`),
    /// firing timers in between, and return the flush instants.
    fn simulate(events: &[u64]) -> Vec<u64> {
        let t0 = Instant::now();
        let mut d = Debouncer::default();
        let mut flushes = Vec::new();

        for &at in events {
            let now = t0 + ms(at);
            while let Some(deadline) = d.deadline().filter(|dl| *dl <= now) {
                if d.fire(deadline) {
                    flushes.push((deadline - t0).as_millis() as u64);
                }
            }
            if d.schedule(now) {
                flushes.push(at);
            }
        }
        while let Some(deadline) = d.deadline() {
            if d.fire(deadline) {
                flushes.push((deadline - t0).as_millis() as u64);
            }
        }
        flushes
    }

    #[test]
    fn test_single_event_flushes_once() {
        assert_eq!(simulate(&[0]), vec![0]);
    }

    #[test]
    fn test_leading_and_trailing() {
        assert_eq!(simulate(&[0, 100, 200]), vec![0, 700]);
    }

    #[test]
    fn test_max_wait_bounds_delay() {
        let events: Vec<u64> = (0..30).map(|i| i * 100).collect();
        let flushes = simulate(&events);

        assert!(flushes.len() <= 6, "too many flushes: {flushes:?}");
        assert_eq!(flushes[0], 0);
        for pair in flushes.windows(2) {
            assert!(pair[1] - pair[0] <= 1000, "gap too long: {flushes:?}");
        }
        // The last flush happens after the last event.
        assert!(*flushes.last().unwrap() >= 2900);
    }

    #[test]
    fn test_separate_bursts_each_lead() {
        assert_eq!(simulate(&[0, 2000]), vec![0, 2000]);
    }

    #[test]
    fn test_cancel_drops_pending() {
        let t0 = Instant::now();
        let mut d = Debouncer::default();
        assert!(d.schedule(t0));
        assert!(!d.schedule(t0 + ms(10)));
        d.cancel();
        assert!(d.deadline().is_none());
        assert!(!d.fire(t0 + ms(600)));
    }

    #[test]
    fn test_flush_pending() {
        let t0 = Instant::now();
        let mut d = Debouncer::default();
        d.schedule(t0);
        assert!(!d.flush_pending());

        d.schedule(t0);
        d.schedule(t0 + ms(10));
        assert!(d.flush_pending());
        assert!(!d.is_active());
    }
}
