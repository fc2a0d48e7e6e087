//! Round-robin poll scheduler
//!
//! The wall batteries share one reader address behind per-battery muxes, so
//! only one group is scanned per tick. The cursor advances modulo the group
//! count even when a tick has time to spare.

use log::trace;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct PollScheduler {
    interval: Duration,
    group_count: usize,
    cursor: usize,
    last_tick: Option<Instant>,
}

impl PollScheduler {
    pub fn new(interval: Duration, group_count: usize) -> Self {
        Self {
            interval,
            group_count,
            cursor: 0,
            last_tick: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Group the next tick will scan
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Index of the group to scan now, or `None` if the tick is not due.
    pub fn due(&mut self, now: Instant) -> Option<usize> {
        if self.group_count == 0 {
            return None;
        }
        if let Some(last) = self.last_tick {
            if now.saturating_duration_since(last) < self.interval {
                return None;
            }
        }

        let group = self.cursor;
        self.cursor = (self.cursor + 1) % self.group_count;
        self.last_tick = Some(now);
        trace!("Poll tick -> group {}", group);
        Some(group)
    }

    /// Time until the next tick is due
    pub fn time_until_due(&self, now: Instant) -> Duration {
        match self.last_tick {
            Some(last) => self.interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_round_robin_order() {
        let mut s = PollScheduler::new(ms(50), 3);
        let t0 = Instant::now();
        let order: Vec<_> = (0..7).filter_map(|i| s.due(t0 + ms(50 * i))).collect();
        assert_eq!(order, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_one_group_per_tick() {
        let mut s = PollScheduler::new(ms(50), 3);
        let t0 = Instant::now();
        assert_eq!(s.due(t0), Some(0));
        assert_eq!(s.due(t0), None);
        assert_eq!(s.due(t0 + ms(49)), None);
        assert_eq!(s.due(t0 + ms(50)), Some(1));
        assert_eq!(s.cursor(), 2);
    }

    #[test]
    fn test_time_until_due() {
        let mut s = PollScheduler::new(ms(50), 2);
        let t0 = Instant::now();
        assert_eq!(s.time_until_due(t0), Duration::ZERO);
        s.due(t0);
        assert_eq!(s.time_until_due(t0 + ms(20)), ms(30));
        assert_eq!(s.time_until_due(t0 + ms(80)), Duration::ZERO);
    }

    #[test]
    fn test_no_groups_never_due() {
        let mut s = PollScheduler::new(ms(50), 0);
        assert_eq!(s.due(Instant::now()), None);
    }
}
