//! Fixed-capacity ring buffer of decimal samples.

use crate::utils::{checked_sum, from_count};
use rust_decimal::Decimal;

/// Circular buffer with O(1) insertion and O(n) aggregate queries.
///
/// Once full, each insertion overwrites the oldest sample. All "most recent N"
/// queries clamp `n` to the number of stored samples.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buffer: Vec<Decimal>,
    /// Next slot to write
    cursor: usize,
    count: usize,
}

impl RollingWindow {
    /// Create a window holding up to `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![Decimal::ZERO; capacity.max(1)],
            cursor: 0,
            count: 0,
        }
    }

    /// Insert a sample, evicting the oldest once at capacity.
    pub fn add(&mut self, value: Decimal) {
        self.buffer[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.buffer.len();
        if self.count < self.buffer.len() {
            self.count += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.buffer.len()
    }

    /// Most recently inserted sample.
    pub fn last(&self) -> Option<Decimal> {
        if self.count == 0 {
            return None;
        }
        let idx = (self.cursor + self.buffer.len() - 1) % self.buffer.len();
        Some(self.buffer[idx])
    }

    /// Drop all samples, keeping the capacity.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.count = 0;
    }

    /// The last `min(n, count)` samples, oldest first.
    pub fn recent(&self, n: usize) -> Recent<'_> {
        let take = n.min(self.count);
        let len = self.buffer.len();
        Recent {
            buffer: &self.buffer,
            next: (self.cursor + len - take) % len,
            remaining: take,
        }
    }

    /// Largest of the most recent `n` samples, or zero when empty.
    pub fn max(&self, n: usize) -> Decimal {
        self.recent(n).max().unwrap_or(Decimal::ZERO)
    }

    /// Smallest of the most recent `n` samples, or zero when empty.
    pub fn min(&self, n: usize) -> Decimal {
        self.recent(n).min().unwrap_or(Decimal::ZERO)
    }

    /// Arithmetic mean of the most recent `n` samples, or zero when empty.
    pub fn mean(&self, n: usize) -> Decimal {
        let take = n.min(self.count);
        if take == 0 {
            return Decimal::ZERO;
        }
        checked_sum(self.recent(take))
            .map(|sum| sum / from_count(take))
            .unwrap_or(Decimal::ZERO)
    }
}

/// Iterator over the tail of a [`RollingWindow`], oldest first.
#[derive(Debug)]
pub struct Recent<'a> {
    buffer: &'a [Decimal],
    next: usize,
    remaining: usize,
}

impl Iterator for Recent<'_> {
    type Item = Decimal;

    fn next(&mut self) -> Option<Decimal> {
        if self.remaining == 0 {
            return None;
        }
        let value = self.buffer[self.next];
        self.next = (self.next + 1) % self.buffer.len();
        self.remaining -= 1;
        Some(value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Recent<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filled(capacity: usize, values: &[i64]) -> RollingWindow {
        let mut window = RollingWindow::new(capacity);
        for v in values {
            window.add(Decimal::from(*v));
        }
        window
    }

    #[test]
    fn test_empty_window_defaults() {
        let window = RollingWindow::new(4);
        assert_eq!(window.count(), 0);
        assert_eq!(window.max(4), Decimal::ZERO);
        assert_eq!(window.min(4), Decimal::ZERO);
        assert_eq!(window.mean(4), Decimal::ZERO);
        assert_eq!(window.recent(4).count(), 0);
        assert_eq!(window.last(), None);
    }

    #[test]
    fn test_keeps_last_capacity_values_in_order() {
        for extra in 0..7 {
            let capacity = 5;
            let values: Vec<i64> = (1..=(capacity as i64 + extra)).collect();
            let window = filled(capacity, &values);

            let expected: Vec<Decimal> = values[values.len() - capacity..]
                .iter()
                .map(|v| Decimal::from(*v))
                .collect();
            let actual: Vec<Decimal> = window.recent(capacity).collect();

            assert_eq!(window.count(), capacity);
            assert_eq!(actual, expected, "after {} extra inserts", extra);
        }
    }

    #[test]
    fn test_recent_clamps_to_count() {
        let window = filled(10, &[3, 1, 4]);
        let values: Vec<Decimal> = window.recent(50).collect();
        assert_eq!(values, vec![dec!(3), dec!(1), dec!(4)]);
        assert_eq!(window.recent(2).len(), 2);
    }

    #[test]
    fn test_aggregates_over_recent_tail() {
        let window = filled(4, &[9, 2, 7, 4, 6]);
        // Holds 2, 7, 4, 6
        assert_eq!(window.max(4), dec!(7));
        assert_eq!(window.min(4), dec!(2));
        assert_eq!(window.max(2), dec!(6));
        assert_eq!(window.min(2), dec!(4));
        assert_eq!(window.mean(4), dec!(4.75));
        assert_eq!(window.mean(100), dec!(4.75));
        assert_eq!(window.last(), Some(dec!(6)));
    }

    #[test]
    fn test_zero_capacity_is_promoted() {
        let mut window = RollingWindow::new(0);
        window.add(dec!(1));
        window.add(dec!(2));
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.recent(5).collect::<Vec<_>>(), vec![dec!(2)]);
    }

    #[test]
    fn test_clear() {
        let mut window = filled(3, &[1, 2, 3]);
        assert!(window.is_full());
        window.clear();
        assert!(window.is_empty());
        window.add(dec!(8));
        assert_eq!(window.recent(3).collect::<Vec<_>>(), vec![dec!(8)]);
    }
}
