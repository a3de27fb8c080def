use std::collections::VecDeque;

/// Default number of timestamps retained per series.
pub const DEFAULT_WINDOW_CAPACITY: usize = 1000;

/// Fixed-capacity ring of the most recent event timestamps for one series,
/// kept in arrival order. Once full, every new timestamp evicts the oldest.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    capacity: usize,
    timestamps: VecDeque<i64>,
}

impl SampleWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            timestamps: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a timestamp and return whatever was latest before it
    /// (`None` on the very first record).
    pub fn record(&mut self, timestamp: i64) -> Option<i64> {
        let previous = self.timestamps.back().copied();
        if self.timestamps.len() == self.capacity {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(timestamp);
        previous
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Differences between consecutive timestamps, oldest first.
    /// Negative differences (out-of-order arrivals) are dropped.
    pub fn intervals(&self) -> Vec<i64> {
        self.timestamps
            .iter()
            .zip(self.timestamps.iter().skip(1))
            .map(|(earlier, later)| later.saturating_sub(*earlier))
            .filter(|diff| *diff >= 0)
            .collect()
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_has_no_predecessor() {
        let mut window = SampleWindow::new(4);
        assert_eq!(window.record(10), None);
        assert_eq!(window.record(20), Some(10));
        assert_eq!(window.record(35), Some(20));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let mut window = SampleWindow::new(1000);
        for ts in 0..1200i64 {
            window.record(ts);
        }

        assert_eq!(window.len(), 1000);
        let intervals = window.intervals();
        assert_eq!(intervals.len(), 999);
        assert!(intervals.iter().all(|diff| *diff == 1));

        // Out of order: evicts the oldest, and its negative diff is dropped.
        window.record(0);
        assert_eq!(window.intervals().len(), 998);
    }

    #[test]
    fn intervals_skip_negative_differences() {
        let mut window = SampleWindow::new(8);
        for ts in [100, 300, 250, 250, 400] {
            window.record(ts);
        }
        assert_eq!(window.intervals(), vec![200, 0, 150]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut window = SampleWindow::new(0);
        window.record(1);
        assert_eq!(window.record(2), Some(1));
        assert_eq!(window.len(), 1);
        assert!(window.intervals().is_empty());
    }
}
