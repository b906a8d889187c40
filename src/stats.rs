//! Statistical reduction for vitals and trends

use serde::{Deserialize, Serialize};

/// Daily min/avg/max over a set of readings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
}

impl Stats {
    /// Reduce values to statistics; `None` when there is nothing finite to reduce
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;

        for v in values.into_iter().filter(|v| v.is_finite()) {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            count += 1;
        }

        if count == 0 {
            return None;
        }
        Some(Self {
            min,
            max,
            avg: sum / count as f64,
            count,
        })
    }
}

/// Average over the entries that have data; absent days do not count as zero
pub fn mean_of_present(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f64>() / present.len() as f64)
}

/// Sum over the entries that have data
pub fn sum_of_present(values: &[Option<f64>]) -> Option<f64> {
    let mut present = values.iter().flatten().peekable();
    present.peek()?;
    Some(present.sum())
}

/// Number of entries that have data
pub fn count_present(values: &[Option<f64>]) -> usize {
    values.iter().filter(|v| v.is_some()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stats_basic() {
        let stats = Stats::from_values([62.0, 70.0, 58.0, 66.0]).unwrap();
        assert_eq!(
            stats,
            Stats {
                min: 58.0,
                max: 70.0,
                avg: 64.0,
                count: 4
            }
        );
    }

    #[test]
    fn test_stats_empty_and_non_finite() {
        assert!(Stats::from_values(Vec::<f64>::new()).is_none());
        assert!(Stats::from_values([f64::NAN]).is_none());

        let stats = Stats::from_values([f64::NAN, 36.6, f64::INFINITY]).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.avg, 36.6);
    }

    #[test]
    fn test_week_with_missing_day_divides_by_six() {
        let days = [
            Some(8000.0),
            Some(9000.0),
            None,
            Some(7000.0),
            Some(10000.0),
            Some(6000.0),
            Some(8000.0),
        ];
        assert_eq!(sum_of_present(&days), Some(48000.0));
        assert_eq!(count_present(&days), 6);
        assert_eq!(mean_of_present(&days), Some(8000.0));
    }

    #[test]
    fn test_no_data_is_absent_not_zero() {
        assert_eq!(mean_of_present(&[None, None]), None);
        assert_eq!(sum_of_present(&[None]), None);
        assert_eq!(mean_of_present(&[]), None);
    }
}
