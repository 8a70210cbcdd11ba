//! Acceptance thresholds, one per population.

use crate::error::{AbcError, AbcResult};

/**
A validated, non-increasing sequence of positive thresholds.

Population `k` accepts a candidate iff its distance is `<= schedule[k]`.

# Examples

```rust
use abc_smc_select::schedule::ThresholdSchedule;

let schedule = ThresholdSchedule::new(vec![20.0, 15.0, 10.0, 5.0]).unwrap();
assert_eq!(schedule.len(), 4);
assert_eq!(schedule.get(2), Some(10.0));

assert!(ThresholdSchedule::new(vec![1.0, 2.0]).is_err());
assert!(ThresholdSchedule::new(vec![]).is_err());
```
*/
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSchedule {
    thresholds: Vec<f64>,
}

impl ThresholdSchedule {
    pub fn new(thresholds: Vec<f64>) -> AbcResult<Self> {
        if thresholds.is_empty() {
            return Err(AbcError::config("threshold schedule is empty"));
        }
        if let Some((k, t)) = thresholds
            .iter()
            .enumerate()
            .find(|(_, t)| !(t.is_finite() && **t > 0.0))
        {
            return Err(AbcError::config(format!(
                "threshold {k} must be finite and positive, got {t}"
            )));
        }
        if let Some(k) = thresholds.windows(2).position(|w| w[1] > w[0]) {
            return Err(AbcError::config(format!(
                "threshold schedule increases from {} to {} at population {}",
                thresholds[k],
                thresholds[k + 1],
                k + 1
            )));
        }
        Ok(Self { thresholds })
    }

    /// `n` thresholds decaying geometrically from `start` to `end` (both included).
    pub fn geometric(start: f64, end: f64, n: usize) -> AbcResult<Self> {
        if n == 0 {
            return Err(AbcError::config("geometric schedule needs at least one step"));
        }
        if !(start > 0.0 && end > 0.0) {
            return Err(AbcError::config(format!(
                "geometric schedule needs positive bounds, got {start} -> {end}"
            )));
        }
        if n == 1 {
            return Self::new(vec![start]);
        }
        let ratio = (end / start).powf(1.0 / (n - 1) as f64);
        let mut thresholds: Vec<f64> = (0..n).map(|k| start * ratio.powi(k as i32)).collect();
        thresholds[n - 1] = end;
        Self::new(thresholds)
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn get(&self, k: usize) -> Option<f64> {
        self.thresholds.get(k).copied()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.thresholds
    }
}

impl TryFrom<Vec<f64>> for ThresholdSchedule {
    type Error = AbcError;

    fn try_from(thresholds: Vec<f64>) -> AbcResult<Self> {
        Self::new(thresholds)
    }
}

impl From<ThresholdSchedule> for Vec<f64> {
    fn from(schedule: ThresholdSchedule) -> Self {
        schedule.thresholds
    }
}
