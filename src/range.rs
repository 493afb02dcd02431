use serde::Deserialize;
use serde::Serialize;

/// Component of a [Range].
///
/// Can be an interval or an individual value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RangeItem {
    /// Interval (inclusive).
    Interval(f64, f64),
    /// Exact value.
    Value(f64),
}

/// Range of values a device supports, e.g., output voltages or sample rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    items: Vec<RangeItem>,
}

impl Range {
    /// Create a [`Range`] from [`RangeItems`](RangeItem).
    pub fn new(items: Vec<RangeItem>) -> Self {
        Self { items }
    }
    /// Check if the [`Range`] contains the `value`.
    pub fn contains(&self, value: f64) -> bool {
        self.items.iter().any(|item| match *item {
            RangeItem::Interval(a, b) => a <= value && value <= b,
            RangeItem::Value(v) => (v - value).abs() <= f64::EPSILON,
        })
    }
    /// Check if the whole interval `[min, max]` lies within a single item of the [`Range`].
    pub fn contains_interval(&self, min: f64, max: f64) -> bool {
        self.items.iter().any(|item| match *item {
            RangeItem::Interval(a, b) => a <= min && max <= b,
            RangeItem::Value(v) => {
                (v - min).abs() <= f64::EPSILON && (v - max).abs() <= f64::EPSILON
            }
        })
    }
    /// Returns the value in [`Range`] that is closest to the given `value` or `None`, if the
    /// [`Range`] is empty.
    pub fn closest(&self, value: f64) -> Option<f64> {
        if self.contains(value) {
            return Some(value);
        }
        self.items
            .iter()
            .flat_map(|item| match *item {
                RangeItem::Interval(a, b) => [a, b],
                RangeItem::Value(v) => [v, v],
            })
            .min_by(|a, b| (a - value).abs().total_cmp(&(b - value).abs()))
    }
    /// Smallest and largest value of the [`Range`], or `None`, if it is empty.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        self.items
            .iter()
            .map(|item| match *item {
                RangeItem::Interval(a, b) => (a, b),
                RangeItem::Value(v) => (v, v),
            })
            .reduce(|(lo, hi), (a, b)| (lo.min(a), hi.max(b)))
    }
    /// Merges two [`Ranges`](Range).
    pub fn merge(&mut self, mut r: Range) {
        self.items.append(&mut r.items)
    }
}
