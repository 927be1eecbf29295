//! Nearest-timestamp selection over sparse snapshot times.
//!
//! Snapshots are taken whenever the operator refreshes, so interval bounds
//! rarely match a stored timestamp exactly. Both lookups degrade to the
//! oldest/newest stored timestamp instead of failing.

use std::collections::BTreeSet;

/// Greatest timestamp `<= target`, else the minimum. `None` only when empty.
pub fn nearest_at_or_before(timestamps: &BTreeSet<i64>, target: i64) -> Option<i64> {
    timestamps
        .range(..=target)
        .next_back()
        .copied()
        .or_else(|| timestamps.first().copied())
}

/// Least timestamp `>= target`, else the maximum. `None` only when empty.
pub fn nearest_at_or_after(timestamps: &BTreeSet<i64>, target: i64) -> Option<i64> {
    timestamps
        .range(target..)
        .next()
        .copied()
        .or_else(|| timestamps.last().copied())
}

/// Resolved `(start, end)` bounds for an interval request.
pub fn resolve_bounds(timestamps: &BTreeSet<i64>, start_time: i64, end_time: i64) -> Option<(i64, i64)> {
    let start = nearest_at_or_before(timestamps, start_time)?;
    let end = nearest_at_or_after(timestamps, end_time)?;
    Some((start, end))
}
