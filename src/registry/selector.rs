//! Shot partition selection.
//!
//! Mapping and attribute documents may be versioned by shot: a group directory
//! holding `45000/` and `47000/` sub-directories has two partitions, valid from
//! those shots onwards. A group without shot directories has the single
//! shot-independent partition [`SHOT_INDEPENDENT`].

use std::collections::BTreeMap;

/// Partition key of shot-independent documents.
pub const SHOT_INDEPENDENT: i64 = -1;

/// Pick the partition that applies to `shot`.
///
/// The greatest non-negative partition not exceeding `shot` wins. When no
/// partition qualifies, or no shot was requested, the shot-independent
/// partition is used if present. `None` means nothing applies.
///
/// # Example
///
/// ```rust
/// use std::collections::BTreeMap;
/// use tokamap::registry::selector::select_shot;
///
/// let partitions: BTreeMap<i64, ()> = [(-1, ()), (10, ()), (20, ())].into_iter().collect();
/// assert_eq!(select_shot(&partitions, Some(15)), Some(10));
/// assert_eq!(select_shot(&partitions, Some(5)), Some(-1));
/// assert_eq!(select_shot(&partitions, None), Some(-1));
/// ```
pub fn select_shot<V>(partitions: &BTreeMap<i64, V>, shot: Option<i64>) -> Option<i64> {
    let versioned = shot
        .filter(|&s| s >= 0)
        .and_then(|s| partitions.range(0..=s).next_back().map(|(&key, _)| key));

    versioned.or_else(|| {
        partitions
            .contains_key(&SHOT_INDEPENDENT)
            .then_some(SHOT_INDEPENDENT)
    })
}
