//! User-based nearest-neighbour prediction over sparse preference rows.
//!
//! Rows are keyed by user and hold item → preference maps. Users are
//! compared by cosine over co-rated items; only positive similarities with
//! at least `min_co_rated` shared items count, and the top `max_neighbours`
//! (ties by user id) are kept. All sums iterate in key order.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

use crate::types::UserId;

/// Preference rows, one per user.
pub(crate) type Rows<I> = BTreeMap<UserId, BTreeMap<I, f64>>;

/// Neighbours of every user, strongest first.
pub(crate) type Neighbourhoods = BTreeMap<UserId, Vec<(UserId, f64)>>;

/// Cosine over the items both rows rated, or `None` with too little overlap.
pub(crate) fn co_rated_cosine<I: Ord>(
    a: &BTreeMap<I, f64>,
    b: &BTreeMap<I, f64>,
    min_co_rated: usize,
) -> Option<f64> {
    let mut shared = 0usize;
    let (mut dot, mut left, mut right) = (0.0, 0.0, 0.0);
    for (item, x) in a {
        if let Some(y) = b.get(item) {
            shared += 1;
            dot += x * y;
            left += x * x;
            right += y * y;
        }
    }
    if shared < min_co_rated || left == 0.0 || right == 0.0 {
        return None;
    }
    Some(dot / (left.sqrt() * right.sqrt()))
}

/// The positive-similarity neighbourhood of every user in `rows`.
pub(crate) fn neighbourhoods<I: Ord>(
    rows: &Rows<I>,
    min_co_rated: usize,
    max_neighbours: usize,
) -> Neighbourhoods {
    rows.iter()
        .map(|(user, row)| {
            let mut neighbours: Vec<(UserId, f64)> = rows
                .iter()
                .filter(|(other, _)| *other != user)
                .filter_map(|(other, other_row)| {
                    co_rated_cosine(row, other_row, min_co_rated)
                        .filter(|sim| *sim > 0.0)
                        .map(|sim| (*other, sim))
                })
                .collect();
            neighbours.sort_by_key(|(id, sim)| (Reverse(OrderedFloat(*sim)), *id));
            neighbours.truncate(max_neighbours);
            (*user, neighbours)
        })
        .collect()
}

/// Similarity-weighted mean of the neighbours' preferences for `item`,
/// or `None` when no neighbour has one.
pub(crate) fn predict<I: Ord>(rows: &Rows<I>, neighbours: &[(UserId, f64)], item: &I) -> Option<f64> {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (neighbour, sim) in neighbours {
        if let Some(value) = rows.get(neighbour).and_then(|row| row.get(item)) {
            weighted += sim * value;
            total += sim;
        }
    }
    (total > 0.0).then(|| weighted / total)
}
