// src/engine/combinators.rs
//! Operators that connect stages: broadcast-cross, key-join, collect barrier and group-by fan-in.
//! Each operator owns its output emitter, so the output stream closes when the operator returns.

use std::collections::BTreeMap;

use fxhash::FxHashMap as HashMap;

use crate::engine::record::Keyed;
use crate::engine::stream::{Emitter, Subscription};


/// Crosses every input record with every value of a small reference stream.
/// The reference stream is drained to completion before the first record is emitted.
///
/// # Arguments
///
/// * `input` - Main record stream.
/// * `values` - Bounded reference stream (usually a single value).
/// * `output` - Emitter for the crossed records.
/// * `combine` - Builds one output record from an input record and a reference value.
///
/// # Returns
/// Number of records emitted.
pub async fn each<T, V, U, F>(
    mut input: Subscription<T>,
    values: Subscription<V>,
    output: Emitter<U>,
    combine: F,
) -> usize
where
    U: Clone + Send + 'static,
    F: Fn(&T, &V) -> U,
{
    let values = values.drain().await;
    let mut emitted = 0;
    while let Some(item) = input.recv().await {
        for value in &values {
            output.emit(combine(&item, value));
            emitted += 1;
        }
    }
    emitted
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStats<K> {
    pub matched: usize,
    pub left_only: Vec<K>,
    pub right_only: Vec<K>,
}

impl<K> Default for JoinStats<K> {
    fn default() -> Self {
        JoinStats {
            matched: 0,
            left_only: Vec::new(),
            right_only: Vec::new(),
        }
    }
}

impl<K> JoinStats<K> {
    pub fn mismatches(&self) -> usize {
        self.left_only.len() + self.right_only.len()
    }
}

/// Inner join by key.
///
/// Records are paired as soon as both sides have delivered a key, so a join never waits for a full close
/// before emitting. Keys seen on only one side are dropped and returned in the stats once both sides close.
/// When `right` is a sentinel stream, every left record is paired with the sentinel placeholder instead.
///
/// # Arguments
///
/// * `left` - Stream whose keys drive the output.
/// * `right` - Stream joined against `left`, or a sentinel stream.
/// * `output` - Emitter for joined records.
/// * `merge` - Combines a left and a right record that share a key.
///
/// # Returns
/// JoinStats with matched count and the unmatched keys per side, sorted.
pub async fn join<T, M>(
    mut left: Subscription<T>,
    mut right: Subscription<T>,
    output: Emitter<T>,
    merge: M,
) -> JoinStats<T::Key>
where
    T: Keyed + Clone + Send + 'static,
    M: Fn(T, T) -> T,
{
    let mut stats = JoinStats::default();

    if right.is_sentinel() {
        let placeholder = right.drain().await.into_iter().next();
        while let Some(item) = left.recv().await {
            match &placeholder {
                Some(value) => {
                    output.emit(merge(item, value.clone()));
                    stats.matched += 1;
                }
                None => stats.left_only.push(item.key().clone()),
            }
        }
        return stats;
    }

    let mut lefts: HashMap<T::Key, Vec<T>> = HashMap::default();
    let mut rights: HashMap<T::Key, Vec<T>> = HashMap::default();
    let mut left_open = true;
    let mut right_open = true;

    while left_open || right_open {
        tokio::select! {
            item = left.recv(), if left_open => match item {
                Some(l) => {
                    if let Some(matches) = rights.get(l.key()) {
                        for r in matches {
                            output.emit(merge(l.clone(), r.clone()));
                            stats.matched += 1;
                        }
                    }
                    lefts.entry(l.key().clone()).or_default().push(l);
                }
                None => left_open = false,
            },
            item = right.recv(), if right_open => match item {
                Some(r) => {
                    if let Some(matches) = lefts.get(r.key()) {
                        for l in matches {
                            output.emit(merge(l.clone(), r.clone()));
                            stats.matched += 1;
                        }
                    }
                    rights.entry(r.key().clone()).or_default().push(r);
                }
                None => right_open = false,
            },
        }
    }

    stats.left_only = lefts.keys().filter(|k| !rights.contains_key(*k)).cloned().collect();
    stats.right_only = rights.keys().filter(|k| !lefts.contains_key(*k)).cloned().collect();
    stats.left_only.sort();
    stats.right_only.sort();
    stats
}


#[derive(Debug)]
pub enum BarrierResult<T> {
    Fired(Vec<T>),
    Starved { expected: usize, received: Vec<T> },
}

/// Buffers a stream until it closes. Fires only when the number of records matches `expected`
/// (any count when `expected` is `None`).
pub async fn collect<T>(input: Subscription<T>, expected: Option<usize>) -> BarrierResult<T> {
    let received = input.drain().await;
    match expected {
        Some(n) if n != received.len() => BarrierResult::Starved { expected: n, received },
        _ => BarrierResult::Fired(received),
    }
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOutcome<G> {
    pub group: G,
    pub expected: usize,
    pub received: usize,
    pub fired: bool,
    /// Records that arrived after the group had already fired. They are dropped.
    pub surplus: usize,
}

/// Re-keys records by group and emits one record per group once all of that group's members have arrived.
/// Groups still incomplete when the input closes never fire. A group fires at most once.
///
/// # Arguments
///
/// * `input` - Per-sample record stream.
/// * `expected` - Member count per group.
/// * `group_of` - Group lookup for a record; `None` drops the record.
/// * `output` - Emitter for the grouped records.
/// * `build` - Builds the grouped record from the group key and its members.
///
/// # Returns
/// One GroupOutcome per expected group, ordered by group.
pub async fn group_by<T, G, U, F, B>(
    mut input: Subscription<T>,
    expected: BTreeMap<G, usize>,
    group_of: F,
    output: Emitter<U>,
    build: B,
) -> Vec<GroupOutcome<G>>
where
    G: Clone + Ord,
    U: Clone + Send + 'static,
    F: Fn(&T) -> Option<G>,
    B: Fn(&G, Vec<T>) -> U,
{
    let mut buckets: BTreeMap<G, Vec<T>> = BTreeMap::new();
    let mut received: BTreeMap<G, usize> = BTreeMap::new();
    let mut fired: BTreeMap<G, bool> = BTreeMap::new();

    while let Some(item) = input.recv().await {
        let group = match group_of(&item) {
            Some(g) if expected.contains_key(&g) => g,
            _ => continue,
        };
        *received.entry(group.clone()).or_insert(0) += 1;
        if fired.contains_key(&group) {
            continue;
        }
        let bucket = buckets.entry(group.clone()).or_default();
        bucket.push(item);
        if Some(&bucket.len()) == expected.get(&group) {
            let members = std::mem::take(bucket);
            output.emit(build(&group, members));
            fired.insert(group, true);
        }
    }

    expected
        .into_iter()
        .map(|(group, n)| {
            let got = received.get(&group).copied().unwrap_or(0);
            let was_fired = fired.get(&group).copied().unwrap_or(false);
            GroupOutcome {
                group,
                expected: n,
                received: got,
                fired: was_fired,
                surplus: if was_fired { got.saturating_sub(n) } else { 0 },
            }
        })
        .collect()
}
