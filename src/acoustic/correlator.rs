// Streaming join of feature and waveform records on `trai`
//
// Both pending maps hold only unmatched records, so their key sets are always
// disjoint and an insertion can complete at most the key it inserted. A hit is
// emitted exactly once and both halves leave the maps in the same step.

use super::records::{AeRecord, DeviceRecord, HitRecord, TrRecord};
use futures::{Stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Insertion-ordered pending side with optional oldest-first eviction
#[derive(Debug)]
struct PendingSide<T> {
    records: HashMap<u64, (u64, T)>,
    order: VecDeque<(u64, u64)>,
}

impl<T> Default for PendingSide<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
        }
    }
}

impl<T> PendingSide<T> {
    fn insert(&mut self, trai: u64, seq: u64, record: T, capacity: Option<usize>) -> u64 {
        self.records.insert(trai, (seq, record));

        let Some(capacity) = capacity else {
            return 0;
        };
        self.order.push_back((trai, seq));

        let mut evicted = 0;
        while self.records.len() > capacity {
            let Some((old_trai, old_seq)) = self.order.pop_front() else {
                break;
            };
            if self.records.get(&old_trai).is_some_and(|(s, _)| *s == old_seq) {
                self.records.remove(&old_trai);
                evicted += 1;
            }
        }

        // Drop bookkeeping for entries that were matched since
        if self.order.len() > capacity.saturating_mul(2).max(16) {
            let records = &self.records;
            self.order
                .retain(|(trai, seq)| records.get(trai).is_some_and(|(s, _)| s == seq));
        }

        evicted
    }

    fn take(&mut self, trai: u64) -> Option<T> {
        self.records.remove(&trai).map(|(_, record)| record)
    }

    fn contains(&self, trai: u64) -> bool {
        self.records.contains_key(&trai)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[derive(Debug, Default)]
pub struct HitCorrelator {
    pending_ae: PendingSide<AeRecord>,
    pending_tr: PendingSide<TrRecord>,
    capacity: Option<usize>,
    next_seq: u64,
    evicted: u64,
}

impl HitCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap each pending side at `capacity` records, evicting the oldest.
    pub fn with_capacity_limit(mut self, capacity: Option<usize>) -> Self {
        self.capacity = capacity.filter(|&n| n > 0);
        self
    }

    /// Insert one record; returns the hit it completes, if any.
    pub fn push(&mut self, record: DeviceRecord) -> Option<HitRecord> {
        let trai = record.trai();
        let seq = self.next_seq;
        self.next_seq += 1;

        let evicted = match record {
            DeviceRecord::Ae(ae) => {
                if self.pending_ae.contains(trai) {
                    debug!("Duplicate AE record for trai {}, keeping newest", trai);
                }
                self.pending_ae.insert(trai, seq, ae, self.capacity)
            }
            DeviceRecord::Tr(tr) => {
                if self.pending_tr.contains(trai) {
                    debug!("Duplicate TR record for trai {}, keeping newest", trai);
                }
                self.pending_tr.insert(trai, seq, tr, self.capacity)
            }
        };
        if evicted > 0 {
            self.evicted += evicted;
            warn!(
                "Correlator evicted {} unmatched records ({} total)",
                evicted, self.evicted
            );
        }

        if self.pending_ae.contains(trai) && self.pending_tr.contains(trai) {
            let features = self.pending_ae.take(trai)?;
            let transient = self.pending_tr.take(trai)?;
            return Some(HitRecord::merge(features, transient));
        }
        None
    }

    /// Unmatched records waiting on both sides
    pub fn pending(&self) -> usize {
        self.pending_ae.len() + self.pending_tr.len()
    }

    pub fn pending_ae(&self) -> usize {
        self.pending_ae.len()
    }

    pub fn pending_tr(&self) -> usize {
        self.pending_tr.len()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Lazily join an input stream into complete hits.
    pub fn correlate<S>(mut self, input: S) -> impl Stream<Item = HitRecord>
    where
        S: Stream<Item = DeviceRecord> + Send + 'static,
    {
        async_stream::stream! {
            let mut input = Box::pin(input);
            while let Some(record) = input.next().await {
                if let Some(hit) = self.push(record) {
                    yield hit;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ae(trai: u64) -> DeviceRecord {
        DeviceRecord::Ae(AeRecord {
            trai,
            time: trai as f64,
            amplitude: 0.01,
            duration: 0.001,
            energy: 1.0,
            rms: None,
            rise_time: 0.0001,
            counts: 3,
        })
    }

    fn tr(trai: u64) -> DeviceRecord {
        DeviceRecord::Tr(TrRecord {
            trai,
            samples: 2,
            waveform: vec![trai as f64, -(trai as f64)],
        })
    }

    #[test]
    fn test_pair_in_either_order() {
        let mut correlator = HitCorrelator::new();
        assert!(correlator.push(ae(1)).is_none());
        let hit = correlator.push(tr(1)).unwrap();
        assert_eq!(hit.trai(), 1);
        assert_eq!(hit.waveform, vec![1.0, -1.0]);
        assert_eq!(hit.features.counts, 3);

        assert!(correlator.push(tr(2)).is_none());
        assert_eq!(correlator.push(ae(2)).unwrap().trai(), 2);
        assert_eq!(correlator.pending(), 0);
    }

    #[test]
    fn test_one_sided_never_emitted() {
        let mut correlator = HitCorrelator::new();
        for trai in 0..10 {
            assert!(correlator.push(ae(trai)).is_none());
        }
        for trai in 100..105 {
            assert!(correlator.push(tr(trai)).is_none());
        }
        assert_eq!(correlator.pending_ae(), 10);
        assert_eq!(correlator.pending_tr(), 5);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut correlator = HitCorrelator::new().with_capacity_limit(Some(2));
        correlator.push(ae(1));
        correlator.push(ae(2));
        correlator.push(ae(3));

        assert_eq!(correlator.pending_ae(), 2);
        assert_eq!(correlator.evicted(), 1);
        assert!(correlator.push(tr(1)).is_none());
        assert!(correlator.push(tr(3)).is_some());
    }

    #[test]
    fn test_capacity_ignores_matched_entries() {
        let mut correlator = HitCorrelator::new().with_capacity_limit(Some(1));
        for trai in 0..50 {
            correlator.push(ae(trai));
            assert!(correlator.push(tr(trai)).is_some());
        }
        assert_eq!(correlator.evicted(), 0);
    }

    #[tokio::test]
    async fn test_correlate_stream() {
        let input = futures::stream::iter(vec![ae(1), ae(2), tr(2), tr(3), tr(1), ae(3)]);
        let hits: Vec<u64> = HitCorrelator::new()
            .correlate(input)
            .map(|hit| hit.trai())
            .collect()
            .await;
        assert_eq!(hits, vec![2, 1, 3]);
    }
}
