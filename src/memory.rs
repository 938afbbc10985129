use std::collections::VecDeque;
use std::fmt;

use ndarray::{concatenate, Axis};

use crate::model::FeatureBatch;

/// Bounded ordered collection with strict FIFO eviction: batches append at
/// the tail and the oldest batch leaves first once the bound is exceeded.
pub struct BatchQueue {
    deque: VecDeque<FeatureBatch>,
    bound: usize,
}

impl fmt::Debug for BatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchQueue")
            .field("len", &self.deque.len())
            .field("bound", &self.bound)
            .finish()
    }
}

impl BatchQueue {
    #[inline]
    pub fn with_bound(bound: usize) -> Self {
        Self {
            deque: VecDeque::with_capacity(bound),
            bound,
        }
    }

    /// Append a batch, returning the evicted oldest batch when full.
    pub fn push(&mut self, batch: FeatureBatch) -> Option<FeatureBatch> {
        self.deque.push_back(batch);

        if self.deque.len() > self.bound {
            self.deque.pop_front()
        } else {
            None
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    /// Oldest-first iteration.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &'_ FeatureBatch> {
        self.deque.iter()
    }

    /// Row-concatenation of the `n` most recent batches, oldest first.
    pub fn concat_recent(&self, n: usize) -> FeatureBatch {
        let skip = self.deque.len().saturating_sub(n);
        let views: Vec<_> = self.deque.iter().skip(skip).map(|b| b.view()).collect();

        concatenate(Axis(0), &views).expect("batches share one feature dimension")
    }

    /// Row-concatenation of the whole queue, oldest first.
    #[inline]
    pub fn concat_all(&self) -> FeatureBatch {
        self.concat_recent(self.deque.len())
    }
}

/// Short-term/long-term feature memory of the tracker: a bounded list of
/// positive-example batches (long horizon) and of negative-example batches
/// (short horizon). Written once per successful frame by the state machine,
/// read synchronously by the trainer.
#[derive(Debug)]
pub struct FeaturePool {
    long_pos: BatchQueue,
    short_neg: BatchQueue,
}

impl FeaturePool {
    pub fn new(frames_long: usize, frames_short: usize) -> Self {
        Self {
            long_pos: BatchQueue::with_bound(frames_long),
            short_neg: BatchQueue::with_bound(frames_short),
        }
    }

    #[inline]
    pub fn push_positive(&mut self, batch: FeatureBatch) {
        self.long_pos.push(batch);
    }

    #[inline]
    pub fn push_negative(&mut self, batch: FeatureBatch) {
        self.short_neg.push(batch);
    }

    #[inline]
    pub fn positive_frames(&self) -> usize {
        self.long_pos.len()
    }

    #[inline]
    pub fn negative_frames(&self) -> usize {
        self.short_neg.len()
    }

    /// The `n` most recent positive batches, concatenated for training.
    #[inline]
    pub fn recent_positive(&self, n: usize) -> FeatureBatch {
        self.long_pos.concat_recent(n)
    }

    #[inline]
    pub fn all_positive(&self) -> FeatureBatch {
        self.long_pos.concat_all()
    }

    #[inline]
    pub fn all_negative(&self) -> FeatureBatch {
        self.short_neg.concat_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn batch(fill: f32, rows: usize) -> FeatureBatch {
        Array2::from_elem((rows, 4), fill)
    }

    #[test]
    fn queue_never_exceeds_bound() {
        let mut q = BatchQueue::with_bound(3);
        for i in 0..10 {
            q.push(batch(i as f32, 2));
            assert!(q.len() <= 3);
        }
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn eviction_is_strictly_oldest_first() {
        let mut q = BatchQueue::with_bound(2);
        assert!(q.push(batch(0., 1)).is_none());
        assert!(q.push(batch(1., 1)).is_none());

        let evicted = q.push(batch(2., 1)).unwrap();
        assert_eq!(evicted[[0, 0]], 0.0);

        let remaining: Vec<f32> = q.iter().map(|b| b[[0, 0]]).collect();
        assert_eq!(remaining, vec![1.0, 2.0]);
    }

    #[test]
    fn concat_recent_takes_tail_batches() {
        let mut q = BatchQueue::with_bound(5);
        for i in 0..5 {
            q.push(batch(i as f32, 2));
        }

        let recent = q.concat_recent(2);
        assert_eq!(recent.nrows(), 4);
        assert_eq!(recent[[0, 0]], 3.0);
        assert_eq!(recent[[2, 0]], 4.0);
    }

    #[test]
    fn pool_tracks_both_horizons_independently() {
        let mut pool = FeaturePool::new(3, 2);
        for i in 0..4 {
            pool.push_positive(batch(i as f32, 1));
            pool.push_negative(batch(i as f32, 1));
        }

        assert_eq!(pool.positive_frames(), 3);
        assert_eq!(pool.negative_frames(), 2);
        assert_eq!(pool.all_positive().nrows(), 3);
        assert_eq!(pool.all_negative().nrows(), 2);
    }
}
