use ndarray::Axis;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::CollaboratorError;
use crate::model::{FeatureBatch, Model, Optimizer};

/// Exhaustion-aware random permutation cursor over `0..len`.
///
/// When a draw runs past the end, a fresh shuffled permutation is appended
/// (never a reset to index 0), so mid-epoch draws never repeat the same
/// prefix artifact.
#[derive(Debug)]
pub struct PermCursor {
    order: Vec<usize>,
    head: usize,
    len: usize,
}

impl PermCursor {
    pub fn new<R: Rng>(len: usize, rng: &mut R) -> Self {
        let mut cursor = Self {
            order: Vec::new(),
            head: 0,
            len,
        };
        cursor.extend(rng);
        cursor
    }

    fn extend<R: Rng>(&mut self, rng: &mut R) {
        let mut perm: Vec<usize> = (0..self.len).collect();
        perm.shuffle(rng);
        self.order.extend(perm);
    }

    /// Next `n` indices in draw order.
    pub fn take<R: Rng>(&mut self, n: usize, rng: &mut R) -> Vec<usize> {
        while self.order.len() < self.head + n {
            self.extend(rng);
        }

        let slice = self.order[self.head..self.head + n].to_vec();
        self.head += n;
        slice
    }
}

/// Batch-size and clipping constants of one training job.
#[derive(Debug, Clone, Copy)]
pub struct TrainOpts {
    pub batch_pos: usize,
    pub batch_neg: usize,
    /// Candidate pool scored per step; mining is active when > batch_neg.
    pub batch_neg_cand: usize,
    pub grad_clip: f32,
}

/// Run `max_iter` optimization steps over the given feature sets.
///
/// Each step draws a positive batch and a negative candidate batch through
/// independent permutation cursors (positives first, fixed draw order),
/// ranks the candidates with the classifier head and keeps the
/// `batch_neg` highest-scoring ones (hard-negative mining), then issues one
/// optimizer step. The feature sets are only read, never mutated.
pub fn train<M: Model, O: Optimizer, R: Rng>(
    model: &M,
    optimizer: &mut O,
    pos_feats: &FeatureBatch,
    neg_feats: &FeatureBatch,
    max_iter: usize,
    opts: &TrainOpts,
    rng: &mut R,
) -> Result<(), CollaboratorError> {
    if pos_feats.nrows() == 0 || neg_feats.nrows() == 0 {
        return Err(CollaboratorError::msg(
            "training requires non-empty positive and negative feature sets",
        ));
    }

    let mut pos_cursor = PermCursor::new(pos_feats.nrows(), rng);
    let mut neg_cursor = PermCursor::new(neg_feats.nrows(), rng);

    for iter in 0..max_iter {
        let pos_idx = pos_cursor.take(opts.batch_pos, rng);
        let neg_idx = neg_cursor.take(opts.batch_neg_cand, rng);

        let pos_batch = pos_feats.select(Axis(0), &pos_idx);
        let mut neg_batch = neg_feats.select(Axis(0), &neg_idx);

        if opts.batch_neg_cand > opts.batch_neg {
            let scores = model.score(neg_batch.view())?;

            let mut ranked: Vec<usize> = (0..neg_batch.nrows()).collect();
            ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            ranked.truncate(opts.batch_neg);

            neg_batch = neg_batch.select(Axis(0), &ranked);
        }

        let loss = optimizer.step(pos_batch.view(), neg_batch.view(), opts.grad_clip)?;
        tracing::debug!(iter, loss, "training step");
    }

    Ok(())
}
