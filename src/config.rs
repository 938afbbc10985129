use serde_derive::{Deserialize, Serialize};

use crate::error::Error;

/// All numeric constants of the tracking loop, validated once at session
/// construction. Downstream components receive only the fields they need.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// Side of the square reference resolution the scene crop is scaled to.
    pub img_size: u32,
    /// Multiplicative padding factor on box size when building scene crops.
    pub padding: f32,

    /// Search samples drawn per frame.
    pub n_samples: usize,
    /// Translation factor of the search generator on a confident track.
    pub trans_f: f32,
    /// Widened translation factor used after a failed frame.
    pub trans_f_expand: f32,
    /// Scale factor of the search generator.
    pub scale_f: f32,
    /// Confidence cutoff separating success from a presumed lost target.
    pub success_threshold: f32,

    pub n_pos_init: usize,
    pub n_neg_init: usize,
    pub overlap_pos_init: (f32, f32),
    pub overlap_neg_init: (f32, f32),

    pub n_pos_update: usize,
    pub n_neg_update: usize,
    pub overlap_pos_update: (f32, f32),
    pub overlap_neg_update: (f32, f32),

    /// Bound of the long-term positive feature list.
    pub frames_long: usize,
    /// Bound of the short-term negative feature list.
    pub frames_short: usize,
    /// Full consolidation retraining period, in successful frames.
    pub long_interval: usize,

    pub maxiter_init: usize,
    pub maxiter_update: usize,
    pub batch_pos: usize,
    pub batch_neg: usize,
    /// Mining candidate pool per step; mining is active when > batch_neg.
    pub batch_neg_cand: usize,
    pub grad_clip: f32,

    /// Geometric step ratio of the scale-jitter variants.
    pub scale_step: f32,
    /// Multi-scale re-detection after a confident coarse estimate.
    pub multi_scale: bool,
    /// Short-term retraining after a failed frame.
    pub short_update: bool,
    /// Scale-jitter scene variants during initialization.
    pub jitter: bool,
    /// Scale-jitter scene variants during successful-frame updates.
    pub online_jitter: bool,
    /// Bounding-box regression refinement. Off by default and raised when a
    /// refiner is installed; while off the session reports the raw estimate
    /// as the refined box.
    pub bbreg: bool,

    pub seed: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            img_size: 107,
            padding: 1.2,

            n_samples: 256,
            trans_f: 0.6,
            trans_f_expand: 1.5,
            scale_f: 1.05,
            success_threshold: 0.0,

            n_pos_init: 500,
            n_neg_init: 5000,
            overlap_pos_init: (0.7, 1.0),
            overlap_neg_init: (0.0, 0.5),

            n_pos_update: 50,
            n_neg_update: 200,
            overlap_pos_update: (0.7, 1.0),
            overlap_neg_update: (0.0, 0.3),

            frames_long: 100,
            frames_short: 20,
            long_interval: 10,

            maxiter_init: 50,
            maxiter_update: 15,
            batch_pos: 32,
            batch_neg: 96,
            batch_neg_cand: 1024,
            grad_clip: 10.0,

            scale_step: 1.05,
            multi_scale: true,
            short_update: true,
            jitter: true,
            online_jitter: true,
            bbreg: false,

            seed: 123,
        }
    }
}

impl TrackerConfig {
    /// Structural sanity checks, run once when a session starts.
    ///
    /// The success threshold is a raw classifier score and is deliberately
    /// left unconstrained (`-inf` means "always succeed").
    pub fn validate(&self) -> Result<(), Error> {
        fn positive(name: &str, v: usize) -> Result<(), Error> {
            if v == 0 {
                Err(Error::Config(format!("{name} must be positive")))
            } else {
                Ok(())
            }
        }

        fn overlap(name: &str, (lo, hi): (f32, f32)) -> Result<(), Error> {
            if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
                Err(Error::Config(format!(
                    "{name} must be an ascending sub-range of [0, 1], got ({lo}, {hi})"
                )))
            } else {
                Ok(())
            }
        }

        positive("img_size", self.img_size as usize)?;
        positive("n_samples", self.n_samples)?;
        positive("n_pos_init", self.n_pos_init)?;
        positive("n_neg_init", self.n_neg_init)?;
        positive("n_pos_update", self.n_pos_update)?;
        positive("n_neg_update", self.n_neg_update)?;
        positive("frames_long", self.frames_long)?;
        positive("frames_short", self.frames_short)?;
        positive("long_interval", self.long_interval)?;
        positive("maxiter_init", self.maxiter_init)?;
        positive("maxiter_update", self.maxiter_update)?;
        positive("batch_pos", self.batch_pos)?;
        positive("batch_neg", self.batch_neg)?;

        overlap("overlap_pos_init", self.overlap_pos_init)?;
        overlap("overlap_neg_init", self.overlap_neg_init)?;
        overlap("overlap_pos_update", self.overlap_pos_update)?;
        overlap("overlap_neg_update", self.overlap_neg_update)?;

        if self.batch_neg_cand < self.batch_neg {
            return Err(Error::Config(format!(
                "batch_neg_cand ({}) must be >= batch_neg ({})",
                self.batch_neg_cand, self.batch_neg
            )));
        }

        if self.padding < 1.0 {
            return Err(Error::Config(format!(
                "padding must be >= 1, got {}",
                self.padding
            )));
        }

        if self.scale_step <= 1.0 {
            return Err(Error::Config(format!(
                "scale_step must be > 1, got {}",
                self.scale_step
            )));
        }

        if !(self.trans_f > 0.0 && self.trans_f_expand > 0.0 && self.scale_f > 0.0) {
            return Err(Error::Config(
                "trans_f, trans_f_expand and scale_f must be positive".into(),
            ));
        }

        if !(self.grad_clip > 0.0) {
            return Err(Error::Config(format!(
                "grad_clip must be positive, got {}",
                self.grad_clip
            )));
        }

        Ok(())
    }
}
