use std::time::{Duration, Instant};

use ndarray::{concatenate, s, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::bbox::{BBox, Ltwh};
use crate::bbreg::BoxRefiner;
use crate::config::TrackerConfig;
use crate::error::{CollaboratorError, Error};
use crate::geometry::{self, JitterVariant};
use crate::memory::FeaturePool;
use crate::model::{FeatureBatch, ImageCropper, Model, Optimizer};
use crate::sampler::{SampleGenerator, SampleKind};
use crate::trainer::{self, TrainOpts};

/// Highest-scoring candidates averaged into the target estimate.
const TOP_K: usize = 5;

/// Sample count of the multi-scale refinement pass.
const REFINE_SAMPLES: usize = 32;

/// Translation factor of the refinement pass, tighter than the search.
const REFINE_TRANS_F: f32 = 0.2;

/// Jitter parameters of the positive update generator.
const POS_TRANS_F: f32 = 0.1;
const POS_SCALE_F: f32 = 1.2;

/// Jitter parameters of the negative update generator.
const NEG_TRANS_F: f32 = 1.5;
const NEG_SCALE_F: f32 = 1.2;

/// Per-frame tracking record, immutable once appended.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackResult {
    /// Mean of the top-K candidate boxes.
    pub bbox: BBox<Ltwh>,
    /// Regressor-refined box; equals `bbox` when refinement is off or the
    /// frame failed.
    pub refined_bbox: BBox<Ltwh>,
    /// Mean score of the top-K candidates.
    pub score: f32,
    pub success: bool,
    /// IoU against ground truth, recorded for evaluation only.
    pub iou: Option<f32>,
    pub elapsed: Duration,
}

/// One scored forward pass over a candidate set.
struct ScorePass {
    score: f32,
    estimate: BBox<Ltwh>,
    top_boxes: Vec<BBox<Ltwh>>,
    top_feats: FeatureBatch,
}

/// Online adaptive tracking session over one image sequence.
///
/// All mutable tracker state (target box, search radius, feature pool,
/// result history) lives in this value; per-frame processing is strictly
/// sequential.
pub struct TrackerSession<M, C, O>
where
    M: Model,
    C: ImageCropper<Tensor = M::Tensor>,
    O: Optimizer,
{
    config: TrackerConfig,
    model: M,
    cropper: C,
    optimizer: O,
    refiner: Option<Box<dyn BoxRefiner>>,
    rng: ChaCha8Rng,
    pool: FeaturePool,
    target: BBox<Ltwh>,
    trans_f: f32,
    frame: usize,
    results: Vec<TrackResult>,
    total_time: Duration,
}

impl<M, C, O> TrackerSession<M, C, O>
where
    M: Model,
    C: ImageCropper<Tensor = M::Tensor>,
    O: Optimizer,
{
    /// Initialize on the first frame: draw dense positives and sparse
    /// negatives around `init_box`, collect features over the jitter scene
    /// variants, run the initial training job and seed both memory lists.
    pub fn start(
        model: M,
        cropper: C,
        optimizer: O,
        config: TrackerConfig,
        image: &C::Image,
        init_box: BBox<Ltwh>,
        gt: Option<&BBox<Ltwh>>,
    ) -> Result<Self, Error> {
        config.validate()?;

        let tic = Instant::now();
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        let pool = FeaturePool::new(config.frames_long, config.frames_short);

        let mut session = Self {
            trans_f: config.trans_f,
            config,
            model,
            cropper,
            optimizer,
            refiner: None,
            rng,
            pool,
            target: init_box,
            frame: 0,
            results: Vec::new(),
            total_time: Duration::ZERO,
        };

        session.initialize(image).map_err(Error::at_frame(0))?;

        let elapsed = tic.elapsed();
        session.total_time += elapsed;
        session.results.push(TrackResult {
            bbox: init_box,
            refined_bbox: init_box,
            score: f32::INFINITY,
            success: true,
            iou: gt.map(|g| init_box.iou(g)),
            elapsed,
        });

        Ok(session)
    }

    /// Install a bounding-box refiner and turn the `bbreg` stage on. Without
    /// a refiner the stage stays off and the raw estimate is reported.
    pub fn with_refiner(mut self, refiner: Box<dyn BoxRefiner>) -> Self {
        self.refiner = Some(refiner);
        self.config.bbreg = true;
        self
    }

    fn initialize(&mut self, image: &C::Image) -> Result<(), CollaboratorError> {
        let img_size = self.cropper.image_size(image);
        let cfg = &self.config;

        let pos_examples = SampleGenerator::new(SampleKind::Gaussian, img_size, 0.1, 1.2)
            .generate(
                &mut self.rng,
                &self.target,
                cfg.n_pos_init,
                Some(cfg.overlap_pos_init),
                None,
            );
        let mut neg_examples = SampleGenerator::new(SampleKind::Uniform, img_size, 1.0, 2.0)
            .with_aspect(1.1)
            .generate(
                &mut self.rng,
                &self.target,
                cfg.n_neg_init,
                Some(cfg.overlap_neg_init),
                None,
            );
        neg_examples.shuffle(&mut self.rng);

        if pos_examples.is_empty() || neg_examples.is_empty() {
            return Err(CollaboratorError::msg(
                "initialization produced no training examples",
            ));
        }

        let scene = geometry::padded_scene_box(&neg_examples, cfg.padding);
        let variants = if cfg.jitter {
            geometry::init_jitter_variants(&scene, cfg.scale_step)
        } else {
            geometry::identity_variant(&scene)
        };

        let target = self.target;
        let (pos_feats, neg_feats) =
            self.collect_features(image, &target, &pos_examples, &neg_examples, &variants)?;

        let opts = self.train_opts();
        trainer::train(
            &self.model,
            &mut self.optimizer,
            &pos_feats,
            &neg_feats,
            self.config.maxiter_init,
            &opts,
            &mut self.rng,
        )?;

        let n_pos = self.config.n_pos_update.min(pos_feats.nrows());
        let n_neg = self.config.n_neg_update.min(neg_feats.nrows());
        self.pool
            .push_positive(pos_feats.slice(s![..n_pos, ..]).to_owned());
        self.pool
            .push_negative(neg_feats.slice(s![..n_neg, ..]).to_owned());

        Ok(())
    }

    /// Process the next frame: search, score, decide success, adapt the
    /// search radius, update memory and retrain on schedule. Appends and
    /// returns exactly one [`TrackResult`].
    pub fn step(
        &mut self,
        image: &C::Image,
        gt: Option<&BBox<Ltwh>>,
    ) -> Result<&TrackResult, Error> {
        let frame = self.frame + 1;
        let tic = Instant::now();
        let img_size = self.cropper.image_size(image);
        let cfg = self.config.clone();

        // Search around the previous target with the adapted radius.
        let samples =
            SampleGenerator::new(SampleKind::Gaussian, img_size, self.trans_f, cfg.scale_f)
                .valid()
                .generate(&mut self.rng, &self.target, cfg.n_samples, None, None);

        let reference = self.target;
        let crop = geometry::SceneCrop::covering(
            &samples,
            cfg.padding,
            img_size,
            &reference,
            cfg.img_size,
            1.0,
        );
        let mut best = self
            .score_pass(image, &samples, &crop, &reference)
            .map_err(Error::at_frame(frame))?;
        let mut success = best.score > cfg.success_threshold;

        // Multi-scale re-detection around the coarse estimate.
        if success && cfg.multi_scale {
            let refine_samples = SampleGenerator::new(
                SampleKind::Gaussian,
                img_size,
                REFINE_TRANS_F,
                cfg.scale_f,
            )
            .valid()
            .generate(&mut self.rng, &best.estimate, REFINE_SAMPLES, None, None);

            if !refine_samples.is_empty() {
                let coarse = best.estimate;

                for jitter in geometry::redetection_scales(cfg.scale_step) {
                    let crop = geometry::SceneCrop::covering(
                        &refine_samples,
                        cfg.padding,
                        img_size,
                        &coarse,
                        cfg.img_size,
                        jitter,
                    );
                    let pass = self
                        .score_pass(image, &refine_samples, &crop, &coarse)
                        .map_err(Error::at_frame(frame))?;

                    if pass.score > best.score {
                        best = pass;
                    }
                }

                success = best.score > cfg.success_threshold;
            }
        }

        // Expand the search area at failure, reset it at success.
        self.trans_f = if success {
            cfg.trans_f
        } else {
            cfg.trans_f_expand
        };

        self.target = best.estimate;

        let refined_bbox = match &self.refiner {
            Some(refiner) if success && cfg.bbreg => {
                let refined = refiner
                    .refine(&best.top_feats, &best.top_boxes)
                    .map_err(Error::at_frame(frame))?;
                if refined.is_empty() {
                    best.estimate
                } else {
                    BBox::mean(&refined)
                }
            }
            _ => best.estimate,
        };

        if success {
            self.collect_update_examples(image, img_size)
                .map_err(Error::at_frame(frame))?;
        }

        if !success {
            if cfg.short_update {
                let recent = cfg.frames_short.min(self.pool.positive_frames());
                let pos_data = self.pool.recent_positive(recent);
                let neg_data = self.pool.all_negative();
                let opts = self.train_opts();

                trainer::train(
                    &self.model,
                    &mut self.optimizer,
                    &pos_data,
                    &neg_data,
                    cfg.maxiter_update,
                    &opts,
                    &mut self.rng,
                )
                .map_err(Error::at_frame(frame))?;
            }
        } else if frame % cfg.long_interval == 0 {
            let pos_data = self.pool.all_positive();
            let neg_data = self.pool.all_negative();
            let opts = self.train_opts();

            trainer::train(
                &self.model,
                &mut self.optimizer,
                &pos_data,
                &neg_data,
                cfg.maxiter_update,
                &opts,
                &mut self.rng,
            )
            .map_err(Error::at_frame(frame))?;
        }

        let elapsed = tic.elapsed();
        self.total_time += elapsed;
        self.frame = frame;

        tracing::debug!(frame, score = best.score, success, "tracked frame");

        self.results.push(TrackResult {
            bbox: best.estimate,
            refined_bbox,
            score: best.score,
            success,
            iou: gt.map(|g| refined_bbox.iou(g)),
            elapsed,
        });

        Ok(self.results.last().unwrap())
    }

    /// Crop, forward, pool and score one candidate set against one scene
    /// crop; summarize the top-K candidates.
    fn score_pass(
        &self,
        image: &C::Image,
        samples: &[BBox<Ltwh>],
        crop: &geometry::SceneCrop,
        reference: &BBox<Ltwh>,
    ) -> Result<ScorePass, CollaboratorError> {
        let cfg = &self.config;

        let tensor = self.cropper.crop(image, &crop.region, crop.crop_size)?;
        let map = self.model.forward(&tensor)?;

        let scaled = cfg.img_size as f32 * crop.scale;
        let rois = geometry::to_roi(
            samples,
            (crop.region.left(), crop.region.top()),
            self.model.receptive_field(),
            (scaled, scaled),
            reference,
            cfg.padding,
        );

        let feats = self.model.pool(&map, &rois)?;
        let scores = self.model.score(feats.view())?;

        let k = TOP_K.min(samples.len());
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        order.truncate(k);

        let score = order.iter().map(|&i| scores[i]).sum::<f32>() / k as f32;
        let top_boxes: Vec<_> = order.iter().map(|&i| samples[i]).collect();
        let top_feats = feats.select(Axis(0), &order);

        Ok(ScorePass {
            score,
            estimate: BBox::mean(&top_boxes),
            top_boxes,
            top_feats,
        })
    }

    /// After a successful frame, draw fresh positive/negative examples
    /// around the accepted target, collect their features over the online
    /// jitter variants and push them into the pool with eviction.
    fn collect_update_examples(
        &mut self,
        image: &C::Image,
        img_size: (f32, f32),
    ) -> Result<(), CollaboratorError> {
        let cfg = self.config.clone();

        let pos_examples =
            SampleGenerator::new(SampleKind::Gaussian, img_size, POS_TRANS_F, POS_SCALE_F)
                .generate(
                    &mut self.rng,
                    &self.target,
                    cfg.n_pos_update,
                    Some(cfg.overlap_pos_update),
                    None,
                );
        let neg_examples =
            SampleGenerator::new(SampleKind::Uniform, img_size, NEG_TRANS_F, NEG_SCALE_F)
                .generate(
                    &mut self.rng,
                    &self.target,
                    cfg.n_neg_update,
                    Some(cfg.overlap_neg_update),
                    None,
                );

        // Starvation is tolerated; an empty side just skips this update.
        if pos_examples.is_empty() || neg_examples.is_empty() {
            tracing::warn!(
                frame = self.frame + 1,
                "skipping memory update: no accepted examples"
            );
            return Ok(());
        }

        let scene = geometry::padded_scene_box(&neg_examples, cfg.padding);
        let variants = if cfg.online_jitter {
            geometry::update_jitter_variants(&scene, cfg.scale_step)
        } else {
            geometry::identity_variant(&scene)
        };

        let target = self.target;
        let (pos_feats, neg_feats) =
            self.collect_features(image, &target, &pos_examples, &neg_examples, &variants)?;

        let pos_feats = self.subsample(pos_feats, cfg.n_pos_update);
        let neg_feats = self.subsample(neg_feats, cfg.n_neg_update);

        self.pool.push_positive(pos_feats);
        self.pool.push_negative(neg_feats);

        Ok(())
    }

    /// Pool positive/negative example features over every scene variant and
    /// concatenate the per-variant batches.
    fn collect_features(
        &mut self,
        image: &C::Image,
        reference: &BBox<Ltwh>,
        pos_examples: &[BBox<Ltwh>],
        neg_examples: &[BBox<Ltwh>],
        variants: &[JitterVariant],
    ) -> Result<(FeatureBatch, FeatureBatch), CollaboratorError> {
        let cfg = &self.config;
        let rf = self.model.receptive_field();

        let mut pos_parts = Vec::with_capacity(variants.len());
        let mut neg_parts = Vec::with_capacity(variants.len());

        for (region, jitter) in variants {
            let crop_size = geometry::crop_resolution(region, reference, cfg.img_size, *jitter);
            let tensor = self.cropper.crop(image, region, crop_size)?;
            let map = self.model.forward(&tensor)?;

            let origin = (region.left(), region.top());
            let scaled = cfg.img_size as f32 * jitter;

            let pos_rois =
                geometry::to_roi(pos_examples, origin, rf, (scaled, scaled), reference, cfg.padding);
            pos_parts.push(self.model.pool(&map, &pos_rois)?);

            let neg_rois =
                geometry::to_roi(neg_examples, origin, rf, (scaled, scaled), reference, cfg.padding);
            neg_parts.push(self.model.pool(&map, &neg_rois)?);
        }

        let pos_views: Vec<_> = pos_parts.iter().map(|b| b.view()).collect();
        let neg_views: Vec<_> = neg_parts.iter().map(|b| b.view()).collect();

        let pos = concatenate(Axis(0), &pos_views)
            .map_err(|e| CollaboratorError::msg(format!("feature concat: {e}")))?;
        let neg = concatenate(Axis(0), &neg_views)
            .map_err(|e| CollaboratorError::msg(format!("feature concat: {e}")))?;

        Ok((pos, neg))
    }

    /// Random row subsample down to `cap` by shuffling indices.
    fn subsample(&mut self, feats: FeatureBatch, cap: usize) -> FeatureBatch {
        if feats.nrows() <= cap {
            return feats;
        }

        let mut idx: Vec<usize> = (0..feats.nrows()).collect();
        idx.shuffle(&mut self.rng);
        idx.truncate(cap);

        feats.select(Axis(0), &idx)
    }

    fn train_opts(&self) -> TrainOpts {
        TrainOpts {
            batch_pos: self.config.batch_pos,
            batch_neg: self.config.batch_neg,
            batch_neg_cand: self.config.batch_neg_cand,
            grad_clip: self.config.grad_clip,
        }
    }

    /// One record per processed frame, frame 0 included.
    #[inline]
    pub fn results(&self) -> &[TrackResult] {
        &self.results
    }

    /// Current target-box estimate.
    #[inline]
    pub fn target(&self) -> &BBox<Ltwh> {
        &self.target
    }

    /// Short-term/long-term feature memory.
    #[inline]
    pub fn memory(&self) -> &FeaturePool {
        &self.pool
    }

    /// Current search translation factor (base on success, expanded after a
    /// failed frame).
    #[inline]
    pub fn search_trans_f(&self) -> f32 {
        self.trans_f
    }

    /// Frames processed per second so far.
    pub fn fps(&self) -> f32 {
        self.results.len() as f32 / self.total_time.as_secs_f32()
    }

    /// Track a whole in-memory sequence, aborting on the first collaborator
    /// failure with the offending frame index.
    pub fn run(
        model: M,
        cropper: C,
        optimizer: O,
        config: TrackerConfig,
        images: &[C::Image],
        init_box: BBox<Ltwh>,
        gt: Option<&[BBox<Ltwh>]>,
    ) -> Result<(Vec<TrackResult>, f32), Error> {
        let (first, rest) = images.split_first().ok_or(Error::EmptySequence)?;

        let mut session = Self::start(
            model,
            cropper,
            optimizer,
            config,
            first,
            init_box,
            gt.and_then(|g| g.first()),
        )?;

        for (i, image) in rest.iter().enumerate() {
            session.step(image, gt.and_then(|g| g.get(i + 1)))?;
        }

        let fps = session.fps();
        Ok((session.results, fps))
    }
}
