//! Full-loop tests driving the session with instrumented mock
//! collaborators: a cropper/model pair that counts calls and either follows
//! a scripted score schedule or scores deterministically from ROI geometry.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use ndarray::{Array1, Array2, ArrayView2};

use adatrack::bbreg::BoxRefiner;
use adatrack::{
    BBox, CollaboratorError, Error, FeatureBatch, ImageCropper, Ltwh, Model, Optimizer, RoiSet,
    ScoreBatch, TrackerConfig, TrackerSession,
};

struct Frame {
    width: f32,
    height: f32,
    poison: bool,
}

impl Frame {
    fn new() -> Self {
        Frame {
            width: 640.,
            height: 480.,
            poison: false,
        }
    }

    fn poisoned() -> Self {
        Frame {
            poison: true,
            ..Frame::new()
        }
    }
}

#[derive(Default)]
struct Counters {
    crops: Cell<usize>,
    score_calls: Cell<usize>,
    train_steps: Cell<usize>,
}

struct MockCropper {
    counters: Rc<Counters>,
}

impl ImageCropper for MockCropper {
    type Image = Frame;
    type Tensor = ();

    fn image_size(&self, image: &Frame) -> (f32, f32) {
        (image.width, image.height)
    }

    fn crop(
        &self,
        image: &Frame,
        region: &BBox<Ltwh>,
        size: (u32, u32),
    ) -> Result<(), CollaboratorError> {
        self.counters.crops.set(self.counters.crops.get() + 1);

        if image.poison {
            return Err(CollaboratorError::msg("crop backend failed"));
        }

        assert!(size.0 > 0 && size.1 > 0, "degenerate crop resolution");
        assert!(
            region.width() > 0.0 && region.height() > 0.0,
            "degenerate scene region"
        );
        Ok(())
    }
}

/// Pools each ROI row into a 4-wide feature; scores follow the schedule
/// when one is queued, otherwise a deterministic function of the features.
struct MockModel {
    counters: Rc<Counters>,
    schedule: Rc<RefCell<VecDeque<f32>>>,
}

impl Model for MockModel {
    type Tensor = ();
    type FeatureMap = ();

    fn receptive_field(&self) -> u32 {
        3
    }

    fn forward(&self, _crop: &()) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn pool(&self, _map: &(), rois: &RoiSet) -> Result<FeatureBatch, CollaboratorError> {
        let mut feats = Array2::<f32>::zeros((rois.nrows(), 4));
        for (mut out, roi) in feats.rows_mut().into_iter().zip(rois.rows()) {
            out[0] = roi[1];
            out[1] = roi[2];
            out[2] = roi[3];
            out[3] = roi[4];
        }
        Ok(feats)
    }

    fn score(&self, features: ArrayView2<'_, f32>) -> Result<ScoreBatch, CollaboratorError> {
        self.counters
            .score_calls
            .set(self.counters.score_calls.get() + 1);

        if let Some(v) = self.schedule.borrow_mut().pop_front() {
            return Ok(Array1::from_elem(features.nrows(), v));
        }

        Ok(features
            .rows()
            .into_iter()
            .map(|r| (r[0] + r[1] + r[2] + r[3]) / 1000.0)
            .collect())
    }
}

struct MockOptimizer {
    counters: Rc<Counters>,
}

impl Optimizer for MockOptimizer {
    fn step(
        &mut self,
        positives: ArrayView2<'_, f32>,
        negatives: ArrayView2<'_, f32>,
        grad_clip: f32,
    ) -> Result<f32, CollaboratorError> {
        assert!(positives.nrows() > 0 && negatives.nrows() > 0);
        assert!(grad_clip > 0.0);
        self.counters
            .train_steps
            .set(self.counters.train_steps.get() + 1);
        Ok(0.0)
    }
}

struct Rig {
    counters: Rc<Counters>,
    schedule: Rc<RefCell<VecDeque<f32>>>,
    model: MockModel,
    cropper: MockCropper,
    optimizer: MockOptimizer,
}

fn rig() -> Rig {
    let counters = Rc::new(Counters::default());
    let schedule: Rc<RefCell<VecDeque<f32>>> = Rc::default();

    Rig {
        model: MockModel {
            counters: counters.clone(),
            schedule: schedule.clone(),
        },
        cropper: MockCropper {
            counters: counters.clone(),
        },
        optimizer: MockOptimizer {
            counters: counters.clone(),
        },
        counters,
        schedule,
    }
}

fn test_config() -> TrackerConfig {
    TrackerConfig {
        n_samples: 32,
        n_pos_init: 20,
        n_neg_init: 40,
        n_pos_update: 10,
        n_neg_update: 20,
        maxiter_init: 3,
        maxiter_update: 2,
        batch_pos: 4,
        batch_neg: 8,
        // candidates == batch disables mining, so the classifier head is
        // only called from the detection path
        batch_neg_cand: 8,
        frames_long: 4,
        frames_short: 2,
        long_interval: 1000,
        success_threshold: f32::NEG_INFINITY,
        multi_scale: false,
        ..Default::default()
    }
}

fn init_box() -> BBox<Ltwh> {
    BBox::ltwh(300., 220., 60., 40.)
}

#[test]
fn single_frame_sequence_returns_initial_box() {
    let r = rig();
    let images = vec![Frame::new()];
    let gt = vec![init_box()];

    let (results, _fps) = TrackerSession::run(
        r.model,
        r.cropper,
        r.optimizer,
        test_config(),
        &images,
        init_box(),
        Some(&gt),
    )
    .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].bbox, init_box());
    assert_eq!(results[0].refined_bbox, init_box());
    assert!(results[0].success);
    assert_eq!(results[0].iou, Some(1.0));
}

#[test]
fn eternal_success_saturates_the_feature_pool() {
    let r = rig();
    let first = Frame::new();

    let mut session = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        test_config(),
        &first,
        init_box(),
        None,
    )
    .unwrap();

    // pool is seeded with one batch per list at initialization
    assert_eq!(session.memory().positive_frames(), 1);
    assert_eq!(session.memory().negative_frames(), 1);

    for i in 0..8 {
        let frame = Frame::new();
        let result = session.step(&frame, None).unwrap();
        assert!(result.success);

        // bounds (frames_long = 4, frames_short = 2) are never exceeded
        assert!(session.memory().positive_frames() <= 4);
        assert!(session.memory().negative_frames() <= 2);

        if i >= 4 {
            // saturated: length stays pinned at the bound
            assert_eq!(session.memory().positive_frames(), 4);
            assert_eq!(session.memory().negative_frames(), 2);
        }
    }
}

#[test]
fn disabled_refinement_scores_exactly_once_per_frame() {
    let r = rig();
    let first = Frame::new();
    let mut session = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        test_config(),
        &first,
        init_box(),
        None,
    )
    .unwrap();

    // mining is off, so initialization itself never hits the scorer
    assert_eq!(r.counters.score_calls.get(), 0);

    for expected in 1..=3 {
        session.step(&Frame::new(), None).unwrap();
        assert_eq!(r.counters.score_calls.get(), expected);
    }
}

#[test]
fn multi_scale_refinement_scores_five_times_per_frame() {
    let r = rig();
    let config = TrackerConfig {
        multi_scale: true,
        ..test_config()
    };

    let first = Frame::new();
    let mut session = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        config,
        &first,
        init_box(),
        None,
    )
    .unwrap();

    for expected in 1..=3 {
        session.step(&Frame::new(), None).unwrap();
        // coarse pass + four re-detection scales
        assert_eq!(r.counters.score_calls.get(), expected * 5);
    }
}

struct ShiftRefiner;

impl BoxRefiner for ShiftRefiner {
    fn refine(
        &self,
        _features: &FeatureBatch,
        boxes: &[BBox<Ltwh>],
    ) -> Result<Vec<BBox<Ltwh>>, CollaboratorError> {
        Ok(boxes
            .iter()
            .map(|b| BBox::ltwh(b.left() + 5.0, b.top(), b.width(), b.height()))
            .collect())
    }
}

#[test]
fn installed_refiner_adjusts_the_reported_box() {
    let r = rig();
    let mut session = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        test_config(),
        &Frame::new(),
        init_box(),
        None,
    )
    .unwrap()
    .with_refiner(Box::new(ShiftRefiner));

    let result = session.step(&Frame::new(), None).unwrap();
    assert!(result.success);
    assert!((result.refined_bbox.left() - result.bbox.left() - 5.0).abs() < 1e-3);
    assert_eq!(result.refined_bbox.width(), result.bbox.width());

    // without a refiner the stage stays off and both boxes coincide
    let r = rig();
    let mut plain = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        test_config(),
        &Frame::new(),
        init_box(),
        None,
    )
    .unwrap();

    let result = plain.step(&Frame::new(), None).unwrap();
    assert_eq!(result.refined_bbox, result.bbox);
}

#[test]
fn failure_expands_search_radius_until_the_next_success() {
    let r = rig();
    let config = TrackerConfig {
        success_threshold: 0.0,
        ..test_config()
    };
    r.schedule
        .borrow_mut()
        .extend([1.0f32, -1.0, 1.0]);

    let first = Frame::new();
    let mut session = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        config.clone(),
        &first,
        init_box(),
        None,
    )
    .unwrap();

    let ok = session.step(&Frame::new(), None).unwrap();
    assert!(ok.success);
    assert_eq!(session.search_trans_f(), config.trans_f);

    let lost = session.step(&Frame::new(), None).unwrap();
    assert!(!lost.success);
    assert_eq!(session.search_trans_f(), config.trans_f_expand);

    let trained_before = r.counters.train_steps.get();

    let recovered = session.step(&Frame::new(), None).unwrap();
    assert!(recovered.success);
    assert_eq!(session.search_trans_f(), config.trans_f);

    // the failure frame ran a short-term update; the recovery frame did not
    assert_eq!(r.counters.train_steps.get(), trained_before);
}

#[test]
fn short_term_update_runs_on_failure_only_when_enabled() {
    let r = rig();
    let config = TrackerConfig {
        success_threshold: 0.0,
        short_update: false,
        ..test_config()
    };
    r.schedule.borrow_mut().extend([-1.0f32]);

    let first = Frame::new();
    let mut session = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        config,
        &first,
        init_box(),
        None,
    )
    .unwrap();

    let after_init = r.counters.train_steps.get();
    let lost = session.step(&Frame::new(), None).unwrap();

    assert!(!lost.success);
    assert_eq!(r.counters.train_steps.get(), after_init);
}

#[test]
fn periodic_long_term_update_consolidates_the_whole_pool() {
    let r = rig();
    let config = TrackerConfig {
        long_interval: 2,
        ..test_config()
    };

    let first = Frame::new();
    let mut session = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        config.clone(),
        &first,
        init_box(),
        None,
    )
    .unwrap();

    let after_init = r.counters.train_steps.get();

    session.step(&Frame::new(), None).unwrap(); // frame 1: no retrain
    assert_eq!(r.counters.train_steps.get(), after_init);

    session.step(&Frame::new(), None).unwrap(); // frame 2: consolidation
    assert_eq!(
        r.counters.train_steps.get(),
        after_init + config.maxiter_update
    );
}

#[test]
fn identical_seeds_produce_identical_result_sequences() {
    let run = || {
        let r = rig();
        let config = TrackerConfig {
            multi_scale: true,
            ..test_config()
        };
        let images: Vec<Frame> = (0..5).map(|_| Frame::new()).collect();

        TrackerSession::run(
            r.model,
            r.cropper,
            r.optimizer,
            config,
            &images,
            init_box(),
            None,
        )
        .unwrap()
        .0
    };

    let a = run();
    let b = run();

    assert_eq!(a.len(), b.len());
    for (ra, rb) in a.iter().zip(&b) {
        assert_eq!(ra.bbox, rb.bbox);
        assert_eq!(ra.refined_bbox, rb.refined_bbox);
        assert_eq!(ra.score, rb.score);
        assert_eq!(ra.success, rb.success);
        assert_eq!(ra.iou, rb.iou);
    }
}

#[test]
fn collaborator_failure_aborts_with_the_frame_index() {
    let r = rig();
    let images = vec![Frame::new(), Frame::new(), Frame::poisoned()];

    let err = TrackerSession::run(
        r.model,
        r.cropper,
        r.optimizer,
        test_config(),
        &images,
        init_box(),
        None,
    )
    .unwrap_err();

    match err {
        Error::Model { frame, .. } => assert_eq!(frame, 2),
        other => panic!("expected a collaborator failure, got {other:?}"),
    }
}

#[test]
fn invalid_configuration_is_rejected_before_any_work() {
    let r = rig();
    let config = TrackerConfig {
        frames_short: 0,
        ..test_config()
    };

    let session = TrackerSession::start(
        r.model,
        r.cropper,
        r.optimizer,
        config,
        &Frame::new(),
        init_box(),
        None,
    );

    match session {
        Err(Error::Config(_)) => {}
        Err(other) => panic!("expected a config rejection, got {other:?}"),
        Ok(_) => panic!("expected a config rejection"),
    }
    assert_eq!(r.counters.crops.get(), 0);
}
