use ndarray::{Array1, Array2, ArrayView2};

use crate::error::CollaboratorError;

/// Rows = examples, columns = the model's fixed feature dimension.
pub type FeatureBatch = Array2<f32>;

/// Positive-class score per example row.
pub type ScoreBatch = Array1<f32>;

/// Region-of-interest boxes in crop-local corner coordinates, one row per
/// sample: `[batch_index, x1, y1, x2, y2]`.
pub type RoiSet = Array2<f32>;

/// Convolutional feature extractor and classification head.
///
/// Stateless given current weights; training happens through [`Optimizer`].
pub trait Model {
    /// Crop tensor accepted by the extractor.
    type Tensor;
    /// Intermediate feature map handle, opaque to the control loop.
    type FeatureMap;

    /// Receptive field of the extractor in crop pixels.
    fn receptive_field(&self) -> u32;

    /// Forward pass up to the intermediate feature layer.
    fn forward(&self, crop: &Self::Tensor) -> Result<Self::FeatureMap, CollaboratorError>;

    /// Region-pool features for a set of batch-index-prefixed ROI boxes.
    fn pool(
        &self,
        map: &Self::FeatureMap,
        rois: &RoiSet,
    ) -> Result<FeatureBatch, CollaboratorError>;

    /// Classifier head over pooled features, no gradient.
    fn score(&self, features: ArrayView2<'_, f32>) -> Result<ScoreBatch, CollaboratorError>;
}

/// Gradient-based parameter updater for the model. Owns the loss function
/// and the learning-rate schedule; the caller supplies the gradient-norm
/// clip bound.
pub trait Optimizer {
    /// One optimization step over a positive/negative batch pair.
    /// Returns the step loss.
    fn step(
        &mut self,
        positives: ArrayView2<'_, f32>,
        negatives: ArrayView2<'_, f32>,
        grad_clip: f32,
    ) -> Result<f32, CollaboratorError>;
}

/// Deterministic image resampler producing crop tensors for the model.
/// Must support non-integer scale factors.
pub trait ImageCropper {
    type Image;
    type Tensor;

    /// `(width, height)` of an image in pixels.
    fn image_size(&self, image: &Self::Image) -> (f32, f32);

    /// Resample `region` of `image` to `size` pixels.
    fn crop(
        &self,
        image: &Self::Image,
        region: &crate::bbox::BBox<crate::bbox::Ltwh>,
        size: (u32, u32),
    ) -> Result<Self::Tensor, CollaboratorError>;
}
