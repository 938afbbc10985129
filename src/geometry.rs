//! Pure scene-crop geometry: padded scene boxes, boundary clamping,
//! crop-resolution arithmetic and the sample-to-ROI transform.

use ndarray::Array2;

use crate::bbox::{BBox, Ltwh};
use crate::model::RoiSet;

/// Padded, clamped image region for one model forward pass, together with
/// the resolution it is resampled to and its scale-jitter factor
/// (identity = 1.0).
#[derive(Debug, Clone, PartialEq)]
pub struct SceneCrop {
    pub region: BBox<Ltwh>,
    pub crop_size: (u32, u32),
    pub scale: f32,
}

impl SceneCrop {
    /// Build the crop covering `samples`, clamped to `image_size`, resampled
    /// so the reference box maps to `img_size` pixels, scaled by `jitter`.
    pub fn covering(
        samples: &[BBox<Ltwh>],
        padding: f32,
        image_size: (f32, f32),
        reference: &BBox<Ltwh>,
        img_size: u32,
        jitter: f32,
    ) -> SceneCrop {
        let region = clamp_scene_box(padded_scene_box(samples, padding), image_size);
        let crop_size = crop_resolution(&region, reference, img_size, jitter);

        SceneCrop {
            region,
            crop_size,
            scale: jitter,
        }
    }
}

/// Axis-aligned rectangle covering every sample expanded by `padding`
/// (a multiplicative factor on box size) on each side. `samples` must be
/// non-empty.
pub fn padded_scene_box(samples: &[BBox<Ltwh>], padding: f32) -> BBox<Ltwh> {
    let grow = (padding - 1.0) / 2.0;
    let reach = (padding + 1.0) / 2.0;

    let mut x1 = f32::INFINITY;
    let mut y1 = f32::INFINITY;
    let mut x2 = f32::NEG_INFINITY;
    let mut y2 = f32::NEG_INFINITY;

    for s in samples {
        x1 = x1.min(s.left() - s.width() * grow);
        y1 = y1.min(s.top() - s.height() * grow);
        x2 = x2.max(s.left() + s.width() * reach);
        y2 = y2.max(s.top() + s.height() * reach);
    }

    BBox::ltwh(x1, y1, x2 - x1, y2 - y1)
}

/// Boundary policy for a scene box that may lie (partly) outside the image.
///
/// An origin past the image extent is pulled back to `extent - 1`; a box
/// ending before the origin has its size enlarged so it covers at least one
/// pixel from its origin. The result is never degenerate, even for a target
/// predicted far outside the frame.
pub fn clamp_scene_box(scene: BBox<Ltwh>, image_size: (f32, f32)) -> BBox<Ltwh> {
    let (img_w, img_h) = image_size;
    let [mut x, mut y, mut w, mut h] = *scene.as_slice();

    if x > img_w {
        x = img_w - 1.0;
    }
    if y > img_h {
        y = img_h - 1.0;
    }
    if x + w < 0.0 {
        w = -x + 1.0;
    }
    if y + h < 0.0 {
        h = -y + 1.0;
    }

    BBox::ltwh(x, y, w, h)
}

/// Integer crop resolution: the scene box scaled so the reference box maps
/// to `img_size` pixels, truncated, then stretched by the jitter factor.
pub fn crop_resolution(
    scene: &BBox<Ltwh>,
    reference: &BBox<Ltwh>,
    img_size: u32,
    jitter: f32,
) -> (u32, u32) {
    let w = (scene.width() * img_size as f32 / reference.width()).trunc() * jitter;
    let h = (scene.height() * img_size as f32 / reference.height()).trunc() * jitter;

    ((w.round() as u32).max(1), (h.round() as u32).max(1))
}

/// Translate samples into crop-local corner boxes and apply the
/// receptive-field-aware padding/scaling rule: each box is expanded by the
/// padding margin, scaled into the (jitter-scaled) reference resolution,
/// and its far corner pulled in by the receptive field so that a pooled
/// window stays inside the feature map. Rows are batch-index-prefixed.
pub fn to_roi(
    samples: &[BBox<Ltwh>],
    scene_origin: (f32, f32),
    receptive_field: u32,
    scaled_resolution: (f32, f32),
    reference: &BBox<Ltwh>,
    padding: f32,
) -> RoiSet {
    let sx = scaled_resolution.0 / (reference.width() * padding);
    let sy = scaled_resolution.1 / (reference.height() * padding);
    let rf = receptive_field as f32;
    let grow = (padding - 1.0) / 2.0;

    let mut rois = Array2::<f32>::zeros((samples.len(), 5));
    for (mut row, s) in rois.rows_mut().into_iter().zip(samples) {
        let pad_x = s.width() * grow;
        let pad_y = s.height() * grow;

        let x1 = s.left() - scene_origin.0 - pad_x;
        let y1 = s.top() - scene_origin.1 - pad_y;
        let x2 = s.left() - scene_origin.0 + s.width() + pad_x;
        let y2 = s.top() - scene_origin.1 + s.height() + pad_y;

        row[0] = 0.0;
        row[1] = x1 * sx;
        row[2] = y1 * sy;
        row[3] = x2 * sx - rf;
        row[4] = y2 * sy - rf;
    }

    rois
}

/// Scale-jitter variant: scene-box replacement plus crop scale factor.
pub type JitterVariant = (BBox<Ltwh>, f32);

/// Single identity variant, used when jitter is disabled.
pub fn identity_variant(scene: &BBox<Ltwh>) -> Vec<JitterVariant> {
    vec![(*scene, 1.0)]
}

/// Initialization-time variants: identity plus geometric scale steps
/// `step^{-1, +1, -2, +2}`.
pub fn init_jitter_variants(scene: &BBox<Ltwh>, step: f32) -> Vec<JitterVariant> {
    vec![
        (*scene, 1.0),
        (*scene, step.powi(-1)),
        (*scene, step.powi(1)),
        (*scene, step.powi(-2)),
        (*scene, step.powi(2)),
    ]
}

/// Online-update variants: identity, 4-pixel horizontal and vertical
/// shifts at scale 1, and scale steps `step^{-1, +1}`.
pub fn update_jitter_variants(scene: &BBox<Ltwh>, step: f32) -> Vec<JitterVariant> {
    let shifted_x = BBox::ltwh(
        scene.left() - 4.0,
        scene.top(),
        scene.width(),
        scene.height(),
    );
    let shifted_y = BBox::ltwh(
        scene.left(),
        scene.top() - 4.0,
        scene.width(),
        scene.height(),
    );

    vec![
        (*scene, 1.0),
        (shifted_x, 1.0),
        (shifted_y, 1.0),
        (*scene, step.powi(-1)),
        (*scene, step.powi(1)),
    ]
}

/// Crop-scale multipliers of the multi-scale re-detection pass:
/// `step^{-2, -1, +1, +2}`.
pub fn redetection_scales(step: f32) -> [f32; 4] {
    [
        step.powi(-2),
        step.powi(-1),
        step.powi(1),
        step.powi(2),
    ]
}
