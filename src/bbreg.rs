use crate::bbox::{BBox, Ltwh};
use crate::error::CollaboratorError;
use crate::model::FeatureBatch;

/// Secondary bounding-box regression model.
///
/// Disabled by default: the session holds no refiner unless one is
/// installed, and then reports the raw estimate as the refined box. The
/// seam exists because the data-collection procedure supports training a
/// regressor, but the reference behavior bypasses it at runtime.
pub trait BoxRefiner {
    /// Refine candidate boxes given their pooled features.
    fn refine(
        &self,
        features: &FeatureBatch,
        boxes: &[BBox<Ltwh>],
    ) -> Result<Vec<BBox<Ltwh>>, CollaboratorError>;
}
