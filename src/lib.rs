pub mod bbox;
pub mod bbreg;
pub mod config;
pub mod error;
pub mod geometry;
pub mod model;
pub mod sampler;
pub mod tracker;
pub mod trainer;

mod memory;

pub use bbox::{BBox, Cxywh, Ltrb, Ltwh};
pub use config::TrackerConfig;
pub use error::{CollaboratorError, Error};
pub use memory::FeaturePool;
pub use model::{FeatureBatch, ImageCropper, Model, Optimizer, RoiSet, ScoreBatch};
pub use tracker::{TrackResult, TrackerSession};
