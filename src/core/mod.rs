pub mod error;
pub mod geometry;
pub mod mask;
pub mod model;

pub use error::{FieldmapError, FieldmapResult};
pub use geometry::{GridPoint, LabeledPolygon, Point, Polygon};
pub use mask::{FragmentPolicy, LabelMask};
