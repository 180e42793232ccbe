pub mod codec;
pub mod core;
pub mod export;
pub mod merge;
pub mod pipeline;
pub mod projection;
pub mod resolve;

pub use crate::core::error::{FieldmapError, FieldmapResult};
pub use crate::core::model::{ConsensusResult, MergeOutcome, MergedSegment, SegmentMap, SourceSegmentId};
