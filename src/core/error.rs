use std::path::PathBuf;

use thiserror::Error;

use crate::core::model::SourceSegmentId;

pub type FieldmapResult<T> = std::result::Result<T, FieldmapError>;

#[derive(Debug, Error)]
pub enum FieldmapError {
    #[error("unsupported segment file type for {}: expected a .json or .npy ending", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed input in {}: {reason}", path.display())]
    InputFormat { path: PathBuf, reason: String },

    #[error("cannot derive a segment id from label {label:?}")]
    LabelFormat { label: String },

    #[error("mask extent {actual_width}x{actual_height} does not match the expected {width}x{height} ({})", path.display())]
    ExtentMismatch {
        path: PathBuf,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("{} source segment(s) did not land inside any merged segment: {}", unmatched.len(), format_ids(unmatched))]
    UnmatchedSegments { unmatched: Vec<SourceSegmentId> },

    #[error("merged segment {id} has zero area")]
    EmptySegment { id: u32 },

    #[error("count mismatch: {what} ({left} vs {right})")]
    CountMismatch {
        what: String,
        left: usize,
        right: usize,
    },
}

fn format_ids(ids: &[SourceSegmentId]) -> String {
    const SHOWN: usize = 10;
    let mut text = ids
        .iter()
        .take(SHOWN)
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    if ids.len() > SHOWN {
        text.push_str(&format!(", ... ({} more)", ids.len() - SHOWN));
    }
    text
}

impl FieldmapError {
    pub fn input_format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InputFormat {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn count_mismatch(what: impl Into<String>, left: usize, right: usize) -> Self {
        Self::CountMismatch {
            what: what.into(),
            left,
            right,
        }
    }
}
