use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::codec::write_consensus;
use crate::core::model::ConsensusResult;
use crate::export::{ensure_parent, Exporter};

/// Tab-separated consensus table, one row per merged segment.
#[derive(Debug, Clone)]
pub struct ConsensusExporter {
    path: PathBuf,
    include_labels: bool,
}

impl ConsensusExporter {
    pub fn new(path: PathBuf, include_labels: bool) -> Self {
        Self { path, include_labels }
    }
}

impl Exporter<[ConsensusResult]> for ConsensusExporter {
    fn export(&self, results: &[ConsensusResult]) -> Result<()> {
        ensure_parent(&self.path)?;
        write_consensus(&self.path, results, self.include_labels)
            .with_context(|| format!("failed to export consensus to {}", self.path.display()))
    }
}
