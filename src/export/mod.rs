pub mod json_export;
pub mod map_export;
pub mod mask_export;
pub mod table_export;

use anyhow::Result;

pub use json_export::JsonExporter;
pub use map_export::{SpeciesMap, SpeciesMapExporter};
pub use mask_export::{MaskExporter, PolygonSetExporter};
pub use table_export::ConsensusExporter;

pub trait Exporter<T: ?Sized> {
    fn export(&self, value: &T) -> Result<()>;
}

fn ensure_parent(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
