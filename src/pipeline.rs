use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use rayon::prelude::*;

use crate::codec::{read_predictions, read_segment_map, PolygonSet, PredictionTable, SegmentFormat, SegmentSource};
use crate::core::error::FieldmapError;
use crate::core::mask::{polygons_from_mask, FragmentPolicy, LabelMask};
use crate::core::model::{ClassPrediction, ConsensusResult, MergeOutcome};
use crate::export::{
    ConsensusExporter, Exporter, JsonExporter, MaskExporter, PolygonSetExporter, SpeciesMap, SpeciesMapExporter,
};
use crate::merge::{Detection, RegionMerger, SegmentFile, UnmatchedPolicy, WatershedMerger};
use crate::projection::{project_polygons, unproject_polygons, HomographyProjection};
use crate::resolve::{join_predictions, visible_fractions, AreaWeightedResolver, ConflictResolver, DEFAULT_THRESHOLD};

const PREDICTION_EXTENSIONS: [&str; 2] = ["tsv", "txt"];

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub ortho: PathBuf,
    /// High confidence segments: one file, or a directory of files named
    /// after their source image.
    pub high: PathBuf,
    pub low: PathBuf,
    /// Merged mask, `.npy` or polygon `.json`.
    pub output: PathBuf,
    pub segment_map: PathBuf,
    pub summary: Option<PathBuf>,
    pub fragments: FragmentPolicy,
    pub unmatched: UnmatchedPolicy,
}

impl MergeConfig {
    pub fn new(ortho: PathBuf, high: PathBuf, low: PathBuf, output: PathBuf, segment_map: PathBuf) -> Self {
        Self {
            ortho,
            high,
            low,
            output,
            segment_map,
            summary: None,
            fragments: FragmentPolicy::default(),
            unmatched: UnmatchedPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolveConfig {
    /// Per-image segment files (local labels), one file or a directory.
    pub segments: PathBuf,
    /// Per-image prediction tables, paired with `segments` by file stem.
    pub predictions: PathBuf,
    pub segment_map: Option<PathBuf>,
    pub output: PathBuf,
    pub threshold: f64,
    pub no_labels: bool,
}

impl ResolveConfig {
    pub fn new(segments: PathBuf, predictions: PathBuf, output: PathBuf) -> Self {
        Self {
            segments,
            predictions,
            segment_map: None,
            output,
            threshold: DEFAULT_THRESHOLD,
            no_labels: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformConfig {
    pub homography: PathBuf,
    pub segments: PathBuf,
    pub output: PathBuf,
    /// Recorded as `imagePath` in the output so viewers can find the image.
    pub image_path: Option<String>,
    pub fragments: FragmentPolicy,
}

impl TransformConfig {
    pub fn new(homography: PathBuf, segments: PathBuf, output: PathBuf) -> Self {
        Self {
            homography,
            segments,
            output,
            image_path: None,
            fragments: FragmentPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RevTransformConfig {
    /// Camera homographies: one file or a directory of `<camera>.json` files,
    /// each carrying the camera's `frame`.
    pub homographies: PathBuf,
    /// Merged segments on the orthomosaic (.npy or .json).
    pub segments: PathBuf,
    /// Directory receiving one `<camera>.json` polygon file per camera.
    pub output: PathBuf,
    /// Image directory; `<images>/<camera>.JPG` is recorded as `imagePath`.
    pub images: Option<PathBuf>,
    pub fragments: FragmentPolicy,
}

impl RevTransformConfig {
    pub fn new(homographies: PathBuf, segments: PathBuf, output: PathBuf) -> Self {
        Self {
            homographies,
            segments,
            output,
            images: None,
            fragments: FragmentPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MapConfig {
    pub ortho: PathBuf,
    pub segments: PathBuf,
    pub predictions: Option<PathBuf>,
    pub output: PathBuf,
}

impl MapConfig {
    pub fn new(ortho: PathBuf, segments: PathBuf, output: PathBuf) -> Self {
        Self {
            ortho,
            segments,
            predictions: None,
            output,
        }
    }
}

fn load_surface(path: &Path) -> Result<RgbImage> {
    let image = image::open(path).with_context(|| format!("failed to open orthomosaic {}", path.display()))?;
    Ok(image.to_rgb8())
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .with_context(|| format!("cannot derive a source name from {}", path.display()))
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Files under `input` keyed by stem; `input` itself when it is a file.
fn collect_files(input: &Path, accept: impl Fn(&Path) -> bool) -> Result<BTreeMap<String, PathBuf>> {
    if input.is_file() {
        return Ok(BTreeMap::from([(file_stem(input)?, input.to_path_buf())]));
    }
    let entries = std::fs::read_dir(input).with_context(|| format!("failed to list {}", input.display()))?;
    let mut files = BTreeMap::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if !accept(&path) {
            log::debug!("ignoring {}", path.display());
            continue;
        }
        if let Some(previous) = files.insert(file_stem(&path)?, path.clone()) {
            bail!("{} and {} share a source name", previous.display(), path.display());
        }
    }
    Ok(files)
}

fn is_segment_file(path: &Path) -> bool {
    SegmentFormat::from_path(path).is_ok()
}

/// Pairs two stem-keyed file sets; both must name the same sources.
fn pair_files(
    what: &str,
    left: BTreeMap<String, PathBuf>,
    mut right: BTreeMap<String, PathBuf>,
) -> Result<Vec<(String, PathBuf, PathBuf)>> {
    if left.len() != right.len() {
        return Err(FieldmapError::count_mismatch(what, left.len(), right.len()).into());
    }
    left.into_iter()
        .map(|(stem, path)| match right.remove(&stem) {
            Some(other) => Ok((stem, path, other)),
            None => bail!("{}: nothing pairs with {}", what, path.display()),
        })
        .collect()
}

/// Pairs high and low segment files into detections. Files are only opened
/// here; they are read one detection at a time while merging.
fn open_detections(high: &Path, low: &Path) -> Result<Vec<Detection>> {
    let pairs = if high.is_file() && low.is_file() {
        vec![(file_stem(high)?, high.to_path_buf(), low.to_path_buf())]
    } else {
        pair_files(
            "high vs low confidence segment files",
            collect_files(high, is_segment_file)?,
            collect_files(low, is_segment_file)?,
        )?
    };
    Ok(pairs
        .into_iter()
        .map(|(source, high, low)| {
            log::debug!("pairing {} ({} / {})", source, high.display(), low.display());
            Detection {
                source,
                high: SegmentFile::open(&high),
                low: SegmentFile::open(&low),
            }
        })
        .collect())
}

pub fn merge_segments(config: &MergeConfig) -> Result<MergeOutcome> {
    let surface = load_surface(&config.ortho)?;
    let detections = open_detections(&config.high, &config.low)?;
    log::info!(
        "merging {} detection(s) over a {}x{} orthomosaic",
        detections.len(),
        surface.width(),
        surface.height()
    );
    WatershedMerger::new(config.unmatched).merge(&detections, &surface)
}

pub fn export_merge(outcome: &MergeOutcome, config: &MergeConfig) -> Result<()> {
    let image_path = config.ortho.to_str().map(str::to_owned);
    MaskExporter::new(config.output.clone(), config.fragments)
        .with_image_path(image_path)
        .export(&outcome.mask)
        .with_context(|| format!("failed to export merged mask to {}", config.output.display()))?;
    JsonExporter::new(config.segment_map.clone()).export(&outcome.segment_map)?;
    if let Some(summary) = &config.summary {
        JsonExporter::new(summary.clone()).export(&outcome.segments)?;
    }
    Ok(())
}

pub fn resolve_predictions(config: &ResolveConfig) -> Result<Vec<ConsensusResult>> {
    let segment_map = config
        .segment_map
        .as_deref()
        .map(|path| read_segment_map(path).with_context(|| format!("failed to read segment map {}", path.display())))
        .transpose()?;
    let pairs = pair_files(
        "segment files vs prediction files",
        collect_files(&config.segments, is_segment_file)?,
        collect_files(&config.predictions, |p| has_extension(p, &PREDICTION_EXTENSIONS))?,
    )?;

    let per_source = pairs
        .par_iter()
        .map(|(source, segments_path, table_path)| -> Result<Vec<ClassPrediction>> {
            let segments =
                SegmentSource::load(segments_path).with_context(|| format!("failed to load {}", segments_path.display()))?;
            let table: PredictionTable =
                read_predictions(table_path).with_context(|| format!("failed to read {}", table_path.display()))?;
            let views = visible_fractions(&segments);
            join_predictions(source, table_path, &views, &table, segment_map.as_ref())
                .with_context(|| format!("failed to join {} with {}", segments_path.display(), table_path.display()))
        })
        .collect::<Result<Vec<_>>>()?;
    let predictions: Vec<_> = per_source.into_iter().flatten().collect();

    let resolver = AreaWeightedResolver::new(config.threshold);
    let results = resolver.resolve(&predictions);
    log::info!(
        "resolved {} prediction(s) from {} image(s) into {} segment(s)",
        predictions.len(),
        pairs.len(),
        results.len()
    );
    Ok(results)
}

pub fn export_consensus(results: &[ConsensusResult], config: &ResolveConfig) -> Result<()> {
    ConsensusExporter::new(config.output.clone(), !config.no_labels).export(results)
}

/// Projects one image's polygons onto the orthomosaic. Returns the
/// projected set and the number of points that could not be projected.
pub fn transform_segments(config: &TransformConfig) -> Result<(PolygonSet, usize)> {
    let projection = HomographyProjection::load(&config.homography)
        .with_context(|| format!("failed to load projection {}", config.homography.display()))?;
    let polygons = match SegmentSource::load(&config.segments)
        .with_context(|| format!("failed to load {}", config.segments.display()))?
    {
        SegmentSource::PolygonSet(set) => set.polygons,
        SegmentSource::RasterMask(mask) => polygons_from_mask(&mask, config.fragments),
    };
    let projected = project_polygons(&projection, &polygons);
    let set = PolygonSet::new(projected.polygons).with_image(config.image_path.clone(), Some(projection.extent()));
    PolygonSetExporter::new(config.output.clone()).export(&set)?;
    Ok((set, projected.skipped))
}

/// Maps the merged segments back into every camera that sees them, writing
/// one polygon file per camera labelled with merged ids. Returns the
/// polygon set of every camera, keyed by camera name.
pub fn rev_transform_segments(config: &RevTransformConfig) -> Result<BTreeMap<String, PolygonSet>> {
    let polygons = match SegmentSource::load(&config.segments)
        .with_context(|| format!("failed to load {}", config.segments.display()))?
    {
        SegmentSource::PolygonSet(set) => set.polygons,
        SegmentSource::RasterMask(mask) => polygons_from_mask(&mask, config.fragments),
    };
    let cameras = collect_files(&config.homographies, |path| has_extension(path, &["json"]))?;
    if cameras.is_empty() {
        bail!("no camera homographies found in {}", config.homographies.display());
    }
    log::info!("mapping {} segment(s) back into {} camera(s)", polygons.len(), cameras.len());

    let sets = cameras
        .into_par_iter()
        .map(|(camera, path)| -> Result<(String, PolygonSet)> {
            let projection = HomographyProjection::load(&path)
                .with_context(|| format!("failed to load projection {}", path.display()))?;
            let frame = projection
                .frame
                .with_context(|| format!("{} has no camera frame size", path.display()))?;
            let seen = unproject_polygons(&projection, &polygons, frame);
            log::debug!("{}: {} segment(s) in view", camera, seen.len());
            let image_path = config
                .images
                .as_ref()
                .map(|dir| dir.join(format!("{camera}.JPG")).to_string_lossy().into_owned());
            Ok((camera, PolygonSet::new(seen).with_image(image_path, Some(frame))))
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    for (camera, set) in &sets {
        PolygonSetExporter::new(config.output.join(format!("{camera}.json"))).export(set)?;
    }
    Ok(sets)
}

/// Consensus rows keyed by merged id. Without a label column the rows
/// follow the mask's ids in ascending order.
fn consensus_from_table(table: PredictionTable, mask: &LabelMask) -> Result<Vec<ConsensusResult>> {
    if table.has_labels {
        return table
            .rows
            .into_iter()
            .map(|row| {
                let segment = row.label.context("consensus row without a label")?;
                Ok(ConsensusResult {
                    segment,
                    probabilities: row.probabilities,
                    response: row.response,
                })
            })
            .collect();
    }
    let labels = mask.labels();
    if labels.len() != table.len() {
        return Err(FieldmapError::count_mismatch("segments vs consensus rows", labels.len(), table.len()).into());
    }
    Ok(labels
        .into_iter()
        .zip(table.rows)
        .map(|(segment, row)| ConsensusResult {
            segment,
            probabilities: row.probabilities,
            response: row.response,
        })
        .collect())
}

pub fn render_map(config: &MapConfig) -> Result<()> {
    let surface = load_surface(&config.ortho)?;
    let (width, height) = surface.dimensions();
    let mask = SegmentSource::load(&config.segments)
        .and_then(|source| source.rasterize(&config.segments, width, height))
        .with_context(|| format!("failed to load {}", config.segments.display()))?;
    let results = match &config.predictions {
        Some(path) => {
            let table = read_predictions(path).with_context(|| format!("failed to read {}", path.display()))?;
            consensus_from_table(table, &mask)?
        }
        None => Vec::new(),
    };
    SpeciesMapExporter::new(config.output.clone()).export(&SpeciesMap {
        surface: &surface,
        mask: &mask,
        results: &results,
    })
}

/// Short description of a segment file.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSummary {
    pub path: PathBuf,
    pub format: SegmentFormat,
    pub segments: usize,
    pub extent: Option<(u32, u32)>,
    pub labels: Option<(u32, u32)>,
}

impl fmt::Display for SegmentSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File: {}", self.path.display())?;
        writeln!(f, "Format: {:?}", self.format)?;
        writeln!(f, "Segments: {}", self.segments)?;
        if let Some((width, height)) = self.extent {
            writeln!(f, "Extent: {}x{}", width, height)?;
        }
        if let Some((first, last)) = self.labels {
            writeln!(f, "Labels: {}..={}", first, last)?;
        }
        Ok(())
    }
}

pub fn summarize_segments(path: &Path) -> Result<SegmentSummary> {
    let format = SegmentFormat::from_path(path)?;
    let source = SegmentSource::load(path).with_context(|| format!("failed to load {}", path.display()))?;
    let (labels, extent): (Vec<u32>, _) = match &source {
        SegmentSource::PolygonSet(set) => (set.polygons.iter().map(|p| p.label).collect(), set.image_size),
        SegmentSource::RasterMask(mask) => (mask.labels().into_iter().collect(), Some(mask.dimensions())),
    };
    Ok(SegmentSummary {
        path: path.to_path_buf(),
        format,
        segments: labels.len(),
        extent,
        labels: labels.iter().min().copied().zip(labels.iter().max().copied()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use crate::codec::{write_polygon_set, PredictionRow};
    use crate::core::geometry::{LabeledPolygon, Point, Polygon};

    fn temp_output_dir(prefix: &str) -> PathBuf {
        let mut out = std::env::temp_dir();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis();
        let pid = std::process::id();
        out.push(format!("{prefix}-{pid}-{now}"));
        out
    }

    fn square(label: u32, x: f64, y: f64, side: f64) -> LabeledPolygon {
        LabeledPolygon::new(
            label,
            Polygon::new(vec![
                Point::new(x, y),
                Point::new(x + side, y),
                Point::new(x + side, y + side),
                Point::new(x, y + side),
            ]),
        )
    }

    #[test]
    fn pairing_requires_matching_stems() {
        let left = BTreeMap::from([("a".to_string(), PathBuf::from("a.json"))]);
        let right = BTreeMap::from([("b".to_string(), PathBuf::from("b.tsv"))]);
        assert!(pair_files("test", left.clone(), right).is_err());

        let right = BTreeMap::new();
        let err = pair_files("test", left, right).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FieldmapError>(),
            Some(FieldmapError::CountMismatch { left: 1, right: 0, .. })
        ));
    }

    #[test]
    fn directories_are_collected_by_stem() -> Result<()> {
        let dir = temp_output_dir("fieldmap-collect");
        fs::create_dir_all(&dir)?;
        fs::write(dir.join("IMG_1.json"), "{}")?;
        fs::write(dir.join("IMG_2.npy"), "")?;
        fs::write(dir.join("notes.md"), "")?;

        let files = collect_files(&dir, is_segment_file)?;
        let _ = fs::remove_dir_all(&dir);
        assert_eq!(files.keys().cloned().collect::<Vec<_>>(), vec!["IMG_1", "IMG_2"]);
        Ok(())
    }

    #[test]
    fn positional_consensus_follows_mask_ids() -> Result<()> {
        let mask = LabelMask::from_raw(3, 1, vec![4, 0, 9]).unwrap();
        let row = |response| PredictionRow {
            label: None,
            response,
            probabilities: BTreeMap::from([(response, 0.8)]),
        };
        let table = PredictionTable {
            rows: vec![row(0), row(1)],
            has_labels: false,
        };
        let results = consensus_from_table(table, &mask)?;
        assert_eq!(results.iter().map(|r| (r.segment, r.response)).collect::<Vec<_>>(), vec![(4, 0), (9, 1)]);
        Ok(())
    }

    #[test]
    fn transform_counts_points_off_the_orthomosaic() -> Result<()> {
        let dir = temp_output_dir("fieldmap-transform");
        fs::create_dir_all(&dir)?;
        let homography = dir.join("DJI_0001.homography.json");
        fs::write(&homography, r#"{"matrix": [[1,0,10],[0,1,0],[0,0,1]], "width": 20, "height": 20}"#)?;
        let segments = dir.join("DJI_0001.json");
        let kite = LabeledPolygon::new(
            2,
            Polygon::new(vec![Point::new(6.0, 0.0), Point::new(9.0, 0.0), Point::new(13.0, 2.0), Point::new(9.0, 4.0)]),
        );
        write_polygon_set(
            &segments,
            &PolygonSet::new(vec![square(1, 0.0, 0.0, 4.0), kite, square(3, 8.0, 6.0, 4.0)]),
        )?;

        let mut config = TransformConfig::new(homography, segments, dir.join("out/DJI_0001.json"));
        config.image_path = Some("ortho.tif".into());
        let (set, skipped) = transform_segments(&config)?;
        let written = crate::codec::read_polygon_set(&config.output)?;
        let _ = fs::remove_dir_all(&dir);

        // the kite loses its tip, the last square is left with two points
        assert_eq!(skipped, 3);
        assert_eq!(set.polygons.iter().map(|p| p.label).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(set.polygons[1].polygon.len(), 3);
        assert_eq!(written.image_size, Some((20, 20)));
        assert_eq!(set.polygons[0].polygon.points[0], Point::new(10.0, 0.0));
        Ok(())
    }

    #[test]
    fn rev_transform_writes_segments_each_camera_sees() -> Result<()> {
        let dir = temp_output_dir("fieldmap-rev-transform");
        let cameras = dir.join("cameras");
        fs::create_dir_all(&cameras)?;
        fs::write(
            cameras.join("DJI_0001.json"),
            r#"{"matrix": [[1,0,10],[0,1,0],[0,0,1]], "width": 40, "height": 20, "frame": [20, 10]}"#,
        )?;
        fs::write(
            cameras.join("DJI_0002.json"),
            r#"{"matrix": [[1,0,25],[0,1,0],[0,0,1]], "width": 40, "height": 20, "frame": [20, 10]}"#,
        )?;
        let segments = dir.join("merged.json");
        write_polygon_set(&segments, &PolygonSet::new(vec![square(4, 12.0, 2.0, 4.0), square(5, 32.0, 2.0, 4.0)]))?;

        let mut config = RevTransformConfig::new(cameras, segments.clone(), dir.join("out"));
        config.images = Some(PathBuf::from("images"));
        let sets = rev_transform_segments(&config)?;
        let written = crate::codec::read_polygon_set(&dir.join("out/DJI_0002.json"))?;

        let frameless = dir.join("frameless.json");
        fs::write(&frameless, r#"{"matrix": [[1,0,0],[0,1,0],[0,0,1]], "width": 40, "height": 20}"#)?;
        let missing_frame = rev_transform_segments(&RevTransformConfig::new(frameless, segments, dir.join("out2")));
        let _ = fs::remove_dir_all(&dir);

        let labels = |camera: &str| sets[camera].polygons.iter().map(|p| p.label).collect::<Vec<_>>();
        assert_eq!(labels("DJI_0001"), vec![4]);
        assert_eq!(labels("DJI_0002"), vec![5]);
        assert_eq!(sets["DJI_0001"].polygons[0].polygon.points[0], Point::new(2.0, 2.0));
        assert_eq!(written.polygons, sets["DJI_0002"].polygons);
        assert_eq!(written.image_size, Some((20, 10)));
        assert_eq!(
            written.image_path.map(PathBuf::from),
            Some(PathBuf::from("images").join("DJI_0002.JPG"))
        );
        assert!(missing_frame.is_err());
        Ok(())
    }

    #[test]
    fn summary_reports_labels_and_extent() -> Result<()> {
        let dir = temp_output_dir("fieldmap-info");
        fs::create_dir_all(&dir)?;
        let path = dir.join("segments.json");
        write_polygon_set(
            &path,
            &PolygonSet::new(vec![square(3, 0.0, 0.0, 2.0), square(7, 4.0, 4.0, 2.0)]).with_image(None, Some((16, 9))),
        )?;
        let summary = summarize_segments(&path)?;
        let _ = fs::remove_dir_all(&dir);

        assert_eq!(summary.segments, 2);
        assert_eq!(summary.labels, Some((3, 7)));
        assert_eq!(summary.extent, Some((16, 9)));
        assert!(summary.to_string().contains("Extent: 16x9"));
        Ok(())
    }
}
