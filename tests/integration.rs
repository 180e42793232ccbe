use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use image::{Rgb, RgbImage};

use fieldmap::codec::{read_mask, read_predictions, read_segment_map, write_polygon_set, PolygonSet};
use fieldmap::core::geometry::{LabeledPolygon, Point, Polygon};
use fieldmap::merge::UnmatchedPolicy;
use fieldmap::pipeline::{
    export_consensus, export_merge, merge_segments, render_map, resolve_predictions, MapConfig, MergeConfig,
    ResolveConfig,
};

const WIDTH: u32 = 40;
const HEIGHT: u32 = 20;

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

fn rect(label: u32, x0: f64, y0: f64, x1: f64, y1: f64) -> LabeledPolygon {
    LabeledPolygon::new(
        label,
        Polygon::new(vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]),
    )
}

fn write_segments(path: &Path, polygons: Vec<LabeledPolygon>) -> Result<()> {
    fs::create_dir_all(path.parent().unwrap())?;
    write_polygon_set(path, &PolygonSet::new(polygons).with_image(None, Some((WIDTH, HEIGHT))))?;
    Ok(())
}

/// Two drone images: both saw the plant on the left, only the first saw the
/// one on the right.
fn field(root: &Path) -> Result<()> {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([30, 120, 40])).save(root.join("ortho.png"))?;
    write_segments(
        &root.join("high/DJI_0001.json"),
        vec![rect(1, 4.0, 4.0, 10.0, 10.0), rect(2, 26.0, 4.0, 32.0, 10.0)],
    )?;
    write_segments(
        &root.join("low/DJI_0001.json"),
        vec![rect(1, 2.0, 2.0, 12.0, 12.0), rect(2, 24.0, 2.0, 34.0, 12.0)],
    )?;
    write_segments(&root.join("high/DJI_0002.json"), vec![rect(1, 5.0, 5.0, 11.0, 11.0)])?;
    write_segments(&root.join("low/DJI_0002.json"), vec![rect(1, 3.0, 3.0, 13.0, 13.0)])?;
    Ok(())
}

fn merge_config(root: &Path) -> MergeConfig {
    MergeConfig::new(
        root.join("ortho.png"),
        root.join("high"),
        root.join("low"),
        root.join("out/merged.npy"),
        root.join("out/segment_map.json"),
    )
}

#[test]
fn test_merge_deduplicates_views_of_one_plant() -> Result<()> {
    let root = temp_output_dir("fieldmap-merge");
    fs::create_dir_all(&root)?;
    field(&root)?;

    let config = merge_config(&root);
    let outcome = merge_segments(&config)?;
    export_merge(&outcome, &config)?;

    assert_eq!(outcome.segments.len(), 2);
    assert!(outcome.dropped.is_empty());

    let map = read_segment_map(&config.segment_map)?;
    assert_eq!(map.lookup("DJI_0001", 1), Some(1));
    assert_eq!(map.lookup("DJI_0002", 1), Some(1));
    assert_eq!(map.lookup("DJI_0001", 2), Some(2));

    let mask = read_mask(&config.output)?;
    assert_eq!(mask.dimensions(), (WIDTH, HEIGHT));
    assert_eq!(mask.label_at(7, 7), 1);
    assert_eq!(mask.label_at(29, 7), 2);

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn test_merge_to_polygon_json() -> Result<()> {
    let root = temp_output_dir("fieldmap-merge-json");
    fs::create_dir_all(&root)?;
    field(&root)?;

    let mut config = merge_config(&root);
    config.output = root.join("out/merged.json");
    config.summary = Some(root.join("out/segments.json"));
    config.unmatched = UnmatchedPolicy::Snap;
    let outcome = merge_segments(&config)?;
    export_merge(&outcome, &config)?;

    let set = fieldmap::codec::read_polygon_set(&config.output)?;
    assert_eq!(set.polygons.iter().map(|p| p.label).collect::<Vec<_>>(), vec![1, 2]);
    assert!(root.join("out/segments.json").exists());

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn test_unpaired_inputs_fail() -> Result<()> {
    let root = temp_output_dir("fieldmap-unpaired");
    fs::create_dir_all(&root)?;
    field(&root)?;
    fs::remove_file(root.join("low/DJI_0002.json"))?;

    assert!(merge_segments(&merge_config(&root)).is_err());

    let _ = fs::remove_dir_all(&root);
    Ok(())
}

#[test]
fn test_merge_resolve_and_map() -> Result<()> {
    let root = temp_output_dir("fieldmap-end-to-end");
    fs::create_dir_all(&root)?;
    field(&root)?;

    let config = merge_config(&root);
    let outcome = merge_segments(&config)?;
    export_merge(&outcome, &config)?;

    fs::create_dir_all(root.join("predictions"))?;
    fs::write(
        root.join("predictions/DJI_0001.tsv"),
        "label\tprob.0\tprob.1\tresponse\n1\t0.2\t0.8\t1\n2\t0.9\t0.1\t0\n",
    )?;
    fs::write(root.join("predictions/DJI_0002.tsv"), "prob.0\tprob.1\tresponse\n0.4\t0.6\t1\n")?;

    let mut resolve = ResolveConfig::new(root.join("high"), root.join("predictions"), root.join("out/consensus.tsv"));
    resolve.segment_map = Some(config.segment_map.clone());
    let results = resolve_predictions(&resolve)?;
    export_consensus(&results, &resolve)?;

    assert_eq!(results.len(), 2);
    assert!((results[0].probability(1) - 0.7).abs() < 1e-9);
    assert_eq!(results[0].response, 1);
    assert!((results[1].probability(1) - 0.1).abs() < 1e-9);
    assert_eq!(results[1].response, 0);

    let table = read_predictions(&resolve.output)?;
    assert!(table.has_labels);
    assert_eq!(table.rows.iter().map(|r| r.label).collect::<Vec<_>>(), vec![Some(1), Some(2)]);

    let mut map = MapConfig::new(root.join("ortho.png"), config.output.clone(), root.join("out/map.png"));
    map.predictions = Some(resolve.output.clone());
    render_map(&map)?;
    let rendered = image::open(&map.output)?.to_rgb8();
    assert_eq!(rendered.dimensions(), (WIDTH, HEIGHT));
    assert_ne!(rendered.get_pixel(7, 7), &Rgb([30, 120, 40]));
    assert_eq!(rendered.get_pixel(20, 18), &Rgb([30, 120, 40]));

    let _ = fs::remove_dir_all(&root);
    Ok(())
}
