use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fieldmap::core::mask::FragmentPolicy;
use fieldmap::merge::UnmatchedPolicy;
use fieldmap::pipeline::{
    export_consensus, export_merge, merge_segments, render_map, resolve_predictions, summarize_segments,
    rev_transform_segments, transform_segments, MapConfig, MergeConfig, ResolveConfig, RevTransformConfig,
    TransformConfig,
};
use fieldmap::resolve::DEFAULT_THRESHOLD;

#[derive(Parser, Debug)]
#[command(name = "fieldmap")]
#[command(version, about = "Reconcile per-image plant segments into one species map of an orthomosaic", long_about = None)]
struct Cli {
    /// Only print errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Project the segments of one drone image onto the orthomosaic
    Transform {
        /// Homography JSON ({"matrix": [[..],[..],[..]], "width": w, "height": h})
        homography: PathBuf,

        /// Segments of the drone image (.json or .npy)
        segments: PathBuf,

        /// Output polygon JSON in orthomosaic pixels
        output: PathBuf,

        /// Image path recorded in the output for viewers
        #[arg(long)]
        image: Option<String>,

        /// How to trace labels split into several pieces (raster input)
        #[arg(long, value_enum, default_value_t = FragmentPolicy::Largest)]
        fragments: FragmentPolicy,
    },

    /// Map merged segments back into every drone image that sees them
    RevTransform {
        /// Camera homography JSON, or a directory of <camera>.json files with a "frame": [w, h]
        homographies: PathBuf,

        /// Merged segments on the orthomosaic (.json or .npy)
        segments: PathBuf,

        /// Output directory, one <camera>.json per camera
        output: PathBuf,

        /// Image directory recorded as <images>/<camera>.JPG in the outputs
        #[arg(long)]
        images: Option<PathBuf>,

        /// How to trace labels split into several pieces (raster input)
        #[arg(long, value_enum, default_value_t = FragmentPolicy::Largest)]
        fragments: FragmentPolicy,
    },

    /// Merge overlapping high/low confidence segments into one segmentation
    Merge {
        /// Orthomosaic image
        ortho: PathBuf,

        /// High confidence segments: a file or a directory named by source image
        high: PathBuf,

        /// Low confidence segments, paired with HIGH by file name
        low: PathBuf,

        /// Merged segments (.npy or .json)
        output: PathBuf,

        /// Where to write the source segment -> merged segment map
        #[arg(short, long, default_value = "segment_map.json")]
        segment_map: PathBuf,

        /// Also write the area and sources of every merged segment
        #[arg(long)]
        summary: Option<PathBuf>,

        /// How to trace labels split into several pieces (JSON output)
        #[arg(long, value_enum, default_value_t = FragmentPolicy::Largest)]
        fragments: FragmentPolicy,

        /// What to do with source segments that land on background
        #[arg(long, value_enum, default_value_t = UnmatchedPolicy::Fail)]
        unmatched: UnmatchedPolicy,
    },

    /// Combine the class predictions of every view of each merged segment
    Resolve {
        /// Per-image segment files, a file or a directory
        segments: PathBuf,

        /// Per-image prediction tables, paired with SEGMENTS by file name
        predictions: PathBuf,

        /// Consensus table (TSV)
        output: PathBuf,

        /// Segment map from `merge`; without it labels are merged ids already
        #[arg(short, long)]
        segment_map: Option<PathBuf>,

        /// Minimum probability of class 1 for a positive response
        #[arg(short, long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Leave the label column out of the output
        #[arg(long)]
        no_labels: bool,
    },

    /// Draw the merged segments and their classes over the orthomosaic
    Map {
        /// Orthomosaic image
        ortho: PathBuf,

        /// Merged segments (.npy or .json)
        segments: PathBuf,

        /// Output image
        output: PathBuf,

        /// Consensus table from `resolve`
        predictions: Option<PathBuf>,
    },

    /// Show information about a segment file
    Info {
        /// Segment file (.json or .npy)
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.quiet { "error" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Transform {
            homography,
            segments,
            output,
            image,
            fragments,
        } => {
            let mut config = TransformConfig::new(homography, segments, output);
            config.image_path = image;
            config.fragments = fragments;
            transform(config, quiet)
        }
        Commands::RevTransform {
            homographies,
            segments,
            output,
            images,
            fragments,
        } => {
            let mut config = RevTransformConfig::new(homographies, segments, output);
            config.images = images;
            config.fragments = fragments;
            rev_transform(config, quiet)
        }
        Commands::Merge {
            ortho,
            high,
            low,
            output,
            segment_map,
            summary,
            fragments,
            unmatched,
        } => {
            let mut config = MergeConfig::new(ortho, high, low, output, segment_map);
            config.summary = summary;
            config.fragments = fragments;
            config.unmatched = unmatched;
            merge(config, quiet)
        }
        Commands::Resolve {
            segments,
            predictions,
            output,
            segment_map,
            threshold,
            no_labels,
        } => {
            let mut config = ResolveConfig::new(segments, predictions, output);
            config.segment_map = segment_map;
            config.threshold = threshold;
            config.no_labels = no_labels;
            resolve(config, quiet)
        }
        Commands::Map {
            ortho,
            segments,
            output,
            predictions,
        } => {
            let mut config = MapConfig::new(ortho, segments, output);
            config.predictions = predictions;
            map(config, quiet)
        }
        Commands::Info { input } => show_info(input),
    }
}

fn transform(config: TransformConfig, quiet: bool) -> Result<()> {
    if !quiet {
        println!("[*] Projecting: {}", config.segments.display());
    }

    let (set, skipped) = transform_segments(&config)
        .with_context(|| format!("Failed to transform: {}", config.segments.display()))?;

    if !quiet {
        if skipped > 0 {
            println!("[!] {} point(s) could not be projected", skipped);
        }
        println!("[✓] Done! {} segment(s) saved to: {}", set.polygons.len(), config.output.display());
    }

    Ok(())
}

fn rev_transform(config: RevTransformConfig, quiet: bool) -> Result<()> {
    if !quiet {
        println!("[*] Segments: {}", config.segments.display());
        println!("[*] Cameras: {}", config.homographies.display());
    }

    let sets = rev_transform_segments(&config)
        .with_context(|| format!("Failed to map back: {}", config.segments.display()))?;

    if !quiet {
        for (camera, set) in &sets {
            println!("[+] {}: {} segment(s)", camera, set.polygons.len());
        }
        println!("[✓] Done! {} camera file(s) saved to: {}", sets.len(), config.output.display());
    }

    Ok(())
}

fn merge(config: MergeConfig, quiet: bool) -> Result<()> {
    if !quiet {
        println!("[*] Orthomosaic: {}", config.ortho.display());
        println!("[*] High confidence: {}", config.high.display());
        println!("[*] Low confidence: {}", config.low.display());
        println!("\n[+] Merging segments...");
    }

    let outcome = merge_segments(&config).context("Failed to merge segments")?;

    if !quiet {
        println!("[+] Exporting results...");
    }

    export_merge(&outcome, &config)
        .with_context(|| format!("Failed to export to: {}", config.output.display()))?;

    if !quiet {
        if !outcome.dropped.is_empty() {
            println!("[!] {} source segment(s) were dropped", outcome.dropped.len());
        }
        println!(
            "\n[✓] Done! {} segment(s) saved to: {}",
            outcome.segments.len(),
            config.output.display()
        );
        println!("[✓] Segment map: {}", config.segment_map.display());
    }

    Ok(())
}

fn resolve(config: ResolveConfig, quiet: bool) -> Result<()> {
    if !quiet {
        println!("[*] Segments: {}", config.segments.display());
        println!("[*] Predictions: {}", config.predictions.display());
        println!("[*] Threshold: {}", config.threshold);
        println!("\n[+] Resolving predictions...");
    }

    let results = resolve_predictions(&config).context("Failed to resolve predictions")?;
    export_consensus(&results, &config)?;

    if !quiet {
        println!("\n[✓] Done! {} segment(s) saved to: {}", results.len(), config.output.display());
    }

    Ok(())
}

fn map(config: MapConfig, quiet: bool) -> Result<()> {
    if !quiet {
        println!("[*] Rendering: {}", config.segments.display());
    }

    render_map(&config).with_context(|| format!("Failed to render map: {}", config.output.display()))?;

    if !quiet {
        println!("[✓] Done! Map saved to: {}", config.output.display());
    }

    Ok(())
}

fn show_info(input: PathBuf) -> Result<()> {
    if !input.exists() {
        anyhow::bail!("Input file does not exist: {}", input.display());
    }

    let summary = summarize_segments(&input)
        .with_context(|| format!("Failed to read segments: {}", input.display()))?;

    println!("Segment Information");
    println!("===================");
    print!("{}", summary);

    Ok(())
}
