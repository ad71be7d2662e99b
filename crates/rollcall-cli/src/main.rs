use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    BoundingBox, Detector, EnrollOutcome, FaceEngine, FixedDetector, FullFrameDetector,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod annotate;
mod config;

use config::{Config, DetectorKind};

type BoxedDetector = Box<dyn Detector + Send>;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face enrollment and recognition", version)]
struct Cli {
    /// Signature store file (overrides ROLLCALL_STORE_PATH)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Face detector to use
    #[arg(long, global = true, value_enum)]
    detector: Option<DetectorKind>,

    /// Use this face region instead of running a detector: X,Y,W,H
    #[arg(long, global = true, value_parser = parse_face)]
    face: Option<BoundingBox>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face in an image under an identity
    Enroll {
        /// Identity to enroll (e.g. a student ID)
        identity: String,
        /// Image containing the face
        image: PathBuf,
    },
    /// Recognize the face in an image; exits with status 1 when nothing matches
    Recognize {
        image: PathBuf,
        /// Similarity threshold in [0, 1]
        #[arg(short, long, value_parser = parse_threshold)]
        threshold: Option<f32>,
        /// Write a copy of the image with the face outlined
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove { identity: String },
    /// Similarity between the faces in two images
    Compare { first: PathBuf, second: PathBuf },
    /// Show store and configuration status as JSON
    Status,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::load()?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(detector) = cli.detector {
        config.detector = detector;
    }

    let detector = build_detector(&config, cli.face)?;
    let engine = FaceEngine::open(detector, &config.store_path)
        .with_context(|| format!("opening store {}", config.store_path.display()))?;

    match cli.command {
        Commands::Enroll { identity, image } => {
            let img = load_image(&image)?;
            match engine.enroll(&img, &identity)? {
                EnrollOutcome::Created => println!("Enrolled {identity}"),
                EnrollOutcome::Refined => println!("Updated enrollment for {identity}"),
            }
        }
        Commands::Recognize {
            image,
            threshold,
            annotate,
        } => {
            let threshold = threshold.unwrap_or(config.similarity_threshold);
            let img = load_image(&image)?;
            let (bbox, probe) = engine.encode(&img)?;
            let result = engine.match_signature(&probe, threshold)?;

            if let Some(out) = annotate {
                let color = if result.is_some() {
                    annotate::MATCH_COLOR
                } else {
                    annotate::NO_MATCH_COLOR
                };
                annotate::draw_face_box(&img, &bbox, color)
                    .save(&out)
                    .with_context(|| format!("writing {}", out.display()))?;
            }

            match result {
                Some(m) => println!("{} (confidence {:.2}%)", m.identity, m.similarity * 100.0),
                None => {
                    println!("No match");
                    return Ok(ExitCode::from(1));
                }
            }
        }
        Commands::List => {
            let enrolled = engine.list_enrolled()?;
            if enrolled.is_empty() {
                println!("No faces enrolled");
            }
            for identity in enrolled {
                println!("{identity}");
            }
        }
        Commands::Remove { identity } => {
            if engine.delete_enrollment(&identity)? {
                println!("Removed {identity}");
            } else {
                println!("{identity} is not enrolled");
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Compare { first, second } => {
            let a = load_image(&first)?;
            let b = load_image(&second)?;
            println!("{:.4}", engine.compare(&a, &b)?);
        }
        Commands::Status => {
            let detector = if cli.face.is_some() {
                "fixed"
            } else {
                config.detector.as_str()
            };
            let status = serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "store_path": engine.store_path()?,
                "enrolled": engine.enrolled_count()?,
                "dimension": engine.dimension()?,
                "similarity_threshold": config.similarity_threshold,
                "detector": detector,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn build_detector(config: &Config, face: Option<BoundingBox>) -> Result<BoxedDetector> {
    if let Some(bbox) = face {
        return Ok(Box::new(FixedDetector::new(vec![bbox])));
    }

    match config.detector {
        DetectorKind::FullFrame => Ok(Box::new(FullFrameDetector)),
        DetectorKind::Scrfd => load_scrfd(config),
    }
}

#[cfg(feature = "scrfd")]
fn load_scrfd(config: &Config) -> Result<BoxedDetector> {
    let path = config.scrfd_model_path();
    let detector = rollcall_core::ScrfdDetector::load(&path)
        .with_context(|| format!("loading SCRFD model {}", path.display()))?
        .with_min_face_size(config.min_face_size);
    Ok(Box::new(detector))
}

#[cfg(not(feature = "scrfd"))]
fn load_scrfd(_config: &Config) -> Result<BoxedDetector> {
    anyhow::bail!("this build has no SCRFD support; rebuild with `--features scrfd`")
}

fn load_image(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).with_context(|| format!("reading image {}", path.display()))
}

fn parse_threshold(s: &str) -> Result<f32, String> {
    let value: f32 = s.trim().parse().map_err(|e| format!("{s:?}: {e}"))?;
    config::check_threshold(value).map_err(|e| e.to_string())
}

/// Parse `X,Y,W,H` into a bounding box.
fn parse_face(s: &str) -> Result<BoundingBox, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [x, y, w, h] = parts.as_slice() else {
        return Err(format!("expected X,Y,W,H, got {s:?}"));
    };
    let num = |v: &str| v.parse::<i32>().map_err(|e| format!("{v:?}: {e}"));
    let bbox = BoundingBox::new(num(*x)?, num(*y)?, num(*w)?, num(*h)?);
    if !bbox.has_positive_size() {
        return Err("width and height must be positive".into());
    }
    Ok(bbox)
}
