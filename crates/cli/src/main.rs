use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use facetrack_core::detection::domain::face_detector::FaceDetector;
use facetrack_core::detection::infrastructure::arcface_embedder::ArcFaceEmbedder;
use facetrack_core::detection::infrastructure::onnx_yolo_detector::OnnxYoloDetector;
use facetrack_core::features::infrastructure::hybrid_feature_extractor::HybridFeatureExtractor;
use facetrack_core::features::infrastructure::image_quality_scorer::ImageQualityScorer;
use facetrack_core::features::infrastructure::landmark_pose_scorer::LandmarkPoseScorer;
use facetrack_core::identity::engine::IdentityEngine;
use facetrack_core::identity::person::PersonId;
use facetrack_core::pipeline::control::{spawn_line_reader, ChannelControlSource};
use facetrack_core::pipeline::display::LogDisplaySink;
use facetrack_core::pipeline::pipeline_logger::StdoutPipelineLogger;
use facetrack_core::pipeline::recognize_stream_use_case::RecognizeStreamUseCase;
use facetrack_core::shared::config::IdentityConfig;
use facetrack_core::shared::constants::{DETECTOR_MODEL, EMBEDDING_MODEL};
use facetrack_core::shared::model_resolver::{self, ModelSpec};
use facetrack_core::storage::domain::embedding_store::EmbeddingStore;
use facetrack_core::storage::infrastructure::memory_store::MemoryEmbeddingStore;
use facetrack_core::storage::infrastructure::sqlite_store::SqliteEmbeddingStore;
use facetrack_core::video::domain::frame_source::FrameSource;
use facetrack_core::video::infrastructure::ffmpeg_source::FfmpegFrameSource;
use facetrack_core::video::infrastructure::image_sequence_source::ImageSequenceSource;

/// Face tracking with automatic recognition and registration.
#[derive(Parser)]
#[command(name = "facetrack")]
struct Cli {
    /// JSON configuration file (defaults apply when absent).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Identity database (defaults to the per-user data directory).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Keep identities in memory only; nothing is persisted.
    #[arg(long, global = true, conflicts_with = "db")]
    in_memory: bool,

    /// Directory searched for ONNX models before the download cache.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track and identify faces in a video file or image directory.
    ///
    /// While running, type `r` to register the active face, `l` to list
    /// persons, `c` to clear the database and `q` to quit.
    Run {
        /// Video file or directory of images.
        input: PathBuf,

        /// Log track labels every N frames.
        #[arg(long, default_value = "30")]
        display_every: usize,

        /// Stop when standard input closes.
        #[arg(long)]
        quit_on_eof: bool,
    },
    /// List registered persons.
    List,
    /// Write a person's registration thumbnail to a JPEG file.
    Thumbnail {
        /// Person id as shown by `list`.
        person: i64,

        /// Destination file.
        output: PathBuf,
    },
    /// Delete every registered person.
    Clear,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => IdentityConfig::load(path)?,
        None => IdentityConfig::default(),
    };
    let mut store = open_store(&cli)?;

    match cli.command {
        Command::Run {
            ref input,
            display_every,
            quit_on_eof,
        } => run_stream(&cli, input, display_every, quit_on_eof, config, store),
        Command::List => {
            let persons = store.list_persons()?;
            if persons.is_empty() {
                println!("No persons registered");
            }
            for summary in persons {
                println!(
                    "{}\t{}\t{} embeddings\t{}{}",
                    summary.person.id,
                    summary.person.display_name,
                    summary.embedding_count,
                    summary.person.created_at.format("%Y-%m-%d %H:%M:%S"),
                    if summary.has_thumbnail {
                        "\tthumbnail"
                    } else {
                        ""
                    }
                );
            }
            if let Some(active) = store.get_active_person()? {
                println!(
                    "Last active: {} at {}",
                    active.person.display_name,
                    active.last_seen.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        Command::Thumbnail {
            person,
            ref output,
        } => {
            let jpeg = store
                .thumbnail(PersonId(person))?
                .ok_or_else(|| format!("Person {person} has no thumbnail"))?;
            std::fs::write(output, jpeg)?;
            log::info!("Wrote {}", output.display());
            Ok(())
        }
        Command::Clear => {
            let count = store.list_persons()?.len();
            store.clear_all()?;
            log::info!("Deleted {count} persons");
            Ok(())
        }
    }
}

fn run_stream(
    cli: &Cli,
    input: &Path,
    display_every: usize,
    quit_on_eof: bool,
    config: IdentityConfig,
    store: Box<dyn EmbeddingStore>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !input.exists() {
        return Err(format!("Input not found: {}", input.display()).into());
    }
    let mut source = open_source(input);
    let metadata = source.open(input)?;
    let detector = build_detector(cli.model_dir.as_deref(), &config)?;

    let engine = IdentityEngine::new(
        config,
        store,
        Box::new(HybridFeatureExtractor::new()),
        Box::new(ImageQualityScorer::new()),
        Box::new(LandmarkPoseScorer::new()),
    )?;

    let (tx, rx) = crossbeam_channel::unbounded();
    // Detached: blocks on stdin until the process exits.
    let _reader = spawn_line_reader(std::io::BufReader::new(std::io::stdin()), tx);
    let mut controls = ChannelControlSource::new(rx);
    if !quit_on_eof {
        controls = controls.ignore_disconnect();
    }

    let mut use_case = RecognizeStreamUseCase::new(
        source,
        detector,
        engine,
        Box::new(LogDisplaySink::new(display_every)),
        Box::new(controls),
        Box::new(StdoutPipelineLogger::default()),
    );
    let summary = use_case.execute(&metadata);
    log::info!(
        "Processed {} frames: {} registrations, {} detector failures, {} reinitializations",
        summary.frames,
        summary.registrations,
        summary.detector_failures,
        summary.reinitializations
    );
    Ok(())
}

fn open_store(cli: &Cli) -> Result<Box<dyn EmbeddingStore>, Box<dyn std::error::Error>> {
    if cli.in_memory {
        log::info!("Using in-memory identity store");
        return Ok(Box::new(MemoryEmbeddingStore::new()));
    }
    let path = match &cli.db {
        Some(path) => path.clone(),
        None => model_resolver::default_database_path()
            .ok_or("Could not determine a data directory; pass --db")?,
    };
    log::info!("Opening identity database {}", path.display());
    Ok(Box::new(SqliteEmbeddingStore::open(&path)?))
}

fn open_source(input: &Path) -> Box<dyn FrameSource> {
    if input.is_dir() {
        Box::new(ImageSequenceSource::new())
    } else {
        Box::new(FfmpegFrameSource::new())
    }
}

fn build_detector(
    model_dir: Option<&Path>,
    config: &IdentityConfig,
) -> Result<Box<dyn FaceDetector>, Box<dyn std::error::Error>> {
    let detector_path = resolve_model(DETECTOR_MODEL, model_dir)?;
    let embedder_path = resolve_model(EMBEDDING_MODEL, model_dir)?;

    let embedder = ArcFaceEmbedder::new(&embedder_path)?;
    Ok(Box::new(OnnxYoloDetector::new(
        &detector_path,
        embedder,
        config.detector.clone(),
    )?))
}

fn resolve_model(
    spec: ModelSpec,
    model_dir: Option<&Path>,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {}", spec.name);
    let path = model_resolver::resolve(spec, model_dir, Some(Box::new(download_progress)))?;
    Ok(path)
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading model... {pct}%");
        if downloaded >= total {
            eprintln!();
        }
    } else {
        eprint!("\rDownloading model... {downloaded} bytes");
    }
}
