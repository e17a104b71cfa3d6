use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use talava_motion::body::SkeletonModel;
use talava_motion::config::Config;
use talava_motion::pipeline::{ObservationBundle, Video2Motion};
use talava_motion::video::{ImageSequenceDecoder, VideoDecoder};

#[derive(Parser, Debug)]
#[command(author, version = env!("MOTION_BUILD_VERSION"), about, long_about = None)]
struct Args {
    /// Input video (a directory of frame images, or any path when replaying without pixels)
    #[arg(long)]
    video: PathBuf,

    /// Output directory
    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// Precomputed detector / keypoint / regressor observations (JSON)
    #[arg(long)]
    observations: PathBuf,

    /// Config file
    #[arg(long, default_value = "motion.toml")]
    config: PathBuf,

    /// Write keypoint and body overlay frames
    #[arg(long)]
    visualize: bool,

    /// Fitting iterations: coarse fine
    #[arg(long, num_args = 2, value_names = ["COARSE", "FINE"])]
    steps: Option<Vec<usize>>,

    /// Write parameters directly into the output directory
    #[arg(long)]
    file_only: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("talava-motion {}", env!("MOTION_BUILD_VERSION"));

    let mut config = Config::load_or_default(&args.config)?;
    if args.visualize {
        config.pipeline.visualize = true;
    }
    if let Some(steps) = &args.steps {
        config.fitting.steps = [steps[0], steps[1]];
    }
    tracing::info!(
        "Fitting steps {:?}, fov {}°, pad ratio {}",
        config.fitting.steps,
        config.pipeline.fov_deg,
        config.pipeline.pad_ratio
    );

    let bundle = ObservationBundle::load(&args.observations)?;
    let fps = bundle.fps;
    let (replay_decoder, tracker, detector, regressor) = bundle.into_collaborators();

    // フレーム画像があれば画素付きで読む（重畳描画用）
    let decoder: Box<dyn VideoDecoder> = if args.video.is_dir() {
        tracing::info!("Reading frames from {}", args.video.display());
        Box::new(ImageSequenceDecoder::new(fps))
    } else {
        tracing::info!("No frame images, replaying observations only");
        Box::new(replay_decoder)
    };

    let mut pipeline = Video2Motion::new(
        config,
        decoder,
        Box::new(tracker),
        Box::new(detector),
        Box::new(regressor),
        Box::new(SkeletonModel::new()),
    )
    .file_only(args.file_only);

    let params_dir = pipeline
        .run(&args.video, &args.output)
        .with_context(|| format!("Failed to process {}", args.video.display()))?;
    tracing::info!("Motion parameters written to {}", params_dir.display());

    Ok(())
}
