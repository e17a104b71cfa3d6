//! Summarise written motion parameter directories.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use talava_motion::motion::MotionCache;

#[derive(Parser, Debug)]
#[command(author, version = env!("MOTION_BUILD_VERSION"), about, long_about = None)]
struct Args {
    /// Parameter directories (`<output>/<name>/smplx_params`)
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Number of motions kept loaded
    #[arg(long, default_value_t = MotionCache::DEFAULT_CAPACITY)]
    capacity: usize,

    /// Print every frame's translation
    #[arg(long)]
    frames: bool,

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

    let mut cache = MotionCache::new(args.capacity);
    for dir in &args.dirs {
        let motion = cache.load(dir)?;
        let Some((first, record)) = motion.frames.first() else {
            println!("{}: no frames", motion.name);
            continue;
        };
        let last = motion.frames.last().map(|(f, _)| *f).unwrap_or(*first);

        println!("=== {} ===", motion.name);
        println!("  フレーム数: {} ({}..={})", motion.len(), first + 1, last + 1);
        println!("  画像サイズ: {:?}  focal: {:?}", record.img_size_wh, record.focal);
        let gaps = motion.gaps();
        if gaps.is_empty() {
            println!("  欠落: なし");
        } else {
            for (start, end) in gaps {
                println!("  欠落: {}..{}", start + 1, end + 1);
            }
        }
        if args.frames {
            for (frame, record) in &motion.frames {
                let t = record.translation();
                println!("  {:05}: [{:.3}, {:.3}, {:.3}]", frame + 1, t.x, t.y, t.z);
            }
        }
    }

    let (hits, misses) = cache.stats();
    tracing::info!("Cache: {} loaded, {} hits, {} misses", cache.len(), hits, misses);
    Ok(())
}
