#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;

use emviz_fn::{describe, parse_stage, read_keys, Deployment};
use emviz_pipeline::{Notification, PipelineConfig};

/// Replays a list of object keys through one stage with several concurrent
/// workers, delivering each key `--repeat` times.
#[derive(Debug, Parser)]
#[command(name = "emviz-replay")]
struct Args {
    #[arg(long, env = "EMVIZ_STAGE")]
    stage: String,

    #[arg(long, env = "EMVIZ_BUCKET")]
    bucket: String,

    /// File with one object key per line.
    #[arg(long)]
    keys: PathBuf,

    #[arg(long, env = "EMVIZ_STORE_ROOT", default_value = "/var/lib/emviz/buckets")]
    store_root: String,

    #[arg(
        long,
        env = "EMVIZ_METADATA_ROOT",
        default_value = "/var/lib/emviz/metadata"
    )]
    metadata_root: String,

    #[arg(long, env = "EMVIZ_OUTPUT_BUCKET", default_value = "emviz-output")]
    output_bucket: String,

    #[arg(long, env = "EMVIZ_THUMBNAIL_SIZE", default_value_t = 64)]
    thumbnail_size: u32,

    #[arg(long, env = "EMVIZ_MAX_EMBED_RESOLUTION", default_value_t = 800)]
    max_embed_resolution: u32,

    #[arg(long, env = "EMVIZ_CONCURRENCY", default_value_t = 8)]
    concurrency: usize,

    #[arg(long, default_value_t = 1)]
    repeat: usize,
}

fn main() -> Result<()> {
    emviz_observe::logging::init_tracing();
    let args = Args::parse();

    let stage = parse_stage(&args.stage)?;
    let cfg = PipelineConfig {
        thumbnail_size: args.thumbnail_size,
        max_embed_resolution: args.max_embed_resolution,
    };
    let deployment = Deployment {
        store_root: args.store_root.clone(),
        metadata_root: args.metadata_root.clone(),
        output_bucket: args.output_bucket.clone(),
    };
    let handler = deployment.handler(stage, &args.bucket, &cfg)?;

    let keys = read_keys(&args.keys)?;
    let mut queue = VecDeque::with_capacity(keys.len() * args.repeat.max(1));
    for _ in 0..args.repeat.max(1) {
        queue.extend(keys.iter().cloned());
    }
    let total = queue.len();
    let queue = Arc::new(Mutex::new(queue));

    let workers = args.concurrency.clamp(1, total.max(1));
    let mut joins = Vec::with_capacity(workers);
    for _ in 0..workers {
        let queue = queue.clone();
        let handler = handler.clone();
        let bucket = args.bucket.clone();
        joins.push(std::thread::spawn(move || loop {
            let next = match queue.lock() {
                Ok(mut q) => q.pop_front(),
                Err(_) => None,
            };
            let Some(key) = next else {
                break;
            };
            match handler.handle(&Notification::new(bucket.clone(), key.clone())) {
                Ok(outcome) => println!("{key}: {}", describe(&outcome)),
                Err(e) => eprintln!("{key}: failed: {e}"),
            }
        }));
    }
    for j in joins {
        j.join()
            .map_err(|_| anyhow::anyhow!("replay worker panicked"))?;
    }

    let metrics = handler.metrics();
    metrics.log_summary(&stage.to_string());
    let snap = metrics.snapshot();
    println!(
        "{stage}: {total} notifications, {} completed, {} not ready, {} unregistered, {} skipped, {} failed",
        snap.completed, snap.not_ready, snap.unregistered, snap.skipped, snap.failed
    );
    if snap.failed > 0 {
        anyhow::bail!("{} notifications failed", snap.failed);
    }
    Ok(())
}
