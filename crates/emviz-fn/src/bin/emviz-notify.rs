#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use anyhow::Result;
use clap::Parser;

use emviz_fn::{describe, parse_stage, Deployment};
use emviz_pipeline::{Notification, PipelineConfig};

/// Handles one object-created notification, the way a storage trigger would.
#[derive(Debug, Parser)]
#[command(name = "emviz-notify")]
struct Args {
    #[arg(long, env = "EMVIZ_STAGE")]
    stage: String,

    /// Bucket the object was written to.
    #[arg(long, env = "EMVIZ_BUCKET")]
    bucket: String,

    /// Object key from the notification.
    #[arg(long)]
    key: String,

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
        store_root: args.store_root,
        metadata_root: args.metadata_root,
        output_bucket: args.output_bucket,
    };
    let handler = deployment.handler(stage, &args.bucket, &cfg)?;

    let outcome = handler.handle(&Notification::new(args.bucket, args.key))?;
    println!("{stage}: {}", describe(&outcome));
    Ok(())
}
