#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use emviz_core::types::DatasetRef;
use emviz_fn::{parse_aggregate_kind, Deployment};

/// Downloads a dataset's spritesheet or coordinates.
#[derive(Debug, Parser)]
#[command(name = "emviz-fetch")]
struct Args {
    #[arg(long)]
    owner: String,

    #[arg(long)]
    dataset: String,

    /// `spritesheet` or `projection` (alias `coordinates`).
    #[arg(long)]
    kind: String,

    /// Write here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, env = "EMVIZ_STORE_ROOT", default_value = "/var/lib/emviz/buckets")]
    store_root: String,

    #[arg(long, env = "EMVIZ_OUTPUT_BUCKET", default_value = "emviz-output")]
    output_bucket: String,
}

fn main() -> Result<()> {
    emviz_observe::logging::init_tracing();
    let args = Args::parse();

    let kind = parse_aggregate_kind(&args.kind)?;
    let dataset = DatasetRef::new(args.owner, args.dataset);
    let deployment = Deployment {
        store_root: args.store_root,
        metadata_root: String::new(),
        output_bucket: args.output_bucket,
    };
    let bytes = deployment.fetch(&dataset, kind)?;

    tracing::info!(
        target: "emviz_fn",
        event = "aggregate_fetched",
        dataset = %dataset,
        kind = %kind,
        bytes = bytes.len(),
        "aggregate fetched"
    );
    match args.out {
        Some(path) => std::fs::write(&path, &bytes)
            .with_context(|| format!("write {}", path.display()))?,
        None => std::io::stdout()
            .lock()
            .write_all(&bytes)
            .context("write aggregate to stdout")?,
    }
    Ok(())
}
