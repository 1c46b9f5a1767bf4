use std::io::Cursor;
use std::path::PathBuf;

use anyhow::Result;
use emviz_core::types::{AggregateKind, DatasetMetadata, DatasetRef};
use emviz_fn::Deployment;
use emviz_pipeline::projection::Coordinates;
use emviz_pipeline::{Notification, Outcome, PipelineConfig, Stage};
use emviz_store::BlobStore;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

fn temp_root(test_name: &str) -> Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "emviz-fn-{}-{}-{}",
        test_name,
        std::process::id(),
        emviz_store::unix_time_ms()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

fn photo(w: u32, h: u32, color: [u8; 3]) -> Result<Vec<u8>> {
    let img = RgbImage::from_fn(w, h, |x, _| {
        if x % 2 == 0 {
            Rgb(color)
        } else {
            Rgb([255 - color[0], 255 - color[1], 255 - color[2]])
        }
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img).write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

// Mirrors a deployment: the storage trigger fans each original out to the
// per-photo stages, whose writes in turn notify the aggregators.
#[test]
fn originals_flow_through_to_both_aggregates() -> Result<()> {
    let root = temp_root("flow")?;
    let deployment = Deployment {
        store_root: root.join("buckets").display().to_string(),
        metadata_root: root.join("metadata").display().to_string(),
        output_bucket: "emviz-output".to_string(),
    };
    let cfg = PipelineConfig {
        thumbnail_size: 16,
        max_embed_resolution: 32,
    };

    let uploads = emviz_store::open_blob_store(&deployment.store_root, "uploads")?;
    let output = emviz_store::open_blob_store(&deployment.store_root, "emviz-output")?;
    let metadata = emviz_store::open_metadata_store(&deployment.metadata_root)?;
    metadata.register(&DatasetMetadata {
        owner: "alice".to_string(),
        dataset: "trip".to_string(),
        expected_count: 3,
        model: Some("histogram".to_string()),
        visualization: Some("tsne".to_string()),
        created_unix_time_ms: emviz_store::unix_time_ms(),
    })?;

    let thumbs = deployment.handler(Stage::Thumbnail, "uploads", &cfg)?;
    let embeds = deployment.handler(Stage::Embedding, "uploads", &cfg)?;
    let sprites = deployment.handler(Stage::Spritesheet, "emviz-output", &cfg)?;
    let projector = deployment.handler(Stage::Projection, "emviz-output", &cfg)?;

    let photos = [
        ("beach.png", [250, 200, 40]),
        ("forest.png", [20, 160, 30]),
        ("sky.png", [60, 90, 230]),
    ];
    let mut last_sprites = None;
    let mut last_coords = None;
    for (leaf, color) in photos {
        let key = format!("alice/trip/original_images/{leaf}");
        uploads.put(&key, &photo(80, 40, color)?)?;
        let note = Notification::new("uploads", key);

        for stage in [&thumbs, &embeds] {
            let Outcome::Derived { output_key } = stage.handle(&note)? else {
                anyhow::bail!("{leaf}: per-photo stage did not write");
            };
            let derived = Notification::new("emviz-output", output_key);
            // Both aggregators see every output-bucket write.
            let s = sprites.handle(&derived)?;
            let p = projector.handle(&derived)?;
            if matches!(s, Outcome::Aggregated { .. }) {
                last_sprites = Some(s);
            }
            if matches!(p, Outcome::Aggregated { .. }) {
                last_coords = Some(p);
            }
        }
    }

    assert!(matches!(last_sprites, Some(Outcome::Aggregated { artifacts: 3, .. })));
    assert!(matches!(last_coords, Some(Outcome::Aggregated { artifacts: 3, .. })));

    let sheet = image::load_from_memory(&output.get("alice/trip/spritesheet.png")?)?;
    assert_eq!((sheet.width(), sheet.height()), (48, 16));

    let coords: Coordinates =
        serde_json::from_slice(&output.get("alice/trip/coordinates.json")?)?;
    assert_eq!(coords.points.len(), 3);

    let trip = DatasetRef::new("alice", "trip");
    assert_eq!(
        deployment.fetch(&trip, AggregateKind::Spritesheet)?,
        output.get("alice/trip/spritesheet.png")?
    );
    let fetched: Coordinates =
        serde_json::from_slice(&deployment.fetch(&trip, AggregateKind::Projection)?)?;
    assert_eq!(fetched, coords);

    // Neither aggregate is counted as an artifact of any category.
    assert_eq!(output.list("alice/trip/thumbnails/")?.len(), 3);
    assert_eq!(output.list("alice/trip/embeddings/")?.len(), 3);

    // The aggregates' own notifications are screened out.
    for key in ["alice/trip/spritesheet.png", "alice/trip/coordinates.json"] {
        let note = Notification::new("emviz-output", key);
        assert!(matches!(sprites.handle(&note)?, Outcome::Skipped(_)));
        assert!(matches!(projector.handle(&note)?, Outcome::Skipped(_)));
    }

    std::fs::remove_dir_all(&root).ok();
    Ok(())
}

#[test]
fn unregistered_dataset_never_aggregates() -> Result<()> {
    let root = temp_root("unregistered")?;
    let deployment = Deployment {
        store_root: root.join("buckets").display().to_string(),
        metadata_root: root.join("metadata").display().to_string(),
        output_bucket: "emviz-output".to_string(),
    };
    let cfg = PipelineConfig::default();
    let output = emviz_store::open_blob_store(&deployment.store_root, "emviz-output")?;
    let sprites = deployment.handler(Stage::Spritesheet, "emviz-output", &cfg)?;

    output.put("bob/hike/thumbnails/a.png", &photo(64, 64, [1, 2, 3])?)?;
    let out = sprites.handle(&Notification::new("emviz-output", "bob/hike/thumbnails/a.png"))?;
    assert_eq!(out, Outcome::Unregistered);
    assert!(output.list("bob/hike/")?.iter().all(|k| !k.contains("spritesheet")));

    let hike = DatasetRef::new("bob", "hike");
    let err = match deployment.fetch(&hike, AggregateKind::Spritesheet) {
        Ok(bytes) => anyhow::bail!("fetched {} bytes of an unbuilt sheet", bytes.len()),
        Err(e) => e.to_string(),
    };
    assert!(err.contains("no spritesheet yet"), "{err}");
    assert!(deployment
        .fetch(&DatasetRef::new("bob", "../hike"), AggregateKind::Spritesheet)
        .is_err());

    std::fs::remove_dir_all(&root).ok();
    Ok(())
}
