use std::io::Cursor;
use std::sync::Arc;

use emviz_core::exclusion::ExclusionPolicy;
use emviz_core::object_key::leaf_extension;
use emviz_core::types::Category;
use emviz_observe::metrics::{ScopedTimer, StageMetrics};
use emviz_store::BlobStore;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::{
    record_outcome, screen_notification, HandlerError, Notification, NotificationHandler, Outcome,
    Stage,
};

/// Shrinks each uploaded original to a fixed square for the spritesheet.
pub struct ThumbnailStage {
    source: Arc<dyn BlobStore>,
    output: Arc<dyn BlobStore>,
    size: u32,
    policy: ExclusionPolicy,
    metrics: Arc<StageMetrics>,
}

impl ThumbnailStage {
    pub fn new(source: Arc<dyn BlobStore>, output: Arc<dyn BlobStore>, size: u32) -> Self {
        Self {
            source,
            output,
            size: size.max(1),
            policy: ExclusionPolicy::for_category(Category::OriginalImages),
            metrics: Arc::new(StageMetrics::default()),
        }
    }

    fn run(&self, notification: &Notification) -> Result<Outcome, HandlerError> {
        let path = match screen_notification(&self.policy, &notification.key) {
            Ok(path) => path,
            Err(reason) => return Ok(Outcome::Skipped(reason)),
        };

        let bytes = self.source.get(&notification.key)?;
        let decoded = image::load_from_memory(&bytes).map_err(|source| HandlerError::Image {
            key: notification.key.clone(),
            source,
        })?;
        let rgb = decoded.to_rgb8();
        let thumb = image::imageops::resize(&rgb, self.size, self.size, FilterType::Triangle);

        let format = output_format(&path.leaf);
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(thumb)
            .write_to(&mut out, format)
            .map_err(|source| HandlerError::Image {
                key: notification.key.clone(),
                source,
            })?;

        let output_key = path
            .dataset_ref()
            .artifact_key(Category::Thumbnails, &path.leaf);
        self.output.put(&output_key, out.get_ref())?;
        tracing::info!(
            target: "emviz_gate",
            event = "thumbnail_written",
            key = %notification.key,
            output_key = %output_key,
            size = self.size,
            "thumbnail written"
        );
        Ok(Outcome::Derived { output_key })
    }
}

// Keep the original's format when we can encode it.
fn output_format(leaf: &str) -> ImageFormat {
    match leaf_extension(leaf).and_then(ImageFormat::from_extension) {
        Some(ImageFormat::Jpeg) => ImageFormat::Jpeg,
        _ => ImageFormat::Png,
    }
}

impl NotificationHandler for ThumbnailStage {
    fn stage(&self) -> Stage {
        Stage::Thumbnail
    }

    fn handle(&self, notification: &Notification) -> Result<Outcome, HandlerError> {
        self.metrics.notifications.inc();
        let result = {
            let _timer = ScopedTimer::new(&self.metrics.work_time);
            self.run(notification)
        };
        if let Err(e) = &result {
            tracing::error!(
                target: "emviz_gate",
                event = "thumbnail_failed",
                key = %notification.key,
                error = %e,
                "thumbnail failed"
            );
        }
        record_outcome(&self.metrics, &result);
        result
    }

    fn metrics(&self) -> Arc<StageMetrics> {
        self.metrics.clone()
    }
}
