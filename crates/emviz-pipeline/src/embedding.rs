use std::sync::Arc;

use emviz_core::exclusion::ExclusionPolicy;
use emviz_core::types::Category;
use emviz_observe::metrics::{ScopedTimer, StageMetrics};
use emviz_store::BlobStore;
use image::imageops::FilterType;
use image::RgbImage;

use crate::npy;
use crate::{
    record_outcome, screen_notification, HandlerError, Notification, NotificationHandler, Outcome,
    Stage,
};

/// Turns one decoded photo into a fixed-length feature vector.
///
/// This is where a pretrained model plugs in. Every vector an embedder
/// produces must have the same length.
pub trait Embedder: Send + Sync + 'static {
    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, String>;
}

/// Joint RGB colour histogram, normalised to sum to one.
#[derive(Debug, Clone, Copy)]
pub struct HistogramEmbedder {
    pub bins_per_channel: u32,
}

impl Default for HistogramEmbedder {
    fn default() -> Self {
        Self {
            bins_per_channel: 4,
        }
    }
}

impl HistogramEmbedder {
    pub fn dimensions(&self) -> usize {
        (self.bins_per_channel as usize).pow(3)
    }
}

impl Embedder for HistogramEmbedder {
    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, String> {
        let bins = self.bins_per_channel;
        if !(1..=256).contains(&bins) {
            return Err(format!("bins_per_channel must be in 1..=256, got {bins}"));
        }
        let pixels = u64::from(image.width()) * u64::from(image.height());
        if pixels == 0 {
            return Err("empty image".to_string());
        }
        let bin = |c: u8| (u32::from(c) * bins / 256) as usize;
        let b = bins as usize;
        let mut counts = vec![0u64; self.dimensions()];
        for px in image.pixels() {
            let [r, g, bl] = px.0;
            counts[(bin(r) * b + bin(g)) * b + bin(bl)] += 1;
        }
        Ok(counts
            .into_iter()
            .map(|c| (c as f64 / pixels as f64) as f32)
            .collect())
    }
}

pub struct EmbeddingStage {
    source: Arc<dyn BlobStore>,
    output: Arc<dyn BlobStore>,
    embedder: Arc<dyn Embedder>,
    max_resolution: u32,
    policy: ExclusionPolicy,
    metrics: Arc<StageMetrics>,
}

impl EmbeddingStage {
    pub fn new(
        source: Arc<dyn BlobStore>,
        output: Arc<dyn BlobStore>,
        embedder: Arc<dyn Embedder>,
        max_resolution: u32,
    ) -> Self {
        Self {
            source,
            output,
            embedder,
            max_resolution: max_resolution.max(1),
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
        let mut decoded =
            image::load_from_memory(&bytes).map_err(|source| HandlerError::Image {
                key: notification.key.clone(),
                source,
            })?;
        if decoded.width().max(decoded.height()) > self.max_resolution {
            let cap = self.max_resolution;
            decoded = decoded.resize(cap, cap, FilterType::Triangle);
        }
        let rgb = decoded.to_rgb8();

        let vector = self
            .embedder
            .embed(&rgb)
            .map_err(|reason| HandlerError::Embed {
                key: notification.key.clone(),
                reason,
            })?;

        let leaf = format!("{}.npy", path.leaf);
        let output_key = path.dataset_ref().artifact_key(Category::Embeddings, &leaf);
        self.output.put(&output_key, &npy::encode_f32(&vector))?;
        tracing::info!(
            target: "emviz_gate",
            event = "embedding_written",
            key = %notification.key,
            output_key = %output_key,
            dims = vector.len(),
            width = rgb.width(),
            height = rgb.height(),
            "embedding written"
        );
        Ok(Outcome::Derived { output_key })
    }
}

impl NotificationHandler for EmbeddingStage {
    fn stage(&self) -> Stage {
        Stage::Embedding
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
                event = "embedding_failed",
                key = %notification.key,
                error = %e,
                "embedding failed"
            );
        }
        record_outcome(&self.metrics, &result);
        result
    }

    fn metrics(&self) -> Arc<StageMetrics> {
        self.metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emviz_store::memory::MemoryBlobStore;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;
    use std::sync::Mutex;

    #[test]
    fn histogram_is_normalised() -> anyhow::Result<()> {
        let mut img = RgbImage::from_pixel(2, 2, Rgb([0, 0, 0]));
        img.put_pixel(1, 1, Rgb([255, 255, 255]));
        let v = HistogramEmbedder::default()
            .embed(&img)
            .map_err(anyhow::Error::msg)?;
        assert_eq!(v.len(), 64);
        assert_eq!(v[0], 0.75);
        assert_eq!(v[63], 0.25);
        assert!((v.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        Ok(())
    }

    struct SizeRecorder(Mutex<Vec<(u32, u32)>>);

    impl Embedder for SizeRecorder {
        fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, String> {
            if let Ok(mut seen) = self.0.lock() {
                seen.push(image.dimensions());
            }
            Ok(vec![1.0, 2.0])
        }
    }

    #[test]
    fn large_originals_are_capped_before_embedding() -> anyhow::Result<()> {
        let source = Arc::new(MemoryBlobStore::new());
        let output = Arc::new(MemoryBlobStore::new());
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(1000, 500)).write_to(&mut png, ImageFormat::Png)?;
        source.insert("alice/trip/original_images/big.png", png.into_inner());

        let recorder = Arc::new(SizeRecorder(Mutex::new(Vec::new())));
        let stage = EmbeddingStage::new(source, output.clone(), recorder.clone(), 800);
        let out = stage.handle(&Notification::new(
            "uploads",
            "alice/trip/original_images/big.png",
        ))?;
        assert_eq!(
            out,
            Outcome::Derived {
                output_key: "alice/trip/embeddings/big.png.npy".to_string()
            }
        );

        let seen = recorder.0.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(seen.as_slice(), &[(800, 400)]);
        let stored = output
            .peek("alice/trip/embeddings/big.png.npy")
            .ok_or_else(|| anyhow::anyhow!("embedding missing"))?;
        assert_eq!(npy::decode_vector(&stored)?, vec![1.0, 2.0]);
        Ok(())
    }

    #[test]
    fn embedder_failure_is_surfaced() -> anyhow::Result<()> {
        struct Broken;
        impl Embedder for Broken {
            fn embed(&self, _image: &RgbImage) -> Result<Vec<f32>, String> {
                Err("model offline".to_string())
            }
        }

        let source = Arc::new(MemoryBlobStore::new());
        let output = Arc::new(MemoryBlobStore::new());
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(4, 4)).write_to(&mut png, ImageFormat::Png)?;
        source.insert("alice/trip/original_images/a.png", png.into_inner());

        let stage = EmbeddingStage::new(source, output.clone(), Arc::new(Broken), 800);
        let r = stage.handle(&Notification::new("uploads", "alice/trip/original_images/a.png"));
        assert!(matches!(r, Err(HandlerError::Embed { ref reason, .. }) if reason == "model offline"));
        assert_eq!(output.ops().puts, 0);
        Ok(())
    }
}
