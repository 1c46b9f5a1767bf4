use emviz_core::types::AggregateKind;
use emviz_store::BlobStore;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::aggregate::{load_all, AggregateError, Aggregator};
use crate::catalog::ArtifactSet;

struct Tile {
    width: u32,
    height: u32,
    rgb: Vec<u8>,
}

/// Lays every thumbnail of a dataset side by side, in key order, as one PNG
/// strip. Tiles must all share the first tile's dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpritesheetBuilder;

impl SpritesheetBuilder {
    fn decode(key: &str, bytes: Vec<u8>) -> Result<Tile, AggregateError> {
        let decoded = image::load_from_memory(&bytes).map_err(|e| AggregateError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let rgb = decoded.to_rgb8();
        Ok(Tile {
            width: rgb.width(),
            height: rgb.height(),
            rgb: rgb.into_raw(),
        })
    }

    fn stitch(set: &ArtifactSet, tiles: &[Tile]) -> Result<(u32, u32, Vec<u8>), AggregateError> {
        let first = tiles.first().ok_or(AggregateError::EmptyInput)?;
        let (tw, th) = (first.width, first.height);
        for (key, tile) in set.keys().iter().zip(tiles) {
            if (tile.width, tile.height) != (tw, th) {
                return Err(AggregateError::DimensionMismatch {
                    key: key.clone(),
                    expected: format!("{tw}x{th}"),
                    found: format!("{}x{}", tile.width, tile.height),
                });
            }
        }

        let n = u32::try_from(tiles.len())
            .map_err(|_| AggregateError::Encode("too many tiles".to_string()))?;
        let width = tw
            .checked_mul(n)
            .ok_or_else(|| AggregateError::Encode("spritesheet width overflow".to_string()))?;
        let row = tw as usize * 3;
        let mut raw = Vec::with_capacity(row * tiles.len() * th as usize);
        for y in 0..th as usize {
            for tile in tiles {
                raw.extend_from_slice(&tile.rgb[y * row..(y + 1) * row]);
            }
        }
        Ok((width, th, raw))
    }
}

impl Aggregator for SpritesheetBuilder {
    fn kind(&self) -> AggregateKind {
        AggregateKind::Spritesheet
    }

    fn aggregate(
        &self,
        store: &dyn BlobStore,
        set: &ArtifactSet,
    ) -> Result<Vec<u8>, AggregateError> {
        let tiles = load_all(store, set, Self::decode)?;
        let (width, height, raw) = Self::stitch(set, &tiles)?;

        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(&raw, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| AggregateError::Encode(e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emviz_core::types::{Category, DatasetRef};
    use emviz_store::memory::MemoryBlobStore;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(w: u32, h: u32, color: [u8; 3]) -> anyhow::Result<Vec<u8>> {
        let img = RgbImage::from_pixel(w, h, Rgb(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    fn seeded(tiles: &[(&str, Vec<u8>)]) -> (MemoryBlobStore, ArtifactSet) {
        let store = MemoryBlobStore::new();
        let mut keys = Vec::new();
        for (leaf, bytes) in tiles {
            let key = format!("alice/trip/thumbnails/{leaf}");
            store.insert(key.clone(), bytes.clone());
            keys.push(key);
        }
        let set = ArtifactSet::new(DatasetRef::new("alice", "trip"), Category::Thumbnails, keys);
        (store, set)
    }

    #[test]
    fn tiles_are_laid_out_in_key_order() -> anyhow::Result<()> {
        let (store, set) = seeded(&[
            ("c.png", png(4, 2, [0, 0, 255])?),
            ("a.png", png(4, 2, [255, 0, 0])?),
            ("b.png", png(4, 2, [0, 255, 0])?),
        ]);
        let bytes = SpritesheetBuilder.aggregate(&store, &set)?;
        let sheet = image::load_from_memory(&bytes)?.to_rgb8();
        assert_eq!(sheet.dimensions(), (12, 2));
        assert_eq!(sheet.get_pixel(0, 1), &Rgb([255, 0, 0]));
        assert_eq!(sheet.get_pixel(5, 0), &Rgb([0, 255, 0]));
        assert_eq!(sheet.get_pixel(11, 1), &Rgb([0, 0, 255]));
        Ok(())
    }

    #[test]
    fn repeated_runs_are_byte_identical() -> anyhow::Result<()> {
        let (store, set) = seeded(&[
            ("a.png", png(3, 3, [10, 20, 30])?),
            ("b.png", png(3, 3, [40, 50, 60])?),
        ]);
        let first = SpritesheetBuilder.aggregate(&store, &set)?;
        let second = SpritesheetBuilder.aggregate(&store, &set)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn mismatched_tile_is_rejected() -> anyhow::Result<()> {
        let (store, set) = seeded(&[
            ("a.png", png(4, 4, [0, 0, 0])?),
            ("b.png", png(4, 5, [0, 0, 0])?),
        ]);
        match SpritesheetBuilder.aggregate(&store, &set) {
            Err(AggregateError::DimensionMismatch { key, expected, found }) => {
                assert_eq!(key, "alice/trip/thumbnails/b.png");
                assert_eq!(expected, "4x4");
                assert_eq!(found, "4x5");
            }
            other => anyhow::bail!("expected DimensionMismatch, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn undecodable_tile_names_its_key() -> anyhow::Result<()> {
        let (store, set) = seeded(&[("a.png", b"not an image".to_vec())]);
        let err = SpritesheetBuilder.aggregate(&store, &set);
        assert!(matches!(err, Err(AggregateError::Decode { ref key, .. }) if key.ends_with("a.png")));
        Ok(())
    }
}
