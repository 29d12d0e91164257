//! Colour palettes for album artwork.
//!
//! Each thumbnail gets a six-colour palette used for theming the player. A
//! palette is computed once per filename, kept in memory and mirrored to a
//! JSON file that is rewritten after every change. Thumbnails are immutable
//! by filename, so cached entries are never recomputed unless evicted.
//!
//! Extraction never fails: any decoding problem yields [`ColorPalette::fallback`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Name of the cache file inside the uploads directory.
pub const CACHE_FILE_NAME: &str = ".color-cache.json";

/// Side of the square raster images are reduced to before analysis.
const RASTER_SIZE: u32 = 32;

/// Pixels at or below this alpha are ignored.
const MIN_ALPHA: u8 = 127;

/// HSL lightness bounds outside of which a pixel cannot be the vibrant colour.
const NEAR_BLACK: f32 = 0.1;
const NEAR_WHITE: f32 = 0.9;

/// (lightness, saturation) multipliers applied to the source colours.
const BACKGROUND_FACTORS: (f32, f32) = (0.55, 0.8);
const PRIMARY_FACTORS: (f32, f32) = (1.0, 1.1);
const SECONDARY_FACTORS: (f32, f32) = (0.7, 1.0);
const DETAIL_FACTORS: (f32, f32) = (1.1, 0.9);
const VIBRANT_FACTORS: (f32, f32) = (1.15, 1.3);
const MUTED_FACTORS: (f32, f32) = (0.9, 0.4);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorPalette {
    pub background: String,
    pub primary: String,
    pub secondary: String,
    pub detail: String,
    pub vibrant: String,
    pub muted: String,
}

impl ColorPalette {
    /// Palette served when an image cannot be analysed.
    pub fn fallback() -> Self {
        Self {
            background: "#1a1a2e".to_string(),
            primary: "#6e4f8f".to_string(),
            secondary: "#4a3a6e".to_string(),
            detail: "#8e6faf".to_string(),
            vibrant: "#9370db".to_string(),
            muted: "#5a4a6e".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct PaletteCache {
    cache_path: PathBuf,
    entries: Arc<RwLock<HashMap<String, ColorPalette>>>,
}

impl PaletteCache {
    /// Load the cache file at `cache_path`. A missing or unreadable file
    /// starts an empty cache.
    pub async fn open(cache_path: impl Into<PathBuf>) -> Self {
        let cache_path = cache_path.into();
        let entries = match load_entries(&cache_path).await {
            Ok(entries) => {
                tracing::info!(
                    "Loaded {} cached palettes from {}",
                    entries.len(),
                    cache_path.display()
                );
                entries
            }
            Err(e) => {
                tracing::error!("Error loading color cache: {:#}", e);
                HashMap::new()
            }
        };

        Self {
            cache_path,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Palette for `filename`, computing it from `image_path` on a miss.
    pub async fn extract_colors(&self, image_path: &Path, filename: &str) -> ColorPalette {
        if let Some(palette) = self.get(filename).await {
            return palette;
        }

        let path = image_path.to_path_buf();
        let computed = tokio::task::spawn_blocking(move || compute_palette(&path)).await;

        let palette = match computed {
            Ok(Ok(palette)) => palette,
            Ok(Err(e)) => {
                tracing::warn!("Error extracting colors from {}: {:#}", image_path.display(), e);
                return ColorPalette::fallback();
            }
            Err(e) => {
                tracing::error!("Palette extraction task failed: {}", e);
                return ColorPalette::fallback();
            }
        };

        let mut entries = self.entries.write().await;
        entries.insert(filename.to_string(), palette.clone());
        self.save(&entries).await;
        tracing::debug!(filename, "Cached palette");

        palette
    }

    pub async fn get(&self, filename: &str) -> Option<ColorPalette> {
        self.entries.read().await.get(filename).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every cached palette.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.save(&entries).await;
        tracing::info!("Color cache cleared");
    }

    /// Drop the palette for `filename`. Returns whether one was cached.
    pub async fn remove(&self, filename: &str) -> bool {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(filename).is_some();
        self.save(&entries).await;
        removed
    }

    /// Rewrite the cache file. Called with the write lock held so the file
    /// always matches a state the map was in.
    async fn save(&self, entries: &HashMap<String, ColorPalette>) {
        if let Err(e) = write_entries(&self.cache_path, entries).await {
            tracing::error!("Error saving color cache: {:#}", e);
        }
    }
}

async fn load_entries(path: &Path) -> Result<HashMap<String, ColorPalette>> {
    let data = match tokio::fs::read_to_string(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {}", path.display())),
    };

    serde_json::from_str(&data).with_context(|| format!("Malformed color cache {}", path.display()))
}

async fn write_entries(path: &Path, entries: &HashMap<String, ColorPalette>) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let sorted: BTreeMap<&String, &ColorPalette> = entries.iter().collect();
    let json = serde_json::to_string_pretty(&sorted).context("Failed to encode color cache")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Decode `path` and derive its palette.
pub fn compute_palette(path: &Path) -> Result<ColorPalette> {
    let image = image::ImageReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .with_guessed_format()
        .context("Failed to detect image format")?
        .decode()
        .context("Failed to decode image")?;

    let raster = image
        .resize_exact(RASTER_SIZE, RASTER_SIZE, image::imageops::FilterType::Triangle)
        .to_rgba8();
    let pixels: Vec<[u8; 4]> = raster.pixels().map(|p| p.0).collect();

    derive_palette(&pixels).ok_or_else(|| anyhow::anyhow!("Image has no opaque pixels"))
}

/// Derive a palette from RGBA pixels. `None` when no pixel is opaque enough.
pub fn derive_palette(pixels: &[[u8; 4]]) -> Option<ColorPalette> {
    let opaque: Vec<Rgb> = pixels
        .iter()
        .filter(|p| p[3] > MIN_ALPHA)
        .map(|p| Rgb::new(p[0], p[1], p[2]))
        .collect();
    if opaque.is_empty() {
        return None;
    }

    let count = opaque.len() as f32;
    let (sum_r, sum_g, sum_b) = opaque
        .iter()
        .fold((0.0, 0.0, 0.0), |(r, g, b), c| (r + c.r, g + c.g, b + c.b));
    let average = Rgb {
        r: sum_r / count,
        g: sum_g / count,
        b: sum_b / count,
    };

    let mut vibrant: Option<(Rgb, f32)> = None;
    let mut darkest = opaque[0];
    let mut lightest = opaque[0];

    for &color in &opaque {
        let (_, saturation, lightness) = color.to_hsl();
        if (NEAR_BLACK..=NEAR_WHITE).contains(&lightness)
            && vibrant.is_none_or(|(_, best)| saturation > best)
        {
            vibrant = Some((color, saturation));
        }
        if color.luminance() < darkest.luminance() {
            darkest = color;
        }
        if color.luminance() > lightest.luminance() {
            lightest = color;
        }
    }
    let vibrant = vibrant.map(|(color, _)| color).unwrap_or(average);

    Some(ColorPalette {
        background: darkest.adjust(BACKGROUND_FACTORS).to_hex(),
        primary: vibrant.adjust(PRIMARY_FACTORS).to_hex(),
        secondary: vibrant.adjust(SECONDARY_FACTORS).to_hex(),
        detail: lightest.adjust(DETAIL_FACTORS).to_hex(),
        vibrant: vibrant.adjust(VIBRANT_FACTORS).to_hex(),
        muted: average.adjust(MUTED_FACTORS).to_hex(),
    })
}

/// Colour with channels in `0.0..=255.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rgb {
    r: f32,
    g: f32,
    b: f32,
}

impl Rgb {
    fn new(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32,
            g: g as f32,
            b: b as f32,
        }
    }

    /// Relative luminance (Rec. 709 weights).
    fn luminance(&self) -> f32 {
        0.2126 * self.r + 0.7152 * self.g + 0.0722 * self.b
    }

    /// Hue, saturation and lightness, each in `0.0..=1.0`.
    fn to_hsl(self) -> (f32, f32, f32) {
        let (r, g, b) = (self.r / 255.0, self.g / 255.0, self.b / 255.0);
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let lightness = (max + min) / 2.0;

        if max == min {
            return (0.0, 0.0, lightness);
        }

        let delta = max - min;
        let saturation = if lightness > 0.5 {
            delta / (2.0 - max - min)
        } else {
            delta / (max + min)
        };

        let hue = if max == r {
            (g - b) / delta + if g < b { 6.0 } else { 0.0 }
        } else if max == g {
            (b - r) / delta + 2.0
        } else {
            (r - g) / delta + 4.0
        };

        (hue / 6.0, saturation, lightness)
    }

    fn from_hsl(hue: f32, saturation: f32, lightness: f32) -> Self {
        if saturation == 0.0 {
            let v = lightness * 255.0;
            return Self { r: v, g: v, b: v };
        }

        let q = if lightness < 0.5 {
            lightness * (1.0 + saturation)
        } else {
            lightness + saturation - lightness * saturation
        };
        let p = 2.0 * lightness - q;

        Self {
            r: hue_to_channel(p, q, hue + 1.0 / 3.0) * 255.0,
            g: hue_to_channel(p, q, hue) * 255.0,
            b: hue_to_channel(p, q, hue - 1.0 / 3.0) * 255.0,
        }
    }

    fn adjust(self, (lightness_factor, saturation_factor): (f32, f32)) -> Self {
        let (hue, saturation, lightness) = self.to_hsl();
        Self::from_hsl(
            hue,
            (saturation * saturation_factor).clamp(0.0, 1.0),
            (lightness * lightness_factor).clamp(0.0, 1.0),
        )
    }

    fn to_hex(self) -> String {
        let channel = |v: f32| v.round().clamp(0.0, 255.0) as u8;
        format!(
            "#{:02x}{:02x}{:02x}",
            channel(self.r),
            channel(self.g),
            channel(self.b)
        )
    }
}

fn hue_to_channel(p: f32, q: f32, mut t: f32) -> f32 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}
