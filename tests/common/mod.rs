//! Shared fixtures: synthetic manifests and tiny PNG images in a temp dir

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};
use serde_json::{json, Value};

use figure_authenticity::PipelineConfig;

const SERIES: [&str; 3] = ["The Monsters", "Zsiga", "Hirono"];
const VARIANTS: [&str; 3] = ["Have a Seat", "Big into Energy", "Exciting Macaron"];

/// One manifest entry. `score` goes into all four quality scores.
pub fn entry(index: usize, authenticity: &str, score: f32, ideal: bool) -> Value {
    let pick = |good: &str, bad: &str| if ideal { good.to_string() } else { bad.to_string() };
    json!({
        "id": format!("fig-{:03}", index),
        "filename": format!("fig_{:03}.png", index),
        "series": SERIES[index % SERIES.len()],
        "variant": VARIANTS[(index / 2) % VARIANTS.len()],
        "authenticity": authenticity,
        "status": "approved",
        "features": {
            "paintQuality": score,
            "sculptDetails": score - 2.0,
            "packagingAuth": score + 1.0,
            "materialTexture": score - 1.0
        },
        "metadata": {
            "quality": pick("high", "low"),
            "lighting": pick("natural", "artificial"),
            "background": pick("clean", "cluttered"),
            "angle": "front"
        }
    })
}

/// Authentic figures score 85-97 with ideal capture, counterfeits 30-48
/// with poor capture.
pub fn separable_entries(authentic: usize, counterfeit: usize) -> Vec<Value> {
    let mut entries = Vec::with_capacity(authentic + counterfeit);
    for i in 0..authentic {
        entries.push(entry(i, "authentic", 85.0 + (i % 7) as f32 * 2.0, true));
    }
    for i in 0..counterfeit {
        entries.push(entry(authentic + i, "counterfeit", 30.0 + (i % 7) as f32 * 3.0, false));
    }
    entries
}

/// Write `metadata.json` into `dir`, and a PNG per entry when `image_size` is set
pub fn write_dataset(dir: &Path, entries: &[Value], image_size: Option<u32>) -> PathBuf {
    let manifest = dir.join("metadata.json");
    fs::write(&manifest, serde_json::to_string_pretty(&Value::Array(entries.to_vec())).unwrap()).unwrap();

    if let Some(size) = image_size {
        for e in entries {
            let label = e["authenticity"].as_str().unwrap();
            let filename = e["filename"].as_str().unwrap();
            let folder = dir.join("images").join(label);
            fs::create_dir_all(&folder).unwrap();
            figure_image(size, label == "authentic").save(folder.join(filename)).unwrap();
        }
    }

    manifest
}

/// Bright, smooth figure for authentic; dark, noisy-looking one otherwise
pub fn figure_image(size: u32, authentic: bool) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        if authentic {
            Rgb([200, 180 + (x % 8) as u8, 160 + (y % 8) as u8])
        } else {
            let v = ((x * 37 + y * 91) % 64) as u8;
            Rgb([40 + v, 30, 30 + v / 2])
        }
    })
}

/// Config pointed at `dir`, small and fast, charts off
pub fn config_for(dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.data.data_dir = dir.to_path_buf();
    config.output.model_dir = dir.join("models");
    config.output.charts = false;
    config.forest.n_estimators = 25;
    config
}
