//! Shared fixtures for patx-ex integration tests

#![allow(dead_code)]

use patx_common::RunConfig;
use std::path::{Path, PathBuf};

/// Write a PNG whose pixels come from `(row, column)`
pub fn write_png(path: &Path, width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 3]) {
    let image = image::RgbImage::from_fn(width, height, |x, y| image::Rgb(f(y, x)));
    image.save(path).expect("Failed to write PNG fixture");
}

/// Write a uniformly colored PNG
pub fn write_solid_png(path: &Path, width: u32, height: u32, pixel: [u8; 3]) {
    write_png(path, width, height, |_, _| pixel);
}

/// Write a mono 16-bit WAV sine
pub fn write_sine_wav(path: &Path, frequency: f32, duration_secs: f32, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV fixture");
    let count = (duration_secs * sample_rate as f32) as usize;
    for i in 0..count {
        let t = i as f32 / sample_rate as f32;
        let sample = (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.5;
        writer
            .write_sample((sample * i16::MAX as f32) as i16)
            .expect("Failed to write WAV sample");
    }
    writer.finalize().expect("Failed to finalize WAV fixture");
}

/// Parse a JSON run configuration
pub fn config(value: serde_json::Value) -> RunConfig {
    RunConfig::from_json_str(&value.to_string()).expect("Invalid test configuration")
}

/// Create `dir/name` and return it
pub fn subdir(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::create_dir_all(&path).expect("Failed to create fixture directory");
    path
}

pub fn read_json(path: &Path) -> serde_json::Value {
    let bytes = std::fs::read(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    serde_json::from_slice(&bytes).expect("Invalid JSON artifact")
}
