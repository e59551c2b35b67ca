//! Media decoding
//!
//! **Purpose:** Turn a file path into pixel or audio sample data for the feature
//! methods. The engine only depends on the [`MediaDecoder`] trait; [`FileDecoder`]
//! is the default implementation backed by `image` (pixels) and `symphonia` (audio).

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::sample::Sample;

/// Kind of input a feature method consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Image,
    Audio,
}

/// Decoded RGB image, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    width: usize,
    height: usize,
    pixels: Vec<[u8; 3]>,
}

impl PixelGrid {
    /// Build a grid from row-major pixels
    ///
    /// Returns `None` when `pixels.len() != width * height`.
    pub fn new(width: usize, height: usize, pixels: Vec<[u8; 3]>) -> Option<Self> {
        if pixels.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Grid where every pixel has the same color
    pub fn filled(width: usize, height: usize, pixel: [u8; 3]) -> Self {
        Self {
            width,
            height,
            pixels: vec![pixel; width * height],
        }
    }

    /// Grid computed from `(row, column)` coordinates
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> [u8; 3]) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for row in 0..height {
            for column in 0..width {
                pixels.push(f(row, column));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_count(&self) -> usize {
        self.pixels.len()
    }

    /// Pixels of one row
    pub fn row(&self, row: usize) -> &[[u8; 3]] {
        let start = row * self.width;
        &self.pixels[start..start + self.width]
    }

    /// All pixels in row-major order
    pub fn pixels(&self) -> &[[u8; 3]] {
        &self.pixels
    }
}

/// Decoded audio result
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono audio samples (f32, range [-1.0, 1.0])
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Original channel count
    pub channels: usize,
    /// Duration in seconds
    pub duration_seconds: f64,
}

/// Decoded input handed to a feature method
#[derive(Debug, Clone)]
pub enum DecodedInput {
    Image(PixelGrid),
    Audio(DecodedAudio),
}

/// Decoder collaborator
///
/// Failures surface as errors; the worker pool records them as per-item failures.
pub trait MediaDecoder: Send + Sync {
    fn decode(&self, kind: InputKind, path: &Path) -> Result<DecodedInput>;
}

/// Default decoder reading files from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDecoder;

impl MediaDecoder for FileDecoder {
    fn decode(&self, kind: InputKind, path: &Path) -> Result<DecodedInput> {
        match kind {
            InputKind::Image => decode_image_file(path).map(DecodedInput::Image),
            InputKind::Audio => decode_audio_file(path).map(DecodedInput::Audio),
        }
    }
}

/// Decode an image file to RGB pixels
pub fn decode_image_file(file_path: &Path) -> Result<PixelGrid> {
    tracing::debug!(path = %file_path.display(), "Decoding image file");

    let image = image::open(file_path)
        .with_context(|| format!("Failed to decode image file: {}", file_path.display()))?
        .to_rgb8();

    let (width, height) = image.dimensions();
    let pixels = image.pixels().map(|p| p.0).collect();

    PixelGrid::new(width as usize, height as usize, pixels)
        .ok_or_else(|| anyhow!("Inconsistent image buffer: {}", file_path.display()))
}

/// Decode an audio file to mono f32 PCM samples
///
/// Multi-channel audio is averaged to mono.
pub fn decode_audio_file(file_path: &Path) -> Result<DecodedAudio> {
    tracing::debug!(path = %file_path.display(), "Decoding audio file");

    let file = std::fs::File::open(file_path)
        .with_context(|| format!("Failed to open audio file: {}", file_path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = file_path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Failed to probe audio file: {}", file_path.display()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found in file")?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .context("Sample rate unknown")?;
    let channel_count = track
        .codec_params
        .channels
        .context("Channels unknown")?
        .count();

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .with_context(|| format!("Failed to create decoder for: {}", file_path.display()))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(anyhow!("Error reading packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder
            .decode(&packet)
            .with_context(|| format!("Failed to decode packet in: {}", file_path.display()))?;

        samples.extend(mix_to_mono(&decoded));
    }

    let duration_seconds = samples.len() as f64 / sample_rate as f64;

    tracing::debug!(
        path = %file_path.display(),
        total_samples = samples.len(),
        sample_rate,
        channels = channel_count,
        "Audio decoding complete"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels: channel_count,
        duration_seconds,
    })
}

fn mix_to_mono(decoded: &AudioBufferRef) -> Vec<f32> {
    match decoded {
        AudioBufferRef::U8(buf) => average_channels(buf),
        AudioBufferRef::U16(buf) => average_channels(buf),
        AudioBufferRef::U24(buf) => average_channels(buf),
        AudioBufferRef::U32(buf) => average_channels(buf),
        AudioBufferRef::S8(buf) => average_channels(buf),
        AudioBufferRef::S16(buf) => average_channels(buf),
        AudioBufferRef::S24(buf) => average_channels(buf),
        AudioBufferRef::S32(buf) => average_channels(buf),
        AudioBufferRef::F32(buf) => average_channels(buf),
        AudioBufferRef::F64(buf) => average_channels(buf),
    }
}

fn average_channels<S>(buf: &AudioBuffer<S>) -> Vec<f32>
where
    S: Sample,
    f32: FromSample<S>,
{
    let channels = buf.spec().channels.count();
    if channels == 0 {
        return Vec::new();
    }

    (0..buf.frames())
        .map(|frame| {
            let sum: f32 = (0..channels)
                .map(|ch| f32::from_sample(buf.chan(ch)[frame]))
                .sum();
            sum / channels as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_grid_rejects_wrong_length() {
        assert!(PixelGrid::new(2, 2, vec![[0, 0, 0]; 3]).is_none());
        assert!(PixelGrid::new(2, 2, vec![[0, 0, 0]; 4]).is_some());
    }

    #[test]
    fn test_pixel_grid_rows_are_row_major() {
        let grid = PixelGrid::from_fn(3, 2, |row, column| [row as u8, column as u8, 0]);
        assert_eq!(grid.row(1), &[[1, 0, 0], [1, 1, 0], [1, 2, 0]]);
        assert_eq!(grid.pixel_count(), 6);
    }

    #[test]
    fn test_decode_audio_file_not_found() {
        let result = decode_audio_file(Path::new("/nonexistent/file.wav"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to open audio file"));
    }

    #[test]
    fn test_decode_image_file_not_found() {
        let result = FileDecoder.decode(InputKind::Image, Path::new("/nonexistent/file.png"));
        assert!(result.is_err());
    }
}
