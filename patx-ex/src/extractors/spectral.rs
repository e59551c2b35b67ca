//! Short-time spectral analysis
//!
//! Magnitude spectrogram over Hann-windowed frames (2048-sample FFT, 512-sample
//! hop) and the frame-level descriptors derived from it: mel-frequency cepstral
//! coefficients, spectral centroid, octave-band spectral contrast and a pitch-class
//! (chroma) profile.

use crate::error::{ExtractError, ExtractResult};
use realfft::RealFftPlanner;
use std::f64::consts::PI;

const NAME: &str = "spectrogram";

pub const N_FFT: usize = 2048;
pub const HOP_LENGTH: usize = 512;
pub const N_MELS: usize = 128;

/// Floor applied before converting power to decibels
const AMIN: f64 = 1e-10;
/// Dynamic range kept below the loudest mel energy
const TOP_DB: f64 = 80.0;

const CONTRAST_FMIN: f64 = 200.0;
const CONTRAST_BANDS: usize = 6;
const CONTRAST_QUANTILE: f64 = 0.02;

/// A0, lowest pitch mapped to a chroma class
const CHROMA_FMIN: f64 = 27.5;

/// Magnitude spectrogram, one row of `N_FFT / 2 + 1` bins per frame
#[derive(Debug, Clone)]
pub struct Spectrogram {
    sample_rate: u32,
    frames: Vec<Vec<f64>>,
}

impl Spectrogram {
    /// Frames that would run past the end are dropped; input shorter than one
    /// frame is zero-padded to a single frame.
    pub fn compute(samples: &[f32], sample_rate: u32) -> ExtractResult<Self> {
        if samples.is_empty() {
            return Err(ExtractError::method(NAME, "Empty sample buffer"));
        }
        if sample_rate == 0 {
            return Err(ExtractError::method(NAME, "Sample rate is zero"));
        }

        let window = hann_window(N_FFT);
        let mut planner = RealFftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(N_FFT);
        let mut input = fft.make_input_vec();
        let mut spectrum = fft.make_output_vec();

        let frame_count = if samples.len() <= N_FFT {
            1
        } else {
            1 + (samples.len() - N_FFT) / HOP_LENGTH
        };

        let mut frames = Vec::with_capacity(frame_count);
        for frame in 0..frame_count {
            let start = frame * HOP_LENGTH;
            for (i, slot) in input.iter_mut().enumerate() {
                let sample = samples.get(start + i).copied().unwrap_or(0.0) as f64;
                *slot = sample * window[i];
            }
            fft.process(&mut input, &mut spectrum)
                .map_err(|e| ExtractError::method(NAME, format!("FFT failed: {}", e)))?;
            frames.push(spectrum.iter().map(|c| c.norm()).collect());
        }

        Ok(Self {
            sample_rate,
            frames,
        })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Vec<f64>] {
        &self.frames
    }

    /// Center frequency of every bin, in Hz
    pub fn bin_frequencies(&self) -> Vec<f64> {
        (0..=N_FFT / 2)
            .map(|k| k as f64 * self.sample_rate as f64 / N_FFT as f64)
            .collect()
    }

    fn nyquist(&self) -> f64 {
        self.sample_rate as f64 / 2.0
    }
}

/// Periodic Hann window
fn hann_window(size: usize) -> Vec<f64> {
    (0..size)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f64 / size as f64).cos())
        .collect()
}

fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Mean spectral centroid in Hz; silent frames count as 0
pub fn spectral_centroid(spec: &Spectrogram) -> f64 {
    let freqs = spec.bin_frequencies();
    mean(spec.frames().iter().map(|frame| {
        let total: f64 = frame.iter().sum();
        if total < AMIN {
            return 0.0;
        }
        frame.iter().zip(&freqs).map(|(m, f)| m * f).sum::<f64>() / total
    }))
}

fn hz_to_mel(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

/// Slaney-style triangular mel filters, area-normalized, spanning 0..nyquist
pub fn mel_filterbank(sample_rate: u32, n_mels: usize) -> Vec<Vec<f64>> {
    let fft_freqs: Vec<f64> = (0..=N_FFT / 2)
        .map(|k| k as f64 * sample_rate as f64 / N_FFT as f64)
        .collect();
    let mel_max = hz_to_mel(sample_rate as f64 / 2.0);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (edges[m], edges[m + 1], edges[m + 2]);
            let enorm = 2.0 / (upper - lower);
            fft_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - lower) / (center - lower);
                    let falling = (upper - f) / (upper - center);
                    rising.min(falling).max(0.0) * enorm
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II, first `n_out` coefficients
fn dct_ortho(input: &[f64], n_out: usize) -> Vec<f64> {
    let n = input.len() as f64;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, x)| x * (PI * k as f64 * (2 * i + 1) as f64 / (2.0 * n)).cos())
                .sum();
            scale * sum
        })
        .collect()
}

/// Per-coefficient mean of the MFCCs over every frame
///
/// Log-mel energies are clipped to `TOP_DB` below the loudest value of the file.
pub fn mfcc_means(spec: &Spectrogram, n_mfcc: usize) -> Vec<f64> {
    let filters = mel_filterbank(spec.sample_rate, N_MELS);

    let log_mel: Vec<Vec<f64>> = spec
        .frames()
        .iter()
        .map(|frame| {
            filters
                .iter()
                .map(|filter| {
                    let energy: f64 = filter.iter().zip(frame).map(|(w, m)| w * m * m).sum();
                    10.0 * energy.max(AMIN).log10()
                })
                .collect()
        })
        .collect();

    let loudest = log_mel
        .iter()
        .flatten()
        .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let floor = loudest - TOP_DB;

    let mut sums = vec![0.0; n_mfcc];
    for frame in &log_mel {
        let clipped: Vec<f64> = frame.iter().map(|&db| db.max(floor)).collect();
        for (sum, c) in sums.iter_mut().zip(dct_ortho(&clipped, n_mfcc)) {
            *sum += c;
        }
    }

    let frames = log_mel.len().max(1) as f64;
    sums.into_iter().map(|s| s / frames).collect()
}

/// Mean octave-band contrast in dB (peak quantile over valley quantile)
///
/// Bands are `[0, 200)`, then octaves from 200 Hz; bands starting above Nyquist are
/// skipped and the last one is clipped to it.
pub fn spectral_contrast(spec: &Spectrogram) -> f64 {
    let freqs = spec.bin_frequencies();
    let nyquist = spec.nyquist();

    let mut edges = vec![0.0];
    edges.extend((0..=CONTRAST_BANDS).map(|i| CONTRAST_FMIN * 2f64.powi(i as i32)));
    let bands: Vec<(f64, f64)> = edges
        .windows(2)
        .filter(|w| w[0] < nyquist)
        .map(|w| (w[0], w[1].min(nyquist)))
        .collect();

    let mut values = Vec::with_capacity(spec.frame_count() * bands.len());
    for frame in spec.frames() {
        for &(low, high) in &bands {
            let mut band: Vec<f64> = frame
                .iter()
                .zip(&freqs)
                .filter(|(_, f)| **f >= low && **f <= high)
                .map(|(m, _)| m * m)
                .collect();
            if band.is_empty() {
                continue;
            }
            band.sort_by(f64::total_cmp);

            let take = ((CONTRAST_QUANTILE * band.len() as f64).round() as usize).max(1);
            let valley = mean(band[..take].iter().copied());
            let peak = mean(band[band.len() - take..].iter().copied());
            values.push(10.0 * peak.max(AMIN).log10() - 10.0 * valley.max(AMIN).log10());
        }
    }
    mean(values)
}

/// Pitch class of a frequency, C = 0
fn pitch_class(freq: f64) -> usize {
    let semitones_from_a4 = (12.0 * (freq / 440.0).log2()).round() as i64;
    (semitones_from_a4 + 9).rem_euclid(12) as usize
}

/// Mean chroma energy, each frame normalized by its strongest pitch class
///
/// Values are in `[0, 1]`; a single pure tone approaches `1/12`.
pub fn chroma_mean(spec: &Spectrogram) -> f64 {
    let classes: Vec<Option<usize>> = spec
        .bin_frequencies()
        .into_iter()
        .map(|f| (f >= CHROMA_FMIN).then(|| pitch_class(f)))
        .collect();

    mean(spec.frames().iter().flat_map(|frame| {
        let mut chroma = [0.0f64; 12];
        for (m, class) in frame.iter().zip(&classes) {
            if let Some(class) = class {
                chroma[*class] += m * m;
            }
        }
        let strongest = chroma.iter().fold(0.0f64, |a, &b| a.max(b));
        if strongest > AMIN {
            chroma.iter_mut().for_each(|c| *c /= strongest);
        }
        chroma
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency: f64, sample_rate: u32, seconds: f64) -> Vec<f32> {
        let count = (seconds * sample_rate as f64) as usize;
        (0..count)
            .map(|i| (2.0 * PI * frequency * i as f64 / sample_rate as f64).sin() as f32 * 0.5)
            .collect()
    }

    #[test]
    fn test_frame_count() {
        let spec = Spectrogram::compute(&vec![0.0; 100], 22050).unwrap();
        assert_eq!(spec.frame_count(), 1);
        assert_eq!(spec.frames()[0].len(), N_FFT / 2 + 1);

        let spec = Spectrogram::compute(&vec![0.0; N_FFT + 3 * HOP_LENGTH], 22050).unwrap();
        assert_eq!(spec.frame_count(), 4);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(Spectrogram::compute(&[], 22050).is_err());
    }

    #[test]
    fn test_centroid_of_pure_tone() {
        let spec = Spectrogram::compute(&sine(440.0, 22050, 1.0), 22050).unwrap();
        let centroid = spectral_centroid(&spec);
        assert!((centroid - 440.0).abs() < 30.0, "centroid {}", centroid);
    }

    #[test]
    fn test_mel_round_trip() {
        for hz in [0.0, 500.0, 1000.0, 4000.0, 11025.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_filterbank_shape() {
        let filters = mel_filterbank(22050, N_MELS);
        assert_eq!(filters.len(), N_MELS);
        assert!(filters.iter().all(|f| f.len() == N_FFT / 2 + 1));
        assert!(filters.iter().all(|f| f.iter().any(|w| *w > 0.0)));
    }

    #[test]
    fn test_dct_of_constant_has_only_dc() {
        let coefficients = dct_ortho(&[1.0; 8], 4);
        assert!((coefficients[0] - 8f64.sqrt()).abs() < 1e-9);
        assert!(coefficients[1..].iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn test_pitch_classes() {
        assert_eq!(pitch_class(440.0), 9);
        assert_eq!(pitch_class(261.63), 0);
        assert_eq!(pitch_class(880.0), 9);
    }

    #[test]
    fn test_pure_tone_chroma_and_contrast() {
        let spec = Spectrogram::compute(&sine(440.0, 22050, 1.0), 22050).unwrap();
        let chroma = chroma_mean(&spec);
        assert!(chroma > 0.0 && chroma < 0.25, "chroma {}", chroma);
        assert!(spectral_contrast(&spec) > 10.0);
    }

    #[test]
    fn test_silence_is_finite() {
        let spec = Spectrogram::compute(&vec![0.0; 4096], 8000).unwrap();
        assert_eq!(spectral_centroid(&spec), 0.0);
        assert!(mfcc_means(&spec, 20).iter().all(|c| c.is_finite()));
        assert!(spectral_contrast(&spec).is_finite());
        assert_eq!(chroma_mean(&spec), 0.0);
    }
}
