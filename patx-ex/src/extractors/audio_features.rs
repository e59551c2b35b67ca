//! Audio feature vector
//!
//! One row per audio file, computed from the short-time spectrum of the mono
//! samples:
//! - `chroma`: mean normalized pitch-class energy
//! - `spectral_contrast`: mean octave-band peak/valley contrast, in dB
//! - `spectral_centroid`: mean spectral centroid, in Hz
//! - `mfcc1`..`mfcc20`: per-coefficient MFCC means

use super::formatters::{Column, FeatureTable};
use super::region_features::feature_rows;
use super::spectral::{chroma_mean, mfcc_means, spectral_centroid, spectral_contrast, Spectrogram};
use super::{ArtifactTarget, FeatureMethod, MethodHints, Partial, Row};
use crate::error::{ExtractError, ExtractResult};
use crate::utils::{DecodedAudio, DecodedInput, InputKind};
use patx_common::{DatasetSpec, FeatureOutputOptions, PoolKind};
use std::path::Path;

pub const NAME: &str = "audio-features";
pub const DESCRIPTION: &str = "Extracts pre-defined audio features.";

pub const N_MFCC: usize = 20;

/// Column names in output order
pub fn feature_names() -> Vec<String> {
    let mut names = vec![
        "chroma".to_string(),
        "spectral_contrast".to_string(),
        "spectral_centroid".to_string(),
    ];
    names.extend((1..=N_MFCC).map(|i| format!("mfcc{}", i)));
    names
}

pub struct AudioFeatureVector {
    output: Option<FeatureOutputOptions>,
    table: Option<FeatureTable>,
}

impl AudioFeatureVector {
    pub fn new(output: Option<FeatureOutputOptions>) -> Self {
        Self {
            output,
            table: None,
        }
    }
}

/// Feature vector of one decoded file, in [`feature_names`] order
pub fn compute_audio_features(audio: &DecodedAudio) -> ExtractResult<Vec<(String, f64)>> {
    if audio.samples.is_empty() {
        return Err(ExtractError::method(NAME, "Empty sample buffer"));
    }

    let spec = Spectrogram::compute(&audio.samples, audio.sample_rate)?;

    let mut values = vec![
        chroma_mean(&spec),
        spectral_contrast(&spec),
        spectral_centroid(&spec),
    ];
    values.extend(mfcc_means(&spec, N_MFCC));

    tracing::debug!(
        frames = spec.frame_count(),
        "Audio features: chroma={:.3}, contrast={:.2}dB, centroid={:.1}Hz",
        values[0],
        values[1],
        values[2]
    );

    Ok(feature_names().into_iter().zip(values).collect())
}

impl FeatureMethod for AudioFeatureVector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn input_kind(&self) -> InputKind {
        InputKind::Audio
    }

    fn hints(&self) -> MethodHints {
        MethodHints {
            ignore_split: true,
            batch_pool: PoolKind::Shared,
        }
    }

    fn init(&mut self, datasets: &[DatasetSpec]) -> ExtractResult<()> {
        let output = self.output.as_ref().ok_or_else(|| {
            ExtractError::Config(format!("Method {} requires \"method_options.feature\"", NAME))
        })?;

        let classes = datasets.iter().map(|d| d.class.clone()).collect();
        let mut columns = vec![Column::nominal("class", classes)];
        columns.extend(feature_names().into_iter().map(Column::real));

        self.table = Some(FeatureTable::create(output, columns)?);
        Ok(())
    }

    fn run(&self, input: &DecodedInput, _dataset: &DatasetSpec, path: &Path) -> ExtractResult<Partial> {
        match input {
            DecodedInput::Audio(audio) => compute_audio_features(audio).map(Partial::Features),
            DecodedInput::Image(_) => Err(ExtractError::method(
                NAME,
                format!("{} is not an audio file", path.display()),
            )),
        }
    }

    fn dump(&self, results: &[Partial], dataset: &DatasetSpec) -> ExtractResult<Vec<Row>> {
        feature_rows(NAME, results, dataset)
    }

    fn save(
        &self,
        _target: &ArtifactTarget,
        results: Vec<Partial>,
        dataset: &DatasetSpec,
    ) -> ExtractResult<()> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| ExtractError::method(NAME, "save called before init"))?;
        table.append(&self.dump(&results, dataset)?)
    }
}
