//! Classifier glue
//!
//! Connects the extracted feature tables to a supervised classifier supplied by
//! the caller: loading a training set from a feature CSV, scoring a fitted model
//! with a confusion matrix, and predicting the class of a single image from its
//! region features. No learning algorithm lives here.

use crate::error::{ExtractError, ExtractResult};
use crate::extractors::{FeatureMethod, RegionColorFeature};
use crate::utils::{DecodedInput, InputKind, MediaDecoder};
use patx_common::{ExecutorConfig, FeatureOutputOptions, OutputFormat, RunConfig};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Supervised classifier contract
pub trait Classifier {
    fn fit(&mut self, samples: &[Vec<f64>], labels: &[String]) -> ExtractResult<()>;

    fn predict(&self, samples: &[Vec<f64>]) -> ExtractResult<Vec<String>>;

    /// Per-sample probabilities, columns in [`Classifier::classes`] order
    fn predict_proba(&self, samples: &[Vec<f64>]) -> ExtractResult<Vec<Vec<f64>>>;

    fn classes(&self) -> &[String];
}

/// Labeled feature vectors
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    pub feature_names: Vec<String>,
    pub samples: Vec<Vec<f64>>,
    pub labels: Vec<String>,
}

impl TrainingSet {
    /// Load a feature CSV: header row, then label followed by numeric columns
    pub fn from_csv(path: &Path) -> ExtractResult<Self> {
        debug!(path = %path.display(), "Loading training set");
        let content = std::fs::read_to_string(path)?;
        Self::parse_csv(&content)
    }

    pub fn parse_csv(content: &str) -> ExtractResult<Self> {
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());

        let header = lines
            .next()
            .ok_or_else(|| ExtractError::Config("Training set is empty".to_string()))?;
        let feature_names: Vec<String> = split_csv_line(header).into_iter().skip(1).collect();

        let mut samples = Vec::new();
        let mut labels = Vec::new();
        for (index, line) in lines.enumerate() {
            let mut fields = split_csv_line(line).into_iter();
            let label = fields.next().unwrap_or_default();
            let values = fields
                .map(|field| {
                    field.trim().parse::<f64>().map_err(|e| {
                        ExtractError::Config(format!(
                            "Invalid value \"{}\" in training row #{}: {}",
                            field, index, e
                        ))
                    })
                })
                .collect::<ExtractResult<Vec<f64>>>()?;

            if values.len() != feature_names.len() {
                return Err(ExtractError::Config(format!(
                    "Training row #{} has {} values, expected {}",
                    index,
                    values.len(),
                    feature_names.len()
                )));
            }
            labels.push(label);
            samples.push(values);
        }

        Ok(Self {
            feature_names,
            samples,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Counts of true label (rows) against predicted label (columns)
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn compute(y_true: &[String], y_pred: &[String], labels: &[String]) -> ExtractResult<Self> {
        if y_true.len() != y_pred.len() {
            return Err(ExtractError::Config(format!(
                "Cannot compare {} labels with {} predictions",
                y_true.len(),
                y_pred.len()
            )));
        }

        let position = |label: &str| labels.iter().position(|l| l == label);
        let mut counts = vec![vec![0usize; labels.len()]; labels.len()];
        for (truth, predicted) in y_true.iter().zip(y_pred) {
            if let (Some(row), Some(column)) = (position(truth), position(predicted)) {
                counts[row][column] += 1;
            }
        }

        Ok(Self {
            labels: labels.to_vec(),
            counts,
        })
    }

    /// Fraction of samples on the diagonal
    pub fn accuracy(&self) -> f64 {
        let total: usize = self.counts.iter().flatten().sum();
        if total == 0 {
            return 0.0;
        }
        let correct: usize = (0..self.labels.len()).map(|i| self.counts[i][i]).sum();
        correct as f64 / total as f64
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label")?;
        for index in 0..self.labels.len() {
            write!(f, "\t{}", index)?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(&self.counts) {
            write!(f, "{}", label)?;
            for count in row {
                write!(f, "\t{}", count)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Fit `classifier` on the training set and score it on the same data
pub fn train(classifier: &mut dyn Classifier, training: &TrainingSet) -> ExtractResult<ConfusionMatrix> {
    info!(samples = training.len(), "starting training...");
    classifier.fit(&training.samples, &training.labels)?;

    let predicted = classifier.predict(&training.samples)?;
    ConfusionMatrix::compute(&training.labels, &predicted, classifier.classes())
}

/// Region features and class probabilities of one image
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub features: Vec<(String, f64)>,
    pub probabilities: Vec<(String, f64)>,
}

/// Extract region features from one image and ask the classifier for probabilities
///
/// Features are computed with the run's feature layout; nothing is written to disk.
pub fn predict_image(
    config: &RunConfig,
    classifier: &dyn Classifier,
    decoder: &dyn MediaDecoder,
    image_path: &Path,
    max_workers: Option<usize>,
) -> ExtractResult<Prediction> {
    let output = FeatureOutputOptions {
        output: config
            .method_options
            .feature
            .as_ref()
            .map(|f| f.output.clone())
            .unwrap_or_else(|| PathBuf::from("prediction")),
        format: OutputFormat::Null,
        relation_name: None,
    };

    let mut extractor = RegionColorFeature::new(Some(output));
    extractor.init(&config.datasets)?;

    let grid = match decoder
        .decode(InputKind::Image, image_path)
        .map_err(|e| ExtractError::Decode {
            path: image_path.to_path_buf(),
            reason: format!("{:#}", e),
        })? {
        DecodedInput::Image(grid) => grid,
        DecodedInput::Audio(_) => {
            return Err(ExtractError::method(
                extractor.name(),
                format!("{} is not an image", image_path.display()),
            ))
        }
    };

    let executor = ExecutorConfig {
        max_workers,
        pool: None,
    };
    let features = extractor.extract_features(&grid, &executor)?;

    let sample = vec![features.iter().map(|(_, v)| *v).collect::<Vec<f64>>()];
    let probabilities = classifier
        .predict_proba(&sample)?
        .into_iter()
        .next()
        .unwrap_or_default();

    Ok(Prediction {
        features,
        probabilities: classifier
            .classes()
            .iter()
            .cloned()
            .zip(probabilities)
            .collect(),
    })
}
