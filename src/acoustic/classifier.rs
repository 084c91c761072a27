// Hit classification
//
// The model artifact is produced offline and only evaluated here. A failed
// evaluation drops the hit: no verdict, nothing recorded.

use super::records::HitRecord;
use crate::error::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Feature names in the order `FeatureVector::values` returns them
pub const FEATURE_NAMES: [&str; 6] = ["amplitude", "duration", "energy", "rms", "rise_time", "counts"];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureVector {
    pub amplitude: f64,
    pub duration: f64,
    pub energy: f64,
    pub rms: f64,
    pub rise_time: f64,
    pub counts: f64,
}

impl FeatureVector {
    /// Reported rms, or the root mean square of the waveform (0 when empty).
    pub fn from_hit(hit: &HitRecord) -> Self {
        let rms = hit
            .features
            .rms
            .unwrap_or_else(|| waveform_rms(&hit.waveform));

        Self {
            amplitude: hit.features.amplitude,
            duration: hit.features.duration,
            energy: hit.features.energy,
            rms,
            rise_time: hit.features.rise_time,
            counts: hit.features.counts as f64,
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "amplitude" => Some(self.amplitude),
            "duration" => Some(self.duration),
            "energy" => Some(self.energy),
            "rms" => Some(self.rms),
            "rise_time" => Some(self.rise_time),
            "counts" => Some(self.counts),
            _ => None,
        }
    }

    pub fn values(&self) -> [f64; 6] {
        [
            self.amplitude,
            self.duration,
            self.energy,
            self.rms,
            self.rise_time,
            self.counts,
        ]
    }
}

pub fn waveform_rms(waveform: &[f64]) -> f64 {
    if waveform.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = waveform.iter().map(|v| v * v).sum();
    (sum_sq / waveform.len() as f64).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HitClass {
    Defected,
    NonDefected,
}

impl fmt::Display for HitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HitClass::Defected => write!(f, "defected"),
            HitClass::NonDefected => write!(f, "non-defected"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    pub class: HitClass,
    pub probability: f64,
}

impl Verdict {
    /// `round(p + 0.9) == 1` decides the class. Kept exactly as deployed: for
    /// p in [0, 1] this reads as defect when p < 0.6.
    pub fn from_probability(probability: f64) -> Self {
        let class = if (probability + 0.9).round() == 1.0 {
            HitClass::Defected
        } else {
            HitClass::NonDefected
        };
        Self { class, probability }
    }

    pub fn is_defect(&self) -> bool {
        self.class == HitClass::Defected
    }
}

/// Pre-trained binary model
pub trait Classifier: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> MonitorResult<f64>;
}

/// Standardized logistic regression stored as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticClassifier {
    pub features: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
    pub weights: Vec<f64>,
    pub bias: f64,
}

impl LogisticClassifier {
    pub fn load(path: &Path) -> MonitorResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::InvalidConfig(format!("cannot read model {}: {}", path.display(), e))
        })?;
        let model: Self = serde_json::from_str(&raw)?;
        model.validate()?;

        info!(
            "Loaded classifier from {} ({} features)",
            path.display(),
            model.features.len()
        );
        Ok(model)
    }

    pub fn validate(&self) -> MonitorResult<()> {
        let n = self.features.len();
        if n == 0 || self.mean.len() != n || self.scale.len() != n || self.weights.len() != n {
            return Err(MonitorError::InvalidConfig(format!(
                "model shape mismatch: {} features, {} means, {} scales, {} weights",
                n,
                self.mean.len(),
                self.scale.len(),
                self.weights.len()
            )));
        }

        if let Some(unknown) = self
            .features
            .iter()
            .find(|name| !FEATURE_NAMES.contains(&name.as_str()))
        {
            return Err(MonitorError::InvalidConfig(format!(
                "unknown model feature '{}'",
                unknown
            )));
        }
        Ok(())
    }
}

impl Classifier for LogisticClassifier {
    fn predict(&self, features: &FeatureVector) -> MonitorResult<f64> {
        let mut z = self.bias;
        for (i, name) in self.features.iter().enumerate() {
            let value = features
                .get(name)
                .ok_or_else(|| MonitorError::Inference(format!("missing feature '{}'", name)))?;
            if !value.is_finite() {
                return Err(MonitorError::Inference(format!(
                    "non-finite feature '{}': {}",
                    name, value
                )));
            }

            let scale = if self.scale[i] == 0.0 { 1.0 } else { self.scale[i] };
            z += self.weights[i] * (value - self.mean[i]) / scale;
        }

        let probability = 1.0 / (1.0 + (-z).exp());
        if !probability.is_finite() {
            return Err(MonitorError::Inference(format!(
                "non-finite model output for z={}",
                z
            )));
        }
        Ok(probability)
    }
}

/// Wraps a classifier so failures turn into dropped hits
pub struct ClassifierGate {
    model: Box<dyn Classifier>,
}

impl ClassifierGate {
    pub fn new(model: Box<dyn Classifier>) -> Self {
        Self { model }
    }

    pub fn classify(&self, hit: &HitRecord) -> Option<(FeatureVector, Verdict)> {
        let features = FeatureVector::from_hit(hit);
        match self.model.predict(&features) {
            Ok(probability) => Some((features, Verdict::from_probability(probability))),
            Err(e) => {
                warn!("Dropping hit trai={}: {}", hit.trai(), e);
                None
            }
        }
    }
}
