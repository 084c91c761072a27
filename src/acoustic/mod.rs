// Acoustic-emission hits: device records, correlation, classification, logging

pub mod classifier;
pub mod correlator;
pub mod hit_log;
pub mod records;

pub use classifier::{
    waveform_rms, Classifier, ClassifierGate, FeatureVector, HitClass, LogisticClassifier, Verdict,
};
pub use correlator::HitCorrelator;
pub use hit_log::{HitLog, HIT_LOG_COLUMNS};
pub use records::{parse_device_line, AeRecord, DeviceRecord, HitRecord, TrRecord};
