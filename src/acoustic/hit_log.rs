// Append-only tab-separated log of classified hits

use super::classifier::{FeatureVector, Verdict};
use super::records::HitRecord;
use crate::error::{MonitorError, MonitorResult};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub const HIT_LOG_COLUMNS: [&str; 12] = [
    "timestamp",
    "trai",
    "amplitude",
    "duration",
    "energy",
    "rms",
    "rise_time",
    "counts",
    "samples",
    "waveform",
    "class",
    "probability",
];

#[derive(Debug, Serialize)]
struct HitRow {
    timestamp: f64,
    trai: u64,
    amplitude: f64,
    duration: f64,
    energy: f64,
    rms: f64,
    rise_time: f64,
    counts: u64,
    samples: usize,
    waveform: String,
    class: String,
    probability: f64,
}

#[derive(Debug, Clone)]
pub struct HitLog {
    path: PathBuf,
}

impl HitLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `append` on the blocking thread pool, for callers on async workers.
    pub async fn append_async(
        &self,
        hit: HitRecord,
        features: FeatureVector,
        verdict: Verdict,
    ) -> MonitorResult<()> {
        let log = self.clone();
        tokio::task::spawn_blocking(move || log.append(&hit, &features, &verdict))
            .await
            .map_err(|e| MonitorError::Io(io::Error::other(e)))?
    }

    /// Append one row, writing the header first if the file is new or empty.
    pub fn append(
        &self,
        hit: &HitRecord,
        features: &FeatureVector,
        verdict: &Verdict,
    ) -> MonitorResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(file);

        if needs_header {
            writer.write_record(HIT_LOG_COLUMNS).map_err(csv_error)?;
        }

        let waveform = hit
            .waveform
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");

        writer
            .serialize(HitRow {
                timestamp: hit.features.time,
                trai: hit.trai(),
                amplitude: hit.features.amplitude,
                duration: hit.features.duration,
                energy: hit.features.energy,
                rms: features.rms,
                rise_time: hit.features.rise_time,
                counts: hit.features.counts,
                samples: hit.samples,
                waveform,
                class: verdict.class.to_string(),
                probability: verdict.probability,
            })
            .map_err(csv_error)?;
        writer.flush()?;
        Ok(())
    }
}

fn csv_error(e: csv::Error) -> MonitorError {
    MonitorError::Io(io::Error::other(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acoustic::records::AeRecord;

    fn hit(trai: u64) -> HitRecord {
        HitRecord {
            features: AeRecord {
                trai,
                time: 12.5,
                amplitude: 0.03,
                duration: 0.002,
                energy: 4.0,
                rms: None,
                rise_time: 0.0003,
                counts: 6,
            },
            samples: 3,
            waveform: vec![0.5, -0.25, 1.0],
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = HitLog::new(dir.path().join("AE_data").join("hits.tsv"));

        for trai in 1..=2 {
            let hit = hit(trai);
            let features = FeatureVector::from_hit(&hit);
            let verdict = Verdict::from_probability(0.2);
            log.append(&hit, &features, &verdict).unwrap();
        }

        let contents = fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HIT_LOG_COLUMNS.join("\t"));

        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields.len(), 12);
        assert_eq!(fields[1], "1");
        assert_eq!(fields[9], "0.5,-0.25,1");
        assert_eq!(fields[10], "defected");
        assert_eq!(fields[11], "0.2");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_async_append_keeps_row_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = HitLog::new(dir.path().join("hits.tsv"));

        for trai in [7, 3, 9] {
            let hit = hit(trai);
            let features = FeatureVector::from_hit(&hit);
            let verdict = Verdict::from_probability(0.9);
            log.append_async(hit, features, verdict).await.unwrap();
        }

        let contents = tokio::fs::read_to_string(log.path()).await.unwrap();
        let trais: Vec<&str> = contents
            .lines()
            .skip(1)
            .map(|line| line.split('\t').nth(1).unwrap())
            .collect();
        assert_eq!(trais, vec!["7", "3", "9"]);
    }
}
