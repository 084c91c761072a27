use crate::error::{MonitorError, MonitorResult};
use serde::{Deserialize, Serialize};

/// Scalar hit features reported by the sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AeRecord {
    /// Transient record id linking features to their waveform
    pub trai: u64,
    /// Device time in seconds
    #[serde(default)]
    pub time: f64,
    #[serde(default)]
    pub amplitude: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub energy: f64,
    /// Filled from the waveform when the device does not report it
    #[serde(default)]
    pub rms: Option<f64>,
    #[serde(default)]
    pub rise_time: f64,
    #[serde(default)]
    pub counts: u64,
}

/// Raw waveform of one transient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrRecord {
    pub trai: u64,
    #[serde(default)]
    pub samples: usize,
    #[serde(alias = "data")]
    pub waveform: Vec<f64>,
}

/// Element of the device stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceRecord {
    Ae(AeRecord),
    Tr(TrRecord),
}

impl DeviceRecord {
    pub fn trai(&self) -> u64 {
        match self {
            DeviceRecord::Ae(ae) => ae.trai,
            DeviceRecord::Tr(tr) => tr.trai,
        }
    }
}

/// Features and waveform of one complete hit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HitRecord {
    #[serde(flatten)]
    pub features: AeRecord,
    pub samples: usize,
    pub waveform: Vec<f64>,
}

impl HitRecord {
    pub fn merge(features: AeRecord, transient: TrRecord) -> Self {
        let samples = if transient.samples > 0 {
            transient.samples
        } else {
            transient.waveform.len()
        };

        Self {
            features,
            samples,
            waveform: transient.waveform,
        }
    }

    pub fn trai(&self) -> u64 {
        self.features.trai
    }
}

/// A hit the acquisition side already joined: AE fields plus `samples`/`data`
#[derive(Debug, Deserialize)]
struct MergedHit {
    #[serde(flatten)]
    features: AeRecord,
    #[serde(default)]
    samples: usize,
    data: Vec<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeviceLine {
    Tagged(DeviceRecord),
    Merged(MergedHit),
}

/// Decode one line of device output.
///
/// Tagged lines give one record. Pre-merged hits are split back into their AE
/// and TR halves so they flow through the correlator like any other pair.
pub fn parse_device_line(line: &str) -> MonitorResult<Vec<DeviceRecord>> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return Err(MonitorError::Parse(format!("not a device record: {}", trimmed)));
    }

    let parsed: DeviceLine = serde_json::from_str(trimmed)
        .map_err(|e| MonitorError::Parse(format!("device record: {}", e)))?;

    Ok(match parsed {
        DeviceLine::Tagged(record) => vec![record],
        DeviceLine::Merged(hit) => {
            let trai = hit.features.trai;
            vec![
                DeviceRecord::Ae(hit.features),
                DeviceRecord::Tr(TrRecord {
                    trai,
                    samples: hit.samples,
                    waveform: hit.data,
                }),
            ]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_records() {
        let ae = parse_device_line(
            r#"{"type":"ae","trai":7,"time":1.25,"amplitude":0.012,"duration":0.0004,"energy":3.1,"rise_time":0.00002,"counts":12,"channel":1}"#,
        )
        .unwrap();
        match &ae[..] {
            [DeviceRecord::Ae(record)] => {
                assert_eq!(record.trai, 7);
                assert_eq!(record.counts, 12);
                assert_eq!(record.rms, None);
            }
            other => panic!("unexpected {:?}", other),
        }

        let tr = parse_device_line(r#"{"type":"tr","trai":7,"samples":3,"data":[0.1,-0.2,0.3]}"#)
            .unwrap();
        match &tr[..] {
            [DeviceRecord::Tr(record)] => {
                assert_eq!(record.samples, 3);
                assert_eq!(record.waveform, vec![0.1, -0.2, 0.3]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_merged_hit_is_split() {
        let records = parse_device_line(
            r#"{"trai":9,"time":2.0,"amplitude":0.5,"duration":0.1,"energy":1.0,"rms":0.02,"rise_time":0.01,"counts":4,"samples":2,"data":[1.0,2.0]}"#,
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.trai() == 9));
        assert!(matches!(&records[0], DeviceRecord::Ae(ae) if ae.rms == Some(0.02)));
        assert!(matches!(&records[1], DeviceRecord::Tr(tr) if tr.waveform == vec![1.0, 2.0]));
    }

    #[test]
    fn test_banner_and_garbage_rejected() {
        assert!(parse_device_line("[Setup Complete] Waiting for AE hits...").is_err());
        assert!(parse_device_line(r#"{"trai": "abc"}"#).is_err());
        assert!(parse_device_line("").is_err());
    }

    #[test]
    fn test_merge_fills_sample_count() {
        let features = AeRecord {
            trai: 1,
            time: 0.0,
            amplitude: 0.0,
            duration: 0.0,
            energy: 0.0,
            rms: None,
            rise_time: 0.0,
            counts: 0,
        };
        let transient = TrRecord {
            trai: 1,
            samples: 0,
            waveform: vec![0.0; 4],
        };
        assert_eq!(HitRecord::merge(features, transient).samples, 4);
    }
}
