// Long-lived workers wiring line sources into the shared state
//
// - motion: tailed command lines -> MotionTracker -> trajectory
// - acoustic: device lines -> correlator -> classifier -> streak/markers -> pause, hit log
// - snapshot saver and status reporter run on fixed intervals
//
// Every worker stops on its cancellation token or when its input closes.

use crate::acoustic::{parse_device_line, ClassifierGate, HitCorrelator, HitLog, HitRecord};
use crate::error::MonitorResult;
use crate::motion::{is_motion_command, MotionTracker};
use crate::safety::{issue_pause, DetectorChannel, PrintJobController};
use crate::state::{TelemetrySnapshot, TelemetryState, VerdictOutcome};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(1);
pub const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Feed tailed command lines into the trajectory. Returns samples appended.
pub async fn run_motion_worker(
    mut lines: mpsc::Receiver<String>,
    state: Arc<TelemetryState>,
    cancel: CancellationToken,
) -> u64 {
    let mut tracker = MotionTracker::new();
    let mut appended = 0u64;

    loop {
        let line = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = lines.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        if !is_motion_command(&line) {
            continue;
        }

        if let Some(sample) = tracker.update(&line) {
            state.append_sample(sample);
            appended += 1;
        }
    }

    info!("Motion worker stopped ({} samples)", appended);
    appended
}

/// Record one verdict and, when the streak fires, pause the job.
///
/// The state lock is released before the controller is called.
pub async fn apply_verdict(
    state: &TelemetryState,
    controller: &dyn PrintJobController,
    channel: DetectorChannel,
    defect: bool,
) -> VerdictOutcome {
    let outcome = state.record_verdict(channel, defect);

    if let Some(marker) = outcome.marker {
        info!(
            "[DEFECT] {} at X={} Y={} Z={}",
            channel.as_str(),
            marker.x,
            marker.y,
            marker.z
        );
    }

    if outcome.pause {
        issue_pause(controller, channel).await;
    }

    outcome
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcousticStats {
    pub lines: u64,
    pub skipped: u64,
    pub hits: u64,
    pub dropped: u64,
    pub defects: u64,
    pub pauses: u64,
}

pub struct AcousticWorker {
    state: Arc<TelemetryState>,
    gate: ClassifierGate,
    controller: Arc<dyn PrintJobController>,
    correlator: HitCorrelator,
    hit_log: Option<HitLog>,
    stats: AcousticStats,
}

impl AcousticWorker {
    pub fn new(
        state: Arc<TelemetryState>,
        gate: ClassifierGate,
        controller: Arc<dyn PrintJobController>,
    ) -> Self {
        Self {
            state,
            gate,
            controller,
            correlator: HitCorrelator::new(),
            hit_log: None,
            stats: AcousticStats::default(),
        }
    }

    pub fn with_correlator(mut self, correlator: HitCorrelator) -> Self {
        self.correlator = correlator;
        self
    }

    pub fn with_hit_log(mut self, hit_log: HitLog) -> Self {
        self.hit_log = Some(hit_log);
        self
    }

    pub async fn run(mut self, mut lines: mpsc::Receiver<String>, cancel: CancellationToken) -> AcousticStats {
        loop {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                line = lines.recv() => match line {
                    Some(line) => line,
                    None => break,
                },
            };

            self.handle_line(&line).await;
        }

        info!(
            "Acoustic worker stopped: {} hits, {} defects, {} pauses, {} dropped, {} pending",
            self.stats.hits,
            self.stats.defects,
            self.stats.pauses,
            self.stats.dropped,
            self.correlator.pending()
        );
        self.stats
    }

    async fn handle_line(&mut self, line: &str) {
        self.stats.lines += 1;

        let records = match parse_device_line(line) {
            Ok(records) => records,
            Err(e) => {
                self.stats.skipped += 1;
                debug!("Skipping device line: {}", e);
                return;
            }
        };

        for record in records {
            if let Some(hit) = self.correlator.push(record) {
                self.handle_hit(hit).await;
            }
        }
        self.state.set_pending_backlog(self.correlator.pending());
    }

    async fn handle_hit(&mut self, hit: HitRecord) {
        self.stats.hits += 1;

        let Some((features, verdict)) = self.gate.classify(&hit) else {
            self.stats.dropped += 1;
            return;
        };

        debug!(
            "Hit trai={} amplitude={} p={:.3} -> {}",
            hit.trai(),
            hit.features.amplitude,
            verdict.probability,
            verdict.class
        );

        let outcome = apply_verdict(
            &self.state,
            self.controller.as_ref(),
            DetectorChannel::Acoustic,
            verdict.is_defect(),
        )
        .await;
        if verdict.is_defect() {
            self.stats.defects += 1;
        }
        if outcome.pause {
            self.stats.pauses += 1;
        }

        if let Some(hit_log) = &self.hit_log {
            if let Err(e) = hit_log.append_async(hit, features, verdict).await {
                warn!("Failed to append hit to {}: {}", hit_log.path().display(), e);
            }
        }
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write the snapshot through a temp file and rename, then refresh `<path>.stamp`.
pub async fn write_snapshot(path: &Path, snapshot: &TelemetrySnapshot) -> MonitorResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = sibling_path(path, ".tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;

    let stamp = sibling_path(path, ".stamp");
    tokio::fs::write(&stamp, snapshot.taken_at.to_rfc3339()).await?;
    Ok(())
}

pub async fn run_snapshot_saver(
    state: Arc<TelemetryState>,
    path: PathBuf,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Saving state snapshots to {}", path.display());

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let snapshot = state.snapshot();
                if let Err(e) = write_snapshot(&path, &snapshot).await {
                    error!("Snapshot save failed: {}", e);
                }
            }
        }
    }

    debug!("Snapshot saver stopped");
}

pub async fn run_status_reporter(state: Arc<TelemetryState>, period: Duration, cancel: CancellationToken) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Utc::now();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                let stats = state.stats();
                info!(
                    "Status: {} samples ({} dropped), {} defect markers, {} clients, {} pending records, up {}s",
                    stats.samples,
                    stats.dropped_samples,
                    stats.markers,
                    stats.connected_clients,
                    stats.pending_backlog,
                    (Utc::now() - started).num_seconds()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::StreakState;

    #[tokio::test]
    async fn test_motion_worker_filters_and_appends() {
        let state = Arc::new(TelemetryState::default());
        let (tx, rx) = mpsc::channel(16);

        for line in [
            "Send: N1 G28*18",
            "Send: N2 G1 Z0.2 F1200*50",
            "Send: N3 G1 X10 Y10*51",
            "Recv: ok",
            "Send: N4 M104 S200*40",
            "Send: N5 G1 X20 E1.5*60",
            "Send: N6 G21*20",
            "Send: N7 G2 X30 Y15 I5 J0*70",
        ] {
            tx.send(line.to_string()).await.unwrap();
        }
        drop(tx);

        let appended = run_motion_worker(rx, state.clone(), CancellationToken::new()).await;
        assert_eq!(appended, 3);

        // The arc lands at its end point; I/J offsets are not positions
        let last = state.last_sample().unwrap();
        assert_eq!((last.x, last.y, last.z), (30.0, 15.0, 0.2));
        assert_eq!((last.feed, last.extrusion), (1200.0, 1.5));
    }

    #[tokio::test]
    async fn test_snapshot_written_atomically_with_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots").join("state.json");

        let state = TelemetryState::default();
        state.record_verdict(DetectorChannel::Visual, true);
        write_snapshot(&path, &state.snapshot()).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(json["samples"].as_array().unwrap().is_empty());
        assert_eq!(json["streaks"].as_array().unwrap().len(), 2);

        let stamp = std::fs::read_to_string(sibling_path(&path, ".stamp")).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
        assert!(!sibling_path(&path, ".tmp").exists());

        assert_eq!(
            state.record_verdict(DetectorChannel::Visual, true).streak,
            StreakState::Streaking(2)
        );
    }
}
