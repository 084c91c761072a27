// Shared telemetry state
//
// The trajectory log, the defect-marker set and the per-channel defect streaks
// live behind one exclusive lock. Readers that go on to do slow I/O copy what
// they need and release the lock first.

use crate::motion::MotionSample;
use crate::safety::{DefectStreak, DetectorChannel, StreakState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;
use tracing::debug;

/// Position flagged by a defect verdict
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DefectMarker {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl DefectMarker {
    fn key(&self) -> [u64; 3] {
        [self.x.to_bits(), self.y.to_bits(), self.z.to_bits()]
    }
}

/// Result of feeding one verdict through the state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerdictOutcome {
    /// The streak just reached its threshold; the caller issues the pause
    pub pause: bool,
    /// Marker added by this verdict, if any
    pub marker: Option<DefectMarker>,
    pub streak: StreakState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStreak {
    pub channel: DetectorChannel,
    pub count: u32,
    pub threshold: u32,
}

/// Copy of the whole state taken under the lock
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub taken_at: DateTime<Utc>,
    pub samples: Vec<MotionSample>,
    pub dropped_samples: u64,
    pub markers: Vec<DefectMarker>,
    pub streaks: Vec<ChannelStreak>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateStats {
    pub samples: usize,
    pub dropped_samples: u64,
    pub markers: usize,
    pub connected_clients: usize,
    pub pending_backlog: usize,
}

struct Inner {
    samples: VecDeque<MotionSample>,
    /// Sequence number of `samples[0]`
    first_seq: u64,
    retention: Option<usize>,
    dropped: u64,
    markers: Vec<DefectMarker>,
    marker_keys: HashSet<[u64; 3]>,
    streaks: HashMap<DetectorChannel, DefectStreak>,
}

impl Inner {
    fn end_seq(&self) -> u64 {
        self.first_seq + self.samples.len() as u64
    }
}

pub struct TelemetryState {
    inner: Mutex<Inner>,
    appended: Notify,
    connected_clients: AtomicUsize,
    pending_backlog: AtomicUsize,
}

impl TelemetryState {
    /// `retention` caps the trajectory length; `None` keeps every sample.
    pub fn new(retention: Option<usize>) -> Self {
        let streaks = [DetectorChannel::Acoustic, DetectorChannel::Visual]
            .into_iter()
            .map(|channel| (channel, DefectStreak::new(channel.default_threshold())))
            .collect();

        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                first_seq: 0,
                retention: retention.filter(|&n| n > 0),
                dropped: 0,
                markers: Vec::new(),
                marker_keys: HashSet::new(),
                streaks,
            }),
            appended: Notify::new(),
            connected_clients: AtomicUsize::new(0),
            pending_backlog: AtomicUsize::new(0),
        }
    }

    pub fn with_threshold(self, channel: DetectorChannel, threshold: u32) -> Self {
        self.inner
            .lock()
            .streaks
            .insert(channel, DefectStreak::new(threshold));
        self
    }

    /// Append one sample and wake waiting readers. Returns its sequence number.
    pub fn append_sample(&self, sample: MotionSample) -> u64 {
        let seq = {
            let mut inner = self.inner.lock();
            let seq = inner.end_seq();
            inner.samples.push_back(sample);

            if let Some(limit) = inner.retention {
                while inner.samples.len() > limit {
                    inner.samples.pop_front();
                    inner.first_seq += 1;
                    inner.dropped += 1;
                }
            }
            seq
        };

        self.appended.notify_waiters();
        seq
    }

    /// Cursor positioned after the newest sample
    pub fn end_cursor(&self) -> u64 {
        self.inner.lock().end_seq()
    }

    pub fn last_sample(&self) -> Option<MotionSample> {
        self.inner.lock().samples.back().copied()
    }

    /// End cursor together with the sample right before it, read atomically
    pub fn resume_point(&self) -> (u64, Option<MotionSample>) {
        let inner = self.inner.lock();
        (inner.end_seq(), inner.samples.back().copied())
    }

    /// Copy every sample at or after `cursor` and return the cursor to resume from.
    ///
    /// A cursor that fell behind the retention window resumes at the oldest
    /// retained sample.
    pub fn samples_since(&self, cursor: u64) -> (Vec<MotionSample>, u64) {
        let inner = self.inner.lock();
        let end = inner.end_seq();
        if cursor >= end {
            return (Vec::new(), end);
        }

        let start = cursor.saturating_sub(inner.first_seq) as usize;
        let samples = inner.samples.iter().skip(start).copied().collect();
        (samples, end)
    }

    /// Resolve once a sample beyond `cursor` exists.
    pub async fn wait_for_samples(&self, cursor: u64) {
        loop {
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.end_cursor() > cursor {
                return;
            }
            notified.await;
        }
    }

    /// Feed one verdict for `channel`.
    ///
    /// Marker insertion and the streak transition happen under the same lock.
    /// The pause itself is left to the caller so it runs without the lock held.
    pub fn record_verdict(&self, channel: DetectorChannel, defect: bool) -> VerdictOutcome {
        let mut inner = self.inner.lock();

        let mut marker = None;
        if defect {
            if let Some(last) = inner.samples.back() {
                let candidate = DefectMarker {
                    x: last.x,
                    y: last.y,
                    z: last.z,
                };
                if inner.marker_keys.insert(candidate.key()) {
                    inner.markers.push(candidate);
                    marker = Some(candidate);
                }
            }
        }

        let streak = inner
            .streaks
            .entry(channel)
            .or_insert_with(|| DefectStreak::new(channel.default_threshold()));
        let pause = streak.observe(defect);
        let state = streak.state();

        debug!(
            "{} verdict defect={} -> {:?} (pause={})",
            channel.as_str(),
            defect,
            state,
            pause
        );

        VerdictOutcome {
            pause,
            marker,
            streak: state,
        }
    }

    pub fn markers(&self) -> Vec<DefectMarker> {
        self.inner.lock().markers.clone()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let inner = self.inner.lock();
        let mut streaks: Vec<ChannelStreak> = inner
            .streaks
            .iter()
            .map(|(channel, streak)| ChannelStreak {
                channel: *channel,
                count: streak.count(),
                threshold: streak.threshold(),
            })
            .collect();
        streaks.sort_by_key(|s| s.channel.as_str());

        TelemetrySnapshot {
            taken_at: Utc::now(),
            samples: inner.samples.iter().copied().collect(),
            dropped_samples: inner.dropped,
            markers: inner.markers.clone(),
            streaks,
        }
    }

    pub fn stats(&self) -> StateStats {
        let (samples, dropped_samples, markers) = {
            let inner = self.inner.lock();
            (inner.samples.len(), inner.dropped, inner.markers.len())
        };

        StateStats {
            samples,
            dropped_samples,
            markers,
            connected_clients: self.connected_clients.load(Ordering::Relaxed),
            pending_backlog: self.pending_backlog.load(Ordering::Relaxed),
        }
    }

    pub fn client_connected(&self) -> usize {
        self.connected_clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn client_disconnected(&self) -> usize {
        self.connected_clients
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1)
    }

    pub fn set_pending_backlog(&self, pending: usize) {
        self.pending_backlog.store(pending, Ordering::Relaxed);
    }
}

impl Default for TelemetryState {
    fn default() -> Self {
        Self::new(None)
    }
}
