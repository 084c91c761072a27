// TCP fan-out of interpolated motion frames
//
// Every accepted client gets its own task and its own cursor over the shared
// trajectory. A client only ever sees samples appended after it connected; the
// newest sample at connect time is used as the starting point of its first
// segment. A failed write ends that client's task and nothing else.

use super::frame::TelemetryFrame;
use crate::error::{MonitorError, MonitorResult};
use crate::motion::{interpolate_segment, MotionSample};
use crate::state::TelemetryState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Delay between two consecutive frames on one connection
pub const FRAME_INTERVAL: Duration = Duration::from_millis(10);

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

pub struct TelemetryBroadcaster {
    state: Arc<TelemetryState>,
    frame_interval: Duration,
}

impl TelemetryBroadcaster {
    pub fn new(state: Arc<TelemetryState>) -> Self {
        Self {
            state,
            frame_interval: FRAME_INTERVAL,
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub async fn bind(addr: &str) -> MonitorResult<TcpListener> {
        TcpListener::bind(addr)
            .await
            .map_err(|e| MonitorError::Connection(format!("failed to bind {}: {}", addr, e)))
    }

    /// Accept clients until cancelled.
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) {
        match listener.local_addr() {
            Ok(addr) => info!("Telemetry broadcaster listening on {}", addr),
            Err(e) => warn!("Telemetry broadcaster listening (address unavailable: {})", e),
        }

        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let state = self.state.clone();
                    let interval = self.frame_interval;
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        handle_client(stream, peer, state, interval, cancel).await;
                    });
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = sleep(ACCEPT_RETRY_DELAY) => {}
                    }
                }
            }
        }

        info!("Telemetry broadcaster stopped");
    }
}

async fn handle_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    state: Arc<TelemetryState>,
    interval: Duration,
    cancel: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("[{}] set_nodelay failed: {}", peer, e);
    }

    let (cursor, previous) = state.resume_point();
    let clients = state.client_connected();
    info!("Telemetry client connected: {} ({} connected)", peer, clients);

    match stream_frames(&mut stream, &state, cursor, previous, interval, &cancel).await {
        Ok(sent) => debug!("[{}] stream ended after {} frames", peer, sent),
        Err(e) => warn!("[{}] client dropped: {}", peer, e),
    }

    let clients = state.client_disconnected();
    info!("Telemetry client disconnected: {} ({} connected)", peer, clients);
}

/// Write frames for every sample after `cursor` until cancelled or the peer fails.
async fn stream_frames(
    stream: &mut TcpStream,
    state: &TelemetryState,
    mut cursor: u64,
    mut previous: Option<MotionSample>,
    interval: Duration,
    cancel: &CancellationToken,
) -> MonitorResult<u64> {
    let mut sent = 0u64;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(sent),
            _ = state.wait_for_samples(cursor) => {}
        }

        let (samples, next) = state.samples_since(cursor);
        cursor = next;

        for current in samples {
            // Without an origin the segment degenerates to `current` alone
            let origin = previous.as_ref().unwrap_or(&current);

            for point in interpolate_segment(origin, &current) {
                let frame = TelemetryFrame::from_point(&point, current.feed).encode();

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(sent),
                    written = stream.write_all(&frame) => written?,
                }
                sent += 1;

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(sent),
                    _ = sleep(interval) => {}
                }
            }

            previous = Some(current);
        }
    }
}
