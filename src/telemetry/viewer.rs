// Minimal telemetry client: connect, decode frames, log positions

use super::frame::{TelemetryFrame, FRAME_SIZE};
use crate::error::{MonitorError, MonitorResult};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const LOG_EVERY: u64 = 50;

/// Read exactly one frame. `Ok(None)` on a clean close at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> MonitorResult<Option<TelemetryFrame>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_SIZE];
    match reader.read_exact(&mut buf).await {
        Ok(_) => TelemetryFrame::decode(&buf).map(Some),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Follow a broadcaster until it closes or `cancel` fires. Returns frames read.
pub async fn watch(addr: &str, cancel: CancellationToken) -> MonitorResult<u64> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| MonitorError::Connection(format!("failed to connect to {}: {}", addr, e)))?;
    info!("Connected to telemetry at {}", addr);

    let mut received = 0u64;
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = read_frame(&mut stream) => frame?,
        };

        let Some(frame) = frame else {
            info!("Telemetry stream closed by peer");
            break;
        };
        received += 1;

        if received % LOG_EVERY == 1 {
            info!(
                "#{} x={:.3} y={:.3} z={:.3} feed={:.0} e={:.4}",
                received, frame.x, frame.y, frame.z, frame.feed, frame.extrusion
            );
        } else {
            debug!(
                "#{} x={:.3} y={:.3} z={:.3}",
                received, frame.x, frame.y, frame.z
            );
        }
    }

    Ok(received)
}
