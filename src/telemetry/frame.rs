// Fixed-size binary telemetry frame
//
// | Offset | Size | Field                                  |
// |--------|------|----------------------------------------|
// | 0      | 3    | ASCII tag "CRD", zero-padded           |
// | 3      | 1    | field count (5)                        |
// | 4      | 20   | 5 x f32 LE: x, y, z, feed, extrusion   |
// | 24     | 1000 | reserved, zero                         |

use crate::error::{MonitorError, MonitorResult};
use crate::motion::InterpolatedPoint;
use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const FRAME_SIZE: usize = 1024;
pub const FRAME_TAG: [u8; 3] = *b"CRD";
pub const FIELD_COUNT: u8 = 5;

const HEADER_SIZE: usize = 4;
const PAYLOAD_SIZE: usize = FIELD_COUNT as usize * 4;
const RESERVED_SIZE: usize = FRAME_SIZE - HEADER_SIZE - PAYLOAD_SIZE;

/// One interpolated position as carried on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryFrame {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub feed: f32,
    pub extrusion: f32,
}

impl TelemetryFrame {
    pub fn from_point(point: &InterpolatedPoint, feed: f64) -> Self {
        Self {
            x: point.x as f32,
            y: point.y as f32,
            z: point.z as f32,
            feed: feed as f32,
            extrusion: point.extrusion as f32,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_SIZE);
        buf.put_slice(&FRAME_TAG);
        buf.put_u8(FIELD_COUNT);
        buf.put_f32_le(self.x);
        buf.put_f32_le(self.y);
        buf.put_f32_le(self.z);
        buf.put_f32_le(self.feed);
        buf.put_f32_le(self.extrusion);
        buf.put_bytes(0, RESERVED_SIZE);
        buf.freeze()
    }

    pub fn decode(frame: &[u8]) -> MonitorResult<Self> {
        if frame.len() != FRAME_SIZE {
            return Err(MonitorError::Frame(format!(
                "expected {} bytes, got {}",
                FRAME_SIZE,
                frame.len()
            )));
        }

        let mut buf = frame;
        let mut tag = [0u8; 3];
        buf.copy_to_slice(&mut tag);
        if tag != FRAME_TAG {
            return Err(MonitorError::Frame(format!(
                "unexpected tag {:?}",
                String::from_utf8_lossy(&tag)
            )));
        }

        let count = buf.get_u8();
        if count != FIELD_COUNT {
            return Err(MonitorError::Frame(format!(
                "unexpected field count {}",
                count
            )));
        }

        Ok(Self {
            x: buf.get_f32_le(),
            y: buf.get_f32_le(),
            z: buf.get_f32_le(),
            feed: buf.get_f32_le(),
            extrusion: buf.get_f32_le(),
        })
    }
}
