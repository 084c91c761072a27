// Binary motion telemetry: frame codec, TCP broadcaster, viewer client

pub mod broadcaster;
pub mod frame;
pub mod viewer;

pub use broadcaster::{TelemetryBroadcaster, FRAME_INTERVAL};
pub use frame::{TelemetryFrame, FIELD_COUNT, FRAME_SIZE, FRAME_TAG};
pub use viewer::{read_frame, watch};
