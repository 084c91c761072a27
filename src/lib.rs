pub mod acoustic;
pub mod cli;
pub mod config;
pub mod error;
pub mod motion;
pub mod pipeline;
pub mod remote;
pub mod safety;
pub mod state;
pub mod tail;
pub mod telemetry;

pub use acoustic::{ClassifierGate, HitCorrelator, HitLog, LogisticClassifier};
pub use config::{ConfigError, MonitorConfig, RemoteMode};
pub use error::{MonitorError, MonitorResult};
pub use motion::{MotionSample, MotionTracker};
pub use pipeline::{AcousticWorker, AcousticStats};
pub use remote::{create_remote, LineSource, RemoteAccess};
pub use safety::{DetectorChannel, OctoPrintController, PrintJobController, PrinterState};
pub use state::{TelemetrySnapshot, TelemetryState};
pub use tail::{Backoff, RemoteTail, TailTarget};
pub use telemetry::{TelemetryBroadcaster, TelemetryFrame};
