use std::env;
use std::path::PathBuf;

use crate::safety::DetectorChannel;

/// Where remote sessions are opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMode {
    /// Through the system `ssh` client
    Ssh,
    /// On this machine (bench setups, replayed logs)
    Local,
}

/// Monitor configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Device host running the job controller and the acquisition process
    pub printer_host: String,
    /// Remote login user
    pub ssh_user: String,
    /// Remote shell port
    pub ssh_port: u16,
    /// Optional identity file for the remote shell
    pub ssh_identity: Option<PathBuf>,
    /// Remote session backend
    pub remote_mode: RemoteMode,
    /// Append-only log carrying the machine's motion commands
    pub motion_log_path: String,
    /// Command that runs the acoustic acquisition on the device
    pub acquisition_command: String,
    /// Telemetry listening endpoint (host:port)
    pub telemetry_bind_addr: String,
    /// Job-controller base URL
    pub octoprint_url: String,
    /// Job-controller API key
    pub octoprint_api_key: String,
    /// Pre-trained classifier artifact
    pub model_path: PathBuf,
    /// Correlated-hit log
    pub hit_log_path: PathBuf,
    /// Optional periodic snapshot of the shared telemetry state
    pub snapshot_path: Option<PathBuf>,
    /// Consecutive acoustic defects that trigger a pause
    pub acoustic_streak_threshold: u32,
    /// Consecutive visual defects that trigger a pause
    pub visual_streak_threshold: u32,
    /// Maximum retained motion samples (None = unbounded)
    pub trajectory_retention: Option<usize>,
    /// Maximum pending records per correlator side (None = unbounded)
    pub pending_retention: Option<usize>,
}

impl MonitorConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let octoprint_api_key = env::var("OCTOPRINT_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OCTOPRINT_API_KEY".to_string()))?;

        let printer_host = env::var("PRINTER_HOST").unwrap_or_else(|_| "192.168.1.20".to_string());

        let remote_mode = match env::var("REMOTE_MODE")
            .unwrap_or_else(|_| "ssh".to_string())
            .to_lowercase()
            .as_str()
        {
            "ssh" => RemoteMode::Ssh,
            "local" => RemoteMode::Local,
            other => {
                return Err(ConfigError::InvalidValue(format!(
                    "REMOTE_MODE must be 'ssh' or 'local', got '{}'",
                    other
                )))
            }
        };

        let config = Self {
            ssh_user: env::var("SSH_USER").unwrap_or_else(|_| "pi".to_string()),
            ssh_port: env::var("SSH_PORT")
                .unwrap_or_else(|_| "22".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            ssh_identity: env::var("SSH_IDENTITY").ok().map(PathBuf::from),
            remote_mode,
            motion_log_path: env::var("MOTION_LOG_PATH")
                .unwrap_or_else(|_| "/home/pi/.octoprint/logs/serial.log".to_string()),
            acquisition_command: env::var("ACQUISITION_COMMAND")
                .unwrap_or_else(|_| "python3 /home/pi/spotwave_ae.py".to_string()),
            telemetry_bind_addr: env::var("TELEMETRY_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:50003".to_string()),
            octoprint_url: env::var("OCTOPRINT_URL")
                .unwrap_or_else(|_| format!("http://{}", printer_host)),
            octoprint_api_key,
            model_path: env::var("MODEL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("models/ae_classifier.json")),
            hit_log_path: env::var("HIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("AE_data/ae_hits.tsv")),
            snapshot_path: env::var("SNAPSHOT_PATH").ok().map(PathBuf::from),
            acoustic_streak_threshold: parse_threshold(
                "ACOUSTIC_STREAK_THRESHOLD",
                DetectorChannel::Acoustic.default_threshold(),
            )?,
            visual_streak_threshold: parse_threshold(
                "VISUAL_STREAK_THRESHOLD",
                DetectorChannel::Visual.default_threshold(),
            )?,
            trajectory_retention: parse_retention("TRAJECTORY_RETENTION")?,
            pending_retention: parse_retention("PENDING_RETENTION")?,
            printer_host,
        };

        Ok(config)
    }

    /// Threshold configured for a detector channel
    pub fn threshold_for(&self, channel: DetectorChannel) -> u32 {
        match channel {
            DetectorChannel::Acoustic => self.acoustic_streak_threshold,
            DetectorChannel::Visual => self.visual_streak_threshold,
        }
    }
}

fn parse_threshold(var: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidValue(format!("{} must be a positive integer", var)))?,
        Err(_) => default,
    };

    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{} must be at least 1", var)));
    }

    Ok(value)
}

/// `0` or unset means unbounded
fn parse_retention(var: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(var) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue(format!("{} must be an integer", var)))?;
            Ok((value > 0).then_some(value))
        }
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
