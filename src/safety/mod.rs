// Defect streak tracking and the job-pause path

pub mod controller;
pub mod streak;

pub use controller::{issue_pause, OctoPrintController, PrintJobController, PrinterState};
pub use streak::{DefectStreak, DetectorChannel, StreakState};
