use serde::{Deserialize, Serialize};

/// Independent defect detectors that can request a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorChannel {
    /// Acoustic-emission hit classifier
    Acoustic,
    /// Camera-based inspection (external detector feeding verdicts in)
    Visual,
}

impl DetectorChannel {
    /// Reference streak length before a pause is requested
    pub fn default_threshold(self) -> u32 {
        match self {
            DetectorChannel::Acoustic => 5,
            DetectorChannel::Visual => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DetectorChannel::Acoustic => "acoustic",
            DetectorChannel::Visual => "visual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "count", rename_all = "snake_case")]
pub enum StreakState {
    Clear,
    Streaking(u32),
}

/// Consecutive-defect counter for one channel.
///
/// Edge-triggered: the verdict that brings the count to the threshold fires
/// and resets the count, so a continuing run of defects has to build a full
/// new streak before firing again.
#[derive(Debug, Clone)]
pub struct DefectStreak {
    count: u32,
    threshold: u32,
}

impl DefectStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Feed one verdict; `true` means a pause must be issued now.
    pub fn observe(&mut self, defect: bool) -> bool {
        if !defect {
            self.count = 0;
            return false;
        }

        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            return true;
        }
        false
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn state(&self) -> StreakState {
        match self.count {
            0 => StreakState::Clear,
            n => StreakState::Streaking(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_on_fifth_consecutive_defect() {
        let mut streak = DefectStreak::new(DetectorChannel::Acoustic.default_threshold());

        for expected in 1..=4 {
            assert!(!streak.observe(true));
            assert_eq!(streak.state(), StreakState::Streaking(expected));
        }

        assert!(streak.observe(true));
        assert_eq!(streak.state(), StreakState::Clear);
    }

    #[test]
    fn test_non_defect_resets() {
        let mut streak = DefectStreak::new(5);
        for _ in 0..4 {
            streak.observe(true);
        }
        assert!(!streak.observe(false));
        assert_eq!(streak.count(), 0);

        for _ in 0..4 {
            assert!(!streak.observe(true));
        }
        assert!(streak.observe(true));
    }

    #[test]
    fn test_does_not_refire_until_rebuilt() {
        let mut streak = DefectStreak::new(3);
        let fired: Vec<bool> = (0..7).map(|_| streak.observe(true)).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn test_visual_threshold() {
        let mut streak = DefectStreak::new(DetectorChannel::Visual.default_threshold());
        assert!(!streak.observe(true));
        assert!(!streak.observe(true));
        assert!(streak.observe(true));
    }
}
