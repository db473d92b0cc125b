//! Staged ramp profiles and target-concurrency interpolation

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound on the summed stage durations of a profile
pub const MAX_RUN_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// One ramp stage: move linearly to `target` virtual users over `duration`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// How long the stage lasts
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Concurrency reached at the end of the stage
    pub target: usize,
}

impl Stage {
    /// Create a new stage
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

impl FromStr for Stage {
    type Err = ConfigError;

    /// Parse `<duration>:<target>`, e.g. `1m:100` or `30s:0`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidStageSpec(s.to_string());
        let (duration, target) = s.trim().split_once(':').ok_or_else(invalid)?;
        let duration = humantime::parse_duration(duration.trim()).map_err(|_| invalid())?;
        let target = target.trim().parse::<usize>().map_err(|_| invalid())?;
        Ok(Self { duration, target })
    }
}

/// Ordered sequence of stages driving a run
///
/// The run lasts for the sum of all stage durations. Within a stage the
/// target concurrency moves linearly from the previous stage's target (0
/// for the first stage) to the stage's own target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunProfile {
    stages: Vec<Stage>,
}

impl RunProfile {
    /// Build a validated profile
    ///
    /// # Errors
    /// `EmptyProfile` if there are no stages, `NonPositiveStageDuration`
    /// if any stage lasts zero time, `InvalidDuration` if the stages add up
    /// to more than [`MAX_RUN_DURATION`].
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        let profile = Self { stages };
        profile.validate()?;
        Ok(profile)
    }

    /// Check the profile invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyProfile);
        }
        if let Some(index) = self.stages.iter().position(|s| s.duration.is_zero()) {
            return Err(ConfigError::NonPositiveStageDuration { index });
        }

        let total = self
            .stages
            .iter()
            .try_fold(Duration::ZERO, |acc, s| acc.checked_add(s.duration))
            .unwrap_or(Duration::MAX);
        if total > MAX_RUN_DURATION {
            return Err(ConfigError::InvalidDuration {
                field: "stages",
                value: total,
            });
        }
        Ok(())
    }

    /// The stages in order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Highest target across all stages
    pub fn peak_target(&self) -> usize {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Elapsed time at which stage `index` ends
    pub fn stage_end(&self, index: usize) -> Option<Duration> {
        if index >= self.stages.len() {
            return None;
        }
        Some(self.stages[..=index].iter().map(|s| s.duration).sum())
    }

    /// Index of the stage covering `elapsed`, or `None` once the profile is over
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            stage_end += stage.duration;
            if elapsed < stage_end {
                return Some(index);
            }
        }
        None
    }

    /// Target concurrency at `elapsed`, rounded to the nearest virtual user
    ///
    /// Equals a stage's target exactly at that stage's end. Past the end of
    /// the profile the final stage's target holds.
    pub fn target_at(&self, elapsed: Duration) -> usize {
        let mut stage_start = Duration::ZERO;
        let mut from = 0usize;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let delta = stage.target as f64 - from as f64;
                return (from as f64 + delta * progress).round() as usize;
            }
            stage_start = stage_end;
            from = stage.target;
        }

        from
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn reference_profile() -> RunProfile {
        RunProfile::new(vec![
            Stage::new(secs(60), 100),
            Stage::new(secs(300), 100),
            Stage::new(secs(60), 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_profile_rejected() {
        assert_eq!(RunProfile::new(vec![]), Err(ConfigError::EmptyProfile));
    }

    #[test]
    fn test_zero_duration_stage_rejected() {
        let result = RunProfile::new(vec![Stage::new(secs(10), 5), Stage::new(Duration::ZERO, 5)]);
        assert_eq!(
            result,
            Err(ConfigError::NonPositiveStageDuration { index: 1 })
        );
    }

    #[test]
    fn test_overlong_profile_rejected() {
        let huge = Duration::from_secs(10_000_000_000_000_000_000);
        let result = RunProfile::new(vec![Stage::new(huge, 1), Stage::new(huge, 0)]);
        assert_eq!(
            result,
            Err(ConfigError::InvalidDuration {
                field: "stages",
                value: Duration::MAX
            })
        );

        let result = RunProfile::new(vec![
            Stage::new(MAX_RUN_DURATION, 1),
            Stage::new(secs(1), 0),
        ]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidDuration { field: "stages", .. })
        ));

        assert!(RunProfile::new(vec![Stage::new(MAX_RUN_DURATION, 1)]).is_ok());
    }

    #[test]
    fn test_total_duration_and_peak() {
        let profile = reference_profile();
        assert_eq!(profile.total_duration(), secs(420));
        assert_eq!(profile.peak_target(), 100);
    }

    #[test]
    fn test_linear_ramp_up() {
        let profile = reference_profile();
        assert_eq!(profile.target_at(Duration::ZERO), 0);
        assert_eq!(profile.target_at(secs(15)), 25);
        assert_eq!(profile.target_at(secs(30)), 50);
        assert_eq!(profile.target_at(secs(59)), 98);
    }

    #[test]
    fn test_hold_and_ramp_down() {
        let profile = reference_profile();
        assert_eq!(profile.target_at(secs(200)), 100);
        assert_eq!(profile.target_at(secs(390)), 50);
        assert_eq!(profile.target_at(secs(420)), 0);
        assert_eq!(profile.target_at(secs(10_000)), 0);
    }

    #[test]
    fn test_target_equals_stage_target_at_every_stage_end() {
        let profiles = vec![
            reference_profile(),
            RunProfile::new(vec![
                Stage::new(secs(7), 3),
                Stage::new(secs(13), 17),
                Stage::new(Duration::from_millis(1500), 0),
                Stage::new(secs(1), 9),
            ])
            .unwrap(),
            RunProfile::new(vec![Stage::new(Duration::from_millis(333), 1000)]).unwrap(),
        ];

        for profile in profiles {
            for (index, stage) in profile.stages().iter().enumerate() {
                let end = profile.stage_end(index).unwrap();
                assert_eq!(
                    profile.target_at(end),
                    stage.target,
                    "stage {} of {:?}",
                    index,
                    profile
                );
            }
        }
    }

    #[test]
    fn test_zero_target_mid_profile() {
        let profile = RunProfile::new(vec![
            Stage::new(secs(10), 10),
            Stage::new(secs(10), 0),
            Stage::new(secs(10), 0),
            Stage::new(secs(10), 10),
        ])
        .unwrap();
        assert_eq!(profile.target_at(secs(20)), 0);
        assert_eq!(profile.target_at(secs(25)), 0);
        assert_eq!(profile.target_at(secs(35)), 5);
    }

    #[test]
    fn test_stage_index_at() {
        let profile = reference_profile();
        assert_eq!(profile.stage_index_at(Duration::ZERO), Some(0));
        assert_eq!(profile.stage_index_at(secs(60)), Some(1));
        assert_eq!(profile.stage_index_at(secs(419)), Some(2));
        assert_eq!(profile.stage_index_at(secs(420)), None);
    }

    #[test]
    fn test_stage_from_str() {
        assert_eq!("1m:100".parse::<Stage>().unwrap(), Stage::new(secs(60), 100));
        assert_eq!(
            " 250ms : 0 ".parse::<Stage>().unwrap(),
            Stage::new(Duration::from_millis(250), 0)
        );
        assert!("1m".parse::<Stage>().is_err());
        assert!("1m:-3".parse::<Stage>().is_err());
        assert!("soon:3".parse::<Stage>().is_err());
    }

    #[test]
    fn test_profile_json_is_a_stage_list() {
        let json = r#"[{"duration":"1m","target":100},{"duration":"30s","target":0}]"#;
        let profile: RunProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.stages().len(), 2);
        assert_eq!(profile.total_duration(), secs(90));
    }
}
