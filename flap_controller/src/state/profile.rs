//! Drum geometry and motion parameters shared by every module.

use flap_common::config::MotionConfig;

/// Immutable per-display motion parameters, built once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionProfile {
    /// Motor steps per drum revolution.
    pub steps_per_revolution: u32,
    /// Flaps on the drum (alphabet length).
    pub num_flaps: u32,
    /// Tolerance either side of step 0 where the home edge is expected.
    pub home_margin: u32,
    /// Steps searched in `LookForHome` before giving up.
    pub search_limit_steps: u32,
    /// Consecutive home faults tolerated before `SensorError`.
    pub retry_budget: u32,
    /// Ticks between steps, indexed by acceleration stage - 1.
    pub ramp: Vec<u32>,
}

impl MotionProfile {
    /// Build from the motion section and the alphabet length.
    pub fn new(motion: &MotionConfig, num_flaps: usize) -> Self {
        Self {
            steps_per_revolution: motion.steps_per_revolution,
            num_flaps: num_flaps as u32,
            home_margin: motion.home_margin_steps,
            search_limit_steps: motion
                .max_search_revolutions
                .saturating_mul(motion.steps_per_revolution),
            retry_budget: motion.home_retry_budget,
            ramp: motion.ramp_periods.clone(),
        }
    }

    /// Rotor step at which flap `index` is shown.
    #[inline]
    pub fn flap_step(&self, index: u8) -> u32 {
        (index as u64 * self.steps_per_revolution as u64 / self.num_flaps as u64) as u32
    }

    /// Flap shown at rotor step `position`: the last flap at or before it.
    pub fn flap_at(&self, position: u32) -> u8 {
        let spr = self.steps_per_revolution as u64;
        let mut index = (position as u64 * self.num_flaps as u64 / spr) as u32;
        while index + 1 < self.num_flaps && self.flap_step((index + 1) as u8) <= position {
            index += 1;
        }
        while index > 0 && self.flap_step(index as u8) > position {
            index -= 1;
        }
        index as u8
    }

    /// Forward distance from `from` to `to`, in steps.
    #[inline]
    pub fn distance(&self, from: u32, to: u32) -> u32 {
        (to + self.steps_per_revolution - from) % self.steps_per_revolution
    }

    /// Whether `position` lies within the home tolerance around step 0.
    #[inline]
    pub fn in_home_window(&self, position: u32) -> bool {
        position <= self.home_margin
            || position >= self.steps_per_revolution - self.home_margin
    }

    /// Signed offset of `position` from step 0, in `(-spr/2, spr/2]`.
    #[inline]
    pub fn offset_from_home(&self, position: u32) -> i64 {
        let spr = self.steps_per_revolution as i64;
        let p = position as i64;
        if p > spr / 2 { p - spr } else { p }
    }

    /// Ticks to wait between steps at acceleration `stage` (1-based).
    #[inline]
    pub fn period(&self, stage: usize) -> u32 {
        self.ramp[stage.clamp(1, self.ramp.len()) - 1]
    }

    /// Highest acceleration stage.
    #[inline]
    pub fn max_stage(&self) -> usize {
        self.ramp.len()
    }
}
