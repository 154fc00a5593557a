//! Engine parameters.
//!
//! All tunables live in a single [PlatoonConfig] value object handed to the
//! engine at construction. The only way the parameters change afterwards is
//! a [ConfigDelta] queued on the engine and applied between ticks.

use crate::error::Error;
use crate::mode::PlatoonMode;
use crate::util::Interval;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The vehicle classes a platoon-capable class switches between, one per
/// driving mode.
///
/// Unset entries fall back: follower to the leader class, catch-up to the
/// base class, catch-up follower to the follower class.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassModes {
    pub leader: String,
    #[serde(default)]
    pub follower: Option<String>,
    #[serde(default)]
    pub catchup: Option<String>,
    #[serde(default)]
    pub catchup_follower: Option<String>,
}

impl ClassModes {
    /// The class a vehicle of `base` class uses in `mode`.
    pub fn class_for<'a>(&'a self, base: &'a str, mode: PlatoonMode) -> &'a str {
        match mode {
            PlatoonMode::None => base,
            PlatoonMode::Leader => &self.leader,
            PlatoonMode::Follower => self.follower.as_deref().unwrap_or(&self.leader),
            PlatoonMode::Catchup => self.catchup.as_deref().unwrap_or(base),
            PlatoonMode::CatchupFollower => self
                .catchup_follower
                .as_deref()
                .or(self.follower.as_deref())
                .unwrap_or(&self.leader),
        }
    }

    /// Every class the mapping can produce for `base`, including `base` itself.
    pub(crate) fn mapped_classes<'a>(&'a self, base: &'a str) -> [&'a str; 5] {
        [
            base,
            self.class_for(base, PlatoonMode::Leader),
            self.class_for(base, PlatoonMode::Follower),
            self.class_for(base, PlatoonMode::Catchup),
            self.class_for(base, PlatoonMode::CatchupFollower),
        ]
    }
}

/// The engine's parameter set.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatoonConfig {
    /// Control passes per second of simulation time.
    pub control_rate: f64,
    /// Largest gap in m between members before a split condition arises,
    /// and the largest gap a merge may close directly.
    pub max_platoon_gap: f64,
    /// Distance in m within which a platoon ahead is sensed and chased.
    pub catchup_distance: f64,
    /// Time in s a split condition must persist before the split happens.
    pub platoon_split_time: f64,
    /// Time in s a vehicle waits on an unsafe mode switch before forcing it.
    pub switch_impatience: f64,
    /// Widening in m applied to an arrival interval when gating a merge.
    pub join_tolerance: f64,
    /// Largest allowed member count of a platoon.
    pub max_platoon_size: usize,
    /// Target number of platoon-capable vehicles on the road.
    pub platoon_car_target: usize,
    /// Target total vehicle count, platoon-capable plus normal.
    pub total_car_target: usize,
    /// Apply arrival-interval containment and the size limit when merging.
    pub extended_join_checks: bool,
    /// Treat a member whose real leader is a non-adjacent member of the same
    /// platoon as a split condition instead of a transient.
    pub split_on_order_violation: bool,
    /// First edge of the corridor all spawned vehicles travel.
    pub start_edge: String,
    /// Final edge of the corridor.
    pub end_edge: String,
    /// Class spawned for normal, non-platooning vehicles.
    pub normal_class: String,
    /// Substrings selecting the platoon-capable classes.
    pub platoon_selectors: Vec<String>,
    /// Mode-specific classes per platoon-capable base class.
    pub classes: HashMap<String, ClassModes>,
    /// Lanes an arrival lane is drawn from.
    pub arrival_lanes: Vec<u32>,
    /// Range an arrival position is drawn from.
    pub arrival_range: Interval,
    /// Seed for the population sampler; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for PlatoonConfig {
    fn default() -> Self {
        Self {
            control_rate: 1.0,
            max_platoon_gap: 100.0,
            catchup_distance: 200.0,
            platoon_split_time: 10.0,
            switch_impatience: 10.0,
            join_tolerance: 100.0,
            max_platoon_size: 6,
            platoon_car_target: 100,
            total_car_target: 300,
            extended_join_checks: true,
            split_on_order_violation: false,
            start_edge: String::new(),
            end_edge: String::new(),
            normal_class: "normal-car".to_owned(),
            platoon_selectors: vec!["connected".to_owned()],
            classes: HashMap::new(),
            arrival_lanes: vec![0, 1, 2, 3],
            arrival_range: Interval::new(100.0, 500.0),
            rng_seed: None,
        }
    }
}

impl PlatoonConfig {
    /// Parses a parameter set from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Whether a class name selects for platooning capability.
    pub fn is_platoon_class(&self, class: &str) -> bool {
        self.platoon_selectors.iter().any(|s| class.contains(s.as_str()))
    }

    /// The class a vehicle of `base` class uses in `mode`; `base` itself
    /// when no mapping is configured.
    pub fn mode_class<'a>(&'a self, base: &'a str, mode: PlatoonMode) -> &'a str {
        match self.classes.get(base) {
            Some(modes) => modes.class_for(base, mode),
            None => base,
        }
    }

    /// Target number of normal vehicles on the road.
    pub fn normal_car_target(&self) -> usize {
        self.total_car_target.saturating_sub(self.platoon_car_target)
    }

    /// Checks the parameter set for values the engine cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.control_rate > 0.0) || !self.control_rate.is_finite() {
            return Err(Error::InvalidConfig(
                "control_rate must be positive and finite".to_owned(),
            ));
        }
        if self.max_platoon_size == 0 {
            return Err(Error::InvalidConfig(
                "max_platoon_size must be at least 1".to_owned(),
            ));
        }
        if self.platoon_split_time < 0.0 || self.switch_impatience < 0.0 {
            return Err(Error::InvalidConfig(
                "hysteresis times must not be negative".to_owned(),
            ));
        }
        if self.max_platoon_gap <= 0.0 || self.catchup_distance <= 0.0 {
            return Err(Error::InvalidConfig(
                "gap distances must be positive".to_owned(),
            ));
        }
        if self.platoon_car_target > self.total_car_target {
            return Err(Error::InvalidConfig(
                "platoon_car_target exceeds total_car_target".to_owned(),
            ));
        }
        if self.start_edge.is_empty() || self.end_edge.is_empty() {
            return Err(Error::InvalidConfig(
                "start_edge and end_edge must be set".to_owned(),
            ));
        }
        if self.classes.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one platoon-capable class must be mapped".to_owned(),
            ));
        }
        if self.arrival_lanes.is_empty() {
            return Err(Error::InvalidConfig(
                "arrival_lanes must not be empty".to_owned(),
            ));
        }
        if self.arrival_range.min > self.arrival_range.max {
            return Err(Error::InvalidConfig(
                "arrival_range is inverted".to_owned(),
            ));
        }
        Ok(())
    }

    /// Overwrites the fields a delta carries. Callers apply deltas only
    /// between ticks.
    pub fn apply(&mut self, delta: &ConfigDelta) {
        if let Some(v) = delta.max_platoon_size {
            self.max_platoon_size = v;
        }
        if let Some(v) = delta.catchup_distance {
            self.catchup_distance = v;
        }
        if let Some(v) = delta.max_platoon_gap {
            self.max_platoon_gap = v;
        }
        if let Some(v) = delta.platoon_split_time {
            self.platoon_split_time = v;
        }
        if let Some(v) = delta.join_tolerance {
            self.join_tolerance = v;
        }
        if let Some(v) = delta.switch_impatience {
            self.switch_impatience = v;
        }
        if let Some(v) = delta.platoon_car_target {
            self.platoon_car_target = v;
        }
        if let Some(v) = delta.total_car_target {
            self.total_car_target = v;
        }
        if let Some(v) = delta.extended_join_checks {
            self.extended_join_checks = v;
        }
    }
}

/// A partial parameter update, applied atomically between ticks.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigDelta {
    pub max_platoon_size: Option<usize>,
    pub catchup_distance: Option<f64>,
    pub max_platoon_gap: Option<f64>,
    pub platoon_split_time: Option<f64>,
    pub join_tolerance: Option<f64>,
    pub switch_impatience: Option<f64>,
    pub platoon_car_target: Option<usize>,
    pub total_car_target: Option<usize>,
    pub extended_join_checks: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped() -> ClassModes {
        ClassModes {
            leader: "truck-leader".to_owned(),
            follower: None,
            catchup: None,
            catchup_follower: None,
        }
    }

    fn valid() -> PlatoonConfig {
        PlatoonConfig {
            start_edge: "a".to_owned(),
            end_edge: "d".to_owned(),
            classes: [("truck-connected".to_owned(), mapped())].into_iter().collect(),
            ..Default::default()
        }
    }

    #[test]
    fn unset_mode_classes_fall_back() {
        let modes = mapped();
        assert_eq!(modes.class_for("truck", PlatoonMode::None), "truck");
        assert_eq!(modes.class_for("truck", PlatoonMode::Leader), "truck-leader");
        assert_eq!(modes.class_for("truck", PlatoonMode::Follower), "truck-leader");
        assert_eq!(modes.class_for("truck", PlatoonMode::Catchup), "truck");
        assert_eq!(
            modes.class_for("truck", PlatoonMode::CatchupFollower),
            "truck-leader"
        );
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        assert!(valid().validate().is_ok());

        let mut cfg = valid();
        cfg.control_rate = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.platoon_car_target = cfg.total_car_target + 1;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.classes.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.start_edge.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn delta_overwrites_only_carried_fields() {
        let mut cfg = valid();
        let delta = ConfigDelta {
            max_platoon_gap: Some(42.0),
            platoon_car_target: Some(7),
            ..Default::default()
        };
        cfg.apply(&delta);
        assert_eq!(cfg.max_platoon_gap, 42.0);
        assert_eq!(cfg.platoon_car_target, 7);
        assert_eq!(cfg.max_platoon_size, 6);
        assert!(cfg.extended_join_checks);
    }

    #[test]
    fn delta_parses_from_partial_json() {
        let json = r#"{"platoon_split_time": 5.0, "max_platoon_size": 4}"#;
        let delta: ConfigDelta = serde_json::from_str(json).unwrap();
        assert_eq!(delta.platoon_split_time, Some(5.0));
        assert_eq!(delta.max_platoon_size, Some(4));
        assert!(delta.max_platoon_gap.is_none());
    }

    #[test]
    fn selector_matches_by_substring() {
        let cfg = valid();
        assert!(cfg.is_platoon_class("truck-connected"));
        assert!(!cfg.is_platoon_class("normal-car"));
    }
}
