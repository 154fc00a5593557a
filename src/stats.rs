//! Run statistics.

use crate::config::PlatoonConfig;
use crate::vehicle::ManagedVehicle;
use serde::Serialize;

/// Statistics accumulated over a run, exported via [StatsSnapshot].
#[derive(Clone, Debug, Default)]
pub(crate) struct Statistics {
    trips: usize,
    trip_durations: Vec<f64>,
    trip_overheads: Vec<f64>,
    fuel_samples: Vec<f64>,
    speed_samples: Vec<f64>,
    trip_duration_avg: f64,
    trip_overhead_avg: f64,
    time_in_platoon: f64,
    platoons_formed: u64,
    platoons_split: u64,
    platoon_passes: u64,
}

impl Statistics {
    /// Folds a completed trip into the run totals.
    ///
    /// Overhead is the ratio of the actual trip duration to the theoretical
    /// one, the odometer distance driven at the class's maximum speed.
    pub fn record_trip(&mut self, vehicle: &ManagedVehicle, now: f64) {
        let duration = now - vehicle.spawned_at();
        self.trip_duration_avg = add_to_average(self.trips, self.trip_duration_avg, duration);
        self.trip_durations.push(duration);

        if vehicle.max_speed() > 0.0 {
            let theoretical = vehicle.state.distance / vehicle.max_speed();
            if theoretical > 0.0 {
                let overhead = duration / theoretical;
                self.trip_overhead_avg =
                    add_to_average(self.trip_overheads.len(), self.trip_overhead_avg, overhead);
                self.trip_overheads.push(overhead);
            }
        }

        self.fuel_samples.extend_from_slice(&vehicle.state.fuel_samples);
        self.speed_samples.extend_from_slice(&vehicle.state.speed_samples);
        self.time_in_platoon += vehicle.state.time_in_platoon;
        self.trips += 1;
    }

    pub fn count_formation(&mut self) {
        self.platoons_formed += 1;
    }

    pub fn count_split(&mut self) {
        self.platoons_split += 1;
    }

    /// Counts one control pass of a platoon with more than one member.
    pub fn count_platoon_pass(&mut self) {
        self.platoon_passes += 1;
    }

    /// Builds an exportable snapshot, echoing the active configuration.
    pub fn snapshot(&self, config: &PlatoonConfig, sim_time: f64) -> StatsSnapshot {
        StatsSnapshot {
            trips: self.trips,
            trip_durations: self.trip_durations.clone(),
            trip_overheads: self.trip_overheads.clone(),
            fuel_samples: self.fuel_samples.clone(),
            speed_samples: self.speed_samples.clone(),
            trip_duration_avg: self.trip_duration_avg,
            trip_overhead_avg: self.trip_overhead_avg,
            time_in_platoon: self.time_in_platoon,
            platoons_formed: self.platoons_formed,
            platoons_split: self.platoons_split,
            platoon_passes: self.platoon_passes,
            config: config.clone(),
            sim_time,
        }
    }
}

/// Simple sliding average.
fn add_to_average(count: usize, average: f64, value: f64) -> f64 {
    (count as f64 * average + value) / (count + 1) as f64
}

/// A point-in-time view of the run statistics.
#[derive(Clone, Debug, Serialize)]
pub struct StatsSnapshot {
    /// Number of completed trips.
    pub trips: usize,
    pub trip_durations: Vec<f64>,
    pub trip_overheads: Vec<f64>,
    pub fuel_samples: Vec<f64>,
    pub speed_samples: Vec<f64>,
    pub trip_duration_avg: f64,
    pub trip_overhead_avg: f64,
    /// Total vehicle time in s spent inside a platoon of size > 1.
    pub time_in_platoon: f64,
    pub platoons_formed: u64,
    pub platoons_split: u64,
    /// Control passes spent coordinating platoons of size > 1.
    pub platoon_passes: u64,
    /// The configuration active when the snapshot was taken.
    pub config: PlatoonConfig,
    pub sim_time: f64,
}
