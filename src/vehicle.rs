//! Managed vehicles and their telemetry state.

use crate::mode::PlatoonMode;
use crate::sim::{LeaderInfo, Telemetry};
use crate::{PlatoonId, VehicleId};

/// The mutable telemetry snapshot and derived fields of a connected vehicle.
///
/// Refreshed once per control pass; later phases of the same pass read it
/// instead of re-querying the simulator.
#[derive(Clone, Debug, Default)]
pub struct VehicleState {
    /// Speed in m/s.
    pub speed: f64,
    /// ID of the edge the vehicle is on.
    pub edge: String,
    /// ID of the lane the vehicle is on.
    pub lane: String,
    /// Index of the lane within its edge.
    pub lane_index: u32,
    /// Longitudinal position along the lane in m.
    pub lane_pos: f64,
    /// Raw leader report from the simulator; any vehicle, any platoon.
    pub leader_info: Option<LeaderInfo>,
    /// The resolved platooning-capable leader, when the report names one.
    pub leader: Option<VehicleId>,
    /// A platooning-capable vehicle drives downstream of a non-capable
    /// immediate leader, within catch-up sensing distance.
    pub connected_ahead: bool,
    /// Odometer distance in m since departure.
    pub distance: f64,
    /// Fuel consumption samples, sentinel readings discarded.
    pub fuel_samples: Vec<f64>,
    /// Speed samples, standstill readings discarded.
    pub speed_samples: Vec<f64>,
    /// Time in s spent in a platoon of size > 1.
    pub time_in_platoon: f64,
    /// Time in s spent solo.
    pub time_solo: f64,
}

impl VehicleState {
    /// Absorbs a telemetry sample, filtering sentinels out of the metric lists.
    pub(crate) fn absorb(&mut self, sample: &Telemetry) {
        self.speed = sample.speed;
        self.edge.clone_from(&sample.edge);
        self.lane.clone_from(&sample.lane);
        self.lane_index = sample.lane_index;
        self.lane_pos = sample.lane_pos;
        self.distance = sample.distance;
        if sample.fuel > 0.0 {
            self.fuel_samples.push(sample.fuel);
        }
        if sample.speed > 0.0 {
            self.speed_samples.push(sample.speed);
        }
    }
}

/// A platoon-capable vehicle under the engine's control.
#[derive(Clone, Debug)]
pub struct ManagedVehicle {
    /// The vehicle's ID.
    pub(crate) id: VehicleId,
    /// The simulator-side vehicle name.
    name: String,
    /// The base, platoon-capable class the vehicle spawned with.
    class: String,
    /// Maximum speed of the class in m/s, cached for the trip metrics.
    max_speed: f64,
    /// The edges the vehicle travels.
    route: Vec<String>,
    arrival_edge: String,
    arrival_pos: f64,
    arrival_lane: u32,
    /// The platoon the vehicle currently belongs to. Every managed vehicle
    /// belongs to exactly one platoon at all times.
    pub(crate) platoon: PlatoonId,
    /// The driving mode the vehicle currently holds.
    pub(crate) mode: PlatoonMode,
    /// Time in s spent wanting a different mode than currently assigned.
    pub(crate) impatience: f64,
    /// Remaining time in s before a persistent split condition splits.
    pub(crate) split_countdown: f64,
    /// Simulation time the vehicle departed at.
    spawned_at: f64,
    pub state: VehicleState,
}

impl ManagedVehicle {
    pub(crate) fn new(
        id: VehicleId,
        name: String,
        class: String,
        max_speed: f64,
        route: Vec<String>,
        arrival_pos: f64,
        arrival_lane: u32,
        spawned_at: f64,
        split_time: f64,
    ) -> Self {
        let arrival_edge = route.last().cloned().unwrap_or_default();
        Self {
            id,
            name,
            class,
            max_speed,
            route,
            arrival_edge,
            arrival_pos,
            arrival_lane,
            platoon: PlatoonId::default(),
            mode: PlatoonMode::None,
            impatience: 0.0,
            split_countdown: split_time,
            spawned_at,
            state: VehicleState::default(),
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The simulator-side vehicle name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The base, platoon-capable class the vehicle spawned with.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Maximum speed of the vehicle's class in m/s.
    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// The edges the vehicle travels.
    pub fn route(&self) -> &[String] {
        &self.route
    }

    /// The edge the vehicle's route ends on.
    pub fn arrival_edge(&self) -> &str {
        &self.arrival_edge
    }

    /// The position on the arrival edge the vehicle's route ends at.
    pub fn arrival_pos(&self) -> f64 {
        self.arrival_pos
    }

    /// The lane the vehicle arrives on.
    pub fn arrival_lane(&self) -> u32 {
        self.arrival_lane
    }

    /// The platoon the vehicle belongs to.
    pub fn platoon(&self) -> PlatoonId {
        self.platoon
    }

    /// The driving mode the vehicle currently holds.
    pub fn mode(&self) -> PlatoonMode {
        self.mode
    }

    /// Simulation time the vehicle departed at.
    pub fn spawned_at(&self) -> f64 {
        self.spawned_at
    }

    /// The remainder of the route, starting at the edge the vehicle is on.
    ///
    /// Falls back to the full route while the current edge is off-route,
    /// e.g. on an internal junction lane.
    pub fn remaining_route(&self) -> &[String] {
        let start = self
            .route
            .iter()
            .position(|edge| *edge == self.state.edge)
            .unwrap_or(0);
        &self.route[start..]
    }

    /// Advances the split countdown and returns the remaining time.
    pub(crate) fn split_countdown_tick(&mut self, elapsed: f64) -> f64 {
        self.split_countdown -= elapsed;
        self.split_countdown
    }

    /// Rewinds the split countdown to the full hysteresis time.
    pub(crate) fn reset_split_countdown(&mut self, split_time: f64) {
        self.split_countdown = split_time;
    }
}
