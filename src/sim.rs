//! The interface to the external motion simulator.
//!
//! The simulator is a synchronous request/response service: it models the
//! vehicle dynamics, answers telemetry queries and accepts actuation
//! commands. The engine talks to it exclusively through [Simulator], once
//! per tick, and never retains references into it.

use crate::error::Error;
use std::collections::HashMap;

/// One vehicle's telemetry sample for the current tick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Telemetry {
    /// Speed in m/s.
    pub speed: f64,
    /// ID of the edge the vehicle is on.
    pub edge: String,
    /// ID of the lane the vehicle is on. Internal junction lanes carry a
    /// `:` prefix.
    pub lane: String,
    /// Index of the lane within its edge.
    pub lane_index: u32,
    /// Longitudinal position along the lane in m.
    pub lane_pos: f64,
    /// Fuel consumption over the last step. Non-positive readings are
    /// sentinel values and are discarded.
    pub fuel: f64,
    /// Odometer distance in m since departure.
    pub distance: f64,
}

/// The telemetry fields a subscription can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelemetryField {
    Speed,
    Edge,
    Lane,
    LaneIndex,
    LanePosition,
    Fuel,
    Distance,
}

/// The fields the engine subscribes to for every connected vehicle.
pub const SUBSCRIBED_FIELDS: &[TelemetryField] = &[
    TelemetryField::Speed,
    TelemetryField::Edge,
    TelemetryField::Lane,
    TelemetryField::LaneIndex,
    TelemetryField::LanePosition,
    TelemetryField::Fuel,
    TelemetryField::Distance,
];

/// The vehicle directly ahead of a subject vehicle, and the gap to it.
#[derive(Clone, Debug, PartialEq)]
pub struct LeaderInfo {
    pub id: String,
    /// Net longitudinal distance in m.
    pub gap: f64,
}

/// Static parameters of a registered vehicle class.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClassInfo {
    /// Vehicle length in m.
    pub length: f64,
    /// Emergency deceleration in m/s^2, a positive number.
    pub emergency_decel: f64,
    /// Maximum speed in m/s.
    pub max_speed: f64,
}

/// A request to insert a vehicle into the simulation.
#[derive(Clone, Debug)]
pub struct SpawnRequest {
    pub id: String,
    pub class: String,
    /// Edge sequence the vehicle travels.
    pub route: Vec<String>,
    /// `None` lets the simulator pick a departure lane.
    pub depart_lane: Option<u32>,
    pub depart_pos: f64,
    pub depart_speed: f64,
    /// `None` leaves the arrival position up to the simulator.
    pub arrival_pos: Option<f64>,
    /// `None` leaves the arrival lane up to the simulator.
    pub arrival_lane: Option<u32>,
}

/// Synchronous access to the external motion simulator.
///
/// An `Err` from any method is a transport failure and ends the run; in-band
/// rejections (an unsafe switch, a refused lane change) are `Ok` values the
/// engine logs and retries.
pub trait Simulator {
    /// The simulation step length in s.
    fn delta_t(&self) -> f64;

    /// The current simulation time in s.
    fn now(&self) -> f64;

    /// The shortest edge sequence from `from` to `to`; empty if unroutable.
    fn find_route(&mut self, from: &str, to: &str) -> Result<Vec<String>, Error>;

    /// Inserts a vehicle into the simulation.
    fn add_vehicle(&mut self, request: &SpawnRequest) -> Result<(), Error>;

    /// Removes a vehicle from the simulation.
    fn remove_vehicle(&mut self, id: &str) -> Result<(), Error>;

    /// Whether the vehicle's current route is drivable.
    fn route_valid(&mut self, id: &str) -> Result<bool, Error>;

    /// Starts delivering the given telemetry fields for a vehicle.
    fn subscribe(&mut self, id: &str, fields: &[TelemetryField]) -> Result<(), Error>;

    /// Stops delivering telemetry for a vehicle.
    fn unsubscribe(&mut self, id: &str) -> Result<(), Error>;

    /// The latest telemetry for every subscribed vehicle.
    fn poll_telemetry(&mut self) -> Result<HashMap<String, Telemetry>, Error>;

    /// The vehicle directly ahead of `id` within `max_dist` m, if any.
    fn leader_ahead(&mut self, id: &str, max_dist: f64) -> Result<Option<LeaderInfo>, Error>;

    /// The length in m of a vehicle currently in the simulation.
    fn vehicle_length(&mut self, id: &str) -> Result<f64, Error>;

    /// IDs of the vehicles that completed their route this tick.
    fn arrived(&mut self) -> Result<Vec<String>, Error>;

    /// Advances the simulation by one step.
    fn advance(&mut self) -> Result<(), Error>;

    /// Requests a lane change held for `duration` s.
    /// `Ok(false)` means the simulator rejected the request.
    fn change_lane(&mut self, id: &str, lane: u32, duration: f64) -> Result<bool, Error>;

    /// Whether switching `id` to `class` respects safe following distances
    /// right now.
    fn control_switch_safe(&mut self, id: &str, class: &str) -> Result<bool, Error>;

    /// Switches the control type of `id` by assigning `class`. Applied
    /// unconditionally; callers consult [Simulator::control_switch_safe]
    /// first unless the switch is forced.
    fn change_control(&mut self, id: &str, class: &str) -> Result<(), Error>;

    /// All vehicle classes registered with the simulator.
    fn vehicle_classes(&mut self) -> Result<Vec<String>, Error>;

    /// Parameters of a registered class, or `None` if unknown.
    fn class_info(&mut self, class: &str) -> Result<Option<ClassInfo>, Error>;
}
