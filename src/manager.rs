//! The per-tick coordination engine.

use crate::config::{ConfigDelta, PlatoonConfig};
use crate::error::Error;
use crate::mode::PlatoonMode;
use crate::platoon::Platoon;
use crate::sim::{LeaderInfo, Simulator, SpawnRequest, SUBSCRIBED_FIELDS};
use crate::stats::{Statistics, StatsSnapshot};
use crate::vehicle::ManagedVehicle;
use crate::{PlatoonId, PlatoonSet, VehicleId, VehicleSet};
use itertools::Itertools;
use log::{debug, info, trace, warn};
use rand::rngs::SmallRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// The outcome of a platoon-vehicle spawn attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpawnResult {
    /// The vehicle was inserted and registered in a solo platoon.
    Spawned(VehicleId),
    /// The sampled class is not platoon-capable; the attempt does not count
    /// towards the population target.
    ClassMismatch(String),
    /// The simulator rejected the route; retried on the next maintenance
    /// pass.
    InvalidRoute(String),
}

/// Coordinates platoon membership and driving modes on top of an external
/// motion simulator.
///
/// Create one per run, seed the road with [ensure_population], then call
/// [step] after every simulator tick (or let [run] drive both). Each step
/// handles arrivals and, at the configured control rate, refreshes vehicle
/// states, splits incoherent platoons, reconciles platoon ordering with the
/// physically observed one, merges platoons that are close and compatible,
/// and issues lane advice to followers.
///
/// [ensure_population]: PlatoonManager::ensure_population
/// [step]: PlatoonManager::step
/// [run]: PlatoonManager::run
pub struct PlatoonManager<S: Simulator> {
    sim: S,
    config: PlatoonConfig,
    /// Parameter updates applied at the start of the next step.
    pending: Vec<ConfigDelta>,
    /// The corridor all spawned vehicles travel.
    corridor: Vec<String>,
    /// The class registry, captured once at startup.
    known_classes: Vec<String>,
    /// The connected vehicles.
    vehicles: VehicleSet,
    /// The platoons. Every connected vehicle is in exactly one.
    platoons: PlatoonSet,
    /// Simulator-side name -> connected vehicle.
    by_name: HashMap<String, VehicleId>,
    /// Normal (non-platooning) vehicles currently on the road.
    normal_cars: usize,
    /// Monotonic index used for vehicle naming.
    car_index: usize,
    /// The simulation step length in s.
    delta_t: f64,
    /// Time between control passes in s.
    control_interval: f64,
    /// Time since the last control pass in s.
    since_last_control: f64,
    stats: Statistics,
    rng: SmallRng,
}

impl<S: Simulator> PlatoonManager<S> {
    /// Creates the engine, performing the startup checks.
    ///
    /// Fails on an invalid parameter set, on configured classes unknown to
    /// the simulator, on mode-mapped classes whose length or emergency
    /// deceleration differs from their base class (switching between them
    /// would drive physically inconsistent platoons), and on a corridor the
    /// simulator cannot route.
    pub fn new(mut sim: S, config: PlatoonConfig) -> Result<Self, Error> {
        config.validate()?;

        let known_classes = sim.vehicle_classes()?;
        for (base, modes) in &config.classes {
            let base_info = sim
                .class_info(base)?
                .ok_or_else(|| Error::UnknownClass(base.clone()))?;
            for class in modes.mapped_classes(base) {
                let class_info = sim
                    .class_info(class)?
                    .ok_or_else(|| Error::UnknownClass(class.to_owned()))?;
                if class_info.length != base_info.length {
                    return Err(Error::ClassLengthMismatch {
                        original: base.clone(),
                        mapped: class.to_owned(),
                        original_value: base_info.length,
                        mapped_value: class_info.length,
                    });
                }
                if class_info.emergency_decel != base_info.emergency_decel {
                    return Err(Error::ClassDecelMismatch {
                        original: base.clone(),
                        mapped: class.to_owned(),
                        original_value: base_info.emergency_decel,
                        mapped_value: class_info.emergency_decel,
                    });
                }
            }
        }

        let mut any_candidate = false;
        for class in &known_classes {
            if *class == config.normal_class || !config.is_platoon_class(class) {
                continue;
            }
            if !config.classes.contains_key(class) {
                return Err(Error::UnmappedClass(class.clone()));
            }
            any_candidate = true;
        }
        if !any_candidate {
            return Err(Error::NoPlatoonClass);
        }

        let corridor = sim.find_route(&config.start_edge, &config.end_edge)?;
        if corridor.is_empty() {
            return Err(Error::NoCorridor {
                from: config.start_edge.clone(),
                to: config.end_edge.clone(),
            });
        }

        let delta_t = sim.delta_t();
        let control_interval = control_interval(&config, delta_t);
        let rng = match config.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        info!(
            "platoon manager initialized; corridor '{}' -> '{}' over {} edges",
            config.start_edge,
            config.end_edge,
            corridor.len()
        );

        Ok(Self {
            sim,
            config,
            pending: Vec::new(),
            corridor,
            known_classes,
            vehicles: VehicleSet::with_key(),
            platoons: PlatoonSet::with_key(),
            by_name: HashMap::new(),
            normal_cars: 0,
            car_index: 0,
            delta_t,
            control_interval,
            // the first step always runs a control pass
            since_last_control: control_interval,
            stats: Statistics::default(),
            rng,
        })
    }

    /// Runs one tick of the coordination pipeline. Invoke once after every
    /// simulator step.
    pub fn step(&mut self) -> Result<(), Error> {
        for delta in std::mem::take(&mut self.pending) {
            self.config.apply(&delta);
            self.control_interval = control_interval(&self.config, self.delta_t);
            info!("applied queued parameter update");
        }

        self.remove_arrived()?;

        self.since_last_control += self.delta_t;
        if self.since_last_control >= self.control_interval {
            self.update_vehicle_states()?;
            self.manage_followers()?;
            self.update_platoon_ordering();
            self.manage_leaders()?;
            self.advise_lanes()?;
            self.since_last_control = 0.0;
        }
        Ok(())
    }

    /// Drives the simulator and the engine together for `ticks` steps.
    pub fn run(&mut self, ticks: u64) -> Result<(), Error> {
        for _ in 0..ticks {
            self.sim.advance()?;
            self.step()?;
        }
        Ok(())
    }

    /// Releases every managed vehicle: control types are reset, telemetry
    /// unsubscribed, and the engine's registries cleared.
    pub fn stop(&mut self) -> Result<(), Error> {
        let Self {
            vehicles,
            sim,
            config,
            ..
        } = &mut *self;
        for (_, vehicle) in vehicles.iter() {
            let class = config.mode_class(vehicle.class(), PlatoonMode::None);
            sim.change_control(vehicle.name(), class)?;
            sim.unsubscribe(vehicle.name())?;
        }
        self.vehicles.clear();
        self.platoons.clear();
        self.by_name.clear();
        Ok(())
    }

    /// Queues a parameter update, applied atomically before the next step.
    pub fn queue_reconfigure(&mut self, delta: ConfigDelta) {
        self.pending.push(delta);
    }

    /// The active parameter set.
    pub fn config(&self) -> &PlatoonConfig {
        &self.config
    }

    /// A snapshot of the run statistics.
    pub fn statistics(&self) -> StatsSnapshot {
        self.stats.snapshot(&self.config, self.sim.now())
    }

    /// Gets a reference to the simulator.
    pub fn simulator(&self) -> &S {
        &self.sim
    }

    /// Gets a mutable reference to the simulator.
    pub fn simulator_mut(&mut self) -> &mut S {
        &mut self.sim
    }

    /// Returns an iterator over all platoons.
    pub fn platoons(&self) -> impl Iterator<Item = &Platoon> {
        self.platoons.values()
    }

    /// Gets the platoon with the given ID.
    pub fn platoon(&self, id: PlatoonId) -> Option<&Platoon> {
        self.platoons.get(id)
    }

    /// Returns an iterator over all connected vehicles.
    pub fn vehicles(&self) -> impl Iterator<Item = &ManagedVehicle> {
        self.vehicles.values()
    }

    /// Gets the vehicle with the given ID.
    pub fn vehicle(&self, id: VehicleId) -> Option<&ManagedVehicle> {
        self.vehicles.get(id)
    }

    /// Gets a connected vehicle by its simulator-side name.
    pub fn vehicle_by_name(&self, name: &str) -> Option<&ManagedVehicle> {
        self.by_name.get(name).and_then(|id| self.vehicles.get(*id))
    }

    /// The number of connected vehicles.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// The vehicles currently leading a platoon of size > 1.
    pub fn platoon_leaders(&self) -> Vec<VehicleId> {
        self.platoons
            .values()
            .filter(|platoon| platoon.size() > 1)
            .map(|platoon| platoon.leader())
            .collect()
    }

    /// Removes vehicles that completed their route this tick, records their
    /// trip metrics, shrinks or destroys their platoons, and spawns
    /// replacements to hold the population targets.
    fn remove_arrived(&mut self) -> Result<(), Error> {
        let arrived = self.sim.arrived()?;
        if arrived.is_empty() {
            return Ok(());
        }
        let now = self.sim.now();

        let mut shrunk: Vec<PlatoonId> = Vec::new();
        for name in &arrived {
            let Some(id) = self.by_name.remove(name) else {
                // a normal vehicle finished its trip
                self.normal_cars = self.normal_cars.saturating_sub(1);
                continue;
            };
            let Some(vehicle) = self.vehicles.remove(id) else {
                continue;
            };
            debug!("removing arrived vehicle '{}'", name);
            self.stats.record_trip(&vehicle, now);
            let platoon = vehicle.platoon();
            if let Some(platoon) = self.platoons.get_mut(platoon) {
                platoon.remove_members(&[id]);
            }
            if !shrunk.contains(&platoon) {
                shrunk.push(platoon);
            }
        }

        for id in shrunk {
            let Some(platoon) = self.platoons.get(id) else {
                continue;
            };
            if platoon.size() == 0 {
                self.platoons.remove(id);
            } else {
                self.platoons[id].adjust_interval(&self.vehicles);
            }
        }

        // replace the departures in kind
        self.ensure_population()
    }

    /// Pulls fresh telemetry for every connected vehicle and resolves each
    /// vehicle's leader.
    ///
    /// If the vehicle directly ahead is not platooning-capable, the chain of
    /// leaders is walked, bounded by the catch-up sensing distance, to set
    /// the connectivity-ahead flag without touching the raw leader report.
    fn update_vehicle_states(&mut self) -> Result<(), Error> {
        let results = self.sim.poll_telemetry()?;
        let elapsed = self.since_last_control;

        let ids: Vec<VehicleId> = self.vehicles.keys().collect();
        for id in ids {
            let name = self.vehicles[id].name().to_owned();
            let Some(sample) = results.get(&name) else {
                warn!("no telemetry for vehicle '{}'; state not updated", name);
                continue;
            };
            let grouped = self
                .platoons
                .get(self.vehicles[id].platoon())
                .map_or(false, |platoon| platoon.size() > 1);
            {
                let vehicle = &mut self.vehicles[id];
                vehicle.state.absorb(sample);
                if grouped {
                    vehicle.state.time_in_platoon += elapsed;
                } else {
                    vehicle.state.time_solo += elapsed;
                }
            }
            let leader_info = self.sim.leader_ahead(&name, self.config.catchup_distance)?;
            self.resolve_leader(id, leader_info)?;
        }
        Ok(())
    }

    /// Resolves the raw leader report of one vehicle into a connected leader
    /// reference and the connectivity-ahead flag.
    fn resolve_leader(
        &mut self,
        id: VehicleId,
        leader_info: Option<LeaderInfo>,
    ) -> Result<(), Error> {
        let Some(info) = leader_info else {
            let state = &mut self.vehicles[id].state;
            state.leader_info = None;
            state.leader = None;
            state.connected_ahead = false;
            return Ok(());
        };

        // keep the cached resolution while the reported leader is unchanged
        let cached = self.vehicles[id].state.leader.map_or(false, |leader| {
            self.vehicles
                .get(leader)
                .map_or(false, |vehicle| vehicle.name() == info.id)
        });
        if cached {
            self.vehicles[id].state.leader_info = Some(info);
            return Ok(());
        }

        let (leader, connected_ahead) = if let Some(leader) = self.by_name.get(&info.id) {
            (Some(*leader), true)
        } else {
            // the immediate leader cannot platoon; scan further downstream
            // for a connected vehicle within sensing distance
            let mut connected_ahead = false;
            let mut dist = info.gap + self.sim.vehicle_length(&info.id)?;
            let mut ahead = info.id.clone();
            while dist < self.config.catchup_distance {
                let next = self
                    .sim
                    .leader_ahead(&ahead, self.config.catchup_distance - dist)?;
                let Some(next) = next else {
                    break;
                };
                if next.gap < 0.0 {
                    // junction artifact
                    break;
                }
                if self.by_name.contains_key(&next.id) {
                    trace!(
                        "connected vehicle '{}' found {:.0}m downstream of '{}'",
                        next.id,
                        dist + next.gap,
                        self.vehicles[id].name()
                    );
                    connected_ahead = true;
                    break;
                }
                dist += next.gap + self.sim.vehicle_length(&next.id)?;
                ahead = next.id;
            }
            (None, connected_ahead)
        };

        let state = &mut self.vehicles[id].state;
        state.leader_info = Some(info);
        state.leader = leader;
        state.connected_ahead = connected_ahead;
        Ok(())
    }

    /// Re-advises member modes and evaluates the split protocol for every
    /// platoon follower.
    ///
    /// A follower whose split condition persists for the full hysteresis
    /// time takes the trailing run of the platoon with it into a new one.
    fn manage_followers(&mut self) -> Result<(), Error> {
        let elapsed = self.since_last_control;
        let advise = self.control_interval;

        let ids: Vec<PlatoonId> = self.platoons.keys().collect();
        for id in ids {
            self.advise_platoon(id, advise)?;

            let members: Vec<VehicleId> = self.platoons[id].members().to_vec();
            let mut split_indices: Vec<usize> = Vec::new();
            for (ix, vehicle) in members.iter().enumerate().skip(1) {
                if self.split_condition(id, &members, ix) {
                    let remaining = self.vehicles[*vehicle].split_countdown_tick(elapsed);
                    if remaining <= 0.0 {
                        split_indices.push(ix);
                    }
                }
            }
            // split highest index first so earlier indices stay valid
            for ix in split_indices.into_iter().rev() {
                self.split_platoon(id, ix)?;
            }
        }
        Ok(())
    }

    /// Whether the member at `ix` currently requests a split.
    fn split_condition(&mut self, id: PlatoonId, members: &[VehicleId], ix: usize) -> bool {
        let vehicle = &self.vehicles[members[ix]];
        let Some(info) = &vehicle.state.leader_info else {
            // nobody ahead at all
            return true;
        };
        let Some(leader) = self.by_name.get(&info.id) else {
            // the vehicle ahead cannot platoon
            return true;
        };
        if info.gap > self.config.max_platoon_gap {
            return true;
        }
        if *leader == members[ix - 1] {
            // the registered predecessor is really ahead; rewind the hysteresis
            let split_time = self.config.platoon_split_time;
            self.vehicles[members[ix]].reset_split_countdown(split_time);
            return false;
        }
        if self.vehicles[*leader].platoon() == id {
            // transient reordering within the platoon, e.g. a lane change
            debug!(
                "platoon order violated: real leader '{}' is not registered ahead of '{}'",
                info.id,
                self.vehicles[members[ix]].name()
            );
            return self.config.split_on_order_violation;
        }
        // ahead vehicle belongs to a different platoon
        true
    }

    /// Detaches the members from `ix` onward into a new platoon.
    fn split_platoon(&mut self, id: PlatoonId, ix: usize) -> Result<(), Error> {
        let Some(platoon) = self.platoons.get_mut(id) else {
            return Ok(());
        };
        if ix == 0 || ix >= platoon.size() {
            return Ok(());
        }
        let mode = platoon.mode();
        let tail = platoon.split_off(ix);
        let detached = self
            .platoons
            .insert_with_key(|new_id| Platoon::formed(new_id, tail, mode));
        let members: Vec<VehicleId> = self.platoons[detached].members().to_vec();
        for vehicle in &members {
            self.vehicles[*vehicle].platoon = detached;
        }
        self.platoons[id].adjust_interval(&self.vehicles);
        self.platoons[detached].adjust_interval(&self.vehicles);
        self.stats.count_split();
        info!(
            "platoon {:?} splits at index {}; detached platoon {:?} [{}]",
            id,
            ix,
            detached,
            members.iter().map(|v| self.vehicles[*v].name()).join(", ")
        );

        // the detached run now leads itself
        let advise = self.control_interval;
        let target = if members.len() > 1 {
            PlatoonMode::Leader
        } else {
            PlatoonMode::None
        };
        self.request_platoon_mode(detached, target, advise)?;
        if self.platoons[id].size() == 1 {
            self.request_platoon_mode(id, PlatoonMode::None, advise)?;
        }
        Ok(())
    }

    /// Converges each platoon's member order to the physically observed one.
    ///
    /// A member reporting itself as its own leader indicates corrupted
    /// telemetry; that platoon keeps its order for this tick.
    fn update_platoon_ordering(&mut self) {
        let ids: Vec<PlatoonId> = self.platoons.keys().collect();
        for id in ids {
            if self.platoons[id].size() == 1 {
                continue;
            }
            self.stats.count_platoon_pass();

            let members: Vec<VehicleId> = self.platoons[id].members().to_vec();
            let actual: Vec<Option<VehicleId>> = members
                .iter()
                .map(|member| {
                    self.vehicles[*member]
                        .state
                        .leader
                        .filter(|leader| self.vehicles[*leader].platoon() == id)
                })
                .collect();

            match reorder_members(&members, &actual) {
                Reorder::Unchanged => {}
                Reorder::Reordered(order) => {
                    debug!(
                        "ordering within platoon {:?} was corrupted; new order [{}]",
                        id,
                        order.iter().map(|v| self.vehicles[*v].name()).join(", ")
                    );
                    self.platoons[id].set_order(order);
                }
                Reorder::SelfLeader(vehicle) => {
                    warn!(
                        "vehicle '{}' was found as its own leader; platoon {:?} order might be corrupted",
                        self.vehicles[vehicle].name(),
                        id
                    );
                }
            }
        }
    }

    /// Evaluates the merge protocol for every platoon leader and keeps the
    /// leader modes consistent with what lies ahead.
    fn manage_leaders(&mut self) -> Result<(), Error> {
        let advise = self.control_interval;

        let ids: Vec<PlatoonId> = self.platoons.keys().collect();
        for id in ids {
            let leader = self.platoons[id].leader();

            // a leader held in a follower mode for safety is nudged back
            match self.vehicles[leader].mode() {
                PlatoonMode::Follower => {
                    self.request_platoon_mode(id, PlatoonMode::Leader, advise)?;
                }
                PlatoonMode::CatchupFollower => {
                    self.request_platoon_mode(id, PlatoonMode::Catchup, advise)?;
                }
                _ => {}
            }

            let fallback = if self.platoons[id].size() == 1 {
                PlatoonMode::None
            } else {
                PlatoonMode::Leader
            };

            let Some(info) = self.vehicles[leader].state.leader_info.clone() else {
                // nobody ahead
                self.request_platoon_mode(id, fallback, advise)?;
                continue;
            };
            if info.gap > self.config.catchup_distance {
                self.request_platoon_mode(id, fallback, advise)?;
                continue;
            }

            let Some(ahead) = self.by_name.get(&info.id).copied() else {
                // the vehicle ahead cannot platoon; is anyone further
                // downstream worth catching up to?
                if self.vehicles[leader].state.connected_ahead {
                    self.request_platoon_mode(id, PlatoonMode::Catchup, advise)?;
                } else {
                    self.request_platoon_mode(id, fallback, advise)?;
                }
                continue;
            };

            let ahead_platoon = self.vehicles[ahead].platoon();
            if ahead_platoon == id {
                // order is corrupted; never join one's own platoon
                continue;
            }

            // the vehicle ahead must really lie on the remaining route
            // (junctions can produce link leaders that do not)
            let ahead_edge = self.vehicles[ahead].state.edge.clone();
            if !self.vehicles[leader].remaining_route().contains(&ahead_edge) {
                continue;
            }

            // platoons only form between vehicles bound for the same edge
            if self.vehicles[ahead].arrival_edge() != self.vehicles[leader].arrival_edge() {
                continue;
            }

            if self.config.extended_join_checks {
                let interval = self.platoons[id]
                    .arrival_interval()
                    .widened(self.config.join_tolerance);
                if !interval.contains(self.vehicles[ahead].arrival_pos()) {
                    trace!(
                        "arrival position of '{}' outside the interval of platoon {:?}",
                        info.id,
                        id
                    );
                    continue;
                }
            }

            let gap_ok = info.gap <= self.config.max_platoon_gap;
            let size_ok = !self.config.extended_join_checks
                || self.platoons[ahead_platoon].size() + self.platoons[id].size()
                    <= self.config.max_platoon_size;

            if gap_ok && size_ok {
                if !self.join_platoons(ahead_platoon, id)? {
                    debug!(
                        "merging platoons {:?} and {:?} would not be safe",
                        id, ahead_platoon
                    );
                }
                continue;
            }
            if !gap_ok {
                // too far to join outright; close the distance first
                if !self.set_platoon_mode(id, PlatoonMode::Catchup)? {
                    debug!(
                        "switch to catch-up would not be safe for platoon {:?}",
                        id
                    );
                }
            }
            if !size_ok {
                // the platoon ahead is full; hold position behind it
                if !self.set_platoon_mode(id, PlatoonMode::Follower)? {
                    debug!(
                        "switch to follower would not be safe for platoon {:?}",
                        id
                    );
                }
            }
        }
        Ok(())
    }

    /// Appends the pursuing platoon's vehicles to the platoon ahead.
    /// Nothing changes if any member cannot safely switch to following.
    fn join_platoons(&mut self, ahead: PlatoonId, pursuing: PlatoonId) -> Result<bool, Error> {
        let target = match self.platoons[ahead].mode() {
            PlatoonMode::Catchup | PlatoonMode::CatchupFollower => PlatoonMode::CatchupFollower,
            _ => PlatoonMode::Follower,
        };
        if !self.set_platoon_mode(pursuing, target)? {
            return Ok(false);
        }
        let Some(removed) = self.platoons.remove(pursuing) else {
            return Ok(false);
        };
        for vehicle in removed.members() {
            self.vehicles[*vehicle].platoon = ahead;
        }
        self.platoons[ahead].absorb(removed.members());
        self.platoons[ahead].adjust_interval(&self.vehicles);
        // a previously solo platoon ahead now leads a group
        let mode = match self.platoons[ahead].mode() {
            PlatoonMode::None => PlatoonMode::Leader,
            mode => mode,
        };
        self.request_platoon_mode(ahead, mode, self.control_interval)?;
        self.stats.count_formation();
        info!(
            "platoon {:?} joined platoon {:?}, which now contains [{}]",
            pursuing,
            ahead,
            self.platoons[ahead]
                .members()
                .iter()
                .map(|v| self.vehicles[*v].name())
                .join(", ")
        );
        Ok(true)
    }

    /// Advises every follower onto its leader's lane when both share an
    /// edge, and to hold its lane otherwise.
    fn advise_lanes(&mut self) -> Result<(), Error> {
        let duration = self.control_interval;
        let ids: Vec<PlatoonId> = self.platoons.keys().collect();
        for id in ids {
            let members: Vec<VehicleId> = self.platoons[id].members().to_vec();
            for ix in 1..members.len() {
                let vehicle = &self.vehicles[members[ix]];
                let lane = &vehicle.state.lane;
                if lane.is_empty() || lane.starts_with(':') {
                    // internal junction lane; no advice
                    continue;
                }
                let name = vehicle.name().to_owned();
                let ahead = &self.vehicles[members[ix - 1]];
                let target = if ahead.state.edge == vehicle.state.edge {
                    ahead.state.lane_index
                } else {
                    // the leader already left this edge; hold the lane
                    vehicle.state.lane_index
                };
                if !self.sim.change_lane(&name, target, duration)? {
                    warn!("lane advice for vehicle '{}' was rejected", name);
                }
            }
        }
        Ok(())
    }

    /// Spawns vehicles until both population targets are met: normal
    /// vehicles first, then platoon candidates.
    ///
    /// Call once before the stepping loop; the engine re-runs it whenever
    /// arrivals shrink the population.
    pub fn ensure_population(&mut self) -> Result<(), Error> {
        while self.normal_cars < self.config.normal_car_target() {
            self.spawn_normal_vehicle()?;
        }
        while self.by_name.len() < self.config.platoon_car_target {
            match self.spawn_platoon_vehicle()? {
                SpawnResult::Spawned(_) => {}
                SpawnResult::ClassMismatch(class) => {
                    trace!("sampled class '{}' is not platoon-capable", class);
                }
                SpawnResult::InvalidRoute(id) => {
                    warn!("route of vehicle '{}' is not valid", id);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Inserts one normal vehicle travelling the corridor.
    fn spawn_normal_vehicle(&mut self) -> Result<(), Error> {
        let id = format!("normal-car-{}", self.car_index);
        let arrival_lane = self
            .config
            .arrival_lanes
            .choose(&mut self.rng)
            .copied();
        let request = SpawnRequest {
            id: id.clone(),
            class: self.config.normal_class.clone(),
            route: self.corridor.clone(),
            depart_lane: None,
            depart_pos: 0.0,
            depart_speed: 0.0,
            arrival_pos: None,
            arrival_lane,
        };
        self.sim.add_vehicle(&request)?;
        self.car_index += 1;
        self.normal_cars += 1;
        trace!("added normal vehicle '{}'", id);
        Ok(())
    }

    /// Attempts to insert one platoon-capable vehicle.
    ///
    /// Samples a random registered class; a class that does not match a
    /// platooning selector is rejected and the attempt does not count. On a
    /// match the vehicle is spawned on the corridor, its route confirmed
    /// with the simulator, telemetry subscribed, and a solo platoon
    /// registered for it.
    pub fn spawn_platoon_vehicle(&mut self) -> Result<SpawnResult, Error> {
        let class = self
            .known_classes
            .iter()
            .filter(|class| **class != self.config.normal_class)
            .choose(&mut self.rng)
            .cloned()
            .ok_or(Error::NoPlatoonClass)?;
        if !self.config.is_platoon_class(&class) {
            return Ok(SpawnResult::ClassMismatch(class));
        }

        let id = format!("platoon-car-{}", self.car_index);
        let range = self.config.arrival_range;
        let arrival_pos = self.rng.gen_range(range.min..=range.max);
        let arrival_lane = self
            .config
            .arrival_lanes
            .choose(&mut self.rng)
            .copied()
            .unwrap_or(0);

        let request = SpawnRequest {
            id: id.clone(),
            class: class.clone(),
            route: self.corridor.clone(),
            depart_lane: None,
            depart_pos: 0.0,
            depart_speed: 0.0,
            arrival_pos: Some(arrival_pos),
            arrival_lane: Some(arrival_lane),
        };
        self.sim.add_vehicle(&request)?;
        if !self.sim.route_valid(&id)? {
            self.sim.remove_vehicle(&id)?;
            return Ok(SpawnResult::InvalidRoute(id));
        }
        self.sim.subscribe(&id, SUBSCRIBED_FIELDS)?;

        let max_speed = self
            .sim
            .class_info(&class)?
            .ok_or_else(|| Error::UnknownClass(class.clone()))?
            .max_speed;
        let now = self.sim.now();
        let split_time = self.config.platoon_split_time;
        let corridor = self.corridor.clone();
        let vehicle = self.vehicles.insert_with_key(|vid| {
            ManagedVehicle::new(
                vid,
                id.clone(),
                class.clone(),
                max_speed,
                corridor,
                arrival_pos,
                arrival_lane,
                now,
                split_time,
            )
        });
        let platoon = self
            .platoons
            .insert_with_key(|pid| Platoon::solo(pid, vehicle, arrival_pos));
        self.vehicles[vehicle].platoon = platoon;
        self.by_name.insert(id.clone(), vehicle);
        self.car_index += 1;
        debug!("added platoon vehicle '{}' with class '{}'", id, class);
        Ok(SpawnResult::Spawned(vehicle))
    }

    /// Re-requests a platoon's current mode with impatience.
    fn advise_platoon(&mut self, id: PlatoonId, elapsed: f64) -> Result<(), Error> {
        let Self {
            platoons,
            vehicles,
            sim,
            config,
            ..
        } = &mut *self;
        platoons[id].advise_member_modes(elapsed, vehicles, sim, config)
    }

    /// Requests a mode for a platoon with impatience.
    fn request_platoon_mode(
        &mut self,
        id: PlatoonId,
        mode: PlatoonMode,
        elapsed: f64,
    ) -> Result<(), Error> {
        let Self {
            platoons,
            vehicles,
            sim,
            config,
            ..
        } = &mut *self;
        platoons[id].set_mode_with_impatience(mode, elapsed, vehicles, sim, config)
    }

    /// Requests a mode for a platoon, all or nothing.
    fn set_platoon_mode(&mut self, id: PlatoonId, mode: PlatoonMode) -> Result<bool, Error> {
        let Self {
            platoons,
            vehicles,
            sim,
            config,
            ..
        } = &mut *self;
        platoons[id].set_mode(mode, vehicles, sim, config)
    }
}

/// Recomputes the control interval, clamping rates finer than the
/// simulator's step resolution.
fn control_interval(config: &PlatoonConfig, delta_t: f64) -> f64 {
    if 1.0 / config.control_rate < delta_t {
        warn!(
            "restricting control rate ({} per s) to one pass per {}s step",
            config.control_rate, delta_t
        );
        delta_t
    } else {
        1.0 / config.control_rate
    }
}

/// The outcome of an ordering reconciliation.
enum Reorder {
    /// Every member already follows its actual leader.
    Unchanged,
    /// The converged order.
    Reordered(Vec<VehicleId>),
    /// A vehicle reported itself as its own leader; the report is unusable.
    SelfLeader(VehicleId),
}

/// Reorders `members` so that, as far as one tick allows, each vehicle's
/// registered predecessor is the leader telemetry actually reports for it.
///
/// Members with no intra-platoon actual leader carry no ordering
/// implication. When several members report the same actual leader (a
/// lane-change artifact) only one of them can end up behind it, so passes
/// are capped at the platoon size.
fn reorder_members(members: &[VehicleId], actual: &[Option<VehicleId>]) -> Reorder {
    for (member, leader) in members.iter().zip(actual) {
        if *leader == Some(*member) {
            return Reorder::SelfLeader(*member);
        }
    }

    let count = members.len();
    let mut order: Vec<VehicleId> = members.to_vec();
    let mut actual: Vec<Option<VehicleId>> = actual.to_vec();
    let mut passes = 0;
    while passes < count {
        let snapshot = order.clone();
        let snapshot_actual = actual.clone();
        let mut changed = false;
        for ix in (0..count).rev() {
            let Some(leader) = snapshot_actual[ix] else {
                continue;
            };
            let registered = if ix == 0 {
                None
            } else {
                Some(snapshot[ix - 1])
            };
            if Some(leader) == registered {
                continue;
            }
            // relocate the member to directly follow its actual leader
            let member = snapshot[ix];
            let from = order.iter().position(|v| *v == member).unwrap();
            order.remove(from);
            actual.remove(from);
            let to = order.iter().position(|v| *v == leader).unwrap();
            order.insert(to + 1, member);
            actual.insert(to + 1, Some(leader));
            changed = true;
        }
        if !changed {
            break;
        }
        passes += 1;
    }

    if order == members {
        Reorder::Unchanged
    } else {
        Reorder::Reordered(order)
    }
}

#[cfg(test)]
mod tests {
    use super::{reorder_members, Reorder};
    use crate::VehicleId;
    use slotmap::SlotMap;

    fn ids(count: usize) -> Vec<VehicleId> {
        let mut keys: SlotMap<VehicleId, ()> = SlotMap::with_key();
        (0..count).map(|_| keys.insert(())).collect()
    }

    #[test]
    fn agreeing_order_is_left_alone() {
        let v = ids(3);
        let actual = vec![None, Some(v[0]), Some(v[1])];
        assert!(matches!(reorder_members(&v, &actual), Reorder::Unchanged));
    }

    #[test]
    fn single_offender_converges() {
        // v2 physically follows v0, so v1 must move behind v2
        let v = ids(3);
        let actual = vec![None, Some(v[2]), Some(v[0])];
        match reorder_members(&v, &actual) {
            Reorder::Reordered(order) => assert_eq!(order, vec![v[0], v[2], v[1]]),
            _ => panic!("expected a reordering"),
        }
    }

    #[test]
    fn missing_actual_leaders_carry_no_implication() {
        let v = ids(4);
        let actual = vec![None, Some(v[0]), None, Some(v[2])];
        assert!(matches!(reorder_members(&v, &actual), Reorder::Unchanged));
    }

    #[test]
    fn self_leader_aborts() {
        let v = ids(3);
        let actual = vec![None, Some(v[1]), Some(v[1])];
        assert!(matches!(
            reorder_members(&v, &actual),
            Reorder::SelfLeader(x) if x == v[1]
        ));
    }

    #[test]
    fn tail_reversal_converges_within_size_passes() {
        // full reversal behind the leader: [v0, v3, v2, v1] reported
        let v = ids(4);
        let actual = vec![None, Some(v[2]), Some(v[3]), Some(v[0])];
        match reorder_members(&v, &actual) {
            Reorder::Reordered(order) => assert_eq!(order, vec![v[0], v[3], v[2], v[1]]),
            _ => panic!("expected a reordering"),
        }
    }
}
