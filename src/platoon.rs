//! Ordered platoons and driving-mode propagation.

use crate::config::PlatoonConfig;
use crate::error::Error;
use crate::mode::PlatoonMode;
use crate::sim::Simulator;
use crate::util::Interval;
use crate::{PlatoonId, VehicleId, VehicleSet};
use itertools::{Itertools, MinMaxResult};
use log::{debug, trace};
use smallvec::{smallvec, SmallVec};

/// An ordered group of vehicles driving under coordinated control.
///
/// Index 0 is the leader; the vehicle at index `i` logically follows the
/// vehicle at index `i - 1`. A platoon of size 1 is a vehicle not currently
/// grouped with anyone; an empty platoon is destroyed by the engine.
#[derive(Clone, Debug)]
pub struct Platoon {
    /// The platoon's ID.
    id: PlatoonId,
    /// The mode last requested for the platoon. Individual members may lag
    /// behind it while a switch is unsafe.
    mode: PlatoonMode,
    /// The members, front to back.
    members: SmallVec<[VehicleId; 8]>,
    /// The (min, max) of the members' arrival positions.
    arrival_interval: Interval,
}

impl Platoon {
    /// Creates the solo platoon of a newly spawned vehicle.
    pub(crate) fn solo(id: PlatoonId, vehicle: VehicleId, arrival_pos: f64) -> Self {
        Self {
            id,
            mode: PlatoonMode::None,
            members: smallvec![vehicle],
            arrival_interval: Interval::point(arrival_pos),
        }
    }

    /// Creates a platoon holding vehicles split out of another one.
    /// The caller re-parents the members and recomputes the interval.
    pub(crate) fn formed(
        id: PlatoonId,
        members: SmallVec<[VehicleId; 8]>,
        mode: PlatoonMode,
    ) -> Self {
        Self {
            id,
            mode,
            members,
            arrival_interval: Interval::default(),
        }
    }

    /// Gets the platoon's ID.
    pub fn id(&self) -> PlatoonId {
        self.id
    }

    /// The mode last requested for the platoon.
    pub fn mode(&self) -> PlatoonMode {
        self.mode
    }

    /// The number of members.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// The members, front to back.
    pub fn members(&self) -> &[VehicleId] {
        &self.members
    }

    /// The leading vehicle.
    pub fn leader(&self) -> VehicleId {
        self.members[0]
    }

    /// Whether the vehicle is a member of this platoon.
    pub fn contains(&self, vehicle: VehicleId) -> bool {
        self.members.contains(&vehicle)
    }

    /// The (min, max) of the members' arrival positions.
    pub fn arrival_interval(&self) -> Interval {
        self.arrival_interval
    }

    /// Recomputes the arrival interval from the current membership.
    pub(crate) fn adjust_interval(&mut self, vehicles: &VehicleSet) {
        self.arrival_interval = match self
            .members
            .iter()
            .map(|id| vehicles[*id].arrival_pos())
            .minmax()
        {
            MinMaxResult::NoElements => Interval::default(),
            MinMaxResult::OneElement(pos) => Interval::point(pos),
            MinMaxResult::MinMax(min, max) => Interval::new(min, max),
        };
    }

    /// Requests `mode` for every member, all or nothing: if any member
    /// cannot switch safely right now, nothing is changed and `false` is
    /// returned.
    pub(crate) fn set_mode<S: Simulator>(
        &mut self,
        mode: PlatoonMode,
        vehicles: &mut VehicleSet,
        sim: &mut S,
        config: &PlatoonConfig,
    ) -> Result<bool, Error> {
        for (ix, id) in self.members.iter().enumerate() {
            let vehicle = &vehicles[*id];
            let target = mode.member_mode(ix);
            if vehicle.mode == target {
                continue;
            }
            let class = config.mode_class(vehicle.class(), target);
            if !sim.control_switch_safe(vehicle.name(), class)? {
                trace!(
                    "switching '{}' to {} would not be safe",
                    vehicle.name(),
                    target
                );
                return Ok(false);
            }
        }
        for (ix, id) in self.members.iter().enumerate() {
            let target = mode.member_mode(ix);
            if vehicles[*id].mode == target {
                continue;
            }
            let class = config.mode_class(vehicles[*id].class(), target).to_owned();
            sim.change_control(vehicles[*id].name(), &class)?;
            let vehicle = &mut vehicles[*id];
            vehicle.mode = target;
            vehicle.impatience = 0.0;
        }
        self.mode = mode;
        Ok(true)
    }

    /// Requests `mode`, switching each member as soon as it is safe, or
    /// once overdue: a member whose accumulated impatience exceeds the
    /// configured patience is switched regardless.
    pub(crate) fn set_mode_with_impatience<S: Simulator>(
        &mut self,
        mode: PlatoonMode,
        elapsed: f64,
        vehicles: &mut VehicleSet,
        sim: &mut S,
        config: &PlatoonConfig,
    ) -> Result<(), Error> {
        self.mode = mode;
        for (ix, id) in self.members.iter().enumerate() {
            let target = mode.member_mode(ix);
            if vehicles[*id].mode == target {
                continue;
            }
            let name = vehicles[*id].name().to_owned();
            let class = config.mode_class(vehicles[*id].class(), target).to_owned();
            let overdue = vehicles[*id].impatience >= config.switch_impatience;
            if sim.control_switch_safe(&name, &class)? || overdue {
                if overdue {
                    debug!("forcing overdue switch of '{}' to {}", name, target);
                }
                sim.change_control(&name, &class)?;
                let vehicle = &mut vehicles[*id];
                vehicle.mode = target;
                vehicle.impatience = 0.0;
            } else {
                let vehicle = &mut vehicles[*id];
                vehicle.impatience += elapsed;
                trace!(
                    "'{}' waiting {:.1}s for a safe switch to {}",
                    name,
                    vehicle.impatience,
                    target
                );
            }
        }
        Ok(())
    }

    /// Re-requests the platoon's current mode for members lagging behind it.
    pub(crate) fn advise_member_modes<S: Simulator>(
        &mut self,
        elapsed: f64,
        vehicles: &mut VehicleSet,
        sim: &mut S,
        config: &PlatoonConfig,
    ) -> Result<(), Error> {
        self.set_mode_with_impatience(self.mode, elapsed, vehicles, sim, config)
    }

    /// Detaches the members from `index` to the end and returns them.
    pub(crate) fn split_off(&mut self, index: usize) -> SmallVec<[VehicleId; 8]> {
        self.members.drain(index..).collect()
    }

    /// Appends the members of a platoon merging in from behind.
    pub(crate) fn absorb(&mut self, members: &[VehicleId]) {
        self.members.extend_from_slice(members);
    }

    /// Drops the given members, preserving the order of the rest.
    pub(crate) fn remove_members(&mut self, gone: &[VehicleId]) {
        self.members.retain(|id| !gone.contains(id));
    }

    /// Replaces the member order after an ordering reconciliation.
    /// The new order must be a permutation of the current members.
    pub(crate) fn set_order(&mut self, order: Vec<VehicleId>) {
        debug_assert_eq!(order.len(), self.members.len());
        self.members = order.into_iter().collect();
    }
}
